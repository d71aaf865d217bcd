use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::media::{Modality, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Image,
    Video,
    Audio,
    Chat,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Chat => "chat",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case("chat") {
            return Some(Self::Chat);
        }
        Modality::parse(raw).map(Self::from)
    }
}

impl From<Modality> for Capability {
    fn from(modality: Modality) -> Self {
        match modality {
            Modality::Image => Self::Image,
            Modality::Video => Self::Video,
            Modality::Audio => Self::Audio,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: ProviderId,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, provider: ProviderId, capabilities: &[Capability]) -> Self {
        Self {
            name: name.into(),
            provider,
            capabilities: capabilities.to_vec(),
            context_window: None,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models in catalog order. The first model per provider and
/// capability is that pair's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn for_provider(&self, provider: ProviderId, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }

    /// Adds model ids fetched from a provider's listing endpoint (or read
    /// back from the settings cache). Existing entries keep their metadata.
    pub fn merge_listing(
        &mut self,
        provider: ProviderId,
        capability: Capability,
        names: &[String],
    ) -> usize {
        let mut added = 0;
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.models.get_mut(name) {
                Some(existing) => {
                    if existing.provider == provider && !existing.supports(capability) {
                        existing.capabilities.push(capability);
                    }
                }
                None => {
                    self.models
                        .insert(name.to_string(), ModelSpec::new(name, provider, &[capability]));
                    added += 1;
                }
            }
        }
        added
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    use Capability::{Audio, Chat, Image, Video};

    let mut map = IndexMap::new();
    let mut insert = |name: &str,
                      provider: ProviderId,
                      capabilities: &[Capability],
                      context_window: Option<u64>| {
        let mut spec = ModelSpec::new(name, provider, capabilities);
        spec.context_window = context_window;
        map.insert(name.to_string(), spec);
    };

    insert("gemini-2.5-flash-image", ProviderId::Gemini, &[Image], None);
    insert("imagen-4.0-generate-001", ProviderId::Gemini, &[Image], None);
    insert("veo-3.0-generate-001", ProviderId::Gemini, &[Video], None);
    insert("veo-3.0-fast-generate-001", ProviderId::Gemini, &[Video], None);
    insert("gemini-2.5-flash-preview-tts", ProviderId::Gemini, &[Audio], None);
    insert("gemini-2.5-flash", ProviderId::Gemini, &[Chat], Some(1_048_576));

    insert("flux.1-schnell", ProviderId::Navy, &[Image], None);
    insert("gpt-image-1", ProviderId::Navy, &[Image], None);
    insert("veo-3-fast", ProviderId::Navy, &[Video], None);
    insert("tts-1", ProviderId::Navy, &[Audio], None);
    insert("gpt-4o-mini", ProviderId::Navy, &[Chat], Some(128_000));

    insert(
        "google/gemini-2.5-flash-image-preview",
        ProviderId::OpenRouter,
        &[Image],
        None,
    );
    insert("openai/gpt-4o-mini", ProviderId::OpenRouter, &[Chat], Some(128_000));

    insert("chroma", ProviderId::Chutes, &[Image], None);
    insert("wan2.1-14b", ProviderId::Chutes, &[Video], None);
    insert("kokoro", ProviderId::Chutes, &[Audio], None);
    insert("deepseek-ai/DeepSeek-V3-0324", ProviderId::Chutes, &[Chat], Some(64_000));

    insert("dryrun-image-1", ProviderId::Dryrun, &[Image], None);
    insert("dryrun-video-1", ProviderId::Dryrun, &[Video], None);
    insert("dryrun-audio-1", ProviderId::Dryrun, &[Audio], None);
    insert("dryrun-chat-1", ProviderId::Dryrun, &[Chat], Some(8192));

    map
}

#[cfg(test)]
mod tests {
    use super::{Capability, ModelRegistry};
    use crate::media::{Modality, ProviderId};

    #[test]
    fn every_provider_has_an_image_model() {
        let registry = ModelRegistry::default();
        for provider in ProviderId::ALL {
            assert!(
                !registry.for_provider(provider, Capability::Image).is_empty(),
                "{provider} has no image model"
            );
        }
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::default();
        assert!(registry.ensure("veo-3.0-generate-001", Capability::Video).is_some());
        assert!(registry.ensure("veo-3.0-generate-001", Capability::Image).is_none());
        assert!(registry.ensure("missing", Capability::Image).is_none());
        assert_eq!(Capability::from(Modality::Audio), Capability::Audio);
        assert_eq!(Capability::parse("chat"), Some(Capability::Chat));
    }

    #[test]
    fn merge_listing_adds_unknown_models_once() {
        let mut registry = ModelRegistry::default();
        let names = vec![
            "chutes/new-model".to_string(),
            " ".to_string(),
            "kokoro".to_string(),
        ];
        assert_eq!(
            registry.merge_listing(ProviderId::Chutes, Capability::Chat, &names),
            1
        );
        assert_eq!(
            registry.merge_listing(ProviderId::Chutes, Capability::Chat, &names),
            0
        );
        assert!(registry
            .ensure("kokoro", Capability::Chat)
            .is_some_and(|model| model.supports(Capability::Audio)));
    }
}
