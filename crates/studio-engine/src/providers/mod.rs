mod chutes;
mod dryrun;
mod gemini;
mod navy;
mod openrouter;
pub mod shapes;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::jobs::{GenerationJob, ParamBag};
use studio_contracts::media::{
    Credential, GenerationResult, MediaItem, MediaPayload, Modality, ProviderId,
};

use crate::http::ProxyClient;
use crate::polling::PollPolicy;

pub use chutes::ChutesAdapter;
pub use dryrun::DryrunAdapter;
pub use gemini::GeminiAdapter;
pub use navy::NavyAdapter;
pub use openrouter::OpenRouterAdapter;

/// Provider-agnostic input to an adapter.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub provider: ProviderId,
    pub modality: Modality,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: ParamBag,
    pub credential: Credential,
}

impl GenerationRequest {
    pub fn new(
        provider: ProviderId,
        modality: Modality,
        model: impl Into<String>,
        prompt: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            provider,
            modality,
            model: model.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            params: Map::new(),
            credential,
        }
    }

    pub fn from_job(job: &GenerationJob, credential: Credential) -> Self {
        Self {
            provider: job.provider,
            modality: job.modality,
            model: job.model.clone(),
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            params: job.params.clone(),
            credential,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        })
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> StudioResult<()> {
        if self.provider != ProviderId::Dryrun && self.credential.is_blank() {
            return Err(StudioError::Auth(format!(
                "Missing API key for {}. Add one in settings or set {}.",
                self.provider,
                self.provider.credential_env().unwrap_or("the provider key"),
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(StudioError::Validation("Prompt is required.".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(StudioError::Validation("Model is required.".to_string()));
        }
        if self.modality == Modality::Video
            && self.param_str("mode") == Some("image-to-video")
            && self.param_str("image").is_none()
        {
            return Err(StudioError::Validation(
                "Image-to-video needs a source image.".to_string(),
            ));
        }
        Ok(())
    }

    /// JSON body sent to the provider's proxy route. Caller params go in
    /// first so the fixed fields cannot be overridden by them.
    pub fn proxy_body(&self) -> Value {
        let mut body = self.params.clone();
        body.insert("apiKey".to_string(), Value::String(self.credential.expose().to_string()));
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        if let Some(negative) = &self.negative_prompt {
            body.insert("negativePrompt".to_string(), Value::String(negative.clone()));
        }
        Value::Object(body)
    }
}

/// Opaque identifier of a vendor-side operation that must be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncHandle {
    pub provider: ProviderId,
    pub modality: Modality,
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Ready(GenerationResult),
    Pending(AsyncHandle),
}

impl Submission {
    /// Downloads remote media in a ready result through the provider's
    /// media route. Pending handles pass through untouched.
    pub(crate) fn localized(
        self,
        client: &ProxyClient,
        provider: ProviderId,
        credential: &Credential,
    ) -> StudioResult<Self> {
        let result = match self {
            Self::Pending(handle) => return Ok(Self::Pending(handle)),
            Self::Ready(result) => result,
        };
        let localize = |item| localize_item(client, provider, credential, item);
        Ok(Self::Ready(match result {
            GenerationResult::Images(items) => GenerationResult::Images(
                items.into_iter().map(localize).collect::<StudioResult<_>>()?,
            ),
            GenerationResult::Video(item) => GenerationResult::Video(localize(item)?),
            GenerationResult::Audio(item) => GenerationResult::Audio(localize(item)?),
        }))
    }
}

fn localize_item(
    client: &ProxyClient,
    provider: ProviderId,
    credential: &Credential,
    item: MediaItem,
) -> StudioResult<MediaItem> {
    let (url, hint) = match &item.payload {
        MediaPayload::Remote { url, mime_type } => (url.clone(), mime_type.clone()),
        MediaPayload::Bytes { .. } => return Ok(item),
    };
    let (data, fetched) = client.fetch_media(provider, &url, credential)?;
    if data.is_empty() {
        return Err(StudioError::EmptyResult(provider.to_string()));
    }
    let generic = fetched.is_empty() || fetched == "application/octet-stream";
    let mime_type = if generic {
        hint.unwrap_or_else(|| item.modality.default_mime().to_string())
    } else {
        fetched
    };
    Ok(MediaItem {
        id: item.id,
        modality: item.modality,
        payload: MediaPayload::Bytes { data, mime_type },
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(GenerationResult),
    Failed(String),
}

/// One (provider, modality) pair. Adapters hold no per-request state.
pub trait GenerationAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;
    fn modality(&self) -> Modality;
    fn submit(&self, request: &GenerationRequest) -> StudioResult<Submission>;

    fn poll(&self, handle: &AsyncHandle, _credential: &Credential) -> StudioResult<PollOutcome> {
        Err(StudioError::Validation(format!(
            "{} {} does not return async operations (got handle {})",
            self.provider(),
            self.modality(),
            handle.id
        )))
    }

    /// Overrides the configured polling cadence for this adapter.
    fn poll_policy(&self) -> Option<PollPolicy> {
        None
    }
}

/// Wraps one passthrough media item in the result variant for its modality.
pub(crate) fn single_result(item: MediaItem) -> GenerationResult {
    match item.modality {
        Modality::Image => GenerationResult::Images(vec![item]),
        Modality::Video => GenerationResult::Video(item),
        Modality::Audio => GenerationResult::Audio(item),
    }
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<(ProviderId, Modality), Box<dyn GenerationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: GenerationAdapter + 'static>(&mut self, adapter: A) {
        self.adapters
            .insert((adapter.provider(), adapter.modality()), Box::new(adapter));
    }

    pub fn get(&self, provider: ProviderId, modality: Modality) -> Option<&dyn GenerationAdapter> {
        self.adapters
            .get(&(provider, modality))
            .map(|adapter| adapter.as_ref())
    }

    pub fn keys(&self) -> Vec<(ProviderId, Modality)> {
        self.adapters.keys().copied().collect()
    }

    pub fn providers_for(&self, modality: Modality) -> Vec<ProviderId> {
        self.adapters
            .keys()
            .filter(|(_, candidate)| *candidate == modality)
            .map(|(provider, _)| *provider)
            .collect()
    }
}

pub fn default_registry(client: &ProxyClient) -> AdapterRegistry {
    let mut adapters = AdapterRegistry::new();
    for modality in Modality::ALL {
        adapters.register(DryrunAdapter::new(modality));
        adapters.register(GeminiAdapter::new(client.clone(), modality));
        adapters.register(NavyAdapter::new(client.clone(), modality));
        adapters.register(ChutesAdapter::new(client.clone(), modality));
    }
    adapters.register(OpenRouterAdapter::new(client.clone()));
    adapters
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use studio_contracts::error::ErrorKind;
    use studio_contracts::media::{Credential, Modality, ProviderId};

    use super::{default_registry, GenerationRequest};
    use crate::http::ProxyClient;

    fn request(provider: ProviderId, credential: &str) -> GenerationRequest {
        GenerationRequest::new(
            provider,
            Modality::Image,
            "model-x",
            "a cat",
            Credential::new(credential),
        )
    }

    #[test]
    fn validate_rejects_missing_credential_and_prompt() {
        let err = request(ProviderId::Navy, "  ").validate().err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Auth));

        let mut missing_prompt = request(ProviderId::Navy, "sk");
        missing_prompt.prompt = " ".to_string();
        let err = missing_prompt.validate().err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Validation));

        assert!(request(ProviderId::Dryrun, "").validate().is_ok());
    }

    #[test]
    fn image_to_video_requires_source_image() {
        let mut video = request(ProviderId::Gemini, "key");
        video.modality = Modality::Video;
        video.params.insert("mode".to_string(), json!("image-to-video"));
        assert!(video.validate().is_err());
        video.params.insert("image".to_string(), json!("data:image/png;base64,AA=="));
        assert!(video.validate().is_ok());
    }

    #[test]
    fn proxy_body_keeps_fixed_fields() {
        let mut req = request(ProviderId::Navy, "sk-1");
        req.params.insert("prompt".to_string(), json!("hijacked"));
        req.params.insert("aspectRatio".to_string(), json!("16:9"));
        let body = req.proxy_body();
        assert_eq!(body["prompt"], json!("a cat"));
        assert_eq!(body["apiKey"], json!("sk-1"));
        assert_eq!(body["aspectRatio"], json!("16:9"));
    }

    #[test]
    fn default_registry_covers_every_provider() {
        let registry = default_registry(&ProxyClient::new("http://127.0.0.1:9"));
        assert_eq!(registry.keys().len(), 13);
        assert_eq!(registry.providers_for(Modality::Video).len(), 4);
        assert!(registry.get(ProviderId::OpenRouter, Modality::Image).is_some());
        assert!(registry.get(ProviderId::OpenRouter, Modality::Video).is_none());
    }
}
