use super::registry::{Capability, ModelRegistry, ModelSpec};
use crate::media::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolves a model for `provider` and `capability`. A requested id the
    /// catalog does not know is passed through as-is when it is a plausible
    /// vendor id, since providers add models faster than the catalog does.
    pub fn select(
        &self,
        provider: ProviderId,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = if let Some(requested_value) = requested {
            match self.registry.get(requested_value) {
                Some(model) if model.provider == provider && model.supports(capability) => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(_) => format!(
                    "Requested model '{requested_value}' unavailable for {provider} {capability}."
                ),
                None if provider != ProviderId::Dryrun => {
                    return Ok(ModelSelection {
                        model: ModelSpec::new(requested_value, provider, &[capability]),
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                None => format!("Unknown dryrun model '{requested_value}'."),
            }
        } else {
            "No model specified; using default.".to_string()
        };

        let candidates = self.registry.for_provider(provider, capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!("No {capability} models available for {provider}."));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
