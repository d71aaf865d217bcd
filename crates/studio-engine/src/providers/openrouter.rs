use studio_contracts::error::StudioResult;
use studio_contracts::media::{GenerationResult, MediaItem, Modality, ProviderId};

use super::shapes::decode_images;
use super::{GenerationAdapter, GenerationRequest, Submission};
use crate::http::{ProxyBody, ProxyClient};

/// Image generation through OpenRouter's chat-completions image output.
/// Images arrive as `data:` URIs inside `choices[].message.images`.
pub struct OpenRouterAdapter {
    client: ProxyClient,
}

impl OpenRouterAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

impl GenerationAdapter for OpenRouterAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn modality(&self) -> Modality {
        Modality::Image
    }

    fn submit(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        let provider = self.provider();
        let mut body = request.proxy_body();
        if let Some(map) = body.as_object_mut() {
            map.entry("modalities")
                .or_insert_with(|| serde_json::json!(["image", "text"]));
        }
        let images = match self.client.post_json(provider, "image", &body)? {
            ProxyBody::Json(payload) => decode_images(provider, &payload)?,
            ProxyBody::Binary { data, mime_type } => {
                vec![MediaItem::bytes(Modality::Image, data, mime_type)]
            }
        };
        Submission::Ready(GenerationResult::Images(images)).localized(
            &self.client,
            provider,
            &request.credential,
        )
    }
}
