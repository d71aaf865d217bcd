use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{GenerationResult, MediaItem, Modality, ProviderId};

use super::shapes::{decode_audio, decode_images, decode_video_submit, video_item};
use super::{single_result, GenerationAdapter, GenerationRequest, Submission};
use crate::http::{ProxyBody, ProxyClient};

/// Chutes endpoints answer with raw media bytes for most models and JSON
/// for a few; the reply's content type decides which. Every route is
/// synchronous.
pub struct ChutesAdapter {
    client: ProxyClient,
    modality: Modality,
}

impl ChutesAdapter {
    pub fn new(client: ProxyClient, modality: Modality) -> Self {
        Self { client, modality }
    }
}

impl GenerationAdapter for ChutesAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Chutes
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn submit(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        let provider = self.provider();
        let reply = self
            .client
            .post_json(provider, self.modality.as_str(), &request.proxy_body())?;
        let result = match reply {
            ProxyBody::Binary { data, .. } if data.is_empty() => {
                return Err(StudioError::EmptyResult(provider.to_string()))
            }
            ProxyBody::Binary { data, mime_type } => {
                let mime_type = if mime_type == "application/octet-stream" {
                    self.modality.default_mime().to_string()
                } else {
                    mime_type
                };
                single_result(MediaItem::bytes(self.modality, data, mime_type))
            }
            ProxyBody::Json(payload) => match self.modality {
                Modality::Image => GenerationResult::Images(decode_images(provider, &payload)?),
                Modality::Audio => GenerationResult::Audio(decode_audio(provider, &payload)?),
                Modality::Video => {
                    let shape = decode_video_submit(provider, &payload)?;
                    let item = video_item(provider, &shape)?.ok_or_else(|| {
                        StudioError::unrecognized(provider.as_str(), "unexpected async video handle")
                    })?;
                    GenerationResult::Video(item)
                }
            },
        };
        Submission::Ready(result).localized(&self.client, provider, &request.credential)
    }
}
