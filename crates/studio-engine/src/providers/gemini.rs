use serde_json::Value;
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{
    Credential, GenerationResult, MediaItem, MediaPayload, Modality, ProviderId,
};

use super::shapes::{decode_audio, decode_images, decode_video_poll, decode_video_submit, video_item};
use super::shapes::{VideoPollShape, VideoSubmitShape};
use super::{
    single_result, AsyncHandle, GenerationAdapter, GenerationRequest, PollOutcome, Submission,
};
use crate::http::{ProxyBody, ProxyClient};

/// Gemini image (inline base64), Veo video (long-running operation plus a
/// separate download) and TTS audio.
pub struct GeminiAdapter {
    client: ProxyClient,
    modality: Modality,
}

impl GeminiAdapter {
    pub fn new(client: ProxyClient, modality: Modality) -> Self {
        Self { client, modality }
    }

    fn body(request: &GenerationRequest) -> Value {
        let mut body = request.proxy_body();
        if let Value::Object(map) = &mut body {
            if request.modality == Modality::Audio {
                let voice = request.param_str("voice").unwrap_or("Kore").to_string();
                map.insert("voice".to_string(), Value::String(voice));
            }
            if request.modality == Modality::Image && !map.contains_key("numberOfImages") {
                let count = request.param_u64("n").unwrap_or(1).clamp(1, 4);
                map.insert("numberOfImages".to_string(), Value::from(count));
            }
        }
        body
    }

    fn dispatch(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        let provider = ProviderId::Gemini;
        let route = self.modality.as_str();
        let reply = self.client.post_json(provider, route, &Self::body(request))?;
        match (self.modality, reply) {
            (Modality::Image, ProxyBody::Json(payload)) => Ok(Submission::Ready(
                GenerationResult::Images(decode_images(provider, &payload)?),
            )),
            (Modality::Video, ProxyBody::Json(payload)) => {
                let shape = decode_video_submit(provider, &payload)?;
                if let Some(item) = video_item(provider, &shape)? {
                    return Ok(Submission::Ready(GenerationResult::Video(item)));
                }
                let id = match shape {
                    VideoSubmitShape::Operation { name } => name,
                    VideoSubmitShape::Job { id } => id,
                    _ => return Err(StudioError::unrecognized(provider.as_str(), "video submission")),
                };
                Ok(Submission::Pending(AsyncHandle {
                    provider,
                    modality: Modality::Video,
                    id,
                    model: request.model.clone(),
                }))
            }
            (Modality::Audio, ProxyBody::Json(payload)) => Ok(Submission::Ready(
                GenerationResult::Audio(decode_audio(provider, &payload)?),
            )),
            (modality, ProxyBody::Binary { data, mime_type }) => Ok(Submission::Ready(
                single_result(MediaItem::bytes(modality, data, mime_type)),
            )),
        }
    }

    fn download_operation(&self, handle: &AsyncHandle, credential: &Credential) -> StudioResult<MediaItem> {
        let provider = ProviderId::Gemini;
        match self.client.get(
            provider,
            "video/download",
            &[("operation", handle.id.as_str())],
            credential,
        )? {
            ProxyBody::Binary { data, mime_type } if !data.is_empty() => {
                Ok(MediaItem::bytes(Modality::Video, data, mime_type))
            }
            ProxyBody::Binary { .. } => Err(StudioError::EmptyResult(provider.to_string())),
            ProxyBody::Json(payload) => {
                let shape = decode_video_submit(provider, &payload)?;
                match video_item(provider, &shape)? {
                    Some(MediaItem {
                        payload: MediaPayload::Remote { url, .. },
                        ..
                    }) => {
                        let (data, mime_type) = self.client.fetch_media(provider, &url, credential)?;
                        Ok(MediaItem::bytes(Modality::Video, data, mime_type))
                    }
                    Some(item) => Ok(item),
                    None => Err(StudioError::unrecognized(
                        provider.as_str(),
                        "download returned another operation",
                    )),
                }
            }
        }
    }
}

impl GenerationAdapter for GeminiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn submit(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        self.dispatch(request)?
            .localized(&self.client, self.provider(), &request.credential)
    }

    fn poll(&self, handle: &AsyncHandle, credential: &Credential) -> StudioResult<PollOutcome> {
        let provider = self.provider();
        let payload = match self.client.get(
            provider,
            "video",
            &[("operation", handle.id.as_str())],
            credential,
        )? {
            ProxyBody::Json(payload) => payload,
            ProxyBody::Binary { data, mime_type } => {
                return Ok(PollOutcome::Done(GenerationResult::Video(MediaItem::bytes(
                    Modality::Video,
                    data,
                    mime_type,
                ))))
            }
        };
        match decode_video_poll(provider, &payload)? {
            VideoPollShape::Running => Ok(PollOutcome::Pending),
            VideoPollShape::Failed(message) => Ok(PollOutcome::Failed(message)),
            VideoPollShape::Finished { .. } => Ok(PollOutcome::Done(GenerationResult::Video(
                self.download_operation(handle, credential)?,
            ))),
        }
    }
}
