use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{Credential, GenerationResult, MediaItem, Modality, ProviderId};

use super::shapes::{decode_audio, decode_images, decode_video_poll, decode_video_submit, video_item};
use super::shapes::{VideoPollShape, VideoSubmitShape};
use super::{
    single_result, AsyncHandle, GenerationAdapter, GenerationRequest, PollOutcome, Submission,
};
use crate::http::{ProxyBody, ProxyClient};

/// OpenAI-compatible NavyAI routes. Video jobs are polled by id and the
/// finished clip is fetched through the authenticated media route, since
/// the vendor URL requires the bearer token.
pub struct NavyAdapter {
    client: ProxyClient,
    modality: Modality,
}

impl NavyAdapter {
    pub fn new(client: ProxyClient, modality: Modality) -> Self {
        Self { client, modality }
    }

    fn dispatch(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        let provider = ProviderId::Navy;
        let reply = self
            .client
            .post_json(provider, self.modality.as_str(), &request.proxy_body())?;
        let payload = match reply {
            ProxyBody::Json(payload) => payload,
            ProxyBody::Binary { data, mime_type } => {
                return Ok(Submission::Ready(single_result(MediaItem::bytes(
                    self.modality,
                    data,
                    mime_type,
                ))))
            }
        };
        match self.modality {
            Modality::Image => Ok(Submission::Ready(GenerationResult::Images(decode_images(
                provider, &payload,
            )?))),
            Modality::Audio => Ok(Submission::Ready(GenerationResult::Audio(decode_audio(
                provider, &payload,
            )?))),
            Modality::Video => {
                let shape = decode_video_submit(provider, &payload)?;
                if let Some(item) = video_item(provider, &shape)? {
                    return Ok(Submission::Ready(GenerationResult::Video(item)));
                }
                let (VideoSubmitShape::Job { id } | VideoSubmitShape::Operation { name: id }) = shape
                else {
                    return Err(StudioError::unrecognized(provider.as_str(), "video submission"));
                };
                Ok(Submission::Pending(AsyncHandle {
                    provider,
                    modality: Modality::Video,
                    id,
                    model: request.model.clone(),
                }))
            }
        }
    }
}

impl GenerationAdapter for NavyAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Navy
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
        let payload = match self
            .client
            .get(provider, "video", &[("id", handle.id.as_str())], credential)?
        {
            ProxyBody::Json(payload) => payload,
            ProxyBody::Binary { .. } => {
                return Err(StudioError::unrecognized(
                    provider.as_str(),
                    "binary body on video status route",
                ))
            }
        };
        match decode_video_poll(provider, &payload)? {
            VideoPollShape::Running => Ok(PollOutcome::Pending),
            VideoPollShape::Failed(message) => Ok(PollOutcome::Failed(message)),
            VideoPollShape::Finished { video_url: None } => {
                Err(StudioError::EmptyResult(provider.to_string()))
            }
            VideoPollShape::Finished {
                video_url: Some(url),
            } => {
                let (data, mime_type) = self.client.fetch_media(provider, &url, credential)?;
                if data.is_empty() {
                    return Err(StudioError::EmptyResult(provider.to_string()));
                }
                Ok(PollOutcome::Done(GenerationResult::Video(MediaItem::bytes(
                    Modality::Video,
                    data,
                    mime_type,
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use studio_contracts::error::{ErrorKind, StudioError};
    use studio_contracts::media::{Credential, Modality, ProviderId};

    use super::NavyAdapter;
    use crate::http::ProxyClient;
    use crate::providers::{GenerationAdapter, GenerationRequest, PollOutcome, Submission};

    fn request(modality: Modality, model: &str, key: &str) -> GenerationRequest {
        GenerationRequest::new(ProviderId::Navy, modality, model, "a lighthouse", Credential::new(key))
    }

    #[test]
    fn video_job_finishes_through_the_media_route() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _submit = server
            .mock("POST", "/api/navy/video")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"job-9"}"#)
            .create();
        let _status = server
            .mock("GET", "/api/navy/video")
            .match_query(Matcher::UrlEncoded("id".into(), "job-9".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"done":true,"videoUrl":"https://api.navy/v/job-9.mp4"}"#)
            .create();
        let media = server
            .mock("GET", "/api/navy/media")
            .match_query(Matcher::UrlEncoded("url".into(), "https://api.navy/v/job-9.mp4".into()))
            .match_header("authorization", "Bearer nk-1")
            .with_header("content-type", "video/mp4")
            .with_body(b"mp4-bytes")
            .create();

        let adapter = NavyAdapter::new(ProxyClient::new(server.url()), Modality::Video);
        let request = request(Modality::Video, "veo-3-fast", "nk-1");
        let Submission::Pending(handle) = adapter.submit(&request)? else {
            anyhow::bail!("expected a pending job");
        };
        assert_eq!(handle.id, "job-9");
        let PollOutcome::Done(result) = adapter.poll(&handle, &request.credential)? else {
            anyhow::bail!("expected a finished job");
        };
        assert_eq!(result.into_items()[0].payload.bytes(), Some(&b"mp4-bytes"[..]));
        media.assert();
        Ok(())
    }

    #[test]
    fn failed_job_reports_vendor_message() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _status = server
            .mock("GET", "/api/navy/video")
            .match_query(Matcher::UrlEncoded("id".into(), "job-bad".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"done":true,"error":"content policy"}"#)
            .create();
        let adapter = NavyAdapter::new(ProxyClient::new(server.url()), Modality::Video);
        let handle = crate::providers::AsyncHandle {
            provider: ProviderId::Navy,
            modality: Modality::Video,
            id: "job-bad".to_string(),
            model: "veo-3-fast".to_string(),
        };
        assert_eq!(
            adapter.poll(&handle, &Credential::new("nk-1"))?,
            PollOutcome::Failed("content policy".to_string())
        );
        Ok(())
    }

    #[test]
    fn image_urls_are_localized_before_returning() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _submit = server
            .mock("POST", "/api/navy/image")
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"url":"https://api.navy/i/1.png"}]}"#)
            .create();
        let _media = server
            .mock("GET", "/api/navy/media")
            .match_query(Matcher::UrlEncoded("url".into(), "https://api.navy/i/1.png".into()))
            .with_header("content-type", "image/png")
            .with_body(b"png-bytes")
            .create();

        let adapter = NavyAdapter::new(ProxyClient::new(server.url()), Modality::Image);
        let Submission::Ready(result) = adapter.submit(&request(Modality::Image, "flux.1-schnell", "nk-1"))?
        else {
            anyhow::bail!("image generation is synchronous");
        };
        let items = result.into_items();
        assert_eq!(items[0].payload.bytes(), Some(&b"png-bytes"[..]));
        assert_eq!(items[0].mime_type(), "image/png");
        Ok(())
    }

    #[test]
    fn rejected_key_and_server_errors_map_to_kinds() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _denied = server
            .mock("POST", "/api/navy/image")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"invalid api key"}}"#)
            .create();
        let _broken = server
            .mock("POST", "/api/navy/audio")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"upstream timeout"}"#)
            .create();

        let client = ProxyClient::new(server.url());
        let err = NavyAdapter::new(client.clone(), Modality::Image)
            .submit(&request(Modality::Image, "flux.1-schnell", "bad"))
            .err();
        assert_eq!(err.as_ref().map(StudioError::kind), Some(ErrorKind::Auth));
        assert!(err.is_some_and(|err| err.to_string().contains("invalid api key")));

        let err = NavyAdapter::new(client, Modality::Audio)
            .submit(&request(Modality::Audio, "tts-1", "nk-1"))
            .err();
        assert_eq!(
            err,
            Some(StudioError::provider("navy", Some(500), "upstream timeout"))
        );
        Ok(())
    }
}
