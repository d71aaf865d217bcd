//! Response decoders for the proxy payloads.
//!
//! Every shape a provider is known to return is an explicit variant. A body
//! that matches none of them becomes `StudioError::UnrecognizedShape` with the
//! top-level keys it did carry; a body that matches but yields no media
//! becomes `StudioError::EmptyResult`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{decode_base64, parse_data_uri, MediaItem, Modality, ProviderId};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct InlineMedia {
    pub data: String,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImageEntry {
    Inline(InlineMedia),
    Remote {
        url: String,
        #[serde(default, rename = "mimeType", alias = "mime_type")]
        mime_type: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded", alias = "bytes_base64_encoded")]
    bytes: String,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OpenAiImage {
    Base64 { b64_json: String },
    Url { url: String },
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CandidatePart {
    Inline {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineMedia,
    },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatImageMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatImageMessage {
    #[serde(default)]
    images: Vec<ChatImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatImage {
    image_url: ChatImageUrl,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImageResponse {
    Images { images: Vec<ImageEntry> },
    Predictions { predictions: Vec<Prediction> },
    OpenAi { data: Vec<OpenAiImage> },
    Candidates { candidates: Vec<Candidate> },
    ChatCompletion { choices: Vec<ChatChoice> },
}

/// Reply to a video submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VideoSubmitShape {
    Operation { name: String },
    Job { id: String },
    Inline { video: InlineMedia },
    Url {
        #[serde(rename = "videoUrl", alias = "video_url")]
        video_url: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Message(String),
    Detail { message: String },
    Other(Value),
}

impl ErrorField {
    fn into_message(self) -> String {
        match self {
            Self::Message(message) | Self::Detail { message } => message,
            Self::Other(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct VideoPollRaw {
    done: bool,
    #[serde(default, rename = "videoUrl", alias = "video_url")]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<ErrorField>,
}

/// Reply to a video status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoPollShape {
    Running,
    Failed(String),
    Finished { video_url: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AudioResponse {
    Inline { audio: InlineMedia },
    Url {
        #[serde(rename = "audioUrl", alias = "audio_url")]
        audio_url: String,
    },
}

fn decode_shape<T: DeserializeOwned>(provider: ProviderId, what: &str, payload: &Value) -> StudioResult<T> {
    if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
        let message = serde_json::from_value::<ErrorField>(error.clone())
            .map(ErrorField::into_message)
            .unwrap_or_else(|_| error.to_string());
        return Err(StudioError::provider(provider.as_str(), None, message));
    }
    serde_json::from_value(payload.clone()).map_err(|_| {
        StudioError::unrecognized(provider.as_str(), format!("{what}: {}", describe_keys(payload)))
    })
}

fn describe_keys(payload: &Value) -> String {
    match payload {
        Value::Object(obj) if obj.is_empty() => "empty object".to_string(),
        Value::Object(obj) => format!(
            "keys [{}]",
            obj.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        ),
        Value::Array(rows) => format!("array of {}", rows.len()),
        Value::Null => "null".to_string(),
        other => format!("scalar {}", other),
    }
}

fn inline_item(provider: ProviderId, modality: Modality, media: &InlineMedia) -> Option<MediaItem> {
    if let Some((mime_type, data)) = parse_data_uri(&media.data) {
        return Some(MediaItem::bytes(modality, data, mime_type));
    }
    let Some(data) = decode_base64(&media.data) else {
        warn!(%provider, %modality, "skipping media entry with invalid base64");
        return None;
    };
    let mime_type = media
        .mime_type
        .clone()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| modality.default_mime().to_string());
    Some(MediaItem::bytes(modality, data, mime_type))
}

fn url_item(modality: Modality, url: &str, mime_type: Option<String>) -> Option<MediaItem> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if let Some((mime_type, data)) = parse_data_uri(url) {
        return Some(MediaItem::bytes(modality, data, mime_type));
    }
    Some(MediaItem::remote(modality, url, mime_type))
}

pub fn decode_images(provider: ProviderId, payload: &Value) -> StudioResult<Vec<MediaItem>> {
    let shape: ImageResponse = decode_shape(provider, "image response", payload)?;
    let modality = Modality::Image;
    let items: Vec<MediaItem> = match shape {
        ImageResponse::Images { images } => images
            .iter()
            .filter_map(|entry| match entry {
                ImageEntry::Inline(media) => inline_item(provider, modality, media),
                ImageEntry::Remote { url, mime_type } => url_item(modality, url, mime_type.clone()),
            })
            .collect(),
        ImageResponse::Predictions { predictions } => predictions
            .into_iter()
            .filter_map(|row| {
                inline_item(
                    provider,
                    modality,
                    &InlineMedia {
                        data: row.bytes,
                        mime_type: row.mime_type,
                    },
                )
            })
            .collect(),
        ImageResponse::OpenAi { data } => data
            .into_iter()
            .filter_map(|row| match row {
                OpenAiImage::Base64 { b64_json } => inline_item(
                    provider,
                    modality,
                    &InlineMedia {
                        data: b64_json,
                        mime_type: None,
                    },
                ),
                OpenAiImage::Url { url } => url_item(modality, &url, None),
            })
            .collect(),
        ImageResponse::Candidates { candidates } => candidates
            .iter()
            .flat_map(|candidate| candidate.content.parts.iter())
            .filter_map(|part| match part {
                CandidatePart::Inline { inline_data } => inline_item(provider, modality, inline_data),
                CandidatePart::Other(_) => None,
            })
            .collect(),
        ImageResponse::ChatCompletion { choices } => choices
            .iter()
            .flat_map(|choice| choice.message.images.iter())
            .filter_map(|image| url_item(modality, &image.image_url.url, None))
            .collect(),
    };
    if items.is_empty() {
        return Err(StudioError::EmptyResult(provider.to_string()));
    }
    Ok(items)
}

pub fn decode_video_submit(provider: ProviderId, payload: &Value) -> StudioResult<VideoSubmitShape> {
    let shape: VideoSubmitShape = decode_shape(provider, "video submission", payload)?;
    match &shape {
        VideoSubmitShape::Operation { name } if name.trim().is_empty() => Err(
            StudioError::unrecognized(provider.as_str(), "empty operation name"),
        ),
        VideoSubmitShape::Job { id } if id.trim().is_empty() => {
            Err(StudioError::unrecognized(provider.as_str(), "empty job id"))
        }
        _ => Ok(shape),
    }
}

/// Turns a synchronous video reply into a media item.
pub fn video_item(provider: ProviderId, shape: &VideoSubmitShape) -> StudioResult<Option<MediaItem>> {
    match shape {
        VideoSubmitShape::Inline { video } => inline_item(provider, Modality::Video, video)
            .map(Some)
            .ok_or_else(|| StudioError::EmptyResult(provider.to_string())),
        VideoSubmitShape::Url { video_url } => Ok(url_item(Modality::Video, video_url, None)),
        VideoSubmitShape::Operation { .. } | VideoSubmitShape::Job { .. } => Ok(None),
    }
}

pub fn decode_video_poll(provider: ProviderId, payload: &Value) -> StudioResult<VideoPollShape> {
    let raw: VideoPollRaw = serde_json::from_value(payload.clone()).map_err(|_| {
        StudioError::unrecognized(provider.as_str(), format!("video status: {}", describe_keys(payload)))
    })?;
    if let Some(error) = raw.error {
        let message = error.into_message();
        if !message.trim().is_empty() && message != "null" {
            return Ok(VideoPollShape::Failed(message));
        }
    }
    if !raw.done {
        return Ok(VideoPollShape::Running);
    }
    Ok(VideoPollShape::Finished {
        video_url: raw.video_url.filter(|url| !url.trim().is_empty()),
    })
}

pub fn decode_audio(provider: ProviderId, payload: &Value) -> StudioResult<MediaItem> {
    let shape: AudioResponse = decode_shape(provider, "audio response", payload)?;
    let item = match shape {
        AudioResponse::Inline { audio } => inline_item(provider, Modality::Audio, &audio),
        AudioResponse::Url { audio_url } => url_item(Modality::Audio, &audio_url, None),
    };
    let item = item.ok_or_else(|| StudioError::EmptyResult(provider.to_string()))?;
    Ok(wrap_raw_pcm(item))
}

/// Raw 16-bit PCM (`audio/L16;rate=24000`, `audio/pcm`) is not playable as
/// is; give it a WAV header.
fn wrap_raw_pcm(item: MediaItem) -> MediaItem {
    let mime = item.mime_type().to_ascii_lowercase();
    if !(mime.starts_with("audio/l16") || mime.starts_with("audio/pcm")) {
        return item;
    }
    let Some(samples) = item.payload.bytes() else {
        return item;
    };
    let rate = mime
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|value| value.parse::<u32>().ok())
        .unwrap_or(24_000);
    MediaItem {
        id: item.id.clone(),
        modality: item.modality,
        payload: studio_contracts::media::MediaPayload::Bytes {
            data: wav_from_pcm16(samples, rate, 1),
            mime_type: "audio/wav".to_string(),
        },
    }
}

/// Little-endian 16-bit PCM wrapped in a canonical 44-byte RIFF header.
pub fn wav_from_pcm16(samples: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = samples.len() as u32;

    let mut out = Vec::with_capacity(44 + samples.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(samples);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use studio_contracts::error::ErrorKind;
    use studio_contracts::media::{MediaPayload, ProviderId};

    use super::*;

    #[test]
    fn decodes_inline_and_remote_images() -> anyhow::Result<()> {
        let payload = json!({"images": [
            {"data": "aGk=", "mimeType": "image/jpeg"},
            {"url": "https://cdn.example/a.png"},
        ]});
        let items = decode_images(ProviderId::Navy, &payload)?;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].payload,
            MediaPayload::Bytes {
                data: b"hi".to_vec(),
                mime_type: "image/jpeg".to_string()
            }
        );
        assert!(matches!(&items[1].payload, MediaPayload::Remote { url, .. } if url.ends_with("a.png")));
        Ok(())
    }

    #[test]
    fn accepts_both_prediction_field_spellings() -> anyhow::Result<()> {
        let camel = json!({"predictions": [{"bytesBase64Encoded": "aGk="}]});
        let snake = json!({"predictions": [{"bytes_base64_encoded": "aGk=", "mime_type": "image/webp"}]});
        assert_eq!(decode_images(ProviderId::Gemini, &camel)?.len(), 1);
        assert_eq!(decode_images(ProviderId::Gemini, &snake)?[0].mime_type(), "image/webp");
        Ok(())
    }

    #[test]
    fn decodes_candidate_parts_and_chat_images() -> anyhow::Result<()> {
        let candidates = json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inlineData": {"mimeType": "image/png", "data": "aGk="}},
        ]}}]});
        assert_eq!(decode_images(ProviderId::Gemini, &candidates)?.len(), 1);

        let chat = json!({"choices": [{"message": {"images": [
            {"image_url": {"url": "data:image/png;base64,aGk="}}
        ]}}]});
        let items = decode_images(ProviderId::OpenRouter, &chat)?;
        assert_eq!(items[0].payload.bytes(), Some(&b"hi"[..]));
        Ok(())
    }

    #[test]
    fn unknown_and_empty_shapes_are_named_errors() {
        let err = decode_images(ProviderId::Chutes, &json!({"output": "x"})).err();
        assert_eq!(err.as_ref().map(StudioError::kind), Some(ErrorKind::UnrecognizedShape));
        assert!(err.is_some_and(|err| err.to_string().contains("output")));

        let err = decode_images(ProviderId::Navy, &json!({"images": []})).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::EmptyResult));

        let err = decode_images(ProviderId::Navy, &json!({"error": "quota exceeded"})).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Provider));
    }

    #[test]
    fn video_submission_variants() -> anyhow::Result<()> {
        assert!(matches!(
            decode_video_submit(ProviderId::Gemini, &json!({"name": "operations/123"}))?,
            VideoSubmitShape::Operation { name } if name == "operations/123"
        ));
        assert!(matches!(
            decode_video_submit(ProviderId::Navy, &json!({"id": "job-9"}))?,
            VideoSubmitShape::Job { .. }
        ));
        let url = decode_video_submit(ProviderId::Chutes, &json!({"videoUrl": "https://v/1.mp4"}))?;
        assert!(video_item(ProviderId::Chutes, &url)?.is_some());
        assert!(decode_video_submit(ProviderId::Navy, &json!({"id": " "})).is_err());
        Ok(())
    }

    #[test]
    fn video_poll_states() -> anyhow::Result<()> {
        assert_eq!(
            decode_video_poll(ProviderId::Navy, &json!({"done": false}))?,
            VideoPollShape::Running
        );
        assert_eq!(
            decode_video_poll(ProviderId::Navy, &json!({"done": true, "videoUrl": "https://v"}))?,
            VideoPollShape::Finished {
                video_url: Some("https://v".to_string())
            }
        );
        assert_eq!(
            decode_video_poll(ProviderId::Gemini, &json!({"done": true, "error": {"message": "blocked"}}))?,
            VideoPollShape::Failed("blocked".to_string())
        );
        assert!(decode_video_poll(ProviderId::Navy, &json!({"status": "ok"})).is_err());
        Ok(())
    }

    #[test]
    fn raw_pcm_audio_gets_a_wav_header() -> anyhow::Result<()> {
        let payload = json!({"audio": {"data": "AAAAAA==", "mimeType": "audio/L16;codec=pcm;rate=24000"}});
        let item = decode_audio(ProviderId::Gemini, &payload)?;
        assert_eq!(item.mime_type(), "audio/wav");
        let bytes = item.payload.bytes().unwrap_or_default();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 4);
        assert_eq!(u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 24_000);
        Ok(())
    }
}
