use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Video,
    Audio,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Image, Modality::Video, Modality::Audio];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Some(Self::Image),
            "video" | "videos" => Some(Self::Video),
            "audio" | "tts" | "speech" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Video => "video/mp4",
            Self::Audio => "audio/wav",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    Navy,
    OpenRouter,
    Chutes,
    Dryrun,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Gemini,
        ProviderId::Navy,
        ProviderId::OpenRouter,
        ProviderId::Chutes,
        ProviderId::Dryrun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Navy => "navy",
            Self::OpenRouter => "openrouter",
            Self::Chutes => "chutes",
            Self::Dryrun => "dryrun",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "navy" | "navyai" => Some(Self::Navy),
            "openrouter" => Some(Self::OpenRouter),
            "chutes" => Some(Self::Chutes),
            "dryrun" => Some(Self::Dryrun),
            _ => None,
        }
    }

    /// Environment variable consulted when no credential is stored in settings.
    pub fn credential_env(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Navy => Some("NAVY_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Chutes => Some("CHUTES_API_KEY"),
            Self::Dryrun => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque bearer token supplied by the user. Never printed.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    Bytes { data: Vec<u8>, mime_type: String },
    Remote { url: String, mime_type: Option<String> },
}

impl MediaPayload {
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Bytes { mime_type, .. } => Some(mime_type.as_str()),
            Self::Remote { mime_type, .. } => mime_type.as_deref(),
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes { data, .. } => Some(data.as_slice()),
            Self::Remote { .. } => None,
        }
    }

    pub fn remote_url(&self) -> Option<&str> {
        match self {
            Self::Bytes { .. } => None,
            Self::Remote { url, .. } => Some(url.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub modality: Modality,
    pub payload: MediaPayload,
}

impl MediaItem {
    pub fn new(modality: Modality, payload: MediaPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modality,
            payload,
        }
    }

    pub fn bytes(modality: Modality, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self::new(
            modality,
            MediaPayload::Bytes {
                data,
                mime_type: mime_type.into(),
            },
        )
    }

    pub fn remote(modality: Modality, url: impl Into<String>, mime_type: Option<String>) -> Self {
        Self::new(
            modality,
            MediaPayload::Remote {
                url: url.into(),
                mime_type,
            },
        )
    }

    pub fn mime_type(&self) -> &str {
        self.payload
            .mime_type()
            .unwrap_or_else(|| self.modality.default_mime())
    }
}

/// Normalized output of every adapter, whatever shape the vendor replied with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Images(Vec<MediaItem>),
    Video(MediaItem),
    Audio(MediaItem),
}

impl GenerationResult {
    pub fn modality(&self) -> Modality {
        match self {
            Self::Images(_) => Modality::Image,
            Self::Video(_) => Modality::Video,
            Self::Audio(_) => Modality::Audio,
        }
    }

    pub fn items(&self) -> Vec<&MediaItem> {
        match self {
            Self::Images(items) => items.iter().collect(),
            Self::Video(item) | Self::Audio(item) => vec![item],
        }
    }

    pub fn into_items(self) -> Vec<MediaItem> {
        match self {
            Self::Images(items) => items,
            Self::Video(item) | Self::Audio(item) => vec![item],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Images(items) => items.len(),
            Self::Video(_) | Self::Audio(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Images(items) if items.len() == 1 => "1 image".to_string(),
            Self::Images(items) => format!("{} images", items.len()),
            Self::Video(_) => "1 video".to_string(),
            Self::Audio(_) => "1 audio clip".to_string(),
        }
    }
}

pub fn data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(data))
}

pub fn parse_data_uri(raw: &str) -> Option<(String, Vec<u8>)> {
    let rest = raw.strip_prefix("data:")?;
    let (header, body) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = BASE64.decode(body.trim().as_bytes()).ok()?;
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    Some((mime.to_string(), bytes))
}

pub fn decode_base64(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    let body = trimmed
        .split_once(";base64,")
        .map(|(_, body)| body)
        .unwrap_or(trimmed);
    BASE64.decode(body.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_roundtrips_bytes_and_mime() {
        let uri = data_uri("image/png", b"\x89PNG");
        assert!(uri.starts_with("data:image/png;base64,"));
        let (mime, bytes) = parse_data_uri(&uri).unwrap_or_default();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"\x89PNG".to_vec());
        assert!(parse_data_uri("https://example.com/a.png").is_none());
    }

    #[test]
    fn decode_base64_accepts_data_uri_prefix() {
        assert_eq!(decode_base64("aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64("data:text/plain;base64,aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64("not base64!"), None);
    }

    #[test]
    fn credential_debug_never_shows_token() {
        let credential = Credential::new("  sk-secret  ");
        assert_eq!(credential.expose(), "sk-secret");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert!(Credential::new("   ").is_blank());
    }

    #[test]
    fn provider_and_modality_parse_aliases() {
        assert_eq!(ProviderId::parse("NavyAI"), Some(ProviderId::Navy));
        assert_eq!(ProviderId::parse("openrouter"), Some(ProviderId::OpenRouter));
        assert_eq!(Modality::parse("tts"), Some(Modality::Audio));
        assert_eq!(Modality::parse("chat"), None);
    }

    #[test]
    fn generation_result_reports_items() {
        let result = GenerationResult::Images(vec![
            MediaItem::bytes(Modality::Image, vec![1], "image/png"),
            MediaItem::remote(Modality::Image, "https://x/y.png", None),
        ]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.summary(), "2 images");
        assert_eq!(result.items()[1].mime_type(), "image/png");
        assert!(GenerationResult::Images(Vec::new()).is_empty());
    }
}
