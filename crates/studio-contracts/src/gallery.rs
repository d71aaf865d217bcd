use serde::{Deserialize, Serialize};

use crate::media::{Modality, ProviderId};

pub const DEFAULT_GALLERY_MAX_ITEMS: usize = 12;

/// Where a renderer finds a gallery item's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayReference {
    /// Object-URL style handle backed by a stored blob; must be released.
    Blob(String),
    /// Self-contained `data:` URI, used when blob storage is unavailable.
    Inline(String),
    /// Remote URL kept when the bytes could not be persisted.
    Remote(String),
}

impl DisplayReference {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blob(value) | Self::Inline(value) | Self::Remote(value) => value,
        }
    }

    pub fn is_blob_derived(&self) -> bool {
        matches!(self, Self::Blob(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub prompt: String,
    pub model: String,
    pub provider: ProviderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMediaItem {
    pub id: String,
    pub modality: Modality,
    pub reference: DisplayReference,
    pub prompt: String,
    pub model: String,
    pub provider: ProviderId,
    pub mime_type: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::DisplayReference;

    #[test]
    fn display_reference_serializes_tagged() -> anyhow::Result<()> {
        let reference = DisplayReference::Blob("blob:studio/1".to_string());
        assert_eq!(
            serde_json::to_value(&reference)?,
            json!({"kind": "blob", "value": "blob:studio/1"})
        );
        assert!(reference.is_blob_derived());
        assert!(!DisplayReference::Inline("data:,".to_string()).is_blob_derived());
        Ok(())
    }
}
