use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{StudioError, StudioResult};
use crate::media::Modality;

/// Every tool the chat model may call. Adding one is a compile-time change:
/// the engine matches on this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    GenerateImage,
    GenerateVideo,
    GenerateAudio,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::GenerateImage,
        ToolKind::GenerateVideo,
        ToolKind::GenerateAudio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::GenerateImage => "generate_image",
            Self::GenerateVideo => "generate_video",
            Self::GenerateAudio => "generate_audio",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name.trim())
    }

    /// Accepts the wire name or the bare modality (`image`, `video`, `audio`).
    pub fn from_alias(raw: &str) -> Option<Self> {
        Self::from_name(raw).or_else(|| Modality::parse(raw).map(Self::for_modality))
    }

    pub fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Image => Self::GenerateImage,
            Modality::Video => Self::GenerateVideo,
            Modality::Audio => Self::GenerateAudio,
        }
    }

    pub fn modality(self) -> Modality {
        match self {
            Self::GenerateImage => Modality::Image,
            Self::GenerateVideo => Modality::Video,
            Self::GenerateAudio => Modality::Audio,
        }
    }

    /// OpenAI-style function definition sent with chat requests.
    pub fn definition(self) -> Value {
        let (description, extra) = match self {
            Self::GenerateImage => (
                "Generate one or more images from a text prompt.",
                json!({
                    "aspect_ratio": {"type": "string", "description": "e.g. 1:1, 16:9, 9:16"},
                    "negative_prompt": {"type": "string"},
                }),
            ),
            Self::GenerateVideo => (
                "Generate a short video clip from a text prompt.",
                json!({
                    "aspect_ratio": {"type": "string"},
                    "duration": {"type": "integer", "description": "seconds"},
                }),
            ),
            Self::GenerateAudio => (
                "Synthesize speech audio from text.",
                json!({
                    "voice": {"type": "string"},
                }),
            ),
        };
        let mut properties = Map::new();
        properties.insert(
            "prompt".to_string(),
            json!({"type": "string", "description": "What to generate"}),
        );
        if let Value::Object(extra) = extra {
            properties.extend(extra);
        }
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": ["prompt"],
                },
            },
        })
    }
}

/// Decoded arguments of a generation tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolArguments {
    pub prompt: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ToolArguments {
    pub fn parse(raw: &str) -> StudioResult<Self> {
        let trimmed = raw.trim();
        let source = if trimmed.is_empty() { "{}" } else { trimmed };
        serde_json::from_str(source).map_err(|err| StudioError::Parse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ToolArguments, ToolKind};
    use crate::error::ErrorKind;
    use crate::media::Modality;

    #[test]
    fn tool_names_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
            assert_eq!(ToolKind::for_modality(kind.modality()), kind);
        }
        assert_eq!(ToolKind::from_name("delete_everything"), None);
        assert_eq!(ToolKind::from_alias("audio"), Some(ToolKind::GenerateAudio));
        assert_eq!(ToolKind::GenerateVideo.modality(), Modality::Video);
    }

    #[test]
    fn definition_requires_prompt() {
        let definition = ToolKind::GenerateImage.definition();
        assert_eq!(definition["function"]["name"], json!("generate_image"));
        assert_eq!(definition["function"]["parameters"]["required"], json!(["prompt"]));
        assert!(definition["function"]["parameters"]["properties"]["aspect_ratio"].is_object());
    }

    #[test]
    fn arguments_keep_extra_params() -> anyhow::Result<()> {
        let args = ToolArguments::parse(r#"{"prompt":"a cat","aspect_ratio":"16:9"}"#)?;
        assert_eq!(args.prompt, "a cat");
        assert_eq!(args.params["aspect_ratio"], json!("16:9"));

        let err = ToolArguments::parse(r#"{"prompt": "unterminated"#)
            .err()
            .map(|err| err.kind());
        assert_eq!(err, Some(ErrorKind::Parse));
        assert!(ToolArguments::parse("").is_err());
        Ok(())
    }
}
