use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StudioError, StudioResult};
use crate::media::{MediaItem, Modality};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Media noted on a tool turn. Only remote media keeps a reference; bytes
/// live in the gallery, never in chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    pub modality: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub mime_type: String,
}

impl MediaAttachment {
    pub fn from_item(item: &MediaItem) -> Self {
        Self {
            id: item.id.clone(),
            modality: item.modality,
            reference: item.payload.remote_url().map(str::to_string),
            mime_type: item.mime_type().to_string(),
        }
    }

    fn drop_inline_reference(&mut self) {
        if self.reference.as_deref().is_some_and(|reference| reference.starts_with("data:")) {
            self.reference = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(default = "finalized_on_load")]
    finalized: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::finalized(ChatRole::User, text.into())
    }

    /// Empty assistant turn that the stream decoder fills in.
    pub fn assistant_placeholder() -> Self {
        let mut message = Self::finalized(ChatRole::Assistant, String::new());
        message.finalized = false;
        message
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::finalized(ChatRole::Assistant, text.into());
        message.tool_calls = tool_calls;
        message
    }

    pub fn tool_result(call: &ToolCall, text: impl Into<String>, media: Vec<MediaAttachment>) -> Self {
        let mut message = Self::finalized(ChatRole::Tool, text.into());
        message.tool_call_id = Some(call.id.clone());
        message.tool_name = Some(call.name.clone());
        message.media = media;
        message
    }

    fn finalized(role: ChatRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            thinking: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            media: Vec::new(),
            finalized: true,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn thinking(&self) -> Option<&str> {
        self.thinking.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Applies a full-snapshot streaming update. Text only ever grows while
    /// the turn is open; a finalized turn rejects every update.
    pub fn apply_stream_snapshot(
        &mut self,
        content: Option<&str>,
        thinking: Option<&str>,
        tool_calls: Option<&[ToolCall]>,
    ) -> StudioResult<()> {
        if self.finalized {
            return Err(StudioError::Validation(format!(
                "message {} is finalized",
                self.id
            )));
        }
        if let Some(content) = content {
            if !content.starts_with(self.content.as_str()) {
                return Err(StudioError::Validation(
                    "streamed content must extend the existing text".to_string(),
                ));
            }
            self.content = content.to_string();
        }
        if let Some(thinking) = thinking {
            let current = self.thinking.as_deref().unwrap_or_default();
            if !thinking.starts_with(current) {
                return Err(StudioError::Validation(
                    "streamed reasoning must extend the existing text".to_string(),
                ));
            }
            self.thinking = (!thinking.is_empty()).then(|| thinking.to_string());
        }
        if let Some(tool_calls) = tool_calls {
            self.tool_calls = tool_calls.to_vec();
        }
        Ok(())
    }

    /// Appends a tool call synthesized outside the stream (forced fallback).
    pub fn push_tool_call(&mut self, call: ToolCall) -> StudioResult<()> {
        if self.role != ChatRole::Assistant {
            return Err(StudioError::Validation(
                "only assistant turns carry tool calls".to_string(),
            ));
        }
        self.tool_calls.push(call);
        Ok(())
    }

    /// Replaces the text of an open turn, used to record a stream failure.
    pub fn fail_open_turn(&mut self, message: impl Into<String>) {
        if !self.finalized {
            self.content = message.into();
            self.finalized = true;
        }
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }
}

fn finalized_on_load() -> bool {
    true
}

/// Ordered chat history with the tool-reference invariant enforced on push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores persisted history, dropping tool turns whose call is unknown.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut conversation = Self::new();
        for mut message in messages {
            message.finalized = true;
            message.media.iter_mut().for_each(MediaAttachment::drop_inline_reference);
            let _ = conversation.push(message);
        }
        conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut()
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .map(ChatMessage::content)
    }

    pub fn push(&mut self, message: ChatMessage) -> StudioResult<()> {
        if message.role == ChatRole::Tool {
            let Some(call_id) = message.tool_call_id.as_deref() else {
                return Err(StudioError::Validation(
                    "tool message is missing its tool call id".to_string(),
                ));
            };
            let answered = self.messages.iter().any(|prior| {
                prior.role == ChatRole::Assistant
                    && prior.tool_calls.iter().any(|call| call.id == call_id)
            });
            if !answered {
                return Err(StudioError::Validation(format!(
                    "tool message references unknown tool call '{call_id}'"
                )));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "generate_image".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn tool_message_must_answer_prior_assistant_call() -> anyhow::Result<()> {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::user("draw a cat"))?;
        let orphan = ChatMessage::tool_result(&call("call-1"), "done", Vec::new());
        assert!(conversation.push(orphan.clone()).is_err());

        conversation.push(ChatMessage::assistant("", vec![call("call-1")]))?;
        conversation.push(orphan)?;
        assert_eq!(conversation.len(), 3);
        Ok(())
    }

    #[test]
    fn streaming_snapshots_are_append_only_until_finalized() -> anyhow::Result<()> {
        let mut message = ChatMessage::assistant_placeholder();
        message.apply_stream_snapshot(Some("Hel"), None, None)?;
        message.apply_stream_snapshot(Some("Hello"), Some("thinking"), None)?;
        assert!(message
            .apply_stream_snapshot(Some("Bye"), None, None)
            .is_err());
        message.finalize();
        assert!(message
            .apply_stream_snapshot(Some("Hello world"), None, None)
            .is_err());
        assert_eq!(message.content(), "Hello");
        assert_eq!(message.thinking(), Some("thinking"));
        Ok(())
    }

    #[test]
    fn persisted_history_loads_as_finalized() -> anyhow::Result<()> {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::user("hi"))?;
        conversation.push(ChatMessage::assistant("", vec![call("c1")]))?;
        conversation.push(ChatMessage::tool_result(&call("c1"), "ok", Vec::new()))?;
        let raw = serde_json::to_string(conversation.messages())?;

        let restored: Vec<ChatMessage> = serde_json::from_str(&raw)?;
        let restored = Conversation::from_messages(restored);
        assert_eq!(restored.len(), 3);
        assert!(restored.messages().iter().all(ChatMessage::is_finalized));
        assert_eq!(restored.last_user_text(), Some("hi"));
        Ok(())
    }

    #[test]
    fn attachments_keep_only_remote_references() -> anyhow::Result<()> {
        let png = MediaItem::bytes(Modality::Image, vec![1, 2, 3], "image/png");
        let clip = MediaItem::remote(Modality::Video, "https://cdn.example/v.mp4", None);
        let inline = MediaAttachment::from_item(&png);
        assert_eq!(inline.reference, None);
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(
            MediaAttachment::from_item(&clip).reference.as_deref(),
            Some("https://cdn.example/v.mp4")
        );

        let legacy = serde_json::json!([
            {"id": "u", "role": "user", "content": "draw"},
            {"id": "a", "role": "assistant", "content": "", "tool_calls": [
                {"id": "c1", "name": "generate_image", "arguments": "{}"}
            ]},
            {"id": "t", "role": "tool", "content": "ok", "tool_call_id": "c1", "media": [
                {"id": "m1", "modality": "image", "reference": "data:image/png;base64,AQID", "mime_type": "image/png"}
            ]}
        ]);
        let restored = Conversation::from_messages(serde_json::from_value(legacy)?);
        let media = &restored.messages()[2].media;
        assert_eq!(media[0].reference, None);
        assert!(!serde_json::to_string(restored.messages())?.contains("data:"));
        Ok(())
    }
}
