//! Incremental decoder for OpenAI-style chat completion streams.
//!
//! Bytes are buffered until a full line is available, so chunk boundaries
//! may fall anywhere, including inside a UTF-8 sequence or a JSON token.
//! Every update carries the full accumulated text, never just the delta.

use std::collections::BTreeMap;

use serde::Deserialize;
use studio_contracts::conversation::ToolCall;
use tracing::warn;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Snapshot emitted after each event that changed something.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatUpdate {
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatUpdate {
    fn is_empty(&self) -> bool {
        self.content.is_none() && self.thinking.is_none() && self.tool_calls.is_none()
    }
}

/// Consolidated assistant turn once the stream has ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedTurn {
    pub content: String,
    pub thinking: String,
    /// Calls with a name, in index order.
    pub tool_calls: Vec<ToolCall>,
    pub skipped_events: usize,
}

impl DecodedTurn {
    /// Calls that also carry an id and can therefore be answered.
    pub fn executable_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .filter(|call| !call.id.trim().is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    content: String,
    thinking: String,
    calls: BTreeMap<u64, PartialToolCall>,
    skipped: usize,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been read.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatUpdate> {
        self.buffer.extend_from_slice(bytes);
        let mut updates = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(update) = self.process_line(&line) {
                updates.push(update);
            }
        }
        updates
    }

    /// Flushes a trailing unterminated line and returns the final turn.
    pub fn finish(mut self) -> (Vec<ChatUpdate>, DecodedTurn) {
        let mut updates = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(update) = self.process_line(&line) {
                updates.push(update);
            }
        }
        let turn = DecodedTurn {
            content: self.content.clone(),
            thinking: self.thinking.clone(),
            tool_calls: self.visible_calls(),
            skipped_events: self.skipped,
        };
        (updates, turn)
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<ChatUpdate> {
        if self.done {
            return None;
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\n', '\r']);
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.done = true;
            return None;
        }
        let frame = match serde_json::from_str::<StreamFrame>(payload) {
            Ok(frame) => frame,
            Err(err) => {
                self.skipped += 1;
                warn!(error = %err, "skipping malformed stream event");
                return None;
            }
        };
        let update = self.apply(frame);
        (!update.is_empty()).then_some(update)
    }

    fn apply(&mut self, frame: StreamFrame) -> ChatUpdate {
        let mut update = ChatUpdate::default();
        for delta in frame.choices.into_iter().filter_map(|choice| choice.delta) {
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                self.content.push_str(&text);
                update.content = Some(self.content.clone());
            }
            let reasoning = delta.reasoning_content.or(delta.reasoning);
            if let Some(text) = reasoning.filter(|text| !text.is_empty()) {
                self.thinking.push_str(&text);
                update.thinking = Some(self.thinking.clone());
            }
            if delta.tool_calls.is_empty() {
                continue;
            }
            for (position, call) in delta.tool_calls.into_iter().enumerate() {
                let index = call.index.unwrap_or(position as u64);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    entry.id = Some(id);
                }
                if let Some(kind) = call.kind.filter(|kind| !kind.is_empty()) {
                    entry.kind = Some(kind);
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                        entry.name = Some(name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            update.tool_calls = Some(self.visible_calls());
        }
        update
    }

    fn visible_calls(&self) -> Vec<ToolCall> {
        self.calls
            .values()
            .filter(|call| call.kind.as_deref().map_or(true, |kind| kind == "function"))
            .filter_map(|call| {
                let name = call.name.as_deref()?.trim();
                (!name.is_empty()).then(|| ToolCall {
                    id: call.id.clone().unwrap_or_default(),
                    name: name.to_string(),
                    arguments: call.arguments.clone(),
                })
            })
            .collect()
    }
}

/// Encodes frames as an SSE body terminated by `[DONE]`.
pub fn encode_stream(frames: &[serde_json::Value]) -> Vec<u8> {
    let mut out = String::new();
    for frame in frames {
        out.push_str(DATA_PREFIX);
        out.push(' ');
        out.push_str(&frame.to_string());
        out.push_str("\n\n");
    }
    out.push_str(DATA_PREFIX);
    out.push(' ');
    out.push_str(DONE_SENTINEL);
    out.push_str("\n\n");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{encode_stream, SseDecoder};

    const ARGUMENTS: &str = r#"{"prompt": "a café at dusk, 雨", "aspect_ratio": "16:9"}"#;

    fn argument_pieces(width: usize) -> Vec<String> {
        ARGUMENTS
            .chars()
            .collect::<Vec<_>>()
            .chunks(width)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    fn frames(width: usize) -> Vec<Value> {
        let mut frames = vec![
            json!({"choices": [{"delta": {"reasoning_content": "User wants "}}]}),
            json!({"choices": [{"delta": {"reasoning": "an image."}}]}),
            json!({"choices": [{"delta": {"content": "Sure, "}}]}),
            json!({"choices": [{"delta": {"content": "painting ☕ now."}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function", "function": {"name": "generate_image", "arguments": ""}}
            ]}}]}),
        ];
        for piece in argument_pieces(width) {
            frames.push(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": piece}}
            ]}}]}));
        }
        frames
    }

    fn decode_in_chunks(body: &[u8], size: usize) -> super::DecodedTurn {
        let mut decoder = SseDecoder::new();
        for chunk in body.chunks(size) {
            decoder.feed(chunk);
        }
        decoder.finish().1
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_result() {
        let body = encode_stream(&frames(3));
        let whole = decode_in_chunks(&body, body.len());
        for size in [1, 2, 3, 7, 64] {
            assert_eq!(decode_in_chunks(&body, size), whole, "chunk size {size}");
        }
        assert_eq!(whole.content, "Sure, painting ☕ now.");
        assert_eq!(whole.thinking, "User wants an image.");
        assert_eq!(whole.tool_calls.len(), 1);
        assert_eq!(whole.executable_calls().len(), 1);
    }

    #[test]
    fn fragmented_arguments_are_reassembled_exactly() {
        for width in [1, 4, 17, 200] {
            let body = encode_stream(&frames(width));
            let turn = decode_in_chunks(&body, 11);
            assert_eq!(turn.tool_calls[0].arguments, ARGUMENTS, "piece width {width}");
            assert_eq!(turn.tool_calls[0].id, "call_1");
        }
    }

    #[test]
    fn updates_carry_full_accumulated_text() {
        let mut decoder = SseDecoder::new();
        let updates = decoder.feed(&encode_stream(&[
            json!({"choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
        ]));
        let texts: Vec<_> = updates.iter().filter_map(|u| u.content.clone()).collect();
        assert_eq!(texts, vec!["Hel".to_string(), "Hello".to_string()]);
        assert!(decoder.is_done());
    }

    #[test]
    fn malformed_events_are_skipped() {
        let mut body = b"data: {not json\n\n: keepalive\n\n".to_vec();
        body.extend(encode_stream(&[json!({"choices": [{"delta": {"content": "ok"}}]})]));
        body.extend_from_slice(b"data: {\"choices\": [{\"delta\": {\"content\": \"late\"}}]}\n");
        let turn = decode_in_chunks(&body, 4);
        assert_eq!(turn.content, "ok");
        assert_eq!(turn.skipped_events, 1);
    }

    #[test]
    fn nameless_or_idless_calls_are_filtered() {
        let body = encode_stream(&[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{}"}},
                {"index": 1, "function": {"name": "generate_audio", "arguments": "{}"}},
                {"index": 2, "id": "call_9", "function": {"name": "generate_video", "arguments": "{}"}}
            ]}}]}),
        ]);
        let turn = decode_in_chunks(&body, body.len());
        let names: Vec<_> = turn.tool_calls.iter().map(|call| call.name.as_str()).collect();
        assert_eq!(names, vec!["generate_audio", "generate_video"]);
        let executable = turn.executable_calls();
        assert_eq!(executable.len(), 1);
        assert_eq!(executable[0].id, "call_9");
    }
}
