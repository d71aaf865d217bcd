use std::io::Read;

use serde_json::{json, Value};
use studio_contracts::chat::forced_tool::{detect_generation_request, extract_prompt};
use studio_contracts::chat::ToolKind;
use studio_contracts::conversation::{ChatMessage, ChatRole};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{Credential, ProviderId};
use tracing::debug;

use crate::http::ProxyClient;
use crate::sse::{encode_stream, ChatUpdate, DecodedTurn, SseDecoder};

const READ_CHUNK_BYTES: usize = 4096;

/// Everything one streamed assistant reply needs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub provider: ProviderId,
    pub model: String,
    pub credential: Credential,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolKind>,
}

impl ChatRequest {
    pub fn tool_enabled(&self, kind: ToolKind) -> bool {
        self.tools.contains(&kind)
    }
}

pub trait ChatClient: Send + Sync {
    /// Streams one assistant turn, calling `on_update` with full snapshots.
    fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut dyn FnMut(&ChatUpdate),
    ) -> StudioResult<DecodedTurn>;
}

/// OpenAI-style message list. Open placeholder turns and tool calls without
/// an id are left out; the upstream API rejects both.
pub fn wire_messages(system_prompt: Option<&str>, messages: &[ChatMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt.map(str::trim).filter(|text| !text.is_empty()) {
        out.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        match message.role {
            ChatRole::User => out.push(json!({"role": "user", "content": message.content()})),
            ChatRole::Assistant => {
                if !message.is_finalized() {
                    continue;
                }
                let calls: Vec<Value> = message
                    .tool_calls()
                    .iter()
                    .filter(|call| !call.id.trim().is_empty())
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect();
                if calls.is_empty() && message.content().is_empty() {
                    continue;
                }
                let mut row = json!({"role": "assistant", "content": message.content()});
                if !calls.is_empty() {
                    row["tool_calls"] = Value::Array(calls);
                }
                out.push(row);
            }
            ChatRole::Tool => out.push(json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                "name": message.tool_name.clone().unwrap_or_default(),
                "content": message.content(),
            })),
        }
    }
    out
}

pub fn request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "apiKey": request.credential.expose(),
        "model": request.model,
        "messages": wire_messages(request.system_prompt.as_deref(), &request.messages),
        "stream": true,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(|kind| kind.definition()).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Streams from `{proxy_base}/api/{provider}/chat`.
#[derive(Debug, Clone)]
pub struct ProxyChatClient {
    client: ProxyClient,
}

impl ProxyChatClient {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

impl ChatClient for ProxyChatClient {
    fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut dyn FnMut(&ChatUpdate),
    ) -> StudioResult<DecodedTurn> {
        let provider = request.provider;
        if request.credential.is_blank() {
            return Err(StudioError::Auth(format!("Missing API key for {provider}.")));
        }
        let mut response = self.client.open_stream(provider, "chat", &request_body(request))?;
        decode_reader(provider, &mut response, on_update)
    }
}

/// Feeds a blocking body into the decoder in fixed-size reads. An empty
/// body fails before any event is produced.
pub fn decode_reader(
    provider: ProviderId,
    reader: &mut dyn Read,
    on_update: &mut dyn FnMut(&ChatUpdate),
) -> StudioResult<DecodedTurn> {
    let mut decoder = SseDecoder::new();
    let mut buf = [0u8; READ_CHUNK_BYTES];
    let mut total = 0usize;
    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|err| StudioError::Transport(format!("{provider} chat stream read failed: {err}")))?;
        if read == 0 {
            break;
        }
        total += read;
        for update in decoder.feed(&buf[..read]) {
            on_update(&update);
        }
        if decoder.is_done() {
            break;
        }
    }
    if total == 0 {
        return Err(StudioError::provider(provider.as_str(), None, "No Body"));
    }
    let (updates, turn) = decoder.finish();
    for update in &updates {
        on_update(update);
    }
    debug!(%provider, bytes = total, calls = turn.tool_calls.len(), "chat stream finished");
    Ok(turn)
}

/// Offline chat model. It answers tool results with a short acknowledgement,
/// calls a generation tool when the user plainly asks for media, and echoes
/// anything else. Output goes through the real SSE decoder in small reads.
#[derive(Debug, Clone, Default)]
pub struct DryrunChatClient;

impl DryrunChatClient {
    fn frames(request: &ChatRequest) -> Vec<Value> {
        let last = request.messages.last();
        if let Some(message) = last.filter(|message| message.role == ChatRole::Tool) {
            let text = format!("Here you go. {}", message.content());
            return text_frames(&text);
        }
        let user_text = last
            .filter(|message| message.role == ChatRole::User)
            .map(ChatMessage::content)
            .unwrap_or_default();
        let requested = detect_generation_request(user_text)
            .filter(|kind| request.tool_enabled(*kind));
        let Some(kind) = requested else {
            return text_frames(&format!("(dryrun) You said: {user_text}"));
        };
        let arguments = json!({"prompt": extract_prompt("", user_text)}).to_string();
        let mut frames = text_frames("Starting that now.");
        frames.push(json!({"choices": [{"delta": {"tool_calls": [{
            "index": 0,
            "id": format!("dryrun-call-{}", request.messages.len()),
            "type": "function",
            "function": {"name": kind.name(), "arguments": ""},
        }]}}]}));
        let chars: Vec<char> = arguments.chars().collect();
        for piece in chars.chunks(8) {
            let piece: String = piece.iter().collect();
            frames.push(json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": piece},
            }]}}]}));
        }
        frames
    }
}

fn text_frames(text: &str) -> Vec<Value> {
    text.split_inclusive(' ')
        .map(|word| json!({"choices": [{"delta": {"content": word}}]}))
        .collect()
}

impl ChatClient for DryrunChatClient {
    fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut dyn FnMut(&ChatUpdate),
    ) -> StudioResult<DecodedTurn> {
        let body = encode_stream(&Self::frames(request));
        let mut reader = SmallReads {
            data: &body,
            step: 7,
        };
        decode_reader(request.provider, &mut reader, on_update)
    }
}

struct SmallReads<'a> {
    data: &'a [u8],
    step: usize,
}

impl Read for SmallReads<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let take = self.step.min(buf.len()).min(self.data.len());
        buf[..take].copy_from_slice(&self.data[..take]);
        self.data = &self.data[take..];
        Ok(take)
    }
}
