use serde_json::json;
use studio_contracts::chat::forced_tool::{detect_generation_request, extract_prompt};
use studio_contracts::chat::{ToolArguments, ToolKind};
use studio_contracts::conversation::{ChatMessage, Conversation, MediaAttachment, ToolCall};
use studio_contracts::error::StudioResult;
use studio_contracts::media::GenerationResult;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::{ChatClient, ChatRequest};

/// Executes one generation tool call.
pub trait ToolRunner {
    fn run(&self, tool: ToolKind, arguments: &ToolArguments) -> StudioResult<GenerationResult>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Assistant turns streamed.
    pub rounds: usize,
    pub tool_calls_executed: usize,
    pub forced_call: bool,
    pub hit_round_limit: bool,
}

/// Drives assistant turns and tool execution until a turn makes no
/// executable call or the round limit is reached. Tool failures become
/// tool-result turns; only chat transport errors end the loop early.
pub struct ToolLoop<'a> {
    client: &'a dyn ChatClient,
    runner: &'a dyn ToolRunner,
    max_rounds: usize,
    force_fallback: bool,
}

impl<'a> ToolLoop<'a> {
    pub fn new(client: &'a dyn ChatClient, runner: &'a dyn ToolRunner, max_rounds: usize) -> Self {
        Self {
            client,
            runner,
            max_rounds: max_rounds.max(1),
            force_fallback: true,
        }
    }

    pub fn with_force_fallback(mut self, enabled: bool) -> Self {
        self.force_fallback = enabled;
        self
    }

    pub fn run(
        &self,
        conversation: &mut Conversation,
        base: &ChatRequest,
        on_update: &mut dyn FnMut(&ChatMessage),
    ) -> StudioResult<LoopOutcome> {
        let mut outcome = LoopOutcome::default();
        let user_text = conversation.last_user_text().unwrap_or_default().to_string();

        for round in 0..self.max_rounds {
            let mut request = base.clone();
            request.messages = conversation.messages().to_vec();
            conversation.push(ChatMessage::assistant_placeholder())?;
            outcome.rounds += 1;

            let streamed = self.client.stream(&request, &mut |update| {
                if let Some(open) = conversation.last_mut() {
                    let applied = open.apply_stream_snapshot(
                        update.content.as_deref(),
                        update.thinking.as_deref(),
                        update.tool_calls.as_deref(),
                    );
                    if let Err(err) = applied {
                        warn!(error = %err, "dropping stream update");
                        return;
                    }
                    on_update(open);
                }
            });
            let turn = match streamed {
                Ok(turn) => turn,
                Err(err) => {
                    if let Some(open) = conversation.last_mut() {
                        open.fail_open_turn(format!("Error: {err}"));
                        on_update(open);
                    }
                    return Err(err);
                }
            };

            let mut executable = turn.executable_calls();
            if let Some(open) = conversation.last_mut() {
                open.apply_stream_snapshot(
                    Some(turn.content.as_str()),
                    Some(turn.thinking.as_str()),
                    Some(turn.tool_calls.as_slice()),
                )?;
                if executable.is_empty() && turn.tool_calls.is_empty() && round == 0 && self.force_fallback {
                    if let Some(call) = forced_call(&turn.content, &user_text, &request) {
                        info!(tool = %call.name, "synthesizing tool call from explicit request");
                        open.push_tool_call(call.clone())?;
                        executable.push(call);
                        outcome.forced_call = true;
                    }
                }
                open.finalize();
                on_update(open);
            }

            if executable.is_empty() {
                return Ok(outcome);
            }
            for call in &executable {
                let result = self.execute(call, &request);
                outcome.tool_calls_executed += 1;
                conversation.push(result)?;
                if let Some(last) = conversation.last() {
                    on_update(last);
                }
            }
        }
        outcome.hit_round_limit = true;
        Ok(outcome)
    }

    fn execute(&self, call: &ToolCall, request: &ChatRequest) -> ChatMessage {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return ChatMessage::tool_result(
                call,
                format!("Tool error: unknown tool '{}'", call.name),
                Vec::new(),
            );
        };
        if !request.tool_enabled(kind) {
            return ChatMessage::tool_result(
                call,
                format!("Tool error: {} is disabled", kind.name()),
                Vec::new(),
            );
        }
        let arguments = match ToolArguments::parse(&call.arguments) {
            Ok(arguments) => arguments,
            Err(err) => {
                warn!(tool = %call.name, error = %err, "invalid tool arguments");
                return ChatMessage::tool_result(
                    call,
                    format!("Tool error: invalid arguments for {}: {err}", kind.name()),
                    Vec::new(),
                );
            }
        };
        match self.runner.run(kind, &arguments) {
            Ok(result) => {
                let media = result.items().into_iter().map(MediaAttachment::from_item).collect();
                ChatMessage::tool_result(
                    call,
                    format!("Generated {} for \"{}\".", result.summary(), arguments.prompt),
                    media,
                )
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool execution failed");
                ChatMessage::tool_result(call, format!("Tool error: {err}"), Vec::new())
            }
        }
    }
}

fn forced_call(draft: &str, user_text: &str, request: &ChatRequest) -> Option<ToolCall> {
    let kind = detect_generation_request(user_text).filter(|kind| request.tool_enabled(*kind))?;
    let prompt = extract_prompt(draft, user_text);
    Some(ToolCall {
        id: format!("forced-{}", Uuid::new_v4()),
        name: kind.name().to_string(),
        arguments: json!({ "prompt": prompt }).to_string(),
    })
}
