use super::command_registry::{usage_lines, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, TOOL_COMMAND};
use super::tools::ToolKind;

/// What a line typed into the chat box means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Noop,
    Message(String),
    Clear,
    Help(Vec<&'static str>),
    Quit,
    SetSystemPrompt(Option<String>),
    SetModel(String),
    SetProvider(String),
    ToggleTool { tool: ToolKind, enabled: bool },
    Invalid { command: String, reason: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_toggle(arg: &str) -> Result<(ToolKind, bool), String> {
    let parts = split_args(arg);
    let [tool, state] = parts.as_slice() else {
        return Err("expected `/tools <image|video|audio> <on|off>`".to_string());
    };
    let tool = ToolKind::from_alias(tool).ok_or_else(|| format!("unknown tool '{tool}'"))?;
    let enabled = match state.to_ascii_lowercase().as_str() {
        "on" | "enable" | "enabled" | "true" => true,
        "off" | "disable" | "disabled" | "false" => false,
        other => return Err(format!("expected on/off, got '{other}'")),
    };
    Ok((tool, enabled))
}

pub fn parse_chat_input(text: &str) -> ChatInput {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ChatInput::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatInput::Message(trimmed.to_string());
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if NO_ARG_COMMANDS.iter().any(|spec| spec.command == command) {
        return match command.as_str() {
            "clear" => ChatInput::Clear,
            "quit" => ChatInput::Quit,
            _ => ChatInput::Help(usage_lines()),
        };
    }

    if RAW_ARG_COMMANDS.iter().any(|spec| spec.command == command) {
        return match command.as_str() {
            "system" => ChatInput::SetSystemPrompt((!arg.is_empty()).then(|| arg.to_string())),
            _ if arg.is_empty() => ChatInput::Invalid {
                command,
                reason: "missing argument".to_string(),
            },
            "model" => ChatInput::SetModel(arg.to_string()),
            _ => ChatInput::SetProvider(arg.to_string()),
        };
    }

    if command == TOOL_COMMAND.command {
        return match parse_toggle(arg) {
            Ok((tool, enabled)) => ChatInput::ToggleTool { tool, enabled },
            Err(reason) => ChatInput::Invalid { command, reason },
        };
    }

    ChatInput::Invalid {
        command,
        reason: "unknown command".to_string(),
    }
}
