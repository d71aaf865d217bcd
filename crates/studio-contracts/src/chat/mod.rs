mod command_registry;
pub mod forced_tool;
mod intent_parser;
mod tools;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use intent_parser::{parse_chat_input, ChatInput};
pub use tools::{ToolArguments, ToolKind};
