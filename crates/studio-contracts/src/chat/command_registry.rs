#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub usage: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        usage: "/clear                       forget the conversation",
    },
    CommandSpec {
        command: "help",
        usage: "/help                        list commands",
    },
    CommandSpec {
        command: "quit",
        usage: "/quit                        leave the chat",
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "system",
        usage: "/system <text>               set the custom system prompt (empty resets)",
    },
    CommandSpec {
        command: "model",
        usage: "/model <id>                  switch chat model",
    },
    CommandSpec {
        command: "provider",
        usage: "/provider <name>             switch chat provider",
    },
];

pub(crate) const TOOL_COMMAND: CommandSpec = CommandSpec {
    command: "tools",
    usage: "/tools <image|video|audio> <on|off>  enable or disable a generation tool",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/clear", "/help", "/quit", "/system", "/model", "/provider", "/tools",
];

pub(crate) fn usage_lines() -> Vec<&'static str> {
    NO_ARG_COMMANDS
        .iter()
        .chain(RAW_ARG_COMMANDS.iter())
        .chain(std::iter::once(&TOOL_COMMAND))
        .map(|spec| spec.usage)
        .collect()
}
