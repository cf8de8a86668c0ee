#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "new",
        action: "start_session",
    },
    CommandSpec {
        command: "open",
        action: "start_session",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const SELECT_COMMAND: CommandSpec = CommandSpec {
    command: "select",
    action: "select",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/new <image>",
    "/history",
    "/select original|<n>|<step-id>",
    "/reset",
    "/export [path]",
    "/help",
    "/quit",
];
