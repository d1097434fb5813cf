use super::intent_parser::IntentAction;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: IntentAction,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: IntentAction::Help,
    },
    CommandSpec {
        command: "clear",
        action: IntentAction::Reset,
    },
    CommandSpec {
        command: "reset",
        action: IntentAction::Reset,
    },
    CommandSpec {
        command: "quit",
        action: IntentAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: IntentAction::Quit,
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "attach",
        action: IntentAction::AttachImage,
    },
    CommandSpec {
        command: "upload",
        action: IntentAction::AttachImage,
    },
    CommandSpec {
        command: "export",
        action: IntentAction::Export,
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "model",
    action: IntentAction::SetModel,
}];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/clear",
    "/attach <path>",
    "/model <name>",
    "/export [dir]",
    "/quit",
];
