use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentAction {
    Noop,
    Help,
    Reset,
    Quit,
    AttachImage,
    Export,
    SetModel,
    Generate,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: IntentAction,
    pub raw: String,
    pub prompt: Option<String>,
    /// Path or raw argument, depending on the command.
    pub arg: Option<String>,
    /// The slash command as typed, lower-cased. Set for every slash command.
    pub command: Option<String>,
}

impl Intent {
    fn new(action: IntentAction, raw: &str) -> Self {
        Self {
            action,
            raw: raw.to_string(),
            prompt: None,
            arg: None,
            command: None,
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<IntentAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> Option<String> {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(parts.join(" ")),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new(IntentAction::Noop, text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            let mut intent = if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                Intent::new(action, text)
            } else if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.arg = parse_single_path_arg(arg);
                intent
            } else if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.arg = Some(arg.to_string()).filter(|value| !value.is_empty());
                intent
            } else {
                let mut intent = Intent::new(IntentAction::Unknown, text);
                intent.arg = Some(arg.to_string()).filter(|value| !value.is_empty());
                intent
            };
            intent.command = Some(command);
            return intent;
        }
    }

    let mut intent = Intent::new(IntentAction::Generate, text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use super::{parse_intent, IntentAction};

    #[test]
    fn blank_lines_are_noops() {
        assert_eq!(parse_intent("").action, IntentAction::Noop);
        assert_eq!(parse_intent("   \t").action, IntentAction::Noop);
    }

    #[test]
    fn plain_text_is_a_prompt() {
        let intent = parse_intent("  make the sky purple  ");
        assert_eq!(intent.action, IntentAction::Generate);
        assert_eq!(intent.prompt.as_deref(), Some("make the sky purple"));
        assert_eq!(intent.command, None);
    }

    #[test]
    fn parse_attach_quoted_path() {
        let intent = parse_intent("/attach \"/tmp/my cat.png\"");
        assert_eq!(intent.action, IntentAction::AttachImage);
        assert_eq!(intent.arg.as_deref(), Some("/tmp/my cat.png"));

        let upload = parse_intent("/upload cat.jpg");
        assert_eq!(upload.action, IntentAction::AttachImage);
        assert_eq!(upload.arg.as_deref(), Some("cat.jpg"));
    }

    #[test]
    fn parse_attach_without_path() {
        let intent = parse_intent("/attach");
        assert_eq!(intent.action, IntentAction::AttachImage);
        assert_eq!(intent.arg, None);
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/help").action, IntentAction::Help);
        assert_eq!(parse_intent("/clear").action, IntentAction::Reset);
        assert_eq!(parse_intent("/RESET").action, IntentAction::Reset);
        assert_eq!(parse_intent("/quit").action, IntentAction::Quit);
    }

    #[test]
    fn parse_model_and_export() {
        let model = parse_intent("/model gemini-2.5-flash-image");
        assert_eq!(model.action, IntentAction::SetModel);
        assert_eq!(model.arg.as_deref(), Some("gemini-2.5-flash-image"));

        let export = parse_intent("/export out/chat");
        assert_eq!(export.action, IntentAction::Export);
        assert_eq!(export.arg.as_deref(), Some("out/chat"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, IntentAction::Unknown);
        assert_eq!(intent.command.as_deref(), Some("magic"));
        assert_eq!(intent.arg.as_deref(), Some("foo bar"));
    }

    #[test]
    fn bare_slash_is_a_prompt() {
        let intent = parse_intent("/ nothing");
        assert_eq!(intent.action, IntentAction::Generate);
    }
}
