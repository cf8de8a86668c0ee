use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, PATH_COMMANDS, SELECT_COMMAND};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

/// Turns one line of chat input into an intent. Anything that is not a
/// recognised slash command is an edit instruction.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if command == SELECT_COMMAND.command {
                let mut intent = Intent::new(SELECT_COMMAND.action, text);
                intent
                    .command_args
                    .insert("target".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_an_edit_prompt() {
        let intent = parse_intent("  add some snow  ");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.prompt.as_deref(), Some("add some snow"));
    }

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn new_accepts_quoted_path() {
        let intent = parse_intent("/new \"/tmp/my photo.png\"");
        assert_eq!(intent.action, "start_session");
        assert_eq!(intent.command_args["path"], json!("/tmp/my photo.png"));

        let open = parse_intent("/open cat.jpg");
        assert_eq!(open.action, "start_session");
        assert_eq!(open.arg_str("path"), Some("cat.jpg"));
    }

    #[test]
    fn export_path_is_optional() {
        let bare = parse_intent("/export");
        assert_eq!(bare.action, "export");
        assert_eq!(bare.arg_str("path"), None);

        let with_path = parse_intent("/export out/final.png");
        assert_eq!(with_path.arg_str("path"), Some("out/final.png"));
    }

    #[test]
    fn select_keeps_raw_target() {
        let intent = parse_intent("/select  step-3 ");
        assert_eq!(intent.action, "select");
        assert_eq!(intent.arg_str("target"), Some("step-3"));
    }

    #[test]
    fn no_arg_commands_and_aliases() {
        assert_eq!(parse_intent("/history").action, "history");
        assert_eq!(parse_intent("/RESET").action, "reset");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn unknown_command_is_reported() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn lone_slash_is_treated_as_prompt() {
        let intent = parse_intent("/ make it 50% brighter");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.prompt.as_deref(), Some("/ make it 50% brighter"));
    }
}
