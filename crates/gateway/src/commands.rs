//! Chat text command parsing (`/new`, `/reply`).

/// Parsed `/new` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCommand {
    pub dir: Option<String>,
    pub command: Option<String>,
    pub prompt: String,
}

/// Parsed `/reply` invocation (prompt only; the session comes from the
/// replied-to message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyCommand {
    pub prompt: String,
    pub carries_dir: bool,
}

/// Parse `/new [--dir=…] [--cmd=…] [prompt]`.
///
/// Tokens are split shell-style so quoted prompts survive; on unbalanced
/// quotes the raw whitespace split is used instead.
pub fn parse_new(text: &str) -> Option<NewCommand> {
    let rest = command_rest(text, "/new")?;
    let mut parsed = NewCommand::default();
    let mut prompt_parts: Vec<String> = Vec::new();

    for token in tokenize(rest) {
        if let Some(dir) = token.strip_prefix("--dir=") {
            parsed.dir = Some(dir.trim().to_string()).filter(|d| !d.is_empty());
        } else if let Some(cmd) = token.strip_prefix("--cmd=") {
            parsed.command = Some(cmd.trim().to_string()).filter(|c| !c.is_empty());
        } else {
            prompt_parts.push(token);
        }
    }

    parsed.prompt = prompt_parts.join(" ").trim().to_string();
    Some(parsed)
}

/// Parse `/reply <prompt>`; flags are rejected by the caller via
/// `carries_dir`.
pub fn parse_reply(text: &str) -> Option<ReplyCommand> {
    let rest = command_rest(text, "/reply")?;
    let carries_dir = tokenize(rest).iter().any(|t| t.starts_with("--dir"));
    let prompt = tokenize(rest)
        .into_iter()
        .filter(|t| !t.starts_with("--dir"))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();
    Some(ReplyCommand {
        prompt,
        carries_dir,
    })
}

/// Everything after the command word, or `None` when `text` is a different
/// command (or none at all).
fn command_rest<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let trimmed = text.trim();
    if trimmed == command {
        return Some("");
    }
    trimmed
        .strip_prefix(command)
        .filter(|rest| rest.starts_with(char::is_whitespace))
}

fn tokenize(text: &str) -> Vec<String> {
    shell_words::split(text)
        .unwrap_or_else(|_| text.split_whitespace().map(String::from).collect())
}
