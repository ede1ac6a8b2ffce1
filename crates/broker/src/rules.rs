//! Always-allow rule formatting and persistence.
//!
//! Rules land in `<project_dir>/.claude/settings.local.json` under
//! `permissions.allow`, as strings like `Bash(npm install)` or `Edit(/path)`.

use std::path::Path;

use {serde_json::Value, thiserror::Error, tracing::info};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("no project_dir, cannot write rule")]
    MissingProjectDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file has unexpected shape: {0}")]
    Malformed(&'static str),
}

/// Which input field each known tool exposes in its rule.
const TOOL_FIELDS: &[(&str, &str)] = &[
    ("Bash", "command"),
    ("Edit", "file_path"),
    ("Write", "file_path"),
    ("Read", "file_path"),
    ("Glob", "pattern"),
    ("Grep", "pattern"),
    ("WebSearch", "query"),
    ("WebFetch", "url"),
    ("Skill", "skill"),
];

/// Format the permission rule for a tool invocation.
///
/// Unknown tools fall back to `Name(*)`; MCP tools (`mcp__*`) are matched by
/// bare name.
#[must_use]
pub fn format_rule(tool_name: &str, tool_input: &Value) -> String {
    let Some((_, field)) = TOOL_FIELDS.iter().find(|(name, _)| *name == tool_name) else {
        if tool_name.starts_with("mcp__") {
            return tool_name.to_string();
        }
        return format!("{tool_name}(*)");
    };

    let value = match tool_input.get(field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => "*".into(),
        Some(other) => other.to_string(),
    };
    format!("{tool_name}({value})")
}

/// Append the rule for this invocation to the project's local settings,
/// deduplicated under string equality. Errors surface so the caller can
/// refuse the decision and let the user retry.
pub fn write_always_allow_rule(
    project_dir: &str,
    tool_name: &str,
    tool_input: &Value,
) -> Result<(), RuleError> {
    if project_dir.is_empty() {
        return Err(RuleError::MissingProjectDir);
    }

    let rule = format_rule(tool_name, tool_input);
    let settings_dir = Path::new(project_dir).join(".claude");
    let settings_file = settings_dir.join("settings.local.json");

    std::fs::create_dir_all(&settings_dir)?;

    let mut settings: Value = match std::fs::read(&settings_file) {
        Ok(raw) => serde_json::from_slice(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Default::default()),
        Err(e) => return Err(e.into()),
    };

    let permissions = settings
        .as_object_mut()
        .ok_or(RuleError::Malformed("settings root must be an object"))?
        .entry("permissions")
        .or_insert_with(|| Value::Object(Default::default()));
    let allow = permissions
        .as_object_mut()
        .ok_or(RuleError::Malformed("permissions must be an object"))?
        .entry("allow")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(list) = allow.as_array_mut() else {
        return Err(RuleError::Malformed("permissions.allow must be a list"));
    };

    if !list.iter().any(|v| v.as_str() == Some(rule.as_str())) {
        list.push(Value::String(rule.clone()));
        std::fs::write(&settings_file, serde_json::to_vec_pretty(&settings)?)?;
        info!(rule, file = %settings_file.display(), "added always-allow rule");
    }

    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn test_format_known_tools() {
        assert_eq!(
            format_rule("Bash", &json!({"command": "npm install"})),
            "Bash(npm install)"
        );
        assert_eq!(
            format_rule("Edit", &json!({"file_path": "/src/main.rs"})),
            "Edit(/src/main.rs)"
        );
        assert_eq!(
            format_rule("WebFetch", &json!({"url": "https://example.com"})),
            "WebFetch(https://example.com)"
        );
    }

    #[test]
    fn test_format_empty_field_is_wildcard() {
        assert_eq!(format_rule("Bash", &json!({})), "Bash(*)");
        assert_eq!(format_rule("Bash", &json!({"command": ""})), "Bash(*)");
    }

    #[test]
    fn test_format_unknown_and_mcp_tools() {
        assert_eq!(format_rule("Oracle", &json!({})), "Oracle(*)");
        assert_eq!(
            format_rule("mcp__github__create_issue", &json!({})),
            "mcp__github__create_issue"
        );
    }

    #[test]
    fn test_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().to_str().unwrap();

        write_always_allow_rule(project, "Bash", &json!({"command": "ls"})).unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join(".claude/settings.local.json")).unwrap();
        let settings: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(settings["permissions"]["allow"][0], "Bash(ls)");
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().to_str().unwrap();
        let input = json!({"command": "ls"});

        write_always_allow_rule(project, "Bash", &input).unwrap();
        write_always_allow_rule(project, "Bash", &input).unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join(".claude/settings.local.json")).unwrap();
        let settings: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(settings["permissions"]["allow"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_write_preserves_existing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let claude_dir = dir.path().join(".claude");
        std::fs::create_dir_all(&claude_dir).unwrap();
        std::fs::write(
            claude_dir.join("settings.local.json"),
            json!({"permissions": {"allow": ["Read(/etc/hosts)"]}, "model": "opus"}).to_string(),
        )
        .unwrap();

        write_always_allow_rule(dir.path().to_str().unwrap(), "Bash", &json!({"command": "ls"}))
            .unwrap();

        let raw =
            std::fs::read_to_string(claude_dir.join("settings.local.json")).unwrap();
        let settings: Value = serde_json::from_str(&raw).unwrap();
        let allow = settings["permissions"]["allow"].as_array().unwrap();
        assert_eq!(allow.len(), 2);
        assert_eq!(settings["model"], "opus");
    }

    #[test]
    fn test_missing_project_dir_rejected() {
        assert!(matches!(
            write_always_allow_rule("", "Bash", &json!({})),
            Err(RuleError::MissingProjectDir)
        ));
    }
}
