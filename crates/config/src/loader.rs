use std::path::PathBuf;

use {secrecy::Secret, tracing::warn};

use crate::schema::{FeishuConfig, LarkinConfig, SendMode};

const DEFAULT_SOCKET_PATH: &str = "/tmp/claude-permission.sock";
const DEFAULT_CALLBACK_PORT: u16 = 8080;
const DEFAULT_GATEWAY_PORT: u16 = 8081;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CLIENT_TIMEOUT_BUFFER_SECS: u64 = 30;
const DEFAULT_PAGE_CLOSE_DELAY_SECS: u64 = 3;
const DEFAULT_DATA_DIR: &str = "./runtime";

/// Build the configuration from the process environment.
///
/// Missing variables fall back to defaults; malformed numeric or enum values
/// are logged and replaced with their defaults rather than failing boot.
pub fn from_env() -> LarkinConfig {
    let feishu = FeishuConfig {
        app_id: env_str("FEISHU_APP_ID").unwrap_or_default(),
        app_secret: Secret::new(env_str("FEISHU_APP_SECRET").unwrap_or_default()),
        verification_token: Secret::new(env_str("FEISHU_VERIFICATION_TOKEN").unwrap_or_default()),
        send_mode: env_str("FEISHU_SEND_MODE")
            .and_then(|v| {
                let mode = SendMode::parse(&v);
                if mode.is_none() {
                    warn!(value = %v, "unknown FEISHU_SEND_MODE, using openapi");
                }
                mode
            })
            .unwrap_or_default(),
        receive_id: env_str("FEISHU_RECEIVE_ID"),
        receive_id_type: env_str("FEISHU_RECEIVE_ID_TYPE"),
    };

    LarkinConfig {
        socket_path: PathBuf::from(
            env_str("PERMISSION_SOCKET_PATH").unwrap_or_else(|| DEFAULT_SOCKET_PATH.into()),
        ),
        callback_port: env_parse("CALLBACK_SERVER_PORT", DEFAULT_CALLBACK_PORT),
        gateway_port: env_parse("GATEWAY_SERVER_PORT", DEFAULT_GATEWAY_PORT),
        request_timeout: env_parse("PERMISSION_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS),
        client_timeout_buffer: env_parse(
            "CLIENT_TIMEOUT_BUFFER",
            DEFAULT_CLIENT_TIMEOUT_BUFFER_SECS,
        ),
        page_close_delay: env_parse("CALLBACK_PAGE_CLOSE_DELAY", DEFAULT_PAGE_CLOSE_DELAY_SECS),
        vscode_uri_prefix: env_str("VSCODE_URI_PREFIX"),
        feishu,
        gateway_url: env_str("FEISHU_GATEWAY_URL").map(|u| u.trim_end_matches('/').to_string()),
        callback_url: env_str("CALLBACK_SERVER_URL").map(|u| u.trim_end_matches('/').to_string()),
        owner_id: env_str("FEISHU_OWNER_ID"),
        reply_in_thread: env_bool("FEISHU_REPLY_IN_THREAD"),
        claude_commands: parse_command_list(env_str("CLAUDE_COMMAND").as_deref()),
        data_dir: PathBuf::from(env_str("LARKIN_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into())),
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_str(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable value, using default");
            default
        }),
        None => default,
    }
}

fn env_bool(key: &str) -> bool {
    matches!(
        env_str(key).as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Parse the `CLAUDE_COMMAND` variable.
///
/// Accepted forms:
/// - a single command string: `claude --model opus`
/// - a JSON array: `["claude", "claude --model opus"]`
/// - a loose bracketed list: `[claude, happy]`
///
/// An empty or missing value yields `["claude"]`.
pub fn parse_command_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return vec!["claude".into()];
    };

    if raw.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
            let list: Vec<String> = list
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if !list.is_empty() {
                return list;
            }
        }
        // Loose form: strip brackets, split on commas, drop quoting.
        let inner = raw.trim_start_matches('[').trim_end_matches(']');
        let list: Vec<String> = inner
            .split(',')
            .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '\'').to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !list.is_empty() {
            return list;
        }
        return vec!["claude".into()];
    }

    vec![raw.to_string()]
}
