use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

/// How outbound Feishu messages are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Send through the OpenAPI with a cached tenant token.
    #[default]
    OpenApi,
    /// Delivery is owned by an external webhook; the API client stays off.
    Webhook,
}

impl SendMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openapi" | "open_api" => Some(Self::OpenApi),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// Feishu application credentials and send behavior.
#[derive(Clone)]
pub struct FeishuConfig {
    /// App ID from the Feishu developer console.
    pub app_id: String,

    /// App secret; only ever exposed when requesting a tenant token.
    pub app_secret: Secret<String>,

    /// Shared verification secret; doubles as the HMAC key for bearer tokens.
    pub verification_token: Secret<String>,

    pub send_mode: SendMode,

    /// Default receive target when a send request names none.
    pub receive_id: Option<String>,
    pub receive_id_type: Option<String>,
}

impl std::fmt::Debug for FeishuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("verification_token", &"[REDACTED]")
            .field("send_mode", &self.send_mode)
            .finish_non_exhaustive()
    }
}

impl FeishuConfig {
    /// True when the OpenAPI client can be used at all.
    pub fn api_enabled(&self) -> bool {
        self.send_mode == SendMode::OpenApi
            && !self.app_id.is_empty()
            && !self.app_secret.expose_secret().is_empty()
    }
}

/// Root configuration shared by both roles.
#[derive(Debug, Clone)]
pub struct LarkinConfig {
    /// Unix socket the permission hook connects to.
    pub socket_path: PathBuf,

    /// Listen port of the backend HTTP surface.
    pub callback_port: u16,
    /// Listen port of the gateway HTTP surface.
    pub gateway_port: u16,

    /// Server-side pending-request timeout in seconds; 0 disables the timeout
    /// (dead-peer detection still runs).
    pub request_timeout: u64,
    /// Added to `request_timeout` for the hook-side client deadline, so the
    /// server always times out first.
    pub client_timeout_buffer: u64,

    /// Auto-close countdown on decision result pages, in seconds.
    pub page_close_delay: u64,
    /// When set, the success page deep-links back into the editor at
    /// `<prefix><project_dir>`.
    pub vscode_uri_prefix: Option<String>,

    pub feishu: FeishuConfig,

    /// Gateway base URL the backend registers against.
    pub gateway_url: Option<String>,
    /// Public URL of this backend, sent to the gateway at registration.
    pub callback_url: Option<String>,
    /// The single chat user authorized to approve for this backend.
    pub owner_id: Option<String>,
    /// Thread replies onto the previous session message instead of the chat.
    pub reply_in_thread: bool,

    /// Configured agent command templates; the first one is the default.
    pub claude_commands: Vec<String>,

    /// Directory holding the JSON state files.
    pub data_dir: PathBuf,
}

impl LarkinConfig {
    /// Hook-side socket deadline: server timeout plus the safety buffer.
    ///
    /// With the server timeout disabled the client still gets a (long)
    /// deadline so a vanished server cannot hang the hook forever.
    pub fn client_timeout_secs(&self) -> u64 {
        let base = if self.request_timeout == 0 {
            24 * 3600
        } else {
            self.request_timeout
        };
        base + self.client_timeout_buffer
    }

    /// The default agent command template.
    pub fn default_claude_command(&self) -> &str {
        self.claude_commands
            .first()
            .map_or("claude", String::as_str)
    }

    /// Whether `command` is one of the configured templates.
    pub fn is_known_command(&self, command: &str) -> bool {
        self.claude_commands.iter().any(|c| c == command)
    }
}
