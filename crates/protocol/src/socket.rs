//! Messages exchanged on the local Unix socket.
//!
//! The hook sends one unframed JSON object (a probe or a register request).
//! The server answers with an unframed ACK, then later exactly one
//! length-prefixed decision frame (see [`crate::framing`]).

use {
    base64::Engine,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Hook → server ────────────────────────────────────────────────────────────

/// First JSON object read from a fresh connection.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HookMessage {
    /// `{"type":"ping"}` health probe; answered with a pong, then close.
    Probe {
        #[serde(rename = "type")]
        kind: ProbeKind,
    },
    Register(RegisterFrame),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
}

/// Probe answer.
#[derive(Debug, Serialize)]
pub struct Pong {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl Pong {
    pub fn new() -> Self {
        Self { kind: "pong" }
    }
}

impl Default for Pong {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration request carrying the hook identity and an encoded payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterFrame {
    pub request_id: String,
    #[serde(default)]
    pub hook_pid: Option<i32>,
    /// Base64 of a JSON object with session/tool/project fields.
    #[serde(default)]
    pub raw_input_encoded: String,
}

/// Decoded contents of `raw_input_encoded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    #[serde(default = "unknown_session")]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub project_dir: String,
}

fn unknown_session() -> String {
    "unknown".into()
}

impl HookPayload {
    /// Placeholder used when the encoded payload cannot be decoded; the
    /// request is still registered so the user sees *something*.
    pub fn unknown() -> Self {
        Self {
            session_id: unknown_session(),
            tool_name: String::new(),
            tool_input: Value::Null,
            project_dir: String::new(),
        }
    }

    /// Decode the base64 JSON payload of a register frame.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

// ── Server → hook ────────────────────────────────────────────────────────────

/// Unframed acknowledgement written right after a successful registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
    pub session_id: String,
}

impl Ack {
    pub fn registered(session_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "Request registered".into(),
            session_id: session_id.into(),
        }
    }
}

/// What the user decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub behavior: Behavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Allow,
    Deny,
}

impl Behavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            behavior: Behavior::Allow,
            message: None,
            interrupt: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Deny,
            message: Some(message.into()),
            interrupt: None,
        }
    }

    pub fn deny_interrupt(message: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Deny,
            message: Some(message.into()),
            interrupt: Some(true),
        }
    }
}

/// The single length-prefixed frame a registered connection receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecisionFrame {
    Resolved(ResolvedFrame),
    Fallback(FallbackFrame),
}

/// A user decision, echoing the request context back to the hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedFrame {
    pub success: bool,
    pub decision: Decision,
    pub session_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub project_dir: String,
}

/// Server gave up; the hook should fall back to terminal interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackFrame {
    pub success: bool,
    pub fallback_to_terminal: bool,
    pub error: String,
    pub session_id: String,
    pub message: String,
}

impl DecisionFrame {
    pub fn resolved(decision: Decision, payload: &HookPayload) -> Self {
        Self::Resolved(ResolvedFrame {
            success: true,
            decision,
            session_id: payload.session_id.clone(),
            tool_name: payload.tool_name.clone(),
            tool_input: payload.tool_input.clone(),
            project_dir: payload.project_dir.clone(),
        })
    }

    pub fn server_timeout(session_id: impl Into<String>, age_secs: u64) -> Self {
        Self::Fallback(FallbackFrame {
            success: false,
            fallback_to_terminal: true,
            error: "server_timeout".into(),
            session_id: session_id.into(),
            message: format!("服务器超时（{age_secs}秒），请在终端操作"),
        })
    }
}

// ── Client-side failure output ───────────────────────────────────────────────

/// JSON printed by the socket client when it cannot obtain a real decision.
#[derive(Debug, Serialize)]
pub struct ClientFailure {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_to_terminal: Option<bool>,
    pub decision: Decision,
}

impl ClientFailure {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            fallback_to_terminal: None,
            decision: Decision::deny(message),
        }
    }

    pub fn timeout(elapsed_secs: u64) -> Self {
        Self {
            success: false,
            error: "client_timeout".into(),
            fallback_to_terminal: Some(true),
            decision: Decision::deny(format!("客户端超时（{elapsed_secs}秒），请在终端操作")),
        }
    }
}
