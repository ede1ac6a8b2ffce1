//! HTTP RPC bodies for backend ↔ gateway calls.
//!
//! Every endpoint has a closed request/response pair here; handlers never
//! pull fields out of loose JSON.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::socket::Behavior;

/// Header carrying the bearer token on authenticated RPCs.
pub const AUTH_HEADER: &str = "X-Auth-Token";

// ── Generic shapes ───────────────────────────────────────────────────────────

/// Minimal `{success, message|error}` body used by fire-and-forget endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimpleResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Plain `{error}` body for 400-class launcher/browser failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ── Registration ─────────────────────────────────────────────────────────────

/// Backend → gateway `/gw/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRegisterRequest {
    pub callback_url: String,
    pub owner_id: String,
    #[serde(default)]
    pub reply_in_thread: bool,
}

/// Gateway → backend `/cb/register`, announcing a freshly minted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbRegisterRequest {
    pub owner_id: String,
    pub auth_token: String,
    #[serde(default)]
    pub gateway_version: String,
}

/// Gateway → backend `/cb/check-owner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOwnerRequest {
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOwnerResponse {
    pub success: bool,
    pub is_owner: bool,
}

// ── Session threading anchors ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatIdResponse {
    pub success: bool,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessageIdResponse {
    pub success: bool,
    #[serde(default)]
    pub last_message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLastMessageIdRequest {
    pub session_id: String,
    pub message_id: String,
}

// ── Decisions ────────────────────────────────────────────────────────────────

/// User action on a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Allow,
    Always,
    Deny,
    Interrupt,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Always => "always",
            Self::Deny => "deny",
            Self::Interrupt => "interrupt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "always" => Some(Self::Always),
            "deny" => Some(Self::Deny),
            "interrupt" => Some(Self::Interrupt),
            _ => None,
        }
    }
}

/// Gateway → backend `/cb/decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub action: DecisionAction,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
}

/// Pure decision outcome; `decision` is null whenever `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub decision: Option<Behavior>,
    pub message: String,
}

impl DecisionResponse {
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            decision: None,
            message: message.into(),
        }
    }
}

// ── Agent launch ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRequest {
    pub project_dir: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueSessionRequest {
    pub session_id: String,
    pub project_dir: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStatus {
    /// Child still running after the startup check; a waiter owns it now.
    Processing,
    /// Child exited 0 within the startup check.
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub status: LaunchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ── Directory browsing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentDirsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDirsResponse {
    pub success: bool,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseDirsRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseDirsResponse {
    pub success: bool,
    pub dirs: Vec<String>,
    pub parent: String,
    pub current: String,
}

// ── Outbound sends (tools / backend → gateway) ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Text,
    Interactive,
    Image,
}

/// `/gw/feishu/send` body, authenticated by the owner's binding token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub owner_id: String,
    pub msg_type: MsgType,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_id_type: Option<String>,
    /// Present when the message belongs to an agent session; enables reply
    /// threading and message → session mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_action_roundtrip() {
        for action in [
            DecisionAction::Allow,
            DecisionAction::Always,
            DecisionAction::Deny,
            DecisionAction::Interrupt,
        ] {
            assert_eq!(DecisionAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(DecisionAction::parse("shrug"), None);
    }

    #[test]
    fn test_decision_response_null_decision() {
        let json = serde_json::to_value(DecisionResponse::refused("缺少请求 ID")).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["decision"].is_null());
    }

    #[test]
    fn test_launch_status_wire_names() {
        assert_eq!(
            serde_json::to_value(LaunchStatus::Processing).unwrap(),
            "processing"
        );
        assert_eq!(
            serde_json::to_value(LaunchStatus::Completed).unwrap(),
            "completed"
        );
    }

    #[test]
    fn test_register_request_defaults() {
        let req: GatewayRegisterRequest =
            serde_json::from_str(r#"{"callback_url":"http://b","owner_id":"ou_x"}"#).unwrap();
        assert!(!req.reply_in_thread);
    }
}
