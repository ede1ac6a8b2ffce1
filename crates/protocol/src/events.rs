//! Feishu event envelopes (schema 2.0) and the closed set of card actions.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::rpc::DecisionAction;

pub const EVENT_MESSAGE_RECEIVED: &str = "im.message.receive_v1";
pub const EVENT_CARD_ACTION: &str = "card.action.trigger";

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Raw POST body of the gateway catch-all. Either a `url_verification`
/// handshake or a schema-2.0 event with a typed header.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<Value>,
}

impl EventEnvelope {
    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some("url_verification")
    }

    pub fn event_type(&self) -> &str {
        self.header.as_ref().map_or("", |h| h.event_type.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: String,
}

/// Reply to a `url_verification` handshake; must go out within 1 s.
#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

// ── Message events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub sender: Sender,
    pub message: IncomingMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub sender_id: SenderId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderId {
    #[serde(default)]
    pub open_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub chat_id: String,
    /// `p2p` or `group`.
    #[serde(default)]
    pub chat_type: String,
    #[serde(default)]
    pub message_type: String,
    /// JSON-encoded content, e.g. `{"text":"..."}` for text messages.
    #[serde(default)]
    pub content: String,
    /// Set when the message replies to another one.
    #[serde(default)]
    pub parent_id: String,
}

impl IncomingMessage {
    /// Extract the plain text of a text message; falls back to the raw
    /// content when it is not the expected JSON shape.
    pub fn text(&self) -> String {
        serde_json::from_str::<Value>(&self.content)
            .ok()
            .and_then(|v| v.get("text").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| self.content.clone())
    }
}

// ── Card actions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CardActionEvent {
    #[serde(default)]
    pub operator: Operator,
    pub action: CardAction,
    #[serde(default)]
    pub context: CardContext,
}

/// Where the card lives; used to notify the right chat after an async action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardContext {
    #[serde(default)]
    pub open_chat_id: String,
    #[serde(default)]
    pub open_message_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operator {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl Operator {
    pub fn id(&self) -> &str {
        if self.open_id.is_empty() {
            &self.user_id
        } else {
            &self.open_id
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardAction {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub tag: Option<String>,
    /// Named form inputs collected by a submit button.
    #[serde(default)]
    pub form_value: Option<Value>,
    /// Chosen option of a select element.
    #[serde(default)]
    pub option: Option<String>,
}

impl CardAction {
    /// Parse the button value into the closed action set.
    pub fn parsed_value(&self) -> Option<CardActionValue> {
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// Target fields shared by the four permission-decision buttons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTarget {
    pub request_id: String,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
}

/// Every button value larkin cards can emit, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CardActionValue {
    Allow {
        #[serde(flatten)]
        target: DecisionTarget,
    },
    Always {
        #[serde(flatten)]
        target: DecisionTarget,
    },
    Deny {
        #[serde(flatten)]
        target: DecisionTarget,
    },
    Interrupt {
        #[serde(flatten)]
        target: DecisionTarget,
    },
    ApproveRegister {
        callback_url: String,
        owner_id: String,
        #[serde(default)]
        request_ip: String,
        #[serde(default)]
        old_callback_url: String,
        #[serde(default)]
        reply_in_thread: bool,
    },
    DenyRegister {
        callback_url: String,
        owner_id: String,
    },
    UnbindRegister {
        callback_url: String,
        owner_id: String,
    },
    /// Re-render the new-session card with the subdirectories of `path`.
    NewBrowse { path: String },
    /// Submit the new-session form; field values ride in `form_value`.
    NewSubmit {},
}

impl CardActionValue {
    /// The decision buttons, collapsed to `(action, target)`.
    pub fn decision(&self) -> Option<(DecisionAction, &DecisionTarget)> {
        match self {
            Self::Allow { target } => Some((DecisionAction::Allow, target)),
            Self::Always { target } => Some((DecisionAction::Always, target)),
            Self::Deny { target } => Some((DecisionAction::Deny, target)),
            Self::Interrupt { target } => Some((DecisionAction::Interrupt, target)),
            _ => None,
        }
    }
}

// ── Card callback responses ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastType {
    Success,
    Warning,
    Error,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toast {
    #[serde(rename = "type")]
    pub kind: ToastType,
    pub content: String,
}

impl Toast {
    pub fn new(kind: ToastType, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self::new(ToastType::Success, content)
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::new(ToastType::Warning, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ToastType::Error, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(ToastType::Info, content)
    }
}

/// Response body for `card.action.trigger`: a toast plus an optional card
/// replacement in the `{"type":"raw","data":…}` envelope Feishu expects.
#[derive(Debug, Clone, Serialize)]
pub struct CardActionResponse {
    pub toast: Toast,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<CardUpdate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Value,
}

impl CardActionResponse {
    pub fn toast_only(toast: Toast) -> Self {
        Self { toast, card: None }
    }

    pub fn with_card(toast: Toast, card: Value) -> Self {
        Self {
            toast,
            card: Some(CardUpdate { kind: "raw", data: card }),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_verification_envelope() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"c4f3"}"#).unwrap();
        assert!(env.is_url_verification());
        assert_eq!(env.challenge.as_deref(), Some("c4f3"));
    }

    #[test]
    fn test_event_type_dispatch() {
        let env: EventEnvelope = serde_json::from_str(
            r#"{"header":{"event_id":"e1","event_type":"im.message.receive_v1"},"event":{}}"#,
        )
        .unwrap();
        assert_eq!(env.event_type(), EVENT_MESSAGE_RECEIVED);
    }

    #[test]
    fn test_message_text_extraction() {
        let msg = IncomingMessage {
            message_id: "om_1".into(),
            chat_id: "oc_1".into(),
            chat_type: "p2p".into(),
            message_type: "text".into(),
            content: r#"{"text":"hello"}"#.into(),
            parent_id: String::new(),
        };
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn test_message_text_falls_back_to_raw() {
        let msg = IncomingMessage {
            message_id: String::new(),
            chat_id: String::new(),
            chat_type: String::new(),
            message_type: String::new(),
            content: "not json".into(),
            parent_id: String::new(),
        };
        assert_eq!(msg.text(), "not json");
    }

    #[test]
    fn test_card_action_value_decision() {
        let value: CardActionValue = serde_json::from_str(
            r#"{"action":"allow","request_id":"r1","callback_url":"http://b","project_dir":"/tmp"}"#,
        )
        .unwrap();
        let (action, target) = value.decision().unwrap();
        assert_eq!(action, DecisionAction::Allow);
        assert_eq!(target.request_id, "r1");
        assert_eq!(target.project_dir.as_deref(), Some("/tmp"));
    }

    #[test]
    fn test_card_action_value_register() {
        let value: CardActionValue = serde_json::from_str(
            r#"{"action":"approve_register","callback_url":"http://b","owner_id":"ou_x"}"#,
        )
        .unwrap();
        assert!(matches!(
            value,
            CardActionValue::ApproveRegister { ref owner_id, .. } if owner_id == "ou_x"
        ));
        assert!(value.decision().is_none());
    }

    #[test]
    fn test_card_action_value_rejects_unknown() {
        let raw = serde_json::json!({"action": "self_destruct"});
        assert!(serde_json::from_value::<CardActionValue>(raw).is_err());
    }

    #[test]
    fn test_toast_serialization() {
        let json = serde_json::to_value(Toast::warning("已拒绝运行")).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["content"], "已拒绝运行");
    }

    #[test]
    fn test_card_action_response_raw_envelope() {
        let resp =
            CardActionResponse::with_card(Toast::success("ok"), serde_json::json!({"schema": "2.0"}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["card"]["type"], "raw");
        assert_eq!(json["card"]["data"]["schema"], "2.0");
    }
}
