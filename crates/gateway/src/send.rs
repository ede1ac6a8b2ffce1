//! `/gw/feishu/send`: outbound sends for hooks and backends, authenticated
//! per owner and threaded onto the session's reply anchor.

use std::sync::Arc;

use {
    axum::{
        Json,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    serde_json::Value,
    tracing::{info, warn},
};

use larkin_protocol::rpc::{
    AUTH_HEADER, DecisionResponse, MsgType, SendMessageRequest, SendMessageResponse,
};

use crate::state::GatewayState;

pub async fn handle_send(
    state: Arc<GatewayState>,
    headers: &HeaderMap,
    body: SendMessageRequest,
) -> Response {
    // Owner-based auth: the token must match this owner's binding.
    let presented = headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let binding = match state.bindings.get(&body.owner_id) {
        Ok(Some(binding)) => binding,
        _ => {
            warn!(owner_id = body.owner_id, "send refused: no binding");
            return unauthorized();
        },
    };
    if !larkin_auth::tokens_match(presented, &binding.auth_token) {
        warn!(owner_id = body.owner_id, "send refused: token mismatch");
        return unauthorized();
    }

    let session = SessionContext::from_request(&body);
    let receive_id = body.receive_id.as_deref();
    let receive_id_type = body.receive_id_type.as_deref();

    // When the message belongs to a session, chain it onto the previous
    // message so the conversation stays threaded.
    let anchor = match &session {
        Some(ctx) => state
            .backends
            .last_message_id(&ctx.callback_url, &binding.auth_token, &ctx.session_id)
            .await
            .unwrap_or_default(),
        None => String::new(),
    };

    let sent = match body.msg_type {
        MsgType::Text => {
            let Some(text) = text_content(&body.content) else {
                return send_error("Missing text content");
            };
            if anchor.is_empty() {
                state.feishu.send_text(&text, receive_id, receive_id_type).await
            } else {
                state
                    .feishu
                    .reply_text(&anchor, &text, binding.reply_in_thread)
                    .await
            }
        },
        MsgType::Interactive => {
            let Some(card) = card_content(&body.content) else {
                return send_error("Missing card content");
            };
            if anchor.is_empty() {
                state.feishu.send_card(&card, receive_id, receive_id_type).await
            } else {
                state
                    .feishu
                    .reply_card(&anchor, &card, binding.reply_in_thread)
                    .await
            }
        },
        MsgType::Image => {
            let Some(image_key) = image_key(&body.content) else {
                return send_error("Missing image_key");
            };
            state
                .feishu
                .send_image(&image_key, receive_id, receive_id_type)
                .await
        },
    };

    let message_id = match sent {
        Ok(message_id) => message_id,
        Err(e) => {
            warn!(owner_id = body.owner_id, error = %e, "feishu send failed");
            return send_error(e.to_string());
        },
    };
    info!(owner_id = body.owner_id, message_id, "message sent");

    // Record the session mapping and advance the reply anchor.
    if let Some(ctx) = &session
        && !message_id.is_empty()
    {
        if let Some(project_dir) = &ctx.project_dir
            && let Err(e) = state.message_sessions.save(
                &message_id,
                &ctx.session_id,
                project_dir,
                &ctx.callback_url,
            )
        {
            warn!(error = %e, "failed to save message session mapping");
        }
        if let Err(e) = state
            .backends
            .set_last_message_id(
                &ctx.callback_url,
                &binding.auth_token,
                &ctx.session_id,
                &message_id,
            )
            .await
        {
            warn!(error = %e, "failed to advance reply anchor");
        }
    }

    Json(SendMessageResponse {
        success: true,
        message_id: Some(message_id),
        error: None,
    })
    .into_response()
}

struct SessionContext {
    session_id: String,
    callback_url: String,
    project_dir: Option<String>,
}

impl SessionContext {
    fn from_request(body: &SendMessageRequest) -> Option<Self> {
        let session_id = body.session_id.clone().filter(|s| !s.is_empty())?;
        let callback_url = body.callback_url.clone().filter(|u| !u.is_empty())?;
        Some(Self {
            session_id,
            callback_url,
            project_dir: body.project_dir.clone().filter(|d| !d.is_empty()),
        })
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(DecisionResponse::refused("无效的认证令牌")),
    )
        .into_response()
}

fn send_error(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(SendMessageResponse {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }),
    )
        .into_response()
}

fn text_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => content
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(String::from),
        _ => None,
    }
}

fn card_content(content: &Value) -> Option<Value> {
    match content {
        Value::Object(_) => Some(content.clone()),
        // Hooks may pre-serialize the card JSON.
        Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    }
}

fn image_key(content: &Value) -> Option<String> {
    match content {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => content
            .get("image_key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(String::from),
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn test_text_content_forms() {
        assert_eq!(text_content(&json!("hi")).as_deref(), Some("hi"));
        assert_eq!(text_content(&json!({"text": "hi"})).as_deref(), Some("hi"));
        assert!(text_content(&json!({"other": 1})).is_none());
        assert!(text_content(&json!("")).is_none());
    }

    #[test]
    fn test_card_content_accepts_serialized_json() {
        let card = json!({"schema": "2.0"});
        assert_eq!(card_content(&card), Some(card.clone()));
        assert_eq!(card_content(&json!(card.to_string())), Some(card));
        assert!(card_content(&json!(42)).is_none());
    }

    #[test]
    fn test_image_key_forms() {
        assert_eq!(image_key(&json!("img_v2_x")).as_deref(), Some("img_v2_x"));
        assert_eq!(
            image_key(&json!({"image_key": "img_v2_y"})).as_deref(),
            Some("img_v2_y")
        );
        assert!(image_key(&json!({})).is_none());
    }
}
