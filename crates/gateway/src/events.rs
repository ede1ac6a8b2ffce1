//! Feishu event dispatch: URL verification, message events (commands and
//! replies), and card actions.

use std::sync::Arc;

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    tracing::{debug, info, warn},
};

use {
    larkin_common::time::preview,
    larkin_protocol::{
        events::{
            CardActionEvent, CardActionResponse, CardActionValue, ChallengeResponse,
            EVENT_CARD_ACTION, EVENT_MESSAGE_RECEIVED, EventEnvelope, MessageEvent, Toast,
        },
        rpc::{
            ContinueSessionRequest, DecisionAction, DecisionRequest, LaunchStatus,
            NewSessionRequest,
        },
    },
    larkin_store::Binding,
};

use crate::{
    backend_rpc::RpcError,
    cards, commands,
    commands::NewCommand,
    register,
    state::GatewayState,
};

/// Entry point for the catch-all POST route.
pub async fn handle_event(state: Arc<GatewayState>, envelope: EventEnvelope) -> Response {
    if envelope.is_url_verification() {
        // Must echo within 1 s; nothing else happens on this path.
        let challenge = envelope.challenge.unwrap_or_default();
        return Json(ChallengeResponse { challenge }).into_response();
    }

    let event_type = envelope.event_type().to_string();
    match event_type.as_str() {
        EVENT_MESSAGE_RECEIVED => {
            let Some(event) = envelope
                .event
                .and_then(|e| serde_json::from_value::<MessageEvent>(e).ok())
            else {
                return bad_request("malformed message event");
            };
            handle_message(state, event);
            Json(json!({ "success": true })).into_response()
        },
        EVENT_CARD_ACTION => {
            let Some(event) = envelope
                .event
                .and_then(|e| serde_json::from_value::<CardActionEvent>(e).ok())
            else {
                return bad_request("malformed card action event");
            };
            Json(handle_card_action(state, event).await).into_response()
        },
        other => {
            debug!(event_type = other, "unhandled event type");
            bad_request("Unknown request type")
        },
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ── Message events ───────────────────────────────────────────────────────────

/// Route an incoming message; heavy work is detached so the event reply
/// never waits on a backend.
fn handle_message(state: Arc<GatewayState>, event: MessageEvent) {
    let text = strip_mentions(&event.message.text());
    let sender = event.sender.sender_id.open_id.clone();
    let chat_id = event.message.chat_id.clone();
    let message_id = event.message.message_id.clone();
    let parent_id = event.message.parent_id.clone();

    info!(
        chat_type = event.message.chat_type,
        message_type = event.message.message_type,
        parent_id,
        text = preview(&text, 20),
        "message received"
    );

    if let Some(command) = commands::parse_new(&text) {
        tokio::spawn(handle_new_command(state, command, sender, chat_id, message_id));
        return;
    }

    if let Some(reply) = commands::parse_reply(&text) {
        if parent_id.is_empty() {
            tokio::spawn(notify(state, chat_id, "⚠️ /reply 需要回复一条会话消息使用".to_string()));
            return;
        }
        if reply.carries_dir {
            tokio::spawn(notify(state, chat_id, "⚠️ /reply 不支持 --dir 参数".to_string()));
            return;
        }
        if reply.prompt.is_empty() {
            return;
        }
        tokio::spawn(continue_session(
            state, parent_id, reply.prompt, sender, chat_id, message_id,
        ));
        return;
    }

    // A bare reply to a session message continues that session.
    if !parent_id.is_empty() && !text.trim().is_empty() {
        tokio::spawn(continue_session(
            state,
            parent_id,
            text.trim().to_string(),
            sender,
            chat_id,
            message_id,
        ));
    }
}

/// Remove `@_user_1` bot mentions, with or without a trailing space.
fn strip_mentions(text: &str) -> String {
    text.replace("@_user_1 ", "").replace("@_user_1", "")
}

async fn continue_session(
    state: Arc<GatewayState>,
    parent_id: String,
    prompt: String,
    sender: String,
    chat_id: String,
    reply_message_id: String,
) {
    let mapping = match state.message_sessions.get(&parent_id) {
        Ok(Some(mapping)) => mapping,
        Ok(None) => {
            debug!(parent_id, "no session mapping for replied message, ignoring");
            return;
        },
        Err(e) => {
            warn!(error = %e, "message session lookup failed");
            return;
        },
    };

    let Some((owner_id, binding)) = state
        .bindings
        .find_by_callback_url(&mapping.callback_url)
        .unwrap_or_default()
    else {
        warn!(callback_url = mapping.callback_url, "reply for unbound backend");
        notify(state, chat_id, "⚠️ 继续会话失败: 回调服务未绑定".to_string()).await;
        return;
    };
    if owner_id != sender {
        warn!(sender, owner_id, "reply from non-owner ignored");
        return;
    }

    info!(
        session_id = mapping.session_id,
        parent_id,
        prompt = preview(&prompt, 20),
        "forwarding continue request"
    );

    let request = ContinueSessionRequest {
        session_id: mapping.session_id.clone(),
        project_dir: mapping.project_dir.clone(),
        prompt,
        chat_id: Some(chat_id.clone()),
        reply_message_id: Some(reply_message_id),
        claude_command: None,
    };
    let result = state
        .backends
        .continue_session(&mapping.callback_url, &binding.auth_token, &request)
        .await;
    let message = launch_result_message(result, "继续会话失败");
    notify(state, chat_id, message).await;
}

async fn handle_new_command(
    state: Arc<GatewayState>,
    command: NewCommand,
    sender: String,
    chat_id: String,
    message_id: String,
) {
    let binding = match state.bindings.get(&sender) {
        Ok(Some(binding)) => binding,
        _ => {
            notify(
                state,
                chat_id,
                "⚠️ 未绑定回调服务，请先在开发机上启动并授权 Backend".to_string(),
            )
            .await;
            return;
        },
    };

    // Everything supplied: launch directly.
    if let Some(dir) = command.dir.clone().filter(|_| !command.prompt.is_empty()) {
        let request = NewSessionRequest {
            project_dir: dir,
            prompt: command.prompt,
            chat_id: Some(chat_id.clone()),
            message_id: Some(message_id),
            claude_command: command.command,
        };
        let result = state
            .backends
            .new_session(&binding.callback_url, &binding.auth_token, &request)
            .await;
        let message = launch_result_message(result, "创建会话失败");
        notify(state, chat_id, message).await;
        return;
    }

    // Otherwise walk the user through the interactive card.
    let recent = state
        .backends
        .recent_dirs(&binding.callback_url, &binding.auth_token, None)
        .await
        .unwrap_or_default();
    let card = cards::new_session_card(
        &recent,
        None,
        &state.config.claude_commands,
        &command.prompt,
    );
    if let Err(e) = state.feishu.send_card(&card, Some(&chat_id), None).await {
        warn!(error = %e, "failed to send new-session card");
    }
}

fn launch_result_message(
    result: Result<larkin_protocol::rpc::LaunchResponse, RpcError>,
    failure_prefix: &str,
) -> String {
    match result {
        Ok(response) => match response.status {
            LaunchStatus::Processing => "⏳ Claude 正在处理您的问题，请稍候...".to_string(),
            LaunchStatus::Completed => match response.output.filter(|o| !o.is_empty()) {
                Some(output) => format!("✅ Claude 已完成: {}", preview(&output, 50)),
                None => "✅ Claude 已完成".to_string(),
            },
        },
        Err(e) => match e.detail() {
            Some(detail) => format!("⚠️ {failure_prefix}: Claude 执行失败: {detail}"),
            None => format!("⚠️ {failure_prefix}: {e}"),
        },
    }
}

async fn notify(state: Arc<GatewayState>, chat_id: String, text: String) {
    if chat_id.is_empty() {
        return;
    }
    if let Err(e) = state.feishu.send_text(&text, Some(&chat_id), None).await {
        warn!(error = %e, chat_id, "notification send failed");
    }
}

// ── Card actions ─────────────────────────────────────────────────────────────

async fn handle_card_action(state: Arc<GatewayState>, event: CardActionEvent) -> CardActionResponse {
    let Some(value) = event.action.parsed_value() else {
        warn!(value = %event.action.value, "unparseable card action value");
        return CardActionResponse::toast_only(Toast::error("无效的回调请求"));
    };
    let operator = event.operator.id().to_string();

    if let Some((action, target)) = value.decision() {
        return forward_decision(&state, &operator, action, target).await;
    }

    match value {
        CardActionValue::ApproveRegister {
            callback_url,
            owner_id,
            request_ip,
            reply_in_thread,
            ..
        } => {
            register::handle_approve(
                &state,
                &callback_url,
                &owner_id,
                &operator,
                &request_ip,
                reply_in_thread,
            )
            .await
        },
        CardActionValue::DenyRegister {
            callback_url,
            owner_id,
        } => register::handle_deny(&state, &callback_url, &owner_id, &operator).await,
        CardActionValue::UnbindRegister {
            callback_url,
            owner_id,
        } => register::handle_unbind(&state, &callback_url, &owner_id, &operator).await,
        CardActionValue::NewBrowse { path } => browse_card(&state, &operator, &path).await,
        CardActionValue::NewSubmit {} => submit_new_session(&state, &operator, &event).await,
        // Decision variants were handled above.
        _ => CardActionResponse::toast_only(Toast::error("无效的回调请求")),
    }
}

/// Forward a permission decision to the backend named by the card, using the
/// operator's own binding token; the card's callback_url must match the
/// operator's binding.
async fn forward_decision(
    state: &Arc<GatewayState>,
    operator: &str,
    action: DecisionAction,
    target: &larkin_protocol::events::DecisionTarget,
) -> CardActionResponse {
    let Some(binding) = operator_binding(state, operator, &target.callback_url) else {
        return CardActionResponse::toast_only(Toast::error("无权操作此请求"));
    };

    let request = DecisionRequest {
        action,
        request_id: target.request_id.clone(),
        project_dir: target.project_dir.clone(),
    };
    info!(
        operator,
        request_id = target.request_id,
        action = action.as_str(),
        "forwarding decision"
    );

    match state
        .backends
        .decision(&target.callback_url, &binding.auth_token, &request)
        .await
    {
        Ok(response) => {
            let toast = match (response.success, response.decision) {
                (true, Some(larkin_protocol::socket::Behavior::Allow)) => Toast::success(
                    non_empty(response.message, "已批准运行"),
                ),
                (true, _) => Toast::warning(non_empty(response.message, "已拒绝运行")),
                (false, _) => Toast::error(non_empty(response.message, "处理失败")),
            };
            CardActionResponse::toast_only(toast)
        },
        Err(e) if e.is_timeout() => {
            warn!(request_id = target.request_id, "decision forward timed out");
            CardActionResponse::toast_only(Toast::error("回调服务响应超时"))
        },
        Err(RpcError::Status { status, .. }) => {
            CardActionResponse::toast_only(Toast::error(format!("回调服务错误: HTTP {status}")))
        },
        Err(e) => {
            warn!(request_id = target.request_id, error = %e, "decision forward failed");
            CardActionResponse::toast_only(Toast::error("回调服务不可达，请检查服务状态"))
        },
    }
}

async fn browse_card(state: &Arc<GatewayState>, operator: &str, path: &str) -> CardActionResponse {
    let Some(binding) = any_operator_binding(state, operator) else {
        return CardActionResponse::toast_only(Toast::error("未绑定回调服务"));
    };

    match state
        .backends
        .browse_dirs(&binding.callback_url, &binding.auth_token, path)
        .await
    {
        Ok(listing) => {
            let card = cards::new_session_card(
                &[],
                Some(&listing),
                &state.config.claude_commands,
                "",
            );
            CardActionResponse::with_card(Toast::info(listing.current.clone()), card)
        },
        Err(e) => {
            let message = e.detail().map_or_else(|| e.to_string(), String::from);
            CardActionResponse::toast_only(Toast::error(message))
        },
    }
}

async fn submit_new_session(
    state: &Arc<GatewayState>,
    operator: &str,
    event: &CardActionEvent,
) -> CardActionResponse {
    let Some(binding) = any_operator_binding(state, operator) else {
        return CardActionResponse::toast_only(Toast::error("未绑定回调服务"));
    };

    let form = event.action.form_value.clone().unwrap_or_default();
    let field = |name: &str| {
        form.get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let dir = field("custom_dir").or_else(|| field("dir"));
    let Some(dir) = dir else {
        return CardActionResponse::toast_only(Toast::warning("请选择或输入项目目录"));
    };
    if !dir.starts_with('/') {
        return CardActionResponse::toast_only(Toast::warning("目录必须是绝对路径"));
    }
    let Some(prompt) = field("prompt") else {
        return CardActionResponse::toast_only(Toast::warning("请输入任务描述"));
    };
    let command = field("command");

    // Reply within the card budget; the launch itself runs detached.
    let chat_id = event.context.open_chat_id.clone();
    let message_id = event.context.open_message_id.clone();
    let request = NewSessionRequest {
        project_dir: dir.clone(),
        prompt: prompt.clone(),
        chat_id: Some(chat_id.clone()).filter(|c| !c.is_empty()),
        message_id: Some(message_id).filter(|m| !m.is_empty()),
        claude_command: command,
    };
    {
        let state = Arc::clone(state);
        tokio::spawn(async move {
            let result = state
                .backends
                .new_session(&binding.callback_url, &binding.auth_token, &request)
                .await;
            let message = launch_result_message(result, "创建会话失败");
            notify(state, chat_id, message).await;
        });
    }

    CardActionResponse::with_card(
        Toast::success("正在创建会话"),
        cards::creating_card(&dir, &prompt),
    )
}

/// The operator's binding, required to point at the card's backend.
fn operator_binding(
    state: &Arc<GatewayState>,
    operator: &str,
    callback_url: &str,
) -> Option<Binding> {
    let binding = state.bindings.get(operator).ok()??;
    if binding.callback_url != callback_url {
        warn!(
            operator,
            bound = binding.callback_url,
            requested = callback_url,
            "card targets a backend the operator does not own"
        );
        return None;
    }
    Some(binding)
}

fn any_operator_binding(state: &Arc<GatewayState>, operator: &str) -> Option<Binding> {
    state.bindings.get(operator).ok()?
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
