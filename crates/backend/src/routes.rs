//! HTTP surface of the backend: browser-fallback decision pages plus the
//! gateway-called `/cb/*` RPC routes.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{Query, Request, State},
        http::StatusCode,
        middleware::{self, Next},
        response::{Html, IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer},
    tracing::{info, warn},
};

use {
    larkin_broker::handle_decision,
    larkin_protocol::{
        MAX_BODY_BYTES,
        rpc::{
            AUTH_HEADER, BrowseDirsRequest, CbRegisterRequest, ChatIdResponse, CheckOwnerRequest,
            CheckOwnerResponse, DecisionAction, DecisionRequest, DecisionResponse, ErrorBody,
            LastMessageIdResponse, LaunchStatus, NewSessionRequest, RecentDirsRequest,
            RecentDirsResponse, ContinueSessionRequest, SessionRef, SetLastMessageIdRequest,
            SimpleResponse,
        },
    },
};

use crate::{
    dirs,
    html::decision_page,
    launcher::{self, SessionMode},
    state::BackendState,
};

const DEFAULT_RECENT_DIRS: usize = 5;

pub fn router(state: Arc<BackendState>) -> Router {
    let authed = Router::new()
        .route("/cb/session/get-chat-id", post(get_chat_id))
        .route("/cb/session/get-last-message-id", post(get_last_message_id))
        .route("/cb/session/set-last-message-id", post(set_last_message_id))
        .route("/cb/decision", post(cb_decision))
        .route("/cb/claude/new", post(claude_new))
        .route("/cb/claude/continue", post(claude_continue))
        .route("/cb/claude/recent-dirs", post(recent_dirs))
        .route("/cb/claude/browse-dirs", post(browse_dirs))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ));

    Router::new()
        .route("/status", get(status))
        .route("/allow", get(page_allow))
        .route("/always", get(page_always))
        .route("/deny", get(page_deny))
        .route("/interrupt", get(page_interrupt))
        .route("/cb/register", post(cb_register))
        .route("/cb/check-owner", post(check_owner))
        .merge(authed)
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Auth ─────────────────────────────────────────────────────────────────────

/// Global token check: the header must equal the stored registration token.
async fn require_token(
    State(state): State<Arc<BackendState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let stored = state.auth_tokens.token();

    if stored.is_empty() || !larkin_auth::tokens_match(presented, &stored) {
        warn!(path = %request.uri().path(), "rejected RPC with bad auth token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(DecisionResponse::refused("无效的认证令牌")),
        )
            .into_response();
    }
    next.run(request).await
}

// ── Status and decision pages ────────────────────────────────────────────────

async fn status(State(state): State<Arc<BackendState>>) -> Json<serde_json::Value> {
    let stats = state.broker.stats().await;
    let mut body = serde_json::to_value(&stats).unwrap_or_default();
    if let Some(map) = body.as_object_mut() {
        map.insert("status".into(), "ok".into());
    }
    Json(body)
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    #[serde(default)]
    id: Option<String>,
}

async fn page_allow(state: State<Arc<BackendState>>, query: Query<IdQuery>) -> Response {
    decision_page_response(state.0, query.0, DecisionAction::Allow).await
}

async fn page_always(state: State<Arc<BackendState>>, query: Query<IdQuery>) -> Response {
    decision_page_response(state.0, query.0, DecisionAction::Always).await
}

async fn page_deny(state: State<Arc<BackendState>>, query: Query<IdQuery>) -> Response {
    decision_page_response(state.0, query.0, DecisionAction::Deny).await
}

async fn page_interrupt(state: State<Arc<BackendState>>, query: Query<IdQuery>) -> Response {
    decision_page_response(state.0, query.0, DecisionAction::Interrupt).await
}

/// Success copy for each action's result page.
fn action_page_copy(action: DecisionAction) -> (&'static str, &'static str) {
    match action {
        DecisionAction::Allow => ("已批准运行", "权限请求已批准，请返回终端查看执行结果。"),
        DecisionAction::Always => (
            "已始终允许",
            "权限请求已批准，并已添加到项目的允许规则中。后续相同操作将自动允许。",
        ),
        DecisionAction::Deny => ("已拒绝运行", "权限请求已拒绝。Claude 可能会尝试其他方式继续工作。"),
        DecisionAction::Interrupt => ("已拒绝并中断", "权限请求已拒绝，Claude 已停止当前任务。"),
    }
}

async fn decision_page_response(
    state: Arc<BackendState>,
    query: IdQuery,
    action: DecisionAction,
) -> Response {
    let close_delay = state.config.page_close_delay;
    let Some(request_id) = query.id.filter(|id| !id.is_empty()) else {
        let page = decision_page("参数错误", "缺少请求 ID", false, close_delay, None);
        return (StatusCode::BAD_REQUEST, Html(page)).into_response();
    };

    // The project dir feeds the editor deep link; grab it while the request
    // data is still guaranteed to be around.
    let project_dir = state
        .broker
        .request_data(&request_id)
        .await
        .map(|d| d.project_dir);

    let outcome = handle_decision(&state.broker, action, &request_id, None).await;
    if outcome.success {
        let (title, message) = action_page_copy(action);
        let vscode_uri = state.config.vscode_uri_prefix.as_ref().and_then(|prefix| {
            project_dir
                .filter(|d| !d.is_empty())
                .map(|d| format!("{prefix}{d}"))
        });
        let page = decision_page(title, message, true, close_delay, vscode_uri.as_deref());
        (StatusCode::OK, Html(page)).into_response()
    } else {
        let page = decision_page("操作失败", &outcome.message, false, close_delay, None);
        (StatusCode::BAD_REQUEST, Html(page)).into_response()
    }
}

async fn not_found(State(state): State<Arc<BackendState>>) -> Response {
    let page = decision_page(
        "未找到",
        "请求的页面不存在。",
        false,
        state.config.page_close_delay,
        None,
    );
    (StatusCode::NOT_FOUND, Html(page)).into_response()
}

// ── Registration RPCs (no token yet) ─────────────────────────────────────────

async fn cb_register(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<CbRegisterRequest>,
) -> Json<SimpleResponse> {
    if body.owner_id.is_empty() || body.auth_token.is_empty() {
        return Json(SimpleResponse::err(
            "missing required fields: owner_id, auth_token",
        ));
    }

    if let Some(config_owner) = &state.config.owner_id
        && config_owner != &body.owner_id
    {
        warn!(
            received = body.owner_id,
            configured = config_owner,
            "register callback for foreign owner"
        );
        return Json(SimpleResponse::err("owner_id mismatch"));
    }

    match state.auth_tokens.save(&body.owner_id, &body.auth_token) {
        Ok(()) => {
            info!(
                owner_id = body.owner_id,
                gateway_version = body.gateway_version,
                "stored gateway auth token"
            );
            Json(SimpleResponse::ok("Registration successful"))
        },
        Err(e) => {
            warn!(error = %e, "failed to store auth token");
            Json(SimpleResponse::err("Failed to store token"))
        },
    }
}

async fn check_owner(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<CheckOwnerRequest>,
) -> Json<CheckOwnerResponse> {
    let is_owner = !body.owner_id.is_empty()
        && state.config.owner_id.as_deref() == Some(body.owner_id.as_str());
    info!(owner_id = body.owner_id, is_owner, "owner check");
    Json(CheckOwnerResponse {
        success: true,
        is_owner,
    })
}

// ── Session threading anchors ────────────────────────────────────────────────

async fn get_chat_id(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<SessionRef>,
) -> Json<ChatIdResponse> {
    let chat_id = state
        .session_chats
        .chat_id(&body.session_id)
        .unwrap_or_default()
        .filter(|c| !c.is_empty());
    Json(ChatIdResponse {
        success: true,
        chat_id,
    })
}

async fn get_last_message_id(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<SessionRef>,
) -> Json<LastMessageIdResponse> {
    let last_message_id = state
        .session_chats
        .last_message_id(&body.session_id)
        .unwrap_or_default();
    Json(LastMessageIdResponse {
        success: true,
        last_message_id,
    })
}

async fn set_last_message_id(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<SetLastMessageIdRequest>,
) -> Json<SimpleResponse> {
    match state
        .session_chats
        .set_last_message_id(&body.session_id, &body.message_id)
    {
        Ok(true) => Json(SimpleResponse::ok("updated")),
        Ok(false) => Json(SimpleResponse::err("session expired")),
        Err(e) => {
            warn!(error = %e, "failed to set last message id");
            Json(SimpleResponse::err("store write failed"))
        },
    }
}

// ── Decision RPC ─────────────────────────────────────────────────────────────

async fn cb_decision(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<DecisionRequest>,
) -> Json<DecisionResponse> {
    Json(
        handle_decision(
            &state.broker,
            body.action,
            &body.request_id,
            body.project_dir.as_deref(),
        )
        .await,
    )
}

// ── Agent control ────────────────────────────────────────────────────────────

type LaunchResult = Result<Json<larkin_protocol::rpc::LaunchResponse>, (StatusCode, Json<ErrorBody>)>;

fn launch_error(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

async fn claude_new(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<NewSessionRequest>,
) -> LaunchResult {
    if body.project_dir.is_empty() {
        return Err(launch_error("Missing project_dir"));
    }
    if body.prompt.is_empty() {
        return Err(launch_error("Missing prompt"));
    }
    if !std::path::Path::new(&body.project_dir).exists() {
        return Err(launch_error(format!(
            "Project directory not found: {}",
            body.project_dir
        )));
    }
    let command = resolve_command(&state, body.claude_command.as_deref(), None)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    if let Some(chat_id) = body.chat_id.as_deref().filter(|c| !c.is_empty())
        && let Err(e) = state
            .session_chats
            .save(&session_id, chat_id, Some(&command))
    {
        warn!(error = %e, "failed to save session chat mapping");
    }

    let response = launcher::launch(
        Arc::clone(&state),
        SessionMode::New,
        &session_id,
        &body.project_dir,
        &body.prompt,
        body.chat_id.clone(),
        &command,
    )
    .await
    .map_err(launch_error)?;

    if response.status == LaunchStatus::Processing
        && let Err(e) = state.dir_history.record_usage(&body.project_dir)
    {
        warn!(error = %e, "failed to record dir usage");
    }
    Ok(Json(response))
}

async fn claude_continue(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<ContinueSessionRequest>,
) -> LaunchResult {
    if body.session_id.is_empty() || !state.session_chats.exists(&body.session_id).unwrap_or(false)
    {
        return Err(launch_error("Session not registered or has expired"));
    }
    if body.project_dir.is_empty() {
        return Err(launch_error("Missing project_dir"));
    }
    if body.prompt.is_empty() {
        return Err(launch_error("Missing prompt"));
    }
    if !std::path::Path::new(&body.project_dir).exists() {
        return Err(launch_error(format!(
            "Project directory not found: {}",
            body.project_dir
        )));
    }

    let stored_command = state
        .session_chats
        .command(&body.session_id)
        .unwrap_or_default();
    let command = resolve_command(&state, body.claude_command.as_deref(), stored_command)?;

    if let Some(chat_id) = body.chat_id.as_deref().filter(|c| !c.is_empty())
        && let Err(e) = state
            .session_chats
            .save(&body.session_id, chat_id, Some(&command))
    {
        warn!(error = %e, "failed to save session chat mapping");
    }

    let response = launcher::launch(
        Arc::clone(&state),
        SessionMode::Resume,
        &body.session_id,
        &body.project_dir,
        &body.prompt,
        body.chat_id.clone(),
        &command,
    )
    .await
    .map_err(launch_error)?;

    if response.status == LaunchStatus::Processing
        && let Err(e) = state.dir_history.record_usage(&body.project_dir)
    {
        warn!(error = %e, "failed to record dir usage");
    }
    Ok(Json(response))
}

/// Command priority: explicit request value (validated against the
/// configured list) > the session's stored command > the default template.
fn resolve_command(
    state: &BackendState,
    requested: Option<&str>,
    stored: Option<String>,
) -> Result<String, (StatusCode, Json<ErrorBody>)> {
    if let Some(requested) = requested.filter(|c| !c.is_empty()) {
        if !state.config.is_known_command(requested) {
            return Err(launch_error("invalid claude_command"));
        }
        return Ok(requested.to_string());
    }
    if let Some(stored) = stored.filter(|c| !c.is_empty()) {
        return Ok(stored);
    }
    Ok(state.config.default_claude_command().to_string())
}

// ── Directory browsing ───────────────────────────────────────────────────────

async fn recent_dirs(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<RecentDirsRequest>,
) -> Json<RecentDirsResponse> {
    let limit = body.limit.unwrap_or(DEFAULT_RECENT_DIRS);
    let dirs = state.dir_history.recent_dirs(limit).unwrap_or_default();
    Json(RecentDirsResponse {
        success: true,
        dirs,
    })
}

async fn browse_dirs(
    State(_state): State<Arc<BackendState>>,
    Json(body): Json<BrowseDirsRequest>,
) -> Result<Json<larkin_protocol::rpc::BrowseDirsResponse>, (StatusCode, Json<ErrorBody>)> {
    dirs::browse(&body.path)
        .map(Json)
        .map_err(|error| (StatusCode::BAD_REQUEST, Json(ErrorBody { error })))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::future::IntoFuture;

    use {
        super::*,
        larkin_protocol::{
            framing,
            socket::{DecisionFrame, HookPayload},
        },
        tokio::net::UnixStream,
    };

    async fn serve() -> (Arc<BackendState>, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = larkin_config::from_env();
        config.data_dir = dir.path().join("runtime");
        config.owner_id = Some("ou_x".into());
        let state = Arc::new(BackendState::new(config).unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router(Arc::clone(&state))).into_future());
        (state, format!("http://{addr}"), dir)
    }

    fn payload() -> HookPayload {
        HookPayload {
            session_id: "s1".into(),
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "ls"}),
            project_dir: "/tmp".into(),
        }
    }

    async fn register(state: &Arc<BackendState>, request_id: &str) -> UnixStream {
        let (server, client) = UnixStream::pair().unwrap();
        state
            .broker
            .register(
                request_id,
                server,
                Some(std::process::id() as i32),
                payload(),
            )
            .await;
        client
    }

    #[tokio::test]
    async fn test_happy_allow_then_duplicate() {
        let (state, base, _dir) = serve().await;
        let mut hook = register(&state, "r1").await;

        let page = reqwest::get(format!("{base}/allow?id=r1"))
            .await
            .unwrap();
        assert_eq!(page.status(), 200);
        let body = page.text().await.unwrap();
        assert!(body.contains("已批准运行"));

        let raw = framing::read_frame(&mut hook).await.unwrap();
        let frame: DecisionFrame = serde_json::from_slice(&raw).unwrap();
        assert!(matches!(frame, DecisionFrame::Resolved(_)));

        let second = reqwest::get(format!("{base}/allow?id=r1")).await.unwrap();
        assert_eq!(second.status(), 400);
        let body = second.text().await.unwrap();
        assert!(body.contains("操作失败"));
        assert!(body.contains("已被处理"));
    }

    #[tokio::test]
    async fn test_missing_id_is_bad_request() {
        let (_state, base, _dir) = serve().await;
        let page = reqwest::get(format!("{base}/deny")).await.unwrap();
        assert_eq!(page.status(), 400);
        assert!(page.text().await.unwrap().contains("缺少请求 ID"));
    }

    #[tokio::test]
    async fn test_status_reports_requests() {
        let (state, base, _dir) = serve().await;
        let _hook = register(&state, "r9").await;

        let body: serde_json::Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pending"], 1);
        assert_eq!(body["requests"]["r9"]["tool"], "Bash");
    }

    #[tokio::test]
    async fn test_cb_routes_require_token() {
        let (state, base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let denied = client
            .post(format!("{base}/cb/decision"))
            .json(&serde_json::json!({"action": "allow", "request_id": "r1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), 401);
        let body: serde_json::Value = denied.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["decision"].is_null());

        // Register a token, then the same call passes auth.
        state.auth_tokens.save("ou_x", "tok-1").unwrap();
        let allowed = client
            .post(format!("{base}/cb/decision"))
            .header(AUTH_HEADER, "tok-1")
            .json(&serde_json::json!({"action": "allow", "request_id": "ghost"}))
            .send()
            .await
            .unwrap();
        assert_eq!(allowed.status(), 200);
        let body: serde_json::Value = allowed.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("不存在"));

        let wrong = client
            .post(format!("{base}/cb/decision"))
            .header(AUTH_HEADER, "tok-2")
            .json(&serde_json::json!({"action": "allow", "request_id": "r1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);
    }

    #[tokio::test]
    async fn test_cb_register_and_check_owner() {
        let (_state, base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .post(format!("{base}/cb/register"))
            .json(&serde_json::json!({"owner_id": "ou_x", "auth_token": "t1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);

        let mismatch: serde_json::Value = client
            .post(format!("{base}/cb/register"))
            .json(&serde_json::json!({"owner_id": "ou_imposter", "auth_token": "t1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mismatch["success"], false);

        let owner: serde_json::Value = client
            .post(format!("{base}/cb/check-owner"))
            .json(&serde_json::json!({"owner_id": "ou_x"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(owner["is_owner"], true);

        let other: serde_json::Value = client
            .post(format!("{base}/cb/check-owner"))
            .json(&serde_json::json!({"owner_id": "ou_other"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(other["is_owner"], false);
    }

    #[tokio::test]
    async fn test_session_anchor_roundtrip() {
        let (state, base, _dir) = serve().await;
        state.auth_tokens.save("ou_x", "tok").unwrap();
        let client = reqwest::Client::new();

        let set: serde_json::Value = client
            .post(format!("{base}/cb/session/set-last-message-id"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({"session_id": "s1", "message_id": "om_7"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(set["success"], true);

        let get: serde_json::Value = client
            .post(format!("{base}/cb/session/get-last-message-id"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({"session_id": "s1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(get["last_message_id"], "om_7");
    }

    #[tokio::test]
    async fn test_browse_dirs_rejects_relative() {
        let (state, base, _dir) = serve().await;
        state.auth_tokens.save("ou_x", "tok").unwrap();

        let resp = reqwest::Client::new()
            .post(format!("{base}/cb/claude/browse-dirs"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({"path": "not/absolute"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_claude_new_validates_input() {
        let (state, base, _dir) = serve().await;
        state.auth_tokens.save("ou_x", "tok").unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/cb/claude/new"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({"project_dir": "", "prompt": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{base}/cb/claude/new"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({
                "project_dir": "/tmp",
                "prompt": "hi",
                "claude_command": "not-configured",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid claude_command");
    }

    #[tokio::test]
    async fn test_claude_continue_requires_known_session() {
        let (state, base, _dir) = serve().await;
        state.auth_tokens.save("ou_x", "tok").unwrap();

        let resp = reqwest::Client::new()
            .post(format!("{base}/cb/claude/continue"))
            .header(AUTH_HEADER, "tok")
            .json(&serde_json::json!({
                "session_id": "never-seen",
                "project_dir": "/tmp",
                "prompt": "hi",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("Session not registered"));
    }
}
