//! Gateway HTTP surface: registration entry, outbound sends, and the IM
//! event catch-all.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode},
        response::Response,
        routing::post,
    },
    tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer},
    tracing::info,
};

use larkin_protocol::{
    MAX_BODY_BYTES,
    events::EventEnvelope,
    rpc::{GatewayRegisterRequest, SendMessageRequest, SimpleResponse},
};

use crate::{events, register, send, state::GatewayState};

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/gw/register", post(gw_register))
        .route("/gw/feishu/send", post(gw_send))
        .fallback(event_fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// First hop of `X-Forwarded-For` when present, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<&SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .unwrap_or_else(|| peer.map(|p| p.ip().to_string()).unwrap_or_default())
}

/// Backend registration entry: ack immediately, authorize asynchronously.
async fn gw_register(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<GatewayRegisterRequest>,
) -> (StatusCode, Json<SimpleResponse>) {
    if body.callback_url.is_empty() || body.owner_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SimpleResponse::err(
                "missing required fields: callback_url, owner_id",
            )),
        );
    }

    let ip = client_ip(&headers, Some(&peer));
    info!(
        owner_id = body.owner_id,
        callback_url = body.callback_url,
        ip,
        reply_in_thread = body.reply_in_thread,
        "registration request"
    );
    tokio::spawn(register::process_registration(
        Arc::clone(&state),
        body,
        ip,
    ));

    (
        StatusCode::OK,
        Json(SimpleResponse::ok(
            "Registration request received, processing in background",
        )),
    )
}

async fn gw_send(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    send::handle_send(state, &headers, body).await
}

/// Everything else is treated as a Feishu event callback.
async fn event_fallback(
    State(state): State<Arc<GatewayState>>,
    Json(envelope): Json<EventEnvelope>,
) -> Response {
    events::handle_event(state, envelope).await
}
