//! Backend registration flow: check-owner anti-spoof, authorization cards,
//! token minting on approval, and binding lifecycle.

use std::sync::Arc;

use {secrecy::ExposeSecret, tracing::{info, warn}};

use larkin_protocol::{
    events::{CardActionResponse, Toast},
    rpc::GatewayRegisterRequest,
};

use crate::{cards, state::GatewayState};

/// Handle a `/gw/register` request after the HTTP 200 went out.
///
/// Path cases:
/// - binding exists with the same callback_url → re-mint silently
/// - binding exists with a different callback_url → device-change card
/// - no binding → check-owner first (abort silently on mismatch), then card
pub async fn process_registration(
    state: Arc<GatewayState>,
    request: GatewayRegisterRequest,
    client_ip: String,
) {
    let GatewayRegisterRequest {
        callback_url,
        owner_id,
        reply_in_thread,
    } = request;

    if state.config.feishu.verification_token.expose_secret().is_empty() {
        warn!("registration ignored: verification token not configured");
        return;
    }

    let existing = match state.bindings.get(&owner_id) {
        Ok(existing) => existing,
        Err(e) => {
            warn!(error = %e, "binding lookup failed");
            return;
        },
    };

    let old_callback_url = match existing {
        Some(binding) if binding.callback_url == callback_url => {
            info!(owner_id, callback_url, "same-device re-registration, re-minting token");
            mint_and_push(&state, &owner_id, &callback_url, &client_ip, reply_in_thread).await;
            return;
        },
        Some(binding) => binding.callback_url,
        None => {
            if !state.backends.check_owner(&callback_url, &owner_id).await {
                warn!(
                    owner_id,
                    callback_url, "owner check failed, possible spoofed registration"
                );
                return;
            }
            String::new()
        },
    };

    let card = cards::authorization_card(
        &callback_url,
        &owner_id,
        &client_ip,
        &old_callback_url,
        reply_in_thread,
    );
    match state.feishu.send_card(&card, Some(&owner_id), None).await {
        Ok(_) => info!(owner_id, callback_url, "authorization card sent"),
        Err(e) => warn!(owner_id, error = %e, "failed to send authorization card"),
    }
}

/// User clicked 允许 on the authorization card.
pub async fn handle_approve(
    state: &Arc<GatewayState>,
    callback_url: &str,
    owner_id: &str,
    operator_id: &str,
    request_ip: &str,
    reply_in_thread: bool,
) -> CardActionResponse {
    if operator_id != owner_id {
        warn!(operator_id, owner_id, "approve clicked by non-owner");
        return CardActionResponse::toast_only(Toast::error("仅限本人操作"));
    }

    let secret = state.config.feishu.verification_token.expose_secret().clone();
    if secret.is_empty() {
        return CardActionResponse::toast_only(Toast::error("服务配置错误"));
    }
    let auth_token = larkin_auth::generate_token(&secret, owner_id);
    if auth_token.is_empty() {
        return CardActionResponse::toast_only(Toast::error("服务配置错误"));
    }

    if let Err(e) =
        state
            .bindings
            .upsert(owner_id, callback_url, &auth_token, request_ip, reply_in_thread)
    {
        warn!(error = %e, "binding upsert failed");
        return CardActionResponse::toast_only(Toast::error("保存绑定失败"));
    }

    // Bounded by the 10 s RPC deadline; Feishu's card budget is 3 s, so a
    // slow backend can cost the toast, but the binding is already durable.
    match state
        .backends
        .notify_register(callback_url, owner_id, &auth_token)
        .await
    {
        Ok(response) if response.success => {
            info!(owner_id, callback_url, "authorization approved, token delivered");
        },
        Ok(response) => {
            warn!(owner_id, error = ?response.error, "backend refused the minted token");
        },
        Err(e) => warn!(owner_id, error = %e, "token delivery failed"),
    }

    CardActionResponse::with_card(
        Toast::success("已授权绑定"),
        cards::approved_card(callback_url, owner_id, request_ip),
    )
}

/// User clicked 拒绝: drop the binding only when it matches this exact
/// callback_url.
pub async fn handle_deny(
    state: &Arc<GatewayState>,
    callback_url: &str,
    owner_id: &str,
    operator_id: &str,
) -> CardActionResponse {
    if operator_id != owner_id {
        return CardActionResponse::toast_only(Toast::error("仅限本人操作"));
    }

    let toast = match state.bindings.get(owner_id) {
        Ok(Some(binding)) if binding.callback_url == callback_url => {
            if let Err(e) = state.bindings.delete(owner_id) {
                warn!(error = %e, "binding delete failed");
            }
            info!(owner_id, callback_url, "registration denied, binding removed");
            Toast::success("已拒绝并解除绑定")
        },
        _ => {
            info!(owner_id, callback_url, "registration denied");
            Toast::info("已拒绝注册请求")
        },
    };

    CardActionResponse::with_card(toast, cards::denied_card(callback_url))
}

/// User clicked 解绑 on an approved card.
pub async fn handle_unbind(
    state: &Arc<GatewayState>,
    callback_url: &str,
    owner_id: &str,
    operator_id: &str,
) -> CardActionResponse {
    if operator_id != owner_id {
        return CardActionResponse::toast_only(Toast::error("仅限本人操作"));
    }

    match state.bindings.get(owner_id) {
        Ok(Some(binding)) if binding.callback_url == callback_url => {
            if let Err(e) = state.bindings.delete(owner_id) {
                warn!(error = %e, "binding delete failed");
            }
            info!(owner_id, callback_url, "unbound");
        },
        _ => info!(owner_id, callback_url, "unbind with no matching binding"),
    }

    CardActionResponse::with_card(Toast::info("已解绑"), cards::unbound_card(callback_url))
}

async fn mint_and_push(
    state: &Arc<GatewayState>,
    owner_id: &str,
    callback_url: &str,
    client_ip: &str,
    reply_in_thread: bool,
) {
    let secret = state.config.feishu.verification_token.expose_secret().clone();
    let auth_token = larkin_auth::generate_token(&secret, owner_id);

    match state
        .backends
        .notify_register(callback_url, owner_id, &auth_token)
        .await
    {
        Ok(response) if response.success => {},
        Ok(response) => {
            warn!(owner_id, error = ?response.error, "backend refused re-minted token")
        },
        Err(e) => warn!(owner_id, error = %e, "re-mint delivery failed"),
    }

    if let Err(e) =
        state
            .bindings
            .upsert(owner_id, callback_url, &auth_token, client_ip, reply_in_thread)
    {
        warn!(error = %e, "binding upsert failed");
    }
}
