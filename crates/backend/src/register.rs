//! Boot-time self-registration against the gateway.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use larkin_protocol::{
    REGISTER_TIMEOUT_SECS,
    rpc::{GatewayRegisterRequest, SimpleResponse},
};

use crate::state::BackendState;

/// Announce this backend to the gateway in a detached task.
///
/// Needs `CALLBACK_SERVER_URL`, `FEISHU_OWNER_ID` and `FEISHU_GATEWAY_URL`;
/// with any of them missing, registration stays off and the backend only
/// serves the browser-fallback path.
pub fn spawn_auto_register(state: Arc<BackendState>) {
    let (Some(gateway_url), Some(owner_id), Some(callback_url)) = (
        state.config.gateway_url.clone(),
        state.config.owner_id.clone(),
        state.config.callback_url.clone(),
    ) else {
        warn!("auto-register disabled (missing gateway_url, owner_id or callback_url)");
        return;
    };

    let reply_in_thread = state.config.reply_in_thread;
    tokio::spawn(async move {
        info!(owner_id, callback_url, gateway_url, "registering with gateway");
        let body = GatewayRegisterRequest {
            callback_url,
            owner_id,
            reply_in_thread,
        };

        let result = state
            .http
            .post(format!("{gateway_url}/gw/register"))
            .timeout(Duration::from_secs(REGISTER_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<SimpleResponse>().await {
                Ok(accepted) if accepted.success => {
                    info!("registration request accepted, awaiting authorization");
                },
                Ok(accepted) => {
                    warn!(error = ?accepted.error, "gateway rejected registration");
                },
                Err(e) => warn!(error = %e, "unreadable registration response"),
            },
            Err(e) => warn!(error = %e, "registration request failed"),
        }
    });
}
