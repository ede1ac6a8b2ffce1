//! Outbound IM notifications, routed through the gateway's send endpoint.
//!
//! The backend holds no Feishu credentials; it authenticates to the gateway
//! with its stored owner token and lets the gateway do the actual send.

use std::{sync::Arc, time::Duration};

use {serde_json::json, tracing::warn};

use {
    larkin_protocol::{
        REGISTER_TIMEOUT_SECS,
        rpc::{AUTH_HEADER, MsgType, SendMessageRequest, SendMessageResponse},
    },
    larkin_store::AuthTokenStore,
};

pub struct GatewayNotifier {
    http: reqwest::Client,
    gateway_url: Option<String>,
    owner_id: Option<String>,
    auth_tokens: Arc<AuthTokenStore>,
}

impl GatewayNotifier {
    pub fn new(
        gateway_url: Option<String>,
        owner_id: Option<String>,
        auth_tokens: Arc<AuthTokenStore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            gateway_url,
            owner_id,
            auth_tokens,
        }
    }

    /// Best-effort text notification to a chat; never fails the caller.
    pub async fn send_text(&self, chat_id: &str, text: &str) {
        let (Some(gateway_url), Some(owner_id)) = (&self.gateway_url, &self.owner_id) else {
            warn!("gateway notification skipped: gateway_url or owner_id unset");
            return;
        };
        let token = self.auth_tokens.token();
        if token.is_empty() {
            warn!("gateway notification skipped: not registered yet");
            return;
        }

        let body = SendMessageRequest {
            owner_id: owner_id.clone(),
            msg_type: MsgType::Text,
            content: json!({ "text": text }),
            receive_id: Some(chat_id.to_string()),
            receive_id_type: None,
            session_id: None,
            project_dir: None,
            callback_url: None,
        };

        let result = self
            .http
            .post(format!("{gateway_url}/gw/feishu/send"))
            .header(AUTH_HEADER, token)
            .timeout(Duration::from_secs(REGISTER_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<SendMessageResponse>().await {
                Ok(sent) if sent.success => {},
                Ok(sent) => {
                    warn!(error = ?sent.error, chat_id, "gateway refused notification");
                },
                Err(e) => warn!(error = %e, chat_id, "bad send response from gateway"),
            },
            Err(e) => warn!(error = %e, chat_id, "gateway notification failed"),
        }
    }
}
