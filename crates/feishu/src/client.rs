//! OpenAPI message sending with a cached tenant access token.

use std::time::Duration;

use {
    secrecy::ExposeSecret,
    serde::Deserialize,
    serde_json::json,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use {
    larkin_common::time::unix_now,
    larkin_config::FeishuConfig,
};

use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";
/// Refresh the tenant token this long before its stated expiry.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Guess the receive-id type from the id's prefix.
#[must_use]
pub fn detect_receive_id_type(receive_id: &str) -> &'static str {
    if receive_id.starts_with("ou_") {
        "open_id"
    } else if receive_id.starts_with("oc_") {
        "chat_id"
    } else if receive_id.starts_with("on_") {
        "union_id"
    } else if receive_id.contains('@') {
        "email"
    } else {
        "user_id"
    }
}

#[derive(Default)]
struct CachedToken {
    token: String,
    expires_at: u64,
}

/// Tenant-token-authenticated OpenAPI sender.
///
/// Construction never fails; a client built from a `webhook`-mode or
/// credential-less config refuses every send with [`Error::Disabled`].
pub struct FeishuClient {
    http: reqwest::Client,
    config: FeishuConfig,
    base_url: String,
    token: Mutex<CachedToken>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<SendData>,
}

#[derive(Debug, Deserialize)]
struct SendData {
    #[serde(default)]
    message_id: String,
}

impl FeishuClient {
    pub fn new(config: FeishuConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Point the client at a different API host (tests).
    pub fn with_base_url(config: FeishuConfig, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: Mutex::new(CachedToken::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.api_enabled()
    }

    /// Send a plain text message. Returns the new message id.
    pub async fn send_text(
        &self,
        text: &str,
        receive_id: Option<&str>,
        receive_id_type: Option<&str>,
    ) -> Result<String> {
        let content = json!({ "text": text }).to_string();
        self.send("text", &content, receive_id, receive_id_type).await
    }

    /// Send an interactive card; `card` is the full schema-2.0 object.
    pub async fn send_card(
        &self,
        card: &serde_json::Value,
        receive_id: Option<&str>,
        receive_id_type: Option<&str>,
    ) -> Result<String> {
        self.send("interactive", &card.to_string(), receive_id, receive_id_type)
            .await
    }

    /// Send a previously uploaded image by key.
    pub async fn send_image(
        &self,
        image_key: &str,
        receive_id: Option<&str>,
        receive_id_type: Option<&str>,
    ) -> Result<String> {
        let content = json!({ "image_key": image_key }).to_string();
        self.send("image", &content, receive_id, receive_id_type).await
    }

    /// Reply to an existing message, optionally threading the conversation.
    pub async fn reply_text(
        &self,
        parent_message_id: &str,
        text: &str,
        reply_in_thread: bool,
    ) -> Result<String> {
        let content = json!({ "text": text }).to_string();
        self.reply(parent_message_id, "text", &content, reply_in_thread)
            .await
    }

    pub async fn reply_card(
        &self,
        parent_message_id: &str,
        card: &serde_json::Value,
        reply_in_thread: bool,
    ) -> Result<String> {
        self.reply(parent_message_id, "interactive", &card.to_string(), reply_in_thread)
            .await
    }

    async fn send(
        &self,
        msg_type: &str,
        content: &str,
        receive_id: Option<&str>,
        receive_id_type: Option<&str>,
    ) -> Result<String> {
        if !self.enabled() {
            return Err(Error::Disabled);
        }

        let receive_id = receive_id
            .map(str::to_string)
            .or_else(|| self.config.receive_id.clone())
            .ok_or(Error::MissingTarget)?;
        let id_type = receive_id_type
            .map(str::to_string)
            .or_else(|| self.config.receive_id_type.clone())
            .unwrap_or_else(|| detect_receive_id_type(&receive_id).to_string());

        let token = self.tenant_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages?receive_id_type={id_type}",
            self.base_url
        );
        let response: SendResponse = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .timeout(SEND_TIMEOUT)
            .json(&json!({
                "receive_id": receive_id,
                "msg_type": msg_type,
                "content": content,
            }))
            .send()
            .await?
            .json()
            .await?;

        Self::into_message_id(response, msg_type, &receive_id)
    }

    async fn reply(
        &self,
        parent_message_id: &str,
        msg_type: &str,
        content: &str,
        reply_in_thread: bool,
    ) -> Result<String> {
        if !self.enabled() {
            return Err(Error::Disabled);
        }

        let token = self.tenant_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages/{parent_message_id}/reply",
            self.base_url
        );
        let response: SendResponse = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .timeout(SEND_TIMEOUT)
            .json(&json!({
                "msg_type": msg_type,
                "content": content,
                "reply_in_thread": reply_in_thread,
            }))
            .send()
            .await?
            .json()
            .await?;

        Self::into_message_id(response, msg_type, parent_message_id)
    }

    fn into_message_id(response: SendResponse, msg_type: &str, target: &str) -> Result<String> {
        if response.code != 0 {
            warn!(code = response.code, msg = %response.msg, msg_type, target, "feishu send failed");
            return Err(Error::Api {
                code: response.code,
                msg: response.msg,
            });
        }
        let message_id = response.data.map(|d| d.message_id).unwrap_or_default();
        debug!(msg_type, target, message_id, "feishu message sent");
        Ok(message_id)
    }

    /// The cached tenant token, refreshed when within the expiry margin.
    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = unix_now();
        if !cached.token.is_empty() && now + TOKEN_REFRESH_MARGIN_SECS < cached.expires_at {
            return Ok(cached.token.clone());
        }

        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let response: TokenResponse = self
            .http
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret.expose_secret(),
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.code != 0 {
            return Err(Error::Api {
                code: response.code,
                msg: response.msg,
            });
        }

        info!(expire = response.expire, "refreshed tenant access token");
        cached.token = response.tenant_access_token.clone();
        cached.expires_at = now + response.expire;
        Ok(response.tenant_access_token)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {secrecy::Secret, serde_json::json};

    use {super::*, larkin_config::SendMode};

    fn config() -> FeishuConfig {
        FeishuConfig {
            app_id: "cli_test".into(),
            app_secret: Secret::new("shhh".into()),
            verification_token: Secret::new("v".into()),
            send_mode: SendMode::OpenApi,
            receive_id: None,
            receive_id_type: None,
        }
    }

    #[test]
    fn test_detect_receive_id_type() {
        assert_eq!(detect_receive_id_type("ou_abc"), "open_id");
        assert_eq!(detect_receive_id_type("oc_abc"), "chat_id");
        assert_eq!(detect_receive_id_type("on_abc"), "union_id");
        assert_eq!(detect_receive_id_type("dev@example.com"), "email");
        assert_eq!(detect_receive_id_type("12345"), "user_id");
    }

    #[tokio::test]
    async fn test_disabled_client_refuses_sends() {
        let mut cfg = config();
        cfg.send_mode = SendMode::Webhook;
        let client = FeishuClient::new(cfg);
        assert!(matches!(
            client.send_text("hi", Some("oc_1"), None).await,
            Err(Error::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_missing_target_refused() {
        let client = FeishuClient::new(config());
        assert!(matches!(
            client.send_text("hi", None, None).await,
            Err(Error::MissingTarget)
        ));
    }

    #[tokio::test]
    async fn test_send_text_fetches_token_then_sends() {
        let mut server = mockito::Server::new_async().await;

        let token_mock = server
            .mock("POST", "/open-apis/auth/v3/tenant_access_token/internal")
            .with_body(
                json!({"code": 0, "msg": "ok", "tenant_access_token": "t-abc", "expire": 7200})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let send_mock = server
            .mock("POST", "/open-apis/im/v1/messages?receive_id_type=chat_id")
            .match_header("authorization", "Bearer t-abc")
            .with_body(
                json!({"code": 0, "msg": "success", "data": {"message_id": "om_1"}}).to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let client = FeishuClient::with_base_url(config(), server.url());
        let id = client.send_text("hello", Some("oc_9"), None).await.unwrap();
        assert_eq!(id, "om_1");

        // Second send reuses the cached token (token mock allows one hit).
        client.send_text("again", Some("oc_9"), None).await.unwrap();
        token_mock.assert_async().await;
        send_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_surfaces_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/open-apis/auth/v3/tenant_access_token/internal")
            .with_body(json!({"code": 0, "tenant_access_token": "t", "expire": 7200}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/open-apis/im/v1/messages?receive_id_type=open_id")
            .with_body(json!({"code": 230001, "msg": "bot disabled"}).to_string())
            .create_async()
            .await;

        let client = FeishuClient::with_base_url(config(), server.url());
        let err = client.send_text("hi", Some("ou_1"), None).await.unwrap_err();
        assert!(matches!(err, Error::Api { code: 230001, .. }));
    }

    #[tokio::test]
    async fn test_reply_threads_when_asked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/open-apis/auth/v3/tenant_access_token/internal")
            .with_body(json!({"code": 0, "tenant_access_token": "t", "expire": 7200}).to_string())
            .create_async()
            .await;
        let reply_mock = server
            .mock("POST", "/open-apis/im/v1/messages/om_parent/reply")
            .match_body(mockito::Matcher::PartialJson(
                json!({"reply_in_thread": true}),
            ))
            .with_body(json!({"code": 0, "data": {"message_id": "om_2"}}).to_string())
            .create_async()
            .await;

        let client = FeishuClient::with_base_url(config(), server.url());
        let id = client.reply_text("om_parent", "pong", true).await.unwrap();
        assert_eq!(id, "om_2");
        reply_mock.assert_async().await;
    }
}
