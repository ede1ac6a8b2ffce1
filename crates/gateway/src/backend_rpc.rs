//! Typed client for gateway → backend RPCs.
//!
//! Each call carries the binding's bearer token and its own deadline:
//! 2 s for decision forwarding (inside Feishu's 3 s card budget), 5 s for
//! directory browsing, 10 s for registration, 30 s for session launches.

use std::time::Duration;

use {thiserror::Error, tracing::warn};

use larkin_protocol::{
    BROWSE_TIMEOUT_SECS, CONTINUE_TIMEOUT_SECS, DECISION_FORWARD_TIMEOUT_SECS,
    REGISTER_TIMEOUT_SECS,
    rpc::{
        AUTH_HEADER, BrowseDirsRequest, BrowseDirsResponse, CbRegisterRequest, CheckOwnerRequest,
        CheckOwnerResponse, ContinueSessionRequest, DecisionRequest, DecisionResponse, ErrorBody,
        LastMessageIdResponse, LaunchResponse, NewSessionRequest, RecentDirsRequest,
        RecentDirsResponse, SessionRef, SetLastMessageIdRequest, SimpleResponse,
    },
};

#[derive(Debug, Error)]
pub enum RpcError {
    /// Network-level failure, including timeouts.
    #[error("回调服务不可达: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// Non-2xx status; the body's error detail when it had one.
    #[error("回调服务错误: HTTP {status}")]
    Status {
        status: u16,
        detail: Option<String>,
    },
}

impl RpcError {
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            Self::Unreachable(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Unreachable(e) if e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

pub struct BackendClient {
    http: reqwest::Client,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Pre-card anti-spoof check; any failure counts as "not the owner".
    pub async fn check_owner(&self, callback_url: &str, owner_id: &str) -> bool {
        let result: Result<CheckOwnerResponse> = self
            .post(
                callback_url,
                "/cb/check-owner",
                None,
                &CheckOwnerRequest {
                    owner_id: owner_id.to_string(),
                },
                REGISTER_TIMEOUT_SECS,
            )
            .await;
        match result {
            Ok(response) => response.is_owner,
            Err(e) => {
                warn!(callback_url, error = %e, "owner check failed");
                false
            },
        }
    }

    /// Push a freshly minted token to the backend.
    pub async fn notify_register(
        &self,
        callback_url: &str,
        owner_id: &str,
        auth_token: &str,
    ) -> Result<SimpleResponse> {
        self.post(
            callback_url,
            "/cb/register",
            Some(auth_token),
            &CbRegisterRequest {
                owner_id: owner_id.to_string(),
                auth_token: auth_token.to_string(),
                gateway_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            REGISTER_TIMEOUT_SECS,
        )
        .await
    }

    pub async fn decision(
        &self,
        callback_url: &str,
        auth_token: &str,
        request: &DecisionRequest,
    ) -> Result<DecisionResponse> {
        self.post(
            callback_url,
            "/cb/decision",
            Some(auth_token),
            request,
            DECISION_FORWARD_TIMEOUT_SECS,
        )
        .await
    }

    pub async fn new_session(
        &self,
        callback_url: &str,
        auth_token: &str,
        request: &NewSessionRequest,
    ) -> Result<LaunchResponse> {
        self.post(
            callback_url,
            "/cb/claude/new",
            Some(auth_token),
            request,
            CONTINUE_TIMEOUT_SECS,
        )
        .await
    }

    pub async fn continue_session(
        &self,
        callback_url: &str,
        auth_token: &str,
        request: &ContinueSessionRequest,
    ) -> Result<LaunchResponse> {
        self.post(
            callback_url,
            "/cb/claude/continue",
            Some(auth_token),
            request,
            CONTINUE_TIMEOUT_SECS,
        )
        .await
    }

    pub async fn recent_dirs(
        &self,
        callback_url: &str,
        auth_token: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let response: RecentDirsResponse = self
            .post(
                callback_url,
                "/cb/claude/recent-dirs",
                Some(auth_token),
                &RecentDirsRequest { limit },
                BROWSE_TIMEOUT_SECS,
            )
            .await?;
        Ok(response.dirs)
    }

    pub async fn browse_dirs(
        &self,
        callback_url: &str,
        auth_token: &str,
        path: &str,
    ) -> Result<BrowseDirsResponse> {
        self.post(
            callback_url,
            "/cb/claude/browse-dirs",
            Some(auth_token),
            &BrowseDirsRequest {
                path: path.to_string(),
            },
            BROWSE_TIMEOUT_SECS,
        )
        .await
    }

    pub async fn last_message_id(
        &self,
        callback_url: &str,
        auth_token: &str,
        session_id: &str,
    ) -> Result<String> {
        let response: LastMessageIdResponse = self
            .post(
                callback_url,
                "/cb/session/get-last-message-id",
                Some(auth_token),
                &SessionRef {
                    session_id: session_id.to_string(),
                },
                BROWSE_TIMEOUT_SECS,
            )
            .await?;
        Ok(response.last_message_id)
    }

    pub async fn set_last_message_id(
        &self,
        callback_url: &str,
        auth_token: &str,
        session_id: &str,
        message_id: &str,
    ) -> Result<SimpleResponse> {
        self.post(
            callback_url,
            "/cb/session/set-last-message-id",
            Some(auth_token),
            &SetLastMessageIdRequest {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
            },
            BROWSE_TIMEOUT_SECS,
        )
        .await
    }

    async fn post<Req, Resp>(
        &self,
        callback_url: &str,
        route: &str,
        auth_token: Option<&str>,
        body: &Req,
        timeout_secs: u64,
    ) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{route}", callback_url.trim_end_matches('/'));
        let mut request = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(timeout_secs))
            .json(body);
        if let Some(token) = auth_token {
            request = request.header(AUTH_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .map(|b| b.error)
                .filter(|e| !e.is_empty());
            return Err(RpcError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response.json().await?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn test_decision_forwarding() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/cb/decision")
            .match_header("x-auth-token", "tok")
            .with_body(
                json!({"success": true, "decision": "allow", "message": "已批准运行"}).to_string(),
            )
            .create_async()
            .await;

        let client = BackendClient::new();
        let response = client
            .decision(
                &server.url(),
                "tok",
                &DecisionRequest {
                    action: larkin_protocol::rpc::DecisionAction::Allow,
                    request_id: "r1".into(),
                    project_dir: None,
                },
            )
            .await
            .unwrap();
        assert!(response.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_launch_error_detail_extracted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cb/claude/new")
            .with_status(400)
            .with_body(json!({"error": "Missing prompt"}).to_string())
            .create_async()
            .await;

        let client = BackendClient::new();
        let err = client
            .new_session(
                &server.url(),
                "tok",
                &NewSessionRequest {
                    project_dir: "/tmp".into(),
                    prompt: String::new(),
                    chat_id: None,
                    message_id: None,
                    claude_command: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.detail(), Some("Missing prompt"));
    }

    #[tokio::test]
    async fn test_check_owner_false_on_unreachable() {
        let client = BackendClient::new();
        assert!(!client.check_owner("http://127.0.0.1:1", "ou_x").await);
    }

    #[tokio::test]
    async fn test_trailing_slash_normalized() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/cb/session/get-last-message-id")
            .with_body(json!({"success": true, "last_message_id": "om_1"}).to_string())
            .create_async()
            .await;

        let client = BackendClient::new();
        let url = format!("{}/", server.url());
        let id = client.last_message_id(&url, "tok", "s1").await.unwrap();
        assert_eq!(id, "om_1");
        mock.assert_async().await;
    }
}
