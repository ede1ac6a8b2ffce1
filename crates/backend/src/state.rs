//! Shared state assembled at boot and injected into every handler.

use std::{sync::Arc, time::Duration};

use {
    larkin_broker::RequestBroker,
    larkin_config::LarkinConfig,
    larkin_store::{AuthTokenStore, DirHistoryStore, SessionChatStore},
};

use crate::notify::GatewayNotifier;

pub struct BackendState {
    pub config: LarkinConfig,
    pub broker: Arc<RequestBroker>,
    pub session_chats: SessionChatStore,
    pub auth_tokens: Arc<AuthTokenStore>,
    pub dir_history: DirHistoryStore,
    pub notifier: GatewayNotifier,
    pub http: reqwest::Client,
}

impl BackendState {
    pub fn new(config: LarkinConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir.as_path();
        let auth_tokens = Arc::new(AuthTokenStore::new(data_dir)?);
        let notifier = GatewayNotifier::new(
            config.gateway_url.clone(),
            config.owner_id.clone(),
            Arc::clone(&auth_tokens),
        );
        Ok(Self {
            broker: Arc::new(RequestBroker::new(Duration::from_secs(
                config.request_timeout,
            ))),
            session_chats: SessionChatStore::new(data_dir)?,
            auth_tokens,
            dir_history: DirHistoryStore::new(data_dir)?,
            notifier,
            http: reqwest::Client::new(),
            config,
        })
    }
}
