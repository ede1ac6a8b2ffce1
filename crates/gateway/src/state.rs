//! Gateway state: stores, the Feishu client, and the backend RPC client.

use {
    larkin_config::LarkinConfig,
    larkin_feishu::FeishuClient,
    larkin_store::{BindingStore, MessageSessionStore},
};

use crate::backend_rpc::BackendClient;

pub struct GatewayState {
    pub config: LarkinConfig,
    pub bindings: BindingStore,
    pub message_sessions: MessageSessionStore,
    pub feishu: FeishuClient,
    pub backends: BackendClient,
}

impl GatewayState {
    pub fn new(config: LarkinConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir.as_path();
        Ok(Self {
            bindings: BindingStore::new(data_dir)?,
            message_sessions: MessageSessionStore::new(data_dir)?,
            feishu: FeishuClient::new(config.feishu.clone()),
            backends: BackendClient::new(),
            config,
        })
    }
}
