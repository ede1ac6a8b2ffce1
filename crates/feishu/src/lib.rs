//! Feishu OpenAPI client and interactive-card building blocks.

pub mod card;
pub mod client;
pub mod error;

pub use {
    client::{FeishuClient, detect_receive_id_type},
    error::{Error, Result},
};
