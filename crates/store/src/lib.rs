//! On-disk JSON maps owned by exactly one role.
//!
//! Each store is one small JSON file under the runtime data directory,
//! guarded by an in-process mutex and written atomically (temp file in the
//! same directory, then rename). Cross-role access goes over HTTP RPC, never
//! by sharing these files.

pub mod auth_token;
pub mod binding;
pub mod dir_history;
pub mod file;
pub mod message_session;
pub mod session_chat;

pub use {
    auth_token::{AuthTokenRecord, AuthTokenStore},
    binding::{Binding, BindingStore},
    dir_history::DirHistoryStore,
    file::{JsonFile, StoreError},
    message_session::{MessageSessionRecord, MessageSessionStore},
    session_chat::{ChatSessionRecord, SessionChatStore},
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Session ↔ chat and message ↔ session rows expire after seven days.
pub const SESSION_TTL_SECS: u64 = 7 * 24 * 3600;
