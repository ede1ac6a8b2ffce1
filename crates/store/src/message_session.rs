//! Gateway-side map from sent message ids to the session they belong to.
//!
//! Replies quote a message id; this map routes them back to the owning
//! backend and session.

use std::{collections::HashMap, path::Path};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use {
    crate::{Result, SESSION_TTL_SECS, file::JsonFile},
    larkin_common::time::unix_now,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSessionRecord {
    pub session_id: String,
    pub project_dir: String,
    /// Backend that owns `session_id`; used verbatim for reply routing.
    pub callback_url: String,
    pub created_at: u64,
}

type State = HashMap<String, MessageSessionRecord>;

pub struct MessageSessionStore {
    file: JsonFile,
}

impl MessageSessionStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            file: JsonFile::new(data_dir, "message_sessions.json")?,
        })
    }

    pub fn save(
        &self,
        message_id: &str,
        session_id: &str,
        project_dir: &str,
        callback_url: &str,
    ) -> Result<()> {
        self.file.update(|state: &mut State| {
            state.insert(
                message_id.to_string(),
                MessageSessionRecord {
                    session_id: session_id.to_string(),
                    project_dir: project_dir.to_string(),
                    callback_url: callback_url.to_string(),
                    created_at: unix_now(),
                },
            );
        })?;
        debug!(message_id, session_id, "saved message session mapping");
        Ok(())
    }

    /// Look up a message id; expired rows are deleted on sight.
    pub fn get(&self, message_id: &str) -> Result<Option<MessageSessionRecord>> {
        let now = unix_now();
        let state: State = self.file.read()?;
        let Some(record) = state.get(message_id) else {
            return Ok(None);
        };
        if now.saturating_sub(record.created_at) > SESSION_TTL_SECS {
            self.file.update(|state: &mut State| {
                state.remove(message_id);
            })?;
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = unix_now();
        let removed = self.file.update(|state: &mut State| {
            let before = state.len();
            state.retain(|_, r| now.saturating_sub(r.created_at) <= SESSION_TTL_SECS);
            before - state.len()
        })?;
        if removed > 0 {
            info!(removed, "cleaned expired message session mappings");
        }
        Ok(removed)
    }
}
