//! Backend-side map from agent session ids to their chat context.

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
pub struct ChatSessionRecord {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_command: Option<String>,
    /// Anchor for the next threaded reply; maintained by
    /// [`SessionChatStore::set_last_message_id`], preserved by `save`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    pub updated_at: u64,
}

type State = HashMap<String, ChatSessionRecord>;

pub struct SessionChatStore {
    file: JsonFile,
}

impl SessionChatStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            file: JsonFile::new(data_dir, "session_chats.json")?,
        })
    }

    /// Create or refresh a session → chat mapping. An empty `claude_command`
    /// keeps whatever command the row already carries, and the reply anchor
    /// always survives.
    pub fn save(&self, session_id: &str, chat_id: &str, claude_command: Option<&str>) -> Result<()> {
        let now = unix_now();
        self.file.update(|state: &mut State| {
            let previous = state.get(session_id);
            let command = claude_command
                .filter(|c| !c.is_empty())
                .map(String::from)
                .or_else(|| previous.and_then(|r| r.claude_command.clone()));
            let last_message_id = previous.and_then(|r| r.last_message_id.clone());
            state.insert(
                session_id.to_string(),
                ChatSessionRecord {
                    chat_id: chat_id.to_string(),
                    claude_command: command,
                    last_message_id,
                    updated_at: now,
                },
            );
        })?;
        debug!(session_id, chat_id, "saved session chat mapping");
        Ok(())
    }

    pub fn chat_id(&self, session_id: &str) -> Result<Option<String>> {
        self.live_field(session_id, |r| Some(r.chat_id.clone()))
    }

    pub fn command(&self, session_id: &str) -> Result<Option<String>> {
        self.live_field(session_id, |r| r.claude_command.clone())
    }

    /// The most recent message id for the session, empty when unknown.
    pub fn last_message_id(&self, session_id: &str) -> Result<String> {
        Ok(self
            .live_field(session_id, |r| r.last_message_id.clone())?
            .unwrap_or_default())
    }

    /// Update the reply anchor after a successful send. A missing row is
    /// created on the fly (sessions started from the terminal); an expired
    /// row refuses the update.
    pub fn set_last_message_id(&self, session_id: &str, message_id: &str) -> Result<bool> {
        let now = unix_now();
        self.file.update(|state: &mut State| {
            match state.get_mut(session_id) {
                Some(record) => {
                    if now.saturating_sub(record.updated_at) > SESSION_TTL_SECS {
                        return false;
                    }
                    record.last_message_id = Some(message_id.to_string());
                    record.updated_at = now;
                },
                None => {
                    state.insert(
                        session_id.to_string(),
                        ChatSessionRecord {
                            chat_id: String::new(),
                            claude_command: None,
                            last_message_id: Some(message_id.to_string()),
                            updated_at: now,
                        },
                    );
                },
            }
            true
        })
    }

    /// Whether a live (non-expired) row exists for the session.
    pub fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.live_field(session_id, |_| Some(()))?.is_some())
    }

    /// Drop rows older than the TTL. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = unix_now();
        let removed = self.file.update(|state: &mut State| {
            let before = state.len();
            state.retain(|_, r| now.saturating_sub(r.updated_at) <= SESSION_TTL_SECS);
            before - state.len()
        })?;
        if removed > 0 {
            info!(removed, "cleaned expired session chat mappings");
        }
        Ok(removed)
    }

    /// Read a field of a live row; expired rows are deleted on sight.
    fn live_field<T>(
        &self,
        session_id: &str,
        pick: impl FnOnce(&ChatSessionRecord) -> Option<T>,
    ) -> Result<Option<T>> {
        let now = unix_now();
        let state: State = self.file.read()?;
        let Some(record) = state.get(session_id) else {
            return Ok(None);
        };
        if now.saturating_sub(record.updated_at) > SESSION_TTL_SECS {
            self.file.update(|state: &mut State| {
                state.remove(session_id);
            })?;
            return Ok(None);
        }
        Ok(pick(record))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionChatStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionChatStore::new(dir.path()).unwrap(), dir)
    }

    /// Rewrite a row's updated_at directly on disk.
    fn backdate(store: &SessionChatStore, session_id: &str, age_secs: u64) {
        store
            .file
            .update(|state: &mut State| {
                let record = state.get_mut(session_id).unwrap();
                record.updated_at = unix_now() - age_secs;
            })
            .unwrap();
    }

    #[test]
    fn test_save_and_get() {
        let (store, _dir) = store();
        store.save("s1", "oc_1", Some("claude")).unwrap();
        assert_eq!(store.chat_id("s1").unwrap().as_deref(), Some("oc_1"));
        assert_eq!(store.command("s1").unwrap().as_deref(), Some("claude"));
        assert!(store.chat_id("s2").unwrap().is_none());
    }

    #[test]
    fn test_save_preserves_command_and_anchor() {
        let (store, _dir) = store();
        store.save("s1", "oc_1", Some("claude --model opus")).unwrap();
        store.set_last_message_id("s1", "om_1").unwrap();

        // Re-save without a command: both survive.
        store.save("s1", "oc_2", None).unwrap();
        assert_eq!(store.chat_id("s1").unwrap().as_deref(), Some("oc_2"));
        assert_eq!(
            store.command("s1").unwrap().as_deref(),
            Some("claude --model opus")
        );
        assert_eq!(store.last_message_id("s1").unwrap(), "om_1");
    }

    #[test]
    fn test_set_last_message_id_autocreates() {
        let (store, _dir) = store();
        assert!(store.set_last_message_id("terminal-session", "om_9").unwrap());
        assert_eq!(store.last_message_id("terminal-session").unwrap(), "om_9");
        assert_eq!(store.chat_id("terminal-session").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_expired_row_is_dropped_on_read() {
        let (store, _dir) = store();
        store.save("s1", "oc_1", None).unwrap();
        backdate(&store, "s1", SESSION_TTL_SECS + 60);

        assert!(store.chat_id("s1").unwrap().is_none());
        // The lazy delete persisted.
        let state: State = store.file.read().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_set_last_message_id_refuses_expired() {
        let (store, _dir) = store();
        store.save("s1", "oc_1", None).unwrap();
        backdate(&store, "s1", SESSION_TTL_SECS + 60);
        assert!(!store.set_last_message_id("s1", "om_1").unwrap());
    }

    #[test]
    fn test_cleanup_expired() {
        let (store, _dir) = store();
        store.save("old", "oc_1", None).unwrap();
        store.save("new", "oc_2", None).unwrap();
        backdate(&store, "old", SESSION_TTL_SECS + 1);

        assert_eq!(store.cleanup_expired().unwrap(), 1);
        assert!(store.chat_id("old").unwrap().is_none());
        assert_eq!(store.chat_id("new").unwrap().as_deref(), Some("oc_2"));
    }
}
