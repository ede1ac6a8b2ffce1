//! Backend-side single-row store for the token the gateway minted.

use std::{path::Path, sync::RwLock};

use {
    serde::{Deserialize, Serialize},
    tracing::info,
};

use {
    crate::{Result, file::JsonFile},
    larkin_common::time::unix_now,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenRecord {
    pub owner_id: String,
    pub auth_token: String,
    pub updated_at: u64,
}

/// Holds the backend's one bearer token, mirrored in memory so the auth
/// middleware never touches the disk on the hot path.
pub struct AuthTokenStore {
    file: JsonFile,
    cached: RwLock<Option<AuthTokenRecord>>,
}

impl AuthTokenStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let file = JsonFile::new(data_dir, "auth_token.json")?;
        let cached: Option<AuthTokenRecord> = file.read()?;
        if cached.is_some() {
            info!("loaded stored auth token");
        }
        Ok(Self {
            file,
            cached: RwLock::new(cached),
        })
    }

    /// Overwrite the stored token; called on each successful registration.
    pub fn save(&self, owner_id: &str, auth_token: &str) -> Result<()> {
        let record = AuthTokenRecord {
            owner_id: owner_id.to_string(),
            auth_token: auth_token.to_string(),
            updated_at: unix_now(),
        };
        self.file.update(|state: &mut Option<AuthTokenRecord>| {
            *state = Some(record.clone());
        })?;
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(record);
        }
        Ok(())
    }

    /// The current token, or empty when never registered.
    pub fn token(&self) -> String {
        self.cached
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|r| r.auth_token.clone()))
            .unwrap_or_default()
    }

    pub fn record(&self) -> Option<AuthTokenRecord> {
        self.cached.read().ok().and_then(|c| c.clone())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthTokenStore::new(dir.path()).unwrap();
        assert_eq!(store.token(), "");
        assert!(store.record().is_none());
    }

    #[test]
    fn test_save_overwrites_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthTokenStore::new(dir.path()).unwrap();

        store.save("ou_x", "t1").unwrap();
        assert_eq!(store.token(), "t1");
        store.save("ou_x", "t2").unwrap();
        assert_eq!(store.token(), "t2");
        assert_eq!(store.record().unwrap().owner_id, "ou_x");
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = AuthTokenStore::new(dir.path()).unwrap();
            store.save("ou_x", "persisted").unwrap();
        }
        let store = AuthTokenStore::new(dir.path()).unwrap();
        assert_eq!(store.token(), "persisted");
    }
}
