//! Shared load/mutate/save helper behind every JSON store.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    serde::{Serialize, de::DeserializeOwned},
    thiserror::Error,
    tracing::warn,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encode state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store mutex poisoned")]
    Poisoned,
}

/// One JSON file plus the in-process lock that owns it.
///
/// Reads load the whole file; writes go through a temp file in the same
/// directory and an atomic rename, so a crash mid-write can never leave a
/// half-written store behind.
pub struct JsonFile {
    path: PathBuf,
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFile {
    pub fn new(data_dir: &Path, file_name: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(file_name),
            dir: data_dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state under the lock. A missing or corrupt file
    /// yields the default state.
    pub fn read<T>(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.load_unlocked())
    }

    /// Load, apply `mutate`, and atomically persist the result; the closure's
    /// return value is handed back to the caller.
    pub fn update<T, R>(&self, mutate: impl FnOnce(&mut T) -> R) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut state: T = self.load_unlocked();
        let out = mutate(&mut state);
        self.persist_unlocked(&state)?;
        Ok(out)
    }

    fn load_unlocked<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read store");
                return T::default();
            },
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "invalid store JSON, starting fresh");
            T::default()
        })
    }

    fn persist_unlocked<T: Serialize>(&self, state: &T) -> Result<(), StoreError> {
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), state)?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    #[test]
    fn test_missing_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "state.json").unwrap();
        let state: HashMap<String, u64> = file.read().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "state.json").unwrap();

        file.update(|state: &mut HashMap<String, u64>| {
            state.insert("a".into(), 1);
        })
        .unwrap();

        let state: HashMap<String, u64> = file.read().unwrap();
        assert_eq!(state.get("a"), Some(&1));
        assert!(file.path().exists());
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "state.json").unwrap();
        fs::write(file.path(), b"{not json").unwrap();

        let state: HashMap<String, u64> = file.read().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_update_returns_closure_value() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "state.json").unwrap();

        let removed = file
            .update(|state: &mut HashMap<String, u64>| state.remove("missing"))
            .unwrap();
        assert!(removed.is_none());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "state.json").unwrap();
        for i in 0..5u64 {
            file.update(|state: &mut HashMap<String, u64>| {
                state.insert(i.to_string(), i);
            })
            .unwrap();
        }
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
