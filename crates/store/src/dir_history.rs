//! Backend-side working-directory usage history, feeding the recent-dirs
//! dropdown of the new-session card.

use std::{collections::HashMap, path::Path};

use {
    serde::{Deserialize, Serialize},
    tracing::info,
};

use {
    crate::{Result, file::JsonFile},
    larkin_common::time::unix_now,
};

/// Entries unused for thirty days fall out of the history.
const DIR_TTL_SECS: u64 = 30 * 24 * 3600;
/// At most this many directories are remembered.
const MAX_DIRS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirUsage {
    pub count: u64,
    pub last_used: u64,
}

type State = HashMap<String, DirUsage>;

pub struct DirHistoryStore {
    file: JsonFile,
}

impl DirHistoryStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            file: JsonFile::new(data_dir, "dir_history.json")?,
        })
    }

    /// Bump the usage counter for `project_dir`; prunes stale entries and
    /// enforces the size cap on the way out.
    pub fn record_usage(&self, project_dir: &str) -> Result<()> {
        if project_dir.is_empty() {
            return Ok(());
        }
        let now = unix_now();
        self.file.update(|state: &mut State| {
            match state.get_mut(project_dir) {
                Some(usage) => {
                    usage.count += 1;
                    usage.last_used = now;
                },
                None => {
                    state.insert(
                        project_dir.to_string(),
                        DirUsage {
                            count: 1,
                            last_used: now,
                        },
                    );
                },
            }
            prune(state, now);
        })?;
        Ok(())
    }

    /// Top-`limit` directories by (count, last_used), skipping paths that no
    /// longer exist on disk. Detected deletions are persisted immediately;
    /// a clean read writes nothing.
    pub fn recent_dirs(&self, limit: usize) -> Result<Vec<String>> {
        let now = unix_now();
        let mut state: State = self.file.read()?;
        let before = state.len();
        prune(&mut state, now);
        state.retain(|path, _| Path::new(path).is_dir());

        let removed = before - state.len();
        if removed > 0 {
            info!(removed, "pruned stale directories from history");
            let pruned = state.clone();
            self.file.update(|state: &mut State| {
                *state = pruned;
            })?;
        }

        let mut entries: Vec<(&String, &DirUsage)> = state.iter().collect();
        entries.sort_by(|a, b| (b.1.count, b.1.last_used).cmp(&(a.1.count, a.1.last_used)));
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(path, _)| path.clone())
            .collect())
    }
}

fn prune(state: &mut State, now: u64) {
    state.retain(|_, usage| now.saturating_sub(usage.last_used) <= DIR_TTL_SECS);

    if state.len() > MAX_DIRS {
        let mut by_recency: Vec<(String, u64)> = state
            .iter()
            .map(|(path, usage)| (path.clone(), usage.last_used))
            .collect();
        by_recency.sort_by(|a, b| b.1.cmp(&a.1));
        let keep: std::collections::HashSet<String> = by_recency
            .into_iter()
            .take(MAX_DIRS)
            .map(|(path, _)| path)
            .collect();
        state.retain(|path, _| keep.contains(path));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (DirHistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (DirHistoryStore::new(dir.path()).unwrap(), dir)
    }

    #[test]
    fn test_record_and_rank() {
        let (store, dir) = store();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        store.record_usage(a.to_str().unwrap()).unwrap();
        store.record_usage(b.to_str().unwrap()).unwrap();
        store.record_usage(b.to_str().unwrap()).unwrap();

        let recent = store.recent_dirs(5).unwrap();
        assert_eq!(recent[0], b.to_str().unwrap());
        assert_eq!(recent[1], a.to_str().unwrap());
    }

    #[test]
    fn test_empty_path_ignored() {
        let (store, _dir) = store();
        store.record_usage("").unwrap();
        assert!(store.recent_dirs(5).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_dirs_pruned_on_read() {
        let (store, dir) = store();
        let gone = dir.path().join("gone");
        std::fs::create_dir(&gone).unwrap();
        store.record_usage(gone.to_str().unwrap()).unwrap();
        std::fs::remove_dir(&gone).unwrap();

        assert!(store.recent_dirs(5).unwrap().is_empty());
        // The prune was persisted, not just filtered in memory.
        let state: State = store.file.read().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_cap_keeps_most_recent() {
        let (store, dir) = store();
        for i in 0..(MAX_DIRS + 5) {
            let path = dir.path().join(format!("d{i:02}"));
            std::fs::create_dir(&path).unwrap();
            store.record_usage(path.to_str().unwrap()).unwrap();
        }
        let state: State = store.file.read().unwrap();
        assert!(state.len() <= MAX_DIRS);
    }

    #[test]
    fn test_limit_respected() {
        let (store, dir) = store();
        for i in 0..4 {
            let path = dir.path().join(format!("d{i}"));
            std::fs::create_dir(&path).unwrap();
            store.record_usage(path.to_str().unwrap()).unwrap();
        }
        assert_eq!(store.recent_dirs(2).unwrap().len(), 2);
    }
}
