//! Gateway-side map of "owner owns this callback_url with this token".

use std::{collections::HashMap, path::Path};

use {
    serde::{Deserialize, Serialize},
    tracing::info,
};

use {
    crate::{Result, file::JsonFile},
    larkin_common::time::unix_now,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub callback_url: String,
    pub auth_token: String,
    pub updated_at: u64,
    #[serde(default)]
    pub registered_ip: String,
    #[serde(default)]
    pub reply_in_thread: bool,
}

type State = HashMap<String, Binding>;

pub struct BindingStore {
    file: JsonFile,
}

impl BindingStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            file: JsonFile::new(data_dir, "bindings.json")?,
        })
    }

    pub fn get(&self, owner_id: &str) -> Result<Option<Binding>> {
        let state: State = self.file.read()?;
        Ok(state.get(owner_id).cloned())
    }

    /// Create or replace the binding for `owner_id`.
    ///
    /// Any *other* owner row pointing at the same callback_url is purged, so
    /// a callback_url never has more than one binding.
    pub fn upsert(
        &self,
        owner_id: &str,
        callback_url: &str,
        auth_token: &str,
        registered_ip: &str,
        reply_in_thread: bool,
    ) -> Result<()> {
        let now = unix_now();
        let existed = self.file.update(|state: &mut State| {
            state.retain(|owner, b| owner == owner_id || b.callback_url != callback_url);
            state
                .insert(
                    owner_id.to_string(),
                    Binding {
                        callback_url: callback_url.to_string(),
                        auth_token: auth_token.to_string(),
                        updated_at: now,
                        registered_ip: registered_ip.to_string(),
                        reply_in_thread,
                    },
                )
                .is_some()
        })?;
        info!(
            owner_id,
            callback_url,
            existed,
            "upserted binding"
        );
        Ok(())
    }

    /// Delete the owner's binding. Deleting a missing row is not an error.
    pub fn delete(&self, owner_id: &str) -> Result<()> {
        self.file.update(|state: &mut State| {
            state.remove(owner_id);
        })?;
        Ok(())
    }

    /// Reverse lookup used for reply routing: which owner registered this
    /// backend URL?
    pub fn find_by_callback_url(&self, callback_url: &str) -> Result<Option<(String, Binding)>> {
        let state: State = self.file.read()?;
        Ok(state
            .into_iter()
            .find(|(_, b)| b.callback_url == callback_url))
    }
}
