//! In-memory object store.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, StoreError};

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: Vec<String>,
    delete_batches: Vec<Vec<String>>,
    failing_uploads: HashSet<String>,
    fail_deletes: bool,
}

/// Object store holding objects in memory.
///
/// Records every call it receives and can be told to fail uploads of
/// specific keys or every batch delete.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording an upload.
    pub fn insert(&self, key: &str, content: &[u8]) {
        self.state()
            .objects
            .insert(key.to_string(), content.to_vec());
    }

    /// Make every upload of `key` fail.
    pub fn fail_upload(&self, key: &str) {
        self.state().failing_uploads.insert(key.to_string());
    }

    /// Make every batch delete fail (or succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    /// Content stored at `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state().objects.get(key).cloned()
    }

    /// Stored keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Keys of successful uploads, in call order.
    #[must_use]
    pub fn uploads(&self) -> Vec<String> {
        self.state().uploads.clone()
    }

    /// Key lists of successful batch deletes, in call order.
    #[must_use]
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.state().delete_batches.clone()
    }
}

impl ObjectStore for MemoryStore {
    fn upload(&self, key: &str, content: &mut dyn Read) -> Result<(), StoreError> {
        let upload_err = |source| StoreError::Upload {
            key: key.to_string(),
            source,
        };

        if self.state().failing_uploads.contains(key) {
            return Err(upload_err(io::Error::other("upload rejected")));
        }

        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer).map_err(upload_err)?;

        let mut state = self.state();
        state.objects.insert(key.to_string(), buffer);
        state.uploads.push(key.to_string());
        Ok(())
    }

    fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(StoreError::Delete {
                count: keys.len(),
                source: io::Error::other("delete rejected"),
            });
        }

        for key in keys {
            state.objects.remove(key);
        }
        state.delete_batches.push(keys.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
