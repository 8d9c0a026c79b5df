//! Filesystem-backed object store.
//!
//! Each bucket is a directory; each object key is a relative path inside it.
//! Objects are written through a temporary sibling and renamed into place,
//! so a reader never observes a half-written object.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{is_valid_key, ObjectStore, StoreError};

/// Object store rooted at a bucket directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create a store whose objects live directly under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for `bucket` in `region` under a shared `store_root`, laid out
    /// as `<store_root>/<region>/<bucket>`.
    #[must_use]
    pub fn for_bucket(store_root: &Path, region: &str, bucket: &str) -> Self {
        Self::new(store_root.join(region).join(bucket))
    }

    /// Bucket directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` to a path inside the bucket.
    ///
    /// Keys failing [`is_valid_key`] are rejected so that no key can escape
    /// the bucket directory.
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    /// Remove now-empty directories between `path` and the bucket root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails (and stops) as soon as a directory still has entries
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl ObjectStore for DirectoryStore {
    fn upload(&self, key: &str, content: &mut dyn Read) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let upload_err = |source| StoreError::Upload {
            key: key.to_string(),
            source,
        };

        let parent = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).map_err(upload_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(upload_err)?;
        io::copy(content, &mut tmp).map_err(upload_err)?;
        tmp.flush().map_err(upload_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Public read
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))
                .map_err(upload_err)?;
        }

        tmp.persist(&path).map_err(|e| upload_err(e.error))?;
        log::trace!("Stored object {} at {}", key, path.display());
        Ok(())
    }

    fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError> {
        // Resolve every key before touching anything
        let paths = keys
            .iter()
            .map(|k| self.object_path(k))
            .collect::<Result<Vec<_>, _>>()?;

        for path in &paths {
            match fs::remove_file(path) {
                Ok(()) => self.prune_empty_parents(path),
                // Deleting an absent object is not an error
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Delete {
                        count: keys.len(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
