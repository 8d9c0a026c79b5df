//! Object store backends.
//!
//! The reconciler talks to remote storage only through the [`ObjectStore`]
//! trait: one call to store an object and one call to remove a batch of
//! objects. Everything about how bytes reach the bucket lives behind it.
//!
//! # Backends
//!
//! * [`DirectoryStore`]: a bucket is a directory on a local or mounted
//!   filesystem. Used by the command-line tool.
//! * [`MemoryStore`]: an in-memory bucket with failure injection and a call
//!   log, for tests and embedding.

pub mod directory;
pub mod memory;

use std::fmt;
use std::io::{self, Read};
use std::path::{Component, Path};

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Environment variable holding the access key.
pub const ACCESS_KEY_ENV: &str = "S3_ACCESS_KEY";
/// Environment variable holding the secret key.
pub const SECRET_KEY_ENV: &str = "S3_SECRET_KEY";

/// Errors reported by an object store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Storing an object failed.
    #[error("Upload of {key} failed: {source}")]
    Upload {
        /// Object key
        key: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },

    /// A batch delete failed. No key of the batch should be assumed removed.
    #[error("Batch delete of {count} objects failed: {source}")]
    Delete {
        /// Number of keys in the batch
        count: usize,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },

    /// The key cannot name an object in this store.
    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),
}

/// Whether `key` is a usable object key.
///
/// Keys are `/`-separated relative paths whose segments are plain names:
/// no empty segments, no `.` or `..`, no root. A backslash is an ordinary
/// character on Unix and a separator on Windows, where it is rejected.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || (cfg!(windows) && key.contains('\\')) {
        return false;
    }
    key.split('/').all(|segment| {
        let mut components = Path::new(segment).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    })
}

/// Remote key-value object storage.
///
/// Implementations must be shareable across worker threads.
pub trait ObjectStore: Send + Sync {
    /// Store everything `content` yields at `key`, publicly readable,
    /// replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on any non-success outcome.
    fn upload(&self, key: &str, content: &mut dyn Read) -> Result<(), StoreError>;

    /// Remove every key in `keys` as one operation.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the batch was not confirmed as a whole.
    fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Human-readable location of the bucket, for logs.
    fn location(&self) -> String;
}

/// Access credentials for a remote store, read once at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Access key id
    pub access_key: Option<String>,
    /// Secret access key
    pub secret_key: Option<String>,
}

impl Credentials {
    /// Read [`ACCESS_KEY_ENV`] and [`SECRET_KEY_ENV`]. Empty values count as
    /// unset.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            access_key: read(ACCESS_KEY_ENV),
            secret_key: read(SECRET_KEY_ENV),
        }
    }

    /// Whether both keys are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }

    /// Whether exactly one of the two keys is present.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.access_key.is_some() != self.secret_key.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
