//! JSON-file-backed hash cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use super::entry::is_valid_hash;

/// Errors raised while loading, mutating or persisting the cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// A hash that is not 64 lowercase hex digits was offered to the cache.
    #[error("Invalid hash for {path}: {hash:?} (expected 64 lowercase hex digits)")]
    InvalidHash {
        /// Path the hash was meant for
        path: String,
        /// The rejected value
        hash: String,
    },

    /// The cache file could not be read or written.
    #[error("Cache I/O error for {path}: {source}")]
    Io {
        /// Cache file location
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The cache file exists but does not hold a JSON object of strings.
    #[error("Malformed cache file {path}: {source}")]
    Serialization {
        /// Cache file location
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// No per-user cache directory could be determined.
    #[error("Failed to determine the per-user cache directory")]
    NoCacheDir,
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Persistent mapping from file path to the content hash of its last upload.
///
/// The whole mapping is held in memory for the duration of a run and
/// written back with [`HashCache::persist`]. A cache created with
/// [`HashCache::in_memory`] has no backing file and persists nowhere.
#[derive(Debug)]
pub struct HashCache {
    path: Option<PathBuf>,
    entries: HashMap<String, String>,
}

impl HashCache {
    /// Load the cache stored at `path`.
    ///
    /// A missing file is created holding an empty JSON object and yields an
    /// empty cache. An existing file must parse as a JSON object of valid
    /// hashes; anything else is an error and the file is left untouched.
    ///
    /// # Errors
    ///
    /// * [`CacheError::Io`] if the file cannot be read or initialized
    /// * [`CacheError::Serialization`] if the content is not valid JSON
    /// * [`CacheError::InvalidHash`] if a stored hash is malformed
    pub fn load(path: &Path) -> CacheResult<Self> {
        let entries = match fs::read(path) {
            Ok(bytes) => Self::parse(path, &bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No cache at {}, initializing empty cache", path.display());
                write_atomic(path, b"{}")?;
                HashMap::new()
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        log::debug!(
            "Loaded {} cache entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// Load the cache from the default per-user location.
    ///
    /// # Errors
    ///
    /// Same as [`HashCache::load`], plus [`CacheError::NoCacheDir`].
    pub fn load_default() -> CacheResult<Self> {
        Self::load(&Self::default_path()?)
    }

    /// Create a cache with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    /// Get the default platform-specific cache file path.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoCacheDir`] if no home directory is known.
    pub fn default_path() -> CacheResult<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "s3deploy", "s3deploy").ok_or(CacheError::NoCacheDir)?;
        Ok(project_dirs.cache_dir().join("cache.json"))
    }

    fn parse(path: &Path, bytes: &[u8]) -> CacheResult<HashMap<String, String>> {
        let entries: HashMap<String, String> =
            serde_json::from_slice(bytes).map_err(|source| CacheError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some((file, hash)) = entries.iter().find(|(_, hash)| !is_valid_hash(hash)) {
            return Err(CacheError::InvalidHash {
                path: file.clone(),
                hash: hash.clone(),
            });
        }

        Ok(entries)
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Hash recorded for `path` at its last successful upload.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Record `hash` for `path`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidHash`] without touching the cache if
    /// `hash` is not exactly 64 lowercase hex digits.
    pub fn set(&mut self, path: &str, hash: &str) -> CacheResult<()> {
        if !is_valid_hash(hash) {
            return Err(CacheError::InvalidHash {
                path: path.to_string(),
                hash: hash.to_string(),
            });
        }
        self.entries.insert(path.to_string(), hash.to_string());
        Ok(())
    }

    /// Forget `path`. No-op if it is not cached.
    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Snapshot of every cached path.
    #[must_use]
    pub fn paths(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the whole mapping back to the cache file.
    ///
    /// The file is replaced in one rename, so a crash mid-write leaves the
    /// previous contents intact. Keys are written sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file cannot be written.
    pub fn persist(&self) -> CacheResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let sorted: BTreeMap<&str, &str> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let json =
            serde_json::to_vec_pretty(&sorted).map_err(|source| CacheError::Serialization {
                path: path.clone(),
                source,
            })?;

        write_atomic(path, &json)?;
        log::debug!("Saved {} cache entries to {}", sorted.len(), path.display());
        Ok(())
    }
}

/// Replace `path` with `contents` through a temporary sibling file.
fn write_atomic(path: &Path, contents: &[u8]) -> CacheResult<()> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
