//! Reconciliation of a local tree against its remote copy.
//!
//! # Overview
//!
//! A [`Reconciler`] performs one sync pass:
//! 1. **Walk**: every file under the root is visited
//! 2. **Classify**: each file's content hash is compared with the hash
//!    recorded at its last upload ([`Classification`])
//! 3. **Upload**: new and changed files (all files in force mode) are sent
//!    to the [`ObjectStore`]; the cache is updated only once the store
//!    confirms the upload
//! 4. **Delete**: cached paths that were not seen during the walk are
//!    removed remotely in batches, and forgotten only once each batch is
//!    confirmed
//!
//! Persisting the cache is left to the caller, which gets it back with
//! [`Reconciler::into_cache`] whatever the outcome of the run.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use s3deploy::cache::HashCache;
//! use s3deploy::reconcile::Reconciler;
//! use s3deploy::remote::DirectoryStore;
//!
//! let cache = HashCache::load(Path::new("/tmp/s3deploy-cache.json")).unwrap();
//! let store = Arc::new(DirectoryStore::new("/srv/bucket"));
//! let reconciler = Reconciler::new(Path::new("/srv/site"), cache, store);
//!
//! let outcome = reconciler.run();
//! let cache = reconciler.into_cache();
//! cache.persist().unwrap();
//! println!("{} uploaded", outcome.unwrap().uploaded.len());
//! ```

pub mod touch;

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use crate::cache::{CacheError, HashCache};
use crate::progress::ProgressCallback;
use crate::remote::{is_valid_key, ObjectStore, StoreError};
use crate::scanner::{
    hash_to_hex, HashError, Hasher, HashingReader, ScanError, WalkEntry, Walker, WalkerConfig,
};

pub use touch::TouchTracker;

/// Maximum number of keys sent in one delete request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// How a file's current content relates to its last upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No previous upload is recorded.
    New,
    /// Content differs from the last upload.
    Changed,
    /// Content matches the last upload.
    Unchanged,
}

impl Classification {
    /// Whether the remote copy is out of date.
    #[must_use]
    pub fn needs_upload(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Changed => write!(f, "changed"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Errors that abort a sync run.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// The walk failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// A file could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The cache rejected an update.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The object store reported a failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A file could not be opened for upload.
    #[error("Failed to open {path} for upload: {source}")]
    Open {
        /// Local file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Shutdown was requested before the walk completed.
    #[error("Sync interrupted")]
    Interrupted,
}

/// Outcome of visiting a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    /// Object key of the file
    pub key: String,
    /// Classification against the cache
    pub classification: Classification,
    /// Bytes sent, if the file was uploaded
    pub uploaded_bytes: Option<u64>,
}

/// Summary of a completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys uploaded, in processing order
    pub uploaded: Vec<String>,
    /// Keys deleted remotely, sorted
    pub deleted: Vec<String>,
    /// Files with no previous upload
    pub new_files: usize,
    /// Files whose content changed
    pub changed_files: usize,
    /// Files whose content matched the cache
    pub unchanged_files: usize,
    /// Total bytes uploaded
    pub bytes_uploaded: u64,
    /// Walk entries excluded from sync (directories, extensionless paths)
    pub skipped: usize,
}

impl SyncReport {
    fn record(&mut self, visit: Visit) {
        match visit.classification {
            Classification::New => self.new_files += 1,
            Classification::Changed => self.changed_files += 1,
            Classification::Unchanged => self.unchanged_files += 1,
        }
        if let Some(bytes) = visit.uploaded_bytes {
            self.bytes_uploaded += bytes;
            self.uploaded.push(visit.key);
        }
    }
}

/// Cache and liveness map, mutated under one lock.
#[derive(Debug)]
struct Ledger {
    cache: HashCache,
    touched: TouchTracker,
}

/// Drives one synchronization pass of a local root to an object store.
pub struct Reconciler {
    root: PathBuf,
    ledger: Mutex<Ledger>,
    store: Arc<dyn ObjectStore>,
    hasher: Hasher,
    walker_config: WalkerConfig,
    force: bool,
    jobs: usize,
    visited: AtomicUsize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("root", &self.root)
            .field("store", &self.store.location())
            .field("walker_config", &self.walker_config)
            .field("force", &self.force)
            .field("jobs", &self.jobs)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Reconciler {
    /// Create a reconciler for `root`, taking ownership of `cache` for the
    /// run. Every cached path starts out untouched.
    pub fn new(root: &Path, cache: HashCache, store: Arc<dyn ObjectStore>) -> Self {
        let touched = TouchTracker::seeded(cache.paths());
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            root,
            ledger: Mutex::new(Ledger { cache, touched }),
            store,
            hasher: Hasher::new(),
            walker_config: WalkerConfig::default(),
            force: false,
            jobs: 1,
            visited: AtomicUsize::new(0),
            shutdown_flag: None,
            progress_callback: None,
        }
    }

    /// Upload every file, even those whose content is unchanged.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Number of files hashed and uploaded concurrently.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Set the walker configuration.
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Give the cache back, with every confirmed update applied.
    pub fn into_cache(self) -> HashCache {
        self.ledger
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Whether a walk entry takes part in sync.
    ///
    /// Directories are excluded, as is any path whose root-relative form has
    /// no `.` in it.
    #[must_use]
    pub fn is_candidate(&self, entry: &WalkEntry) -> bool {
        if entry.is_dir {
            return false;
        }
        let relative = entry
            .path
            .strip_prefix(&self.root)
            .unwrap_or(entry.path.as_path());
        relative.to_string_lossy().contains('.')
    }

    /// Object key for a cached path: the root-relative path joined with `/`.
    ///
    /// Paths outside the root keep their full path minus leading separators.
    /// Parent components are kept, so such keys fail [`is_valid_key`].
    #[must_use]
    pub fn object_key(&self, cache_path: &str) -> String {
        let path = Path::new(cache_path);
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) if cfg!(windows) => cache_path
                .replace('\\', "/")
                .trim_start_matches('/')
                .to_string(),
            Err(_) => cache_path.trim_start_matches('/').to_string(),
        }
    }

    /// Compare the current content of `path` with its last upload.
    ///
    /// Returns the classification and the current hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Hash`] if the file cannot be read.
    pub fn classify(&self, path: &Path) -> Result<(Classification, String), ReconcileError> {
        let current = self.hasher.hex_hash(path)?;
        let cache_path = cache_key(path);

        let classification = match self.ledger().cache.get(&cache_path) {
            None => Classification::New,
            Some(previous) if previous != current => Classification::Changed,
            Some(_) => Classification::Unchanged,
        };
        Ok((classification, current))
    }

    /// Process one discovered file.
    ///
    /// The path is marked touched first. If the file is new or changed (or
    /// force mode is on) it is uploaded, and only after the store confirms
    /// the upload is the cache moved to the digest of the bytes sent.
    ///
    /// # Errors
    ///
    /// Any hash, open, upload or cache error. The cache keeps its previous
    /// value for `path` in every error case.
    pub fn record_visit(&self, path: &Path) -> Result<Visit, ReconcileError> {
        let cache_path = cache_key(path);
        self.ledger().touched.touch(&cache_path);

        let (classification, hash) = self.classify(path)?;
        let key = self.object_key(&cache_path);
        log::debug!("{}: {}", classification, key);

        if !classification.needs_upload() && !self.force {
            return Ok(Visit {
                key,
                classification,
                uploaded_bytes: None,
            });
        }

        let (sent_hash, bytes) = self.upload(path, &key)?;
        if sent_hash != hash {
            log::warn!("{} changed while it was being uploaded", path.display());
        }
        self.ledger().cache.set(&cache_path, &sent_hash)?;

        if let Some(ref callback) = self.progress_callback {
            callback.on_uploaded(&key, bytes);
        }

        Ok(Visit {
            key,
            classification,
            uploaded_bytes: Some(bytes),
        })
    }

    /// Stream `path` to the store, returning the digest and size of what
    /// was sent.
    fn upload(&self, path: &Path, key: &str) -> Result<(String, u64), ReconcileError> {
        let file = File::open(path).map_err(|source| ReconcileError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = HashingReader::new(BufReader::new(file));
        self.store.upload(key, &mut reader)?;
        let (hash, bytes) = reader.finish();

        log::trace!("Uploaded {} ({} bytes)", key, bytes);
        Ok((hash_to_hex(&hash), bytes))
    }

    /// Cached paths that were not seen during the walk.
    #[must_use]
    pub fn compute_deletions(&self) -> HashSet<String> {
        self.ledger().touched.untouched()
    }

    /// Delete the objects for `paths` remotely, then forget them locally.
    ///
    /// Keys are sent in sorted batches of at most [`MAX_DELETE_BATCH`]. The
    /// cache entries of a batch are removed only after that batch succeeds,
    /// so a failure leaves every unconfirmed entry in place.
    ///
    /// Cached paths that do not map to a valid object key are dropped from
    /// the cache without a remote call.
    ///
    /// Returns the deleted keys.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] for the first failed batch.
    pub fn apply_deletions(&self, paths: &HashSet<String>) -> Result<Vec<String>, ReconcileError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let (mut sorted, unkeyable): (Vec<&String>, Vec<&String>) = paths
            .iter()
            .partition(|path| is_valid_key(&self.object_key(path)));
        sorted.sort();

        if !unkeyable.is_empty() {
            let mut ledger = self.ledger();
            for path in unkeyable {
                log::warn!("Dropping cache entry with no valid object key: {}", path);
                ledger.cache.remove(path);
            }
        }

        let mut deleted = Vec::with_capacity(sorted.len());
        for batch in sorted.chunks(MAX_DELETE_BATCH) {
            let keys: Vec<String> = batch.iter().map(|p| self.object_key(p)).collect();
            log::debug!("Deleting batch of {} objects", keys.len());
            self.store.delete_batch(&keys)?;

            {
                let mut ledger = self.ledger();
                for path in batch {
                    ledger.cache.remove(path);
                }
            }

            if let Some(ref callback) = self.progress_callback {
                for key in &keys {
                    callback.on_deleted(key);
                }
            }
            deleted.extend(keys);
        }
        Ok(deleted)
    }

    /// Run a complete sync pass.
    ///
    /// Deletions are computed only once every file has been visited; an
    /// error or interruption during the walk means no remote deletes.
    ///
    /// # Errors
    ///
    /// The first error encountered, or [`ReconcileError::Interrupted`].
    pub fn run(&self) -> Result<SyncReport, ReconcileError> {
        let mut walker = Walker::new(&self.root, self.walker_config.clone());
        if let Some(ref flag) = self.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }
        walker.check_root()?;

        log::info!(
            "Syncing {} to {}",
            self.root.display(),
            self.store.location()
        );
        self.visited.store(0, Ordering::SeqCst);

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_start("syncing", 0);
        }
        let visits = if self.jobs > 1 {
            self.visit_parallel(&walker)
        } else {
            self.visit_sequential(&walker)
        };
        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_end("syncing");
        }
        let mut report = visits?;

        if self.is_shutdown_requested() {
            return Err(ReconcileError::Interrupted);
        }

        let deletions = self.compute_deletions();
        if !deletions.is_empty() {
            log::info!("{} files were removed locally", deletions.len());
        }
        report.deleted = self.apply_deletions(&deletions)?;

        log::info!(
            "Sync complete: {} new, {} changed, {} unchanged, {} deleted",
            report.new_files,
            report.changed_files,
            report.unchanged_files,
            report.deleted.len()
        );
        Ok(report)
    }

    fn report_progress(&self, path: &Path) {
        let current = self.visited.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(ref callback) = self.progress_callback {
            callback.on_progress(current, path.to_string_lossy().as_ref());
        }
    }

    /// Visit files one at a time in walk order, stopping at the first error.
    fn visit_sequential(&self, walker: &Walker) -> Result<SyncReport, ReconcileError> {
        let mut report = SyncReport::default();

        for entry in walker.walk() {
            let entry = entry?;
            if !self.is_candidate(&entry) {
                log::trace!("Skipping: {}", entry.path.display());
                report.skipped += 1;
                continue;
            }

            self.report_progress(&entry.path);
            report.record(self.record_visit(&entry.path)?);
        }
        Ok(report)
    }

    /// Walk first, then visit files on a bounded thread pool.
    ///
    /// Every file is attempted even if another one fails; the first error
    /// in walk order is returned once all workers are done.
    fn visit_parallel(&self, walker: &Walker) -> Result<SyncReport, ReconcileError> {
        let mut report = SyncReport::default();
        let mut candidates = Vec::new();

        for entry in walker.walk() {
            let entry = entry?;
            if self.is_candidate(&entry) {
                candidates.push(entry.path);
            } else {
                log::trace!("Skipping: {}", entry.path.display());
                report.skipped += 1;
            }
        }

        log::debug!(
            "Visiting {} files with {} workers",
            candidates.len(),
            self.jobs
        );

        let visit = |path: &PathBuf| {
            if self.is_shutdown_requested() {
                return None;
            }
            self.report_progress(path);
            Some(self.record_visit(path))
        };

        let results: Vec<Option<Result<Visit, ReconcileError>>> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.jobs)
                .build()
            {
                Ok(pool) => pool.install(|| candidates.par_iter().map(visit).collect()),
                Err(e) => {
                    log::warn!("Failed to create thread pool ({}), visiting sequentially", e);
                    candidates.iter().map(visit).collect()
                }
            };

        let mut first_error = None;
        for result in results.into_iter().flatten() {
            match result {
                Ok(visit) => report.record(visit),
                Err(e) => {
                    log::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Cache key for a local path.
fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
