//! Directory walker implementation using walkdir.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for lazily traversing a
//! directory tree. Both files and directories are yielded; callers decide
//! what to do with directories. Children are visited in file-name order, so
//! a walk over an unchanged tree always produces the same sequence.
//!
//! # Features
//!
//! - Sorted, single-threaded traversal
//! - Optional symlink following with loop detection
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Graceful shutdown via atomic flag
//!
//! # Example
//!
//! ```no_run
//! use s3deploy::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig {
//!     ignore_patterns: vec![".git/".to_string()],
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(Path::new("/srv/site"), config);
//! let files: Vec<_> = walker
//!     .walk()
//!     .filter_map(Result::ok)
//!     .filter(|e| !e.is_dir)
//!     .collect();
//! println!("Found {} files", files.len());
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use super::{ScanError, WalkEntry, WalkerConfig};

/// Directory walker for file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Root directory of the walk.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Verify that the root exists and is a directory.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::NotFound`], [`ScanError::NotADirectory`] or an
    /// I/O error for the root.
    pub fn check_root(&self) -> Result<(), ScanError> {
        match std::fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(ScanError::NotADirectory(self.root.clone())),
            Err(e) => Err(io_to_scan_error(self.root.clone(), e)),
        }
    }

    /// Build gitignore matcher from config patterns.
    fn build_gitignore(&self) -> Option<Gitignore> {
        if self.config.ignore_patterns.is_empty() {
            return None;
        }

        let mut builder = GitignoreBuilder::new(&self.root);
        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Check if a path should be ignored based on configured patterns.
    fn should_ignore(&self, path: &Path, is_dir: bool, gitignore: &Option<Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };

        let relative_path = path.strip_prefix(&self.root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };

        gi.matched(normalized_path, is_dir).is_ignore()
    }

    /// Walk the directory tree, yielding files and directories.
    ///
    /// The root itself is not yielded. Ignored directories are pruned
    /// together with everything below them. When symlinks are not followed,
    /// a link to a file is yielded as that file and a link to a directory is
    /// skipped.
    /// Errors are yielded as [`ScanError`] values; it is up to the caller
    /// whether to stop.
    pub fn walk(&self) -> impl Iterator<Item = Result<WalkEntry, ScanError>> + '_ {
        let gitignore = self.build_gitignore();

        WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_dir();
                let ignored = self.should_ignore(entry.path(), is_dir, &gitignore);
                if ignored {
                    log::trace!("Ignoring: {}", entry.path().display());
                }
                !ignored
            })
            .take_while(move |_| {
                if self.is_shutdown_requested() {
                    log::debug!("Walker: Shutdown requested, stopping iteration");
                    return false;
                }
                true
            })
            .filter_map(move |result| match result {
                Ok(entry) => {
                    let file_type = entry.file_type();
                    if file_type.is_symlink() {
                        return match fs::metadata(entry.path()) {
                            Ok(target) if target.is_file() => {
                                Some(Ok(WalkEntry::new(entry.into_path(), false)))
                            }
                            Ok(_) => {
                                log::trace!("Skipping directory symlink: {}", entry.path().display());
                                None
                            }
                            Err(e) => {
                                log::warn!("Skipping broken symlink {}: {}", entry.path().display(), e);
                                None
                            }
                        };
                    }
                    Some(Ok(WalkEntry::new(entry.into_path(), file_type.is_dir())))
                }
                Err(e) => Some(Err(self.convert_error(e))),
            })
    }

    /// Convert a walkdir error into a [`ScanError`].
    fn convert_error(&self, error: walkdir::Error) -> ScanError {
        let path = error
            .path()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);

        if error.loop_ancestor().is_some() {
            return ScanError::SymlinkLoop(path);
        }

        match error.into_io_error() {
            Some(io_error) => io_to_scan_error(path, io_error),
            None => ScanError::Io {
                path,
                source: io::Error::other("walk failed"),
            },
        }
    }
}

fn io_to_scan_error(path: PathBuf, error: io::Error) -> ScanError {
    match error.kind() {
        io::ErrorKind::NotFound => ScanError::NotFound(path),
        io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(path),
        _ => ScanError::Io {
            path,
            source: error,
        },
    }
}
