//! Layered configuration.
//!
//! Settings are merged with figment, later layers winning:
//!
//! 1. built-in defaults
//! 2. TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `S3DEPLOY_*` environment variables (`S3DEPLOY_BUCKET`, `S3DEPLOY_JOBS`, ...)
//! 4. command-line flags
//!
//! Ignore patterns from the command line are appended to those from lower
//! layers instead of replacing them.
//!
//! ```toml
//! bucket = "www.example.com"
//! region = "eu-west-1"
//! jobs = 4
//! ignore_patterns = ["*.map", "drafts/"]
//! ```

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "s3";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "S3DEPLOY_";

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or has the wrong shape.
    #[error("Invalid configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// No bucket was given anywhere.
    #[error("No bucket given (use --bucket, S3DEPLOY_BUCKET or the config file)")]
    MissingBucket,

    /// The bucket name cannot be used.
    #[error("Invalid bucket name {0:?}")]
    InvalidBucket(String),

    /// The region name cannot be used.
    #[error("Invalid region {0:?}")]
    InvalidRegion(String),

    /// The worker count is zero.
    #[error("jobs must be at least 1")]
    InvalidJobs,
}

/// Configuration as read from the file and environment layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destination bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Destination region.
    pub region: String,
    /// Upload every file regardless of the cache.
    pub force: bool,
    /// Hash cache location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Directory holding `<region>/<bucket>` trees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_root: Option<PathBuf>,
    /// Files processed concurrently.
    pub jobs: usize,
    /// Gitignore-style patterns excluded from the walk.
    pub ignore_patterns: Vec<String>,
    /// Descend into symlinked directories. Symlinked files are always read.
    pub follow_symlinks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: DEFAULT_REGION.to_string(),
            force: false,
            cache_path: None,
            store_root: None,
            jobs: 1,
            ignore_patterns: Vec::new(),
            follow_symlinks: false,
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    /// Destination bucket (`-b`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Destination region (`-r`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Force upload (`-a`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    /// Hash cache location (`--cache`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Bucket tree root (`--store-root`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_root: Option<PathBuf>,
    /// Concurrent files (`-j`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// Extra ignore patterns (`-i`), appended to the lower layers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_patterns: Vec<String>,
    /// Follow directory symlinks (`--follow-symlinks`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_symlinks: Option<bool>,
}

/// Validated settings for one deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Destination bucket, validated as a single path segment.
    pub bucket: String,
    /// Destination region, validated as a single path segment.
    pub region: String,
    /// Upload every file regardless of the cache.
    pub force: bool,
    /// Hash cache location; `None` uses the platform cache directory.
    pub cache_path: Option<PathBuf>,
    /// Bucket tree root; `None` uses the platform data directory.
    pub store_root: Option<PathBuf>,
    /// Files processed concurrently, at least 1.
    pub jobs: usize,
    /// Gitignore-style patterns excluded from the walk.
    pub ignore_patterns: Vec<String>,
    /// Descend into symlinked directories.
    pub follow_symlinks: bool,
}

impl Config {
    /// Default config file location for this platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "s3deploy", "s3deploy")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Defaults, then the TOML file, then the environment.
    ///
    /// An explicit `path` must exist. The default file is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing explicit file.
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Some(default) = Self::default_path() {
                    log::trace!("Looking for config at {}", default.display());
                    figment = figment.merge(Toml::file(default));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load every layer, including command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a layer is missing or malformed.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::extract(Self::figment(path)?, overrides)
    }

    /// Apply `overrides` on top of `figment` and extract.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the merged layers do not form a
    /// valid configuration.
    pub fn extract(figment: Figment, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        figment
            .admerge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Check the merged settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid setting.
    pub fn resolve(self) -> Result<DeployConfig, ConfigError> {
        let bucket = self.bucket.ok_or(ConfigError::MissingBucket)?;
        if !is_valid_segment(&bucket) {
            return Err(ConfigError::InvalidBucket(bucket));
        }
        if !is_valid_segment(&self.region) {
            return Err(ConfigError::InvalidRegion(self.region));
        }
        if self.jobs == 0 {
            return Err(ConfigError::InvalidJobs);
        }

        Ok(DeployConfig {
            bucket,
            region: self.region,
            force: self.force,
            cache_path: self.cache_path,
            store_root: self.store_root,
            jobs: self.jobs,
            ignore_patterns: self.ignore_patterns,
            follow_symlinks: self.follow_symlinks,
        })
    }
}

/// Bucket and region names become single directory names in the store.
fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
