//! Command-line interface definitions for s3deploy.
//!
//! # Example
//!
//! ```bash
//! # Deploy the current directory
//! s3deploy -b www.example.com
//!
//! # Deploy ./public to a bucket in another region, re-uploading everything
//! s3deploy -b www.example.com -r eu-west-1 --all public
//!
//! # Four concurrent uploads, skipping source maps
//! s3deploy -b www.example.com -j 4 -i '*.map' public
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// Deploy a directory to an object store bucket.
///
/// Uploads new and changed files and deletes remote objects whose local file
/// is gone. Content hashes of uploaded files are cached between runs, so
/// unchanged files are never sent twice.
#[derive(Debug, Parser)]
#[command(name = "s3deploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory to deploy
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Destination bucket
    #[arg(short, long, value_name = "NAME")]
    pub bucket: Option<String>,

    /// Destination region [default: s3]
    #[arg(short, long, value_name = "REGION")]
    pub region: Option<String>,

    /// Upload every file, even if unchanged
    #[arg(short = 'a', long = "all")]
    pub force: bool,

    /// Path to the hash cache file
    ///
    /// If not specified, a default platform-specific path is used.
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Ignore cached hashes and upload everything; deletions still apply
    #[arg(long)]
    pub clear_cache: bool,

    /// Directory holding the buckets, laid out as <ROOT>/<region>/<bucket>
    #[arg(long, value_name = "ROOT")]
    pub store_root: Option<PathBuf>,

    /// Number of files hashed and uploaded concurrently [default: 1]
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub jobs: Option<u64>,

    /// Glob patterns to exclude (can be specified multiple times)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Descend into symlinked directories (symlinked files are always deployed)
    ///
    /// Warning: May cause infinite loops if symlinks form cycles.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Configuration file to use instead of the default one
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,
}

impl Cli {
    /// Settings given on the command line, as the top configuration layer.
    ///
    /// Boolean switches only override lower layers when present.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            force: self.force.then_some(true),
            cache_path: self.cache.clone(),
            store_root: self.store_root.clone(),
            jobs: self.jobs.and_then(|j| usize::try_from(j).ok()),
            ignore_patterns: self.ignore_patterns.clone(),
            follow_symlinks: self.follow_symlinks.then_some(true),
        }
    }
}
