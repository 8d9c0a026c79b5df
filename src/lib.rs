//! s3deploy - one-way deploy of a local directory to an object store.
//!
//! Each run walks the local tree, uploads files whose content hash differs
//! from the hash recorded at their last upload, and deletes remote objects
//! whose local file has disappeared. The per-path hashes live in a JSON
//! cache file that survives between runs.
//!
//! The building blocks are usable on their own:
//!
//! - [`cache::HashCache`]: the persistent path → hash map
//! - [`scanner`]: directory walking and SHA-256 hashing
//! - [`reconcile::Reconciler`]: the sync pass itself
//! - [`remote::ObjectStore`]: the seam to remote storage

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod scanner;
pub mod signal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bytesize::ByteSize;
use directories::ProjectDirs;

use crate::cache::HashCache;
use crate::cli::Cli;
use crate::config::{Config, DeployConfig};
use crate::error::ExitCode;
use crate::progress::Progress;
use crate::reconcile::{Reconciler, SyncReport};
use crate::remote::{Credentials, DirectoryStore, ACCESS_KEY_ENV, SECRET_KEY_ENV};
use crate::scanner::WalkerConfig;

/// Run one deploy as described by `cli`.
///
/// The hash cache is written back whether or not the sync succeeds, so
/// that uploads already confirmed are not repeated on the next run.
///
/// # Errors
///
/// Configuration, cache, walk, hash and store errors, with context. Use
/// [`ExitCode::for_error`] to map them to a process exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    let shutdown = signal::install_handler().context("Failed to set up Ctrl+C handling")?;

    let config = Config::load(cli.config.as_deref(), &cli.overrides())?.resolve()?;
    log::debug!("Configuration: {:?}", config);

    let root = std::path::absolute(&cli.path)
        .with_context(|| format!("Invalid path {}", cli.path.display()))?;
    // A missing root keeps its absolute form so the walk reports it
    let root = std::fs::canonicalize(&root).unwrap_or(root);

    check_credentials(&Credentials::from_env());

    let cache_path = match config.cache_path {
        Some(ref path) => path.clone(),
        None => HashCache::default_path()?,
    };
    let cache = HashCache::load(&cache_path)
        .with_context(|| format!("Failed to load hash cache {}", cache_path.display()))?;
    // Cached paths are still needed to find local deletions
    if cli.clear_cache {
        log::info!("Ignoring {} cached hashes, every file will be uploaded", cache.len());
    }

    let store = DirectoryStore::for_bucket(&store_root(&config)?, &config.region, &config.bucket);
    log::debug!("Bucket directory: {}", store.root().display());

    let reconciler = Reconciler::new(&root, cache, Arc::new(store))
        .with_force(config.force || cli.clear_cache)
        .with_jobs(config.jobs)
        .with_walker_config(WalkerConfig::new(
            config.follow_symlinks,
            config.ignore_patterns.clone(),
        ))
        .with_shutdown_flag(shutdown.get_flag())
        .with_progress_callback(Arc::new(Progress::new(cli.quiet)));

    let outcome = reconciler.run();
    let persisted = reconciler.into_cache().persist();

    match (outcome, persisted) {
        (Ok(report), Ok(())) => {
            if !cli.quiet {
                print_summary(&report);
            }
            Ok(ExitCode::Success)
        }
        (Ok(_), Err(e)) => Err(anyhow::Error::new(e)
            .context("Deployed, but the hash cache could not be saved")),
        (Err(e), Ok(())) => Err(anyhow::Error::new(e).context("Deploy failed")),
        (Err(e), Err(persist_error)) => {
            log::error!("Failed to save hash cache: {}", persist_error);
            Err(anyhow::Error::new(e).context(format!(
                "Deploy failed (hash cache not saved: {persist_error})"
            )))
        }
    }
}

/// Warn about half-configured credentials.
///
/// The directory store does not authenticate, so missing credentials are
/// not an error.
fn check_credentials(credentials: &Credentials) {
    if credentials.is_partial() {
        log::warn!(
            "Only one of {} and {} is set; ignoring credentials",
            ACCESS_KEY_ENV,
            SECRET_KEY_ENV
        );
    } else if credentials.is_complete() {
        log::debug!("Using credentials from the environment: {:?}", credentials);
    } else {
        log::debug!("No credentials in the environment");
    }
}

fn store_root(config: &DeployConfig) -> anyhow::Result<PathBuf> {
    if let Some(ref root) = config.store_root {
        return Ok(root.clone());
    }
    ProjectDirs::from("com", "s3deploy", "s3deploy")
        .map(|dirs| dirs.data_dir().join("buckets"))
        .ok_or_else(|| anyhow!("Failed to determine a default store root; pass --store-root"))
}

fn print_summary(report: &SyncReport) {
    println!("Deployed successfully!");
    println!(
        "{} uploaded ({} new, {} changed, {}), {} unchanged, {} deleted",
        report.uploaded.len(),
        report.new_files,
        report.changed_files,
        ByteSize::b(report.bytes_uploaded),
        report.unchanged_files,
        report.deleted.len()
    );
}

