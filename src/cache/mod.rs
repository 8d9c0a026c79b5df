//! Hash caching module for s3deploy.
//!
//! This module provides persistent storage for the content hash of every
//! file at its last successful upload, so that later runs only transfer
//! files whose content actually changed.
//!
//! # Architecture
//!
//! * [`hash_cache`]: the JSON-file-backed [`HashCache`] and its errors.
//! * [`entry`]: validation rules for stored hash values.
//!
//! # Cache Semantics
//!
//! An entry is a promise that the remote object for that path holds content
//! with the recorded hash. Entries are therefore only written after an
//! upload succeeds and only removed after a remote delete succeeds. File
//! size and modification time play no part in change detection.

pub mod entry;
pub mod hash_cache;

pub use entry::{is_valid_hash, HASH_HEX_LEN};
pub use hash_cache::{CacheError, CacheResult, HashCache};
