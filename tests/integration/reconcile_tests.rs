use filetime::{set_file_mtime, FileTime};
use s3deploy::cache::HashCache;
use s3deploy::reconcile::{Classification, ReconcileError, Reconciler, SyncReport};
use s3deploy::remote::{DirectoryStore, MemoryStore, ObjectStore};
use s3deploy::scanner::{hash_bytes, hash_to_hex, WalkerConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn site() -> TempDir {
    let dir = tempdir().unwrap();
    write(dir.path(), "index.html", b"<h1>home</h1>");
    write(dir.path(), "about/index.html", b"<h1>about</h1>");
    write(dir.path(), "css/site.css", b"body { margin: 0 }");
    dir
}

fn cache_key(root: &Path, rel: &str) -> String {
    root.join(rel).to_string_lossy().into_owned()
}

/// One full run with a cache loaded from and persisted to `cache_path`.
fn deploy(root: &Path, cache_path: &Path, store: Arc<dyn ObjectStore>) -> SyncReport {
    let cache = HashCache::load(cache_path).unwrap();
    let reconciler = Reconciler::new(root, cache, store);
    let report = reconciler.run().unwrap();
    reconciler.into_cache().persist().unwrap();
    report
}

#[test]
fn test_first_deploy_uploads_everything() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(DirectoryStore::new(state.path().join("bucket")));

    let report = deploy(dir.path(), &cache_path, store.clone());

    assert_eq!(report.new_files, 3);
    assert_eq!(
        report.uploaded,
        vec!["about/index.html", "css/site.css", "index.html"]
    );
    assert_eq!(
        fs::read(store.root().join("css").join("site.css")).unwrap(),
        b"body { margin: 0 }"
    );

    let cache = HashCache::load(&cache_path).unwrap();
    assert_eq!(cache.len(), 3);
    assert_eq!(
        cache.get(&cache_key(dir.path(), "index.html")),
        Some(hash_to_hex(&hash_bytes(b"<h1>home</h1>")).as_str())
    );
}

#[test]
fn test_second_run_is_idempotent() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(MemoryStore::new());

    deploy(dir.path(), &cache_path, store.clone());
    let report = deploy(dir.path(), &cache_path, store.clone());

    assert!(report.uploaded.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(report.unchanged_files, 3);
    assert_eq!(store.uploads().len(), 3);
}

#[test]
fn test_unchanged_and_new_file() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(MemoryStore::new());

    deploy(dir.path(), &cache_path, store.clone());
    write(dir.path(), "blog/post.html", b"<p>new</p>");
    let report = deploy(dir.path(), &cache_path, store.clone());

    assert_eq!(report.uploaded, vec!["blog/post.html"]);
    assert_eq!(report.new_files, 1);
    assert_eq!(report.unchanged_files, 3);
    assert_eq!(HashCache::load(&cache_path).unwrap().len(), 4);
}

#[test]
fn test_change_detection_ignores_mtime() {
    let dir = site();
    let index = dir.path().join("index.html");
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    deploy(dir.path(), &cache_path, Arc::new(MemoryStore::new()));

    let classify = || {
        let reconciler = Reconciler::new(
            dir.path(),
            HashCache::load(&cache_path).unwrap(),
            Arc::new(MemoryStore::new()),
        );
        reconciler.classify(&index).unwrap().0
    };

    set_file_mtime(&index, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
    assert_eq!(classify(), Classification::Unchanged);

    fs::write(&index, b"<h1>home!</h1>").unwrap();
    assert_eq!(classify(), Classification::Changed);

    fs::write(&index, b"<h1>home</h1>").unwrap();
    assert_eq!(classify(), Classification::Unchanged);
}

#[test]
fn test_changed_file_is_reuploaded() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(MemoryStore::new());

    deploy(dir.path(), &cache_path, store.clone());
    write(dir.path(), "css/site.css", b"body { margin: 1em }");
    let report = deploy(dir.path(), &cache_path, store.clone());

    assert_eq!(report.changed_files, 1);
    assert_eq!(report.uploaded, vec!["css/site.css"]);
    assert_eq!(store.object("css/site.css").unwrap(), b"body { margin: 1em }");
}

#[test]
fn test_removed_file_is_deleted_remotely_and_forgotten() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(DirectoryStore::new(state.path().join("bucket")));

    deploy(dir.path(), &cache_path, store.clone());
    fs::remove_dir_all(dir.path().join("about")).unwrap();
    let report = deploy(dir.path(), &cache_path, store.clone());

    assert_eq!(report.deleted, vec!["about/index.html"]);
    assert!(!store.root().join("about").exists());

    let cache = HashCache::load(&cache_path).unwrap();
    assert!(cache.get(&cache_key(dir.path(), "about/index.html")).is_none());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_empty_tree_deletes_everything_cached() {
    let dir = tempdir().unwrap();
    let mut cache = HashCache::in_memory();
    let hash = hash_to_hex(&hash_bytes(b"x"));
    cache.set(&cache_key(dir.path(), "a.txt"), &hash).unwrap();
    cache.set(&cache_key(dir.path(), "b/c.txt"), &hash).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", b"x");
    store.insert("b/c.txt", b"x");

    let reconciler = Reconciler::new(dir.path(), cache, store.clone());
    let report = reconciler.run().unwrap();

    assert_eq!(report.deleted, vec!["a.txt", "b/c.txt"]);
    assert!(store.keys().is_empty());
    assert!(reconciler.into_cache().is_empty());
}

#[test]
fn test_force_uploads_unchanged_files() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(MemoryStore::new());
    deploy(dir.path(), &cache_path, store.clone());

    let reconciler = Reconciler::new(dir.path(), HashCache::load(&cache_path).unwrap(), store.clone())
        .with_force(true);
    let report = reconciler.run().unwrap();

    assert_eq!(report.unchanged_files, 3);
    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(store.uploads().len(), 6);
}

#[test]
fn test_extensionless_files_are_not_deployed() {
    let dir = site();
    write(dir.path(), "LICENSE", b"MIT");
    write(dir.path(), "bin/run", b"#!/bin/sh");

    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(dir.path(), HashCache::in_memory(), store.clone());
    reconciler.run().unwrap();

    assert!(store.object("LICENSE").is_none());
    assert!(store.object("bin/run").is_none());
    assert_eq!(store.keys().len(), 3);
}

#[test]
fn test_ignore_patterns() {
    let dir = site();
    write(dir.path(), "css/site.css.map", b"{}");
    write(dir.path(), "drafts/wip.html", b"wip");

    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(dir.path(), HashCache::in_memory(), store.clone())
        .with_walker_config(WalkerConfig::new(
            false,
            vec!["*.map".to_string(), "drafts/".to_string()],
        ));
    reconciler.run().unwrap();

    assert_eq!(
        store.keys(),
        vec!["about/index.html", "css/site.css", "index.html"]
    );
}

#[test]
fn test_upload_failure_aborts_without_deletions() {
    let dir = site();
    let gone = cache_key(dir.path(), "old.html");
    let mut cache = HashCache::in_memory();
    cache.set(&gone, &hash_to_hex(&hash_bytes(b"old"))).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert("old.html", b"old");
    store.fail_upload("css/site.css");

    let reconciler = Reconciler::new(dir.path(), cache, store.clone());
    let err = reconciler.run().unwrap_err();

    assert!(matches!(err, ReconcileError::Store(_)));
    assert!(store.delete_batches().is_empty());
    assert!(store.object("old.html").is_some());

    let cache = reconciler.into_cache();
    assert!(cache.get(&gone).is_some());
    // Walk order: about/index.html succeeded before css/site.css failed
    assert!(cache.get(&cache_key(dir.path(), "about/index.html")).is_some());
    assert!(cache.get(&cache_key(dir.path(), "css/site.css")).is_none());
    assert!(cache.get(&cache_key(dir.path(), "index.html")).is_none());
}

#[test]
fn test_delete_failure_keeps_cache_entries() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(MemoryStore::new());
    deploy(dir.path(), &cache_path, store.clone());

    fs::remove_file(dir.path().join("index.html")).unwrap();
    store.fail_deletes(true);

    let reconciler = Reconciler::new(dir.path(), HashCache::load(&cache_path).unwrap(), store.clone());
    assert!(matches!(reconciler.run(), Err(ReconcileError::Store(_))));
    reconciler.into_cache().persist().unwrap();

    // The next run retries the deletion
    store.fail_deletes(false);
    let report = deploy(dir.path(), &cache_path, store.clone());
    assert_eq!(report.deleted, vec!["index.html"]);
}

#[test]
fn test_parallel_matches_sequential() {
    let dir = tempdir().unwrap();
    for i in 0..40 {
        write(dir.path(), &format!("d{}/page-{i}.html", i % 4), format!("page {i}").as_bytes());
    }

    let sequential = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(dir.path(), HashCache::in_memory(), sequential.clone());
    let seq_report = reconciler.run().unwrap();
    let seq_cache = reconciler.into_cache();

    let parallel = Arc::new(MemoryStore::new());
    let reconciler =
        Reconciler::new(dir.path(), HashCache::in_memory(), parallel.clone()).with_jobs(4);
    let par_report = reconciler.run().unwrap();
    let par_cache = reconciler.into_cache();

    assert_eq!(par_report.new_files, 40);
    assert_eq!(par_report.uploaded, seq_report.uploaded);
    assert_eq!(parallel.keys(), sequential.keys());
    assert_eq!(par_cache.paths(), seq_cache.paths());
    for path in seq_cache.paths() {
        assert_eq!(par_cache.get(&path), seq_cache.get(&path));
    }
}

#[test]
fn test_parallel_failure_isolated_to_one_file() {
    let dir = site();
    let gone = cache_key(dir.path(), "old.html");
    let mut cache = HashCache::in_memory();
    cache.set(&gone, &hash_to_hex(&hash_bytes(b"old"))).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.fail_upload("css/site.css");

    let reconciler = Reconciler::new(dir.path(), cache, store.clone()).with_jobs(3);
    assert!(matches!(reconciler.run(), Err(ReconcileError::Store(_))));
    assert!(store.delete_batches().is_empty());

    let cache = reconciler.into_cache();
    assert!(cache.get(&cache_key(dir.path(), "index.html")).is_some());
    assert!(cache.get(&cache_key(dir.path(), "about/index.html")).is_some());
    assert!(cache.get(&cache_key(dir.path(), "css/site.css")).is_none());
    assert!(cache.get(&gone).is_some());
}

#[test]
fn test_root_spelled_with_parent_components() {
    let base = tempdir().unwrap();
    write(base.path(), "site/index.html", b"<h1>home</h1>");
    write(base.path(), "site/css/site.css", b"body {}");
    fs::create_dir(base.path().join("sub")).unwrap();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(DirectoryStore::new(state.path().join("bucket")));

    let detour = base.path().join("sub").join("..").join("site");
    let first = deploy(&detour, &cache_path, store.clone());
    assert_eq!(first.uploaded, vec!["css/site.css", "index.html"]);

    let cache = HashCache::load(&cache_path).unwrap();
    assert!(cache.paths().iter().all(|p| !p.contains("..")));

    let direct = base.path().join("site");
    for _ in 0..2 {
        let report = deploy(&direct, &cache_path, store.clone());
        assert!(report.uploaded.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(report.unchanged_files, 2);
    }
    assert!(store.root().join("index.html").exists());
}

#[test]
fn test_stale_entry_with_parent_components_is_dropped() {
    let dir = site();
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");

    let stale = dir
        .path()
        .join("about")
        .join("..")
        .join("..")
        .join("old")
        .join("gone.html")
        .to_string_lossy()
        .into_owned();
    let mut cache = HashCache::load(&cache_path).unwrap();
    cache.set(&stale, &hash_to_hex(&hash_bytes(b"old"))).unwrap();
    cache.persist().unwrap();

    let store = Arc::new(MemoryStore::new());
    let report = deploy(dir.path(), &cache_path, store.clone());

    assert_eq!(report.uploaded.len(), 3);
    assert!(report.deleted.is_empty());
    assert!(store.delete_batches().is_empty());
    assert!(HashCache::load(&cache_path).unwrap().get(&stale).is_none());

    // The next run starts clean
    let again = deploy(dir.path(), &cache_path, store);
    assert!(again.uploaded.is_empty());
}

#[cfg(unix)]
#[test]
fn test_backslash_in_file_name_is_deployed() {
    let dir = site();
    write(dir.path(), "notes\\draft.txt", b"draft");
    let state = tempdir().unwrap();
    let cache_path = state.path().join("cache.json");
    let store = Arc::new(DirectoryStore::new(state.path().join("bucket")));

    let report = deploy(dir.path(), &cache_path, store.clone());
    assert!(report.uploaded.contains(&"notes\\draft.txt".to_string()));
    assert_eq!(
        fs::read(store.root().join("notes\\draft.txt")).unwrap(),
        b"draft"
    );

    fs::remove_file(dir.path().join("notes\\draft.txt")).unwrap();
    let report = deploy(dir.path(), &cache_path, store.clone());
    assert_eq!(report.deleted, vec!["notes\\draft.txt"]);
    assert!(!store.root().join("notes\\draft.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_symlinked_file_is_deployed_with_target_content() {
    let dir = site();
    let shared = tempdir().unwrap();
    write(shared.path(), "robots.txt", b"User-agent: *");
    std::os::unix::fs::symlink(shared.path().join("robots.txt"), dir.path().join("robots.txt"))
        .unwrap();
    let state = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = deploy(dir.path(), &state.path().join("cache.json"), store.clone());

    assert!(report.uploaded.contains(&"robots.txt".to_string()));
    assert_eq!(store.object("robots.txt").unwrap(), b"User-agent: *");
}
