use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use s3deploy::config::{Config, ConfigError, ConfigOverrides};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_from_env() {
    std::env::set_var("S3DEPLOY_TEST_BUCKET", "env-bucket");
    std::env::set_var("S3DEPLOY_TEST_JOBS", "6");
    std::env::set_var("S3DEPLOY_TEST_FOLLOW_SYMLINKS", "true");

    // A dedicated prefix keeps this test from leaking into other tests' env layer
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("S3DEPLOY_TEST_"));
    let config = Config::extract(figment, &ConfigOverrides::default()).unwrap();

    assert_eq!(config.bucket.as_deref(), Some("env-bucket"));
    assert_eq!(config.jobs, 6);
    assert!(config.follow_symlinks);

    std::env::remove_var("S3DEPLOY_TEST_BUCKET");
    std::env::remove_var("S3DEPLOY_TEST_JOBS");
    std::env::remove_var("S3DEPLOY_TEST_FOLLOW_SYMLINKS");
}

#[test]
fn test_config_load_from_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
bucket = "www.example.com"
region = "eu-west-1"
force = true
cache_path = "/var/cache/s3deploy.json"
store_root = "/srv/buckets"
jobs = 4
ignore_patterns = ["*.map"]
"#,
    )
    .unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    let resolved = Config::extract(figment, &ConfigOverrides::default())
        .unwrap()
        .resolve()
        .unwrap();

    assert_eq!(resolved.bucket, "www.example.com");
    assert_eq!(resolved.region, "eu-west-1");
    assert!(resolved.force);
    assert_eq!(
        resolved.cache_path,
        Some(PathBuf::from("/var/cache/s3deploy.json"))
    );
    assert_eq!(resolved.store_root, Some(PathBuf::from("/srv/buckets")));
    assert_eq!(resolved.jobs, 4);
    assert_eq!(resolved.ignore_patterns, vec!["*.map"]);
}

#[test]
fn test_explicit_config_file_with_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deploy.toml");
    fs::write(&path, "bucket = \"from-file\"\nregion = \"us-east-1\"\n").unwrap();

    let overrides = ConfigOverrides {
        region: Some("eu-central-1".to_string()),
        jobs: Some(2),
        ..Default::default()
    };
    let config = Config::load(Some(&path), &overrides).unwrap();

    assert_eq!(config.bucket.as_deref(), Some("from-file"));
    assert_eq!(config.region, "eu-central-1");
    assert_eq!(config.jobs, 2);
}

#[test]
fn test_unknown_value_type_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deploy.toml");
    fs::write(&path, "force = \"sometimes\"\n").unwrap();

    assert!(matches!(
        Config::load(Some(&path), &ConfigOverrides::default()),
        Err(ConfigError::Load(_))
    ));
}
