use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bidstage::cache::MissingDatePolicy;
use bidstage::config::{unknown_keys, Config};
use bidstage::relocate::CollisionPolicy;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use tempfile::tempdir;

#[test]
fn test_toml_layer_over_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
run_root = "/data/bids"
lookback_days = 5
missing_dates = "keep"
protected_names = ["summary.xlsx"]

[download]
timeout_secs = 300
partial_suffixes = [".crdownload"]

[relocate]
collision = "fail"
"#,
    )
    .unwrap();

    // Figment directly, without the environment layer.
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .extract()
        .unwrap();

    assert_eq!(config.run_root, PathBuf::from("/data/bids"));
    assert_eq!(config.cache_dir(), PathBuf::from("/data/bids/cache"));
    assert_eq!(config.lookback_days, 5);
    assert_eq!(config.retention_days, 90);
    assert_eq!(config.missing_dates, MissingDatePolicy::Keep);
    assert_eq!(config.relocate.collision, CollisionPolicy::Fail);
    assert_eq!(config.relocate.max_attempts, 5);

    let watch = config.watch_config();
    assert_eq!(watch.timeout, Duration::from_secs(300));
    assert_eq!(watch.poll_interval, Duration::from_secs(1));
    assert!(watch.markers.is_partial("a.crdownload"));
    assert!(!watch.markers.is_partial("a.tmp"));
    assert!(config.relocator().is_protected(&PathBuf::from("summary.xlsx")));
}

#[test]
fn test_invalid_value_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[relocate]\nmax_attempts = 0\n").unwrap();

    let err = Config::load_from(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("relocate.max_attempts"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "lookback_days = \"many\"\n").unwrap();

    assert!(Config::load_from(Some(&path)).is_err());
}

#[test]
fn test_unknown_keys_are_reported_with_suggestions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "lookbak_days = 3\n[download]\ntimeout_sec = 10\n[relocate]\ncolour = 1\n",
    )
    .unwrap();

    let warnings = unknown_keys(&path);
    assert_eq!(warnings.len(), 3);
    assert!(warnings[0].contains("did you mean `lookback_days`"));
    assert!(warnings[1].contains("did you mean `download.timeout_secs`"));
    assert!(warnings[2].contains("relocate.colour"));
}

#[test]
fn test_printed_config_round_trips() {
    let mut config = Config::default();
    config.cache_dir = Some(PathBuf::from("/var/cache/bids"));
    config.protected_names = vec!["a.csv".into()];

    let text = config.to_toml().unwrap();
    let back: Config = Figment::from(Toml::string(&text)).extract().unwrap();
    assert_eq!(back, config);
}
