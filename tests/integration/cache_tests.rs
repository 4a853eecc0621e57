use std::fs;

use bidstage::cache::{CacheError, CacheStore, DateWindow, Decision, MissingDatePolicy};
use chrono::NaiveDate;
use tempfile::tempdir;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[test]
fn test_legacy_document_loads_and_evicts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nyc_cache.json");
    fs::write(
        &path,
        r#"{
            "https://a": {"posted_date": "01/10/2024", "last_checked": "01/11/2024"},
            "https://b": {"posted_date": "2023-09-01", "last_checked": "2023-09-02"},
            "https://c": {"posted_date": "N/A", "last_checked": "2024-01-11"}
        }"#,
    )
    .unwrap();

    let mut store = CacheStore::try_load(&path).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.get("https://a").unwrap().discovered_date, Some(d(2024, 1, 10)));

    let evicted = store.evict(d(2024, 1, 11), 90, MissingDatePolicy::Evict);
    assert_eq!(evicted, 2);
    assert!(store.contains("https://a"));
}

#[test]
fn test_saved_document_uses_current_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache").join("nyc_cache.json");
    let mut store = CacheStore::new();
    store.record("k", Some(d(2024, 1, 10)), d(2024, 1, 11));
    store.save(&path).unwrap();

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["k"]["discovered_date"], "2024-01-10");
    assert_eq!(value["k"]["last_checked_date"], "2024-01-11");
    assert_eq!(CacheStore::load(&path), store);
}

#[test]
fn test_corrupt_document_is_soft_for_load_and_strict_for_try_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, b"{\"k\": {\"discovered_date\": ").unwrap();

    assert!(CacheStore::load(&path).is_empty());
    assert!(matches!(
        CacheStore::try_load(&path),
        Err(CacheError::Malformed { .. })
    ));
}

#[test]
fn test_explicit_window_overrides_lookback() {
    let store = CacheStore::new();
    let window = DateWindow::between(d(2023, 12, 1), d(2023, 12, 31));

    assert_eq!(store.decide("x", Some(d(2023, 12, 15)), &window), Decision::Process);
    assert_eq!(
        store.decide("x", Some(d(2024, 1, 1)), &window),
        Decision::OutsideWindow
    );
}
