use std::fs;

use bidstage::lifecycle::{scan_runs, Completion, RunFolder, RunState};
use chrono::NaiveDate;
use tempfile::tempdir;

#[test]
fn test_crashed_run_is_visible_and_finalizable() {
    let root = tempdir().unwrap();
    let day = root.path().join("2024-01-10");

    // Begin and "crash" without completing.
    let crashed = RunFolder::begin(&day, "nyc").unwrap();
    fs::write(crashed.artifact_path("nyc.csv"), b"key\n").unwrap();
    drop(crashed);

    let runs = scan_runs(root.path()).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].state, RunState::InProgress);
    assert_eq!(runs[0].date, NaiveDate::from_ymd_opt(2024, 1, 10));

    let mut folder = RunFolder::new(&day, "nyc").unwrap();
    assert_eq!(folder.state(), RunState::InProgress);
    let done = folder.complete().unwrap();
    assert_eq!(done, Completion::Renamed(day.join("nyc_COMPLETED")));
    assert!(day.join("nyc_COMPLETED").join("nyc.csv").exists());
    assert!(!day.join("nyc_COMPLETED").join("_downloads").exists());

    assert_eq!(folder.complete().unwrap(), Completion::AlreadyCompleted);
    assert_eq!(scan_runs(root.path()).unwrap()[0].state, RunState::Completed);
}

#[test]
fn test_rerun_after_crash_reuses_folder() {
    let root = tempdir().unwrap();
    let day = root.path().join("2024-01-10");
    let first = RunFolder::begin(&day, "nyc").unwrap();
    let kept = first.artifact_path("nyc.csv");
    fs::write(&kept, b"key\n").unwrap();

    let second = RunFolder::begin(&day, "nyc").unwrap();
    assert_eq!(second.path(), first.path());
    assert!(second.staging_dir().is_dir());
    assert!(kept.exists());
}

#[test]
fn test_scan_ignores_unrelated_entries() {
    let root = tempdir().unwrap();
    fs::create_dir_all(root.path().join("cache")).unwrap();
    fs::create_dir_all(root.path().join("2024-01-10").join("notes")).unwrap();
    fs::write(root.path().join("readme.txt"), b"").unwrap();
    RunFolder::begin(&root.path().join("2024-01-11"), "b").unwrap();
    RunFolder::begin(&root.path().join("2024-01-11"), "a").unwrap();

    let runs = scan_runs(root.path()).unwrap();
    let names: Vec<_> = runs.iter().map(|r| r.job_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}
