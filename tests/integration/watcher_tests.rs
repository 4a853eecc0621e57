use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use bidstage::download::{
    discard_partial, wait_for_completion, DownloadResult, DownloadWatcher, PartialMarkers,
    WatchConfig,
};
use tempfile::tempdir;

fn quick() -> WatchConfig {
    WatchConfig::default()
        .with_timeout(Duration::from_secs(3))
        .with_poll_interval(Duration::from_millis(15))
        .with_stall_threshold(6)
}

#[test]
fn test_partial_then_final_name_completes() {
    let dir = tempdir().unwrap();
    let staging = dir.path().to_path_buf();

    let writer = {
        let staging = staging.clone();
        thread::spawn(move || {
            let partial = staging.join("report.pdf.partial");
            fs::write(&partial, b"%PDF").unwrap();
            // Keep the partial visible for a few polls.
            thread::sleep(Duration::from_millis(50));
            fs::write(&partial, b"%PDF-1.7 body").unwrap();
            thread::sleep(Duration::from_millis(30));
            fs::rename(&partial, staging.join("report.pdf")).unwrap();
        })
    };

    let result = DownloadWatcher::new(&staging, quick()).wait_for_completion();
    writer.join().unwrap();

    assert_eq!(result, DownloadResult::Completed(staging.join("report.pdf")));
}

#[test]
fn test_growing_partial_is_not_stalled() {
    let dir = tempdir().unwrap();
    let staging = dir.path().to_path_buf();

    let writer = {
        let staging = staging.clone();
        thread::spawn(move || {
            let partial = staging.join("data.csv.crdownload");
            let mut body = Vec::new();
            for _ in 0..12 {
                body.extend_from_slice(b"row\n");
                fs::write(&partial, &body).unwrap();
                thread::sleep(Duration::from_millis(15));
            }
            fs::rename(&partial, staging.join("data.csv")).unwrap();
        })
    };

    let result = DownloadWatcher::new(&staging, quick()).wait_for_completion();
    writer.join().unwrap();

    assert_eq!(result.completed(), Some(staging.join("data.csv").as_path()));
}

#[test]
fn test_frozen_partial_stalls_and_is_discarded() {
    let dir = tempdir().unwrap();
    let partial = dir.path().join("bid.zip.tmp");
    fs::write(&partial, b"abc").unwrap();

    let result = wait_for_completion(
        dir.path(),
        Duration::from_secs(3),
        Duration::from_millis(10),
        3,
    );
    assert_eq!(result, DownloadResult::Stalled(partial.clone()));

    discard_partial(&partial).unwrap();
    assert!(!partial.exists());
}

#[test]
fn test_timeout_is_honoured() {
    let dir = tempdir().unwrap();
    let started = Instant::now();

    let result = wait_for_completion(
        dir.path(),
        Duration::from_millis(120),
        Duration::from_millis(20),
        30,
    );

    let elapsed = started.elapsed();
    assert_eq!(result, DownloadResult::TimedOut);
    assert!(elapsed >= Duration::from_millis(120));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn test_custom_markers() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("file.inprogress"), b"x").unwrap();

    let config = quick()
        .with_timeout(Duration::from_millis(100))
        .with_stall_threshold(30)
        .with_markers(PartialMarkers::new(["inprogress"]));
    let result = DownloadWatcher::new(dir.path(), config).wait_for_completion();

    assert_eq!(result, DownloadResult::TimedOut);
}

#[test]
fn test_files_are_returned_in_name_order() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("b.pdf"), b"b").unwrap();
    fs::write(dir.path().join("a.pdf"), b"a").unwrap();

    let watcher = DownloadWatcher::new(dir.path(), quick());
    let first = watcher.wait_for_completion();
    assert_eq!(first, DownloadResult::Completed(dir.path().join("a.pdf")));

    fs::remove_file(dir.path().join("a.pdf")).unwrap();
    let second = watcher.wait_for_completion();
    assert_eq!(second, DownloadResult::Completed(dir.path().join("b.pdf")));
}

#[test]
fn test_file_that_never_settles_is_stalled() {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let dir = tempdir().unwrap();
    let target = dir.path().join("export.xlsx");
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let target = target.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .unwrap();
            while !stop.load(Ordering::Relaxed) {
                file.write_all(b"chunk").unwrap();
                file.flush().unwrap();
                thread::sleep(Duration::from_millis(4));
            }
        })
    };

    let config = WatchConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(40))
        .with_stall_threshold(3);
    let result = DownloadWatcher::new(dir.path(), config).wait_for_completion();
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    assert_eq!(result, DownloadResult::Stalled(target));
}
