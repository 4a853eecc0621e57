//! End-to-end runs of the ingestion engine against a temporary run root.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bidstage::cache::{CacheStore, Decision};
use bidstage::clock::FixedClock;
use bidstage::context::RunContext;
use bidstage::download::WatchConfig;
use bidstage::engine::{
    DiscoveredItem, DownloadTrigger, EngineOptions, IngestionEngine, ItemOutcome, MemorySink,
    NoDownloads,
};
use bidstage::error::ExitCode;
use bidstage::relocate::{CollisionPolicy, Relocator};
use bidstage::retry::RetryPolicy;
use chrono::NaiveDate;
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn fast_options() -> EngineOptions {
    EngineOptions {
        lookback_days: 2,
        watch: WatchConfig::default()
            .with_timeout(Duration::from_secs(3))
            .with_poll_interval(Duration::from_millis(20))
            .with_stall_threshold(5),
        ..EngineOptions::default()
    }
}

fn engine_at(root: &Path, today: NaiveDate) -> IngestionEngine {
    let ctx = RunContext::new("portal", root).with_clock(Arc::new(FixedClock::new(today)));
    IngestionEngine::new(ctx, fast_options())
}

/// Writes `<name>.partial` in a few growing chunks, then renames it.
struct SlowBrowser {
    name: &'static str,
}

impl<P> DownloadTrigger<P> for SlowBrowser {
    fn trigger(&mut self, _item: &DiscoveredItem<P>, staging: &Path) -> anyhow::Result<usize> {
        let partial = staging.join(format!("{}.partial", self.name));
        let done = staging.join(self.name);
        thread::spawn(move || {
            for chunk in 0..3u8 {
                let mut data = fs::read(&partial).unwrap_or_default();
                data.extend(std::iter::repeat(chunk).take(64));
                fs::write(&partial, data).unwrap();
                thread::sleep(Duration::from_millis(25));
            }
            fs::rename(&partial, &done).unwrap();
        });
        Ok(1)
    }
}

/// Drops fixed files into staging synchronously.
struct DropFiles(Vec<(&'static str, &'static str)>, usize);

impl<P> DownloadTrigger<P> for DropFiles {
    fn trigger(&mut self, _item: &DiscoveredItem<P>, staging: &Path) -> anyhow::Result<usize> {
        for (name, content) in &self.0 {
            fs::write(staging.join(name), content)?;
        }
        Ok(self.1)
    }
}

struct Failing;

impl<P> DownloadTrigger<P> for Failing {
    fn trigger(&mut self, _item: &DiscoveredItem<P>, _staging: &Path) -> anyhow::Result<usize> {
        anyhow::bail!("portal returned 503")
    }
}

fn completed_folder(root: &Path, day: &str) -> PathBuf {
    root.join(day).join("portal_COMPLETED")
}

#[test]
fn test_first_seen_item_is_processed_once() {
    let root = tempdir().unwrap();
    let engine = engine_at(root.path(), date(2024, 1, 11));
    let items = vec![
        DiscoveredItem::new("bidA", Some(date(2024, 1, 10)), ()),
        DiscoveredItem::new("bidA", Some(date(2024, 1, 10)), ()),
        DiscoveredItem::new("old", Some(date(2024, 1, 1)), ()),
        DiscoveredItem::new("undated", None, ()),
    ];
    let mut sink = MemorySink::default();

    let report = engine.run(items, &mut NoDownloads, &mut sink).unwrap();

    assert_eq!(report.discovered, 4);
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped.get("already seen"), Some(&1));
    assert_eq!(report.skipped.get("outside window"), Some(&1));
    assert_eq!(report.skipped.get("missing date"), Some(&1));
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(sink.records, vec![("bidA".to_string(), Vec::new())]);

    let cache = CacheStore::try_load(&root.path().join("cache").join("portal_cache.json")).unwrap();
    assert_eq!(cache.len(), 1);
    let entry = cache.get("bidA").unwrap();
    assert_eq!(entry.discovered_date, Some(date(2024, 1, 10)));
    assert_eq!(entry.last_checked_date, date(2024, 1, 11));

    assert!(report.completed);
    assert_eq!(report.folder, completed_folder(root.path(), "2024-01-10"));
    assert!(report.folder.is_dir());
}

#[test]
fn test_cache_carries_over_to_next_run() {
    let root = tempdir().unwrap();
    let item = || DiscoveredItem::new("bidA", Some(date(2024, 1, 10)), ());

    engine_at(root.path(), date(2024, 1, 11))
        .run(vec![item()], &mut NoDownloads, &mut MemorySink::default())
        .unwrap();
    let report = engine_at(root.path(), date(2024, 1, 12))
        .run(vec![item()], &mut NoDownloads, &mut MemorySink::default())
        .unwrap();

    assert_eq!(report.processed, 0);
    assert!(matches!(
        report.items[0].outcome,
        ItemOutcome::Skipped {
            reason: Decision::AlreadySeen
        }
    ));
}

#[test]
fn test_partial_download_lands_in_item_folder() {
    let root = tempdir().unwrap();
    let engine = engine_at(root.path(), date(2024, 1, 11));
    let item = DiscoveredItem::new("https://portal/bid/7", Some(date(2024, 1, 11)), ())
        .with_folder_name("BID-7");
    let mut sink = MemorySink::default();

    let report = engine
        .run(vec![item], &mut SlowBrowser { name: "report.pdf" }, &mut sink)
        .unwrap();

    assert_eq!(report.attachments_moved, 1);
    assert_eq!(report.stalled, 0);
    assert_eq!(
        sink.records,
        vec![(
            "https://portal/bid/7".to_string(),
            vec!["report.pdf".to_string()]
        )]
    );
    let folder = completed_folder(root.path(), "2024-01-10");
    let moved = folder.join("BID-7").join("report.pdf");
    assert_eq!(fs::metadata(&moved).unwrap().len(), 192);
    assert!(!folder.join("_downloads").exists());
}

#[test]
fn test_trigger_failure_does_not_abort_or_cache() {
    let root = tempdir().unwrap();
    let engine = engine_at(root.path(), date(2024, 1, 11));
    let items = vec![
        DiscoveredItem::new("a", Some(date(2024, 1, 11)), ()),
        DiscoveredItem::new("b", Some(date(2024, 1, 11)), ()),
    ];

    let report = engine
        .run(items, &mut Failing, &mut MemorySink::default())
        .unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.exit_code(), ExitCode::PartialSuccess);
    assert!(report.completed);
    let cache = CacheStore::load(&root.path().join("cache").join("portal_cache.json"));
    assert!(cache.is_empty());
    assert!(report.failures().all(|(_, msg)| msg.contains("503")));
}

#[test]
fn test_stalled_partial_is_discarded() {
    let root = tempdir().unwrap();
    let engine = engine_at(root.path(), date(2024, 1, 11));
    let item = DiscoveredItem::new("a", Some(date(2024, 1, 11)), ());
    let mut trigger = DropFiles(vec![("big.zip.crdownload", "half")], 1);
    let mut sink = MemorySink::default();

    let report = engine.run(vec![item], &mut trigger, &mut sink).unwrap();

    assert_eq!(report.stalled, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(sink.records[0].1, Vec::<String>::new());
    assert!(!completed_folder(root.path(), "2024-01-10").join("a").exists());
}

#[test]
fn test_leftovers_are_swept_at_end_of_run() {
    let root = tempdir().unwrap();
    let engine = engine_at(root.path(), date(2024, 1, 11));
    let item = DiscoveredItem::new("k", Some(date(2024, 1, 11)), ()).with_folder_name("bid9");
    let mut trigger = DropFiles(
        vec![
            ("a-report.pdf", "r"),
            ("bid9-addendum.pdf", "a"),
            ("zz.txt", "z"),
        ],
        1,
    );

    let report = engine
        .run(vec![item], &mut trigger, &mut MemorySink::default())
        .unwrap();

    let folder = completed_folder(root.path(), "2024-01-10");
    assert_eq!(report.attachments_moved, 1);
    assert_eq!(report.swept, 1);
    assert_eq!(report.orphaned, vec![folder.join("zz.txt")]);
    assert!(report.orphaned.iter().all(|p| p.exists()));
    assert!(folder.join("bid9").join("a-report.pdf").exists());
    assert!(folder.join("bid9").join("bid9-addendum.pdf").exists());
    assert!(folder.join("zz.txt").exists());
}

#[test]
fn test_unmovable_attachment_does_not_block_the_rest() {
    let root = tempdir().unwrap();
    let existing = root
        .path()
        .join("2024-01-10")
        .join("portal_IN_PROGRESS")
        .join("BID");
    fs::create_dir_all(&existing).unwrap();
    fs::write(existing.join("a.pdf"), "kept").unwrap();

    let engine = engine_at(root.path(), date(2024, 1, 11)).with_relocator(Relocator::new(
        RetryPolicy::new(1, Duration::ZERO),
        CollisionPolicy::Fail,
    ));
    let item = DiscoveredItem::new("k", Some(date(2024, 1, 11)), ()).with_folder_name("BID");
    let mut trigger = DropFiles(vec![("a.pdf", "new"), ("b.pdf", "b")], 2);
    let mut sink = MemorySink::default();

    let report = engine.run(vec![item], &mut trigger, &mut sink).unwrap();

    let folder = completed_folder(root.path(), "2024-01-10");
    match &report.items[0].outcome {
        ItemOutcome::Processed {
            attachments,
            relocation_errors,
            ..
        } => {
            assert_eq!(attachments, &vec!["b.pdf".to_string()]);
            assert_eq!(relocation_errors.len(), 1);
            assert!(relocation_errors[0].contains("already exists"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(sink.records, vec![("k".to_string(), vec!["b.pdf".to_string()])]);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exit_code(), ExitCode::PartialSuccess);

    assert_eq!(fs::read_to_string(folder.join("BID").join("a.pdf")).unwrap(), "kept");
    assert!(folder.join("BID").join("b.pdf").exists());
    assert_eq!(report.orphaned, vec![folder.join("a.pdf")]);
    assert_eq!(fs::read_to_string(folder.join("a.pdf")).unwrap(), "new");

    // Relocation errors still count as processed, so the item is cached.
    let cache = CacheStore::try_load(&root.path().join("cache").join("portal_cache.json")).unwrap();
    assert!(cache.contains("k"));
}

#[test]
fn test_interrupt_still_completes_run() {
    let root = tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let engine = engine_at(root.path(), date(2024, 1, 11)).with_shutdown_flag(flag);
    let items = vec![DiscoveredItem::new("a", Some(date(2024, 1, 11)), ())];

    let report = engine
        .run(items, &mut NoDownloads, &mut MemorySink::default())
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.discovered, 0);
    assert_eq!(report.exit_code(), ExitCode::Interrupted);
    assert!(completed_folder(root.path(), "2024-01-10").is_dir());
    assert!(root.path().join("cache").join("portal_cache.json").exists());
}

#[test]
fn test_cache_dir_failure_is_fatal() {
    let root = tempdir().unwrap();
    let blocker = root.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();
    let ctx = RunContext::new("portal", root.path())
        .with_cache_dir(blocker.join("cache"))
        .with_clock(Arc::new(FixedClock::new(date(2024, 1, 11))));

    let result = IngestionEngine::new(ctx, fast_options()).run(
        Vec::<DiscoveredItem<()>>::new(),
        &mut NoDownloads,
        &mut MemorySink::default(),
    );

    assert!(result.is_err());
    assert!(!root.path().join("2024-01-10").exists());
}
