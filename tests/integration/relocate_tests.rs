use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bidstage::download::PartialMarkers;
use bidstage::relocate::{CollisionPolicy, MoveOutcome, RelocationError, Relocator};
use bidstage::retry::RetryPolicy;
use tempfile::tempdir;

fn relocator() -> Relocator {
    Relocator::new(
        RetryPolicy::new(3, Duration::from_millis(5)),
        CollisionPolicy::Rename,
    )
    .protect("portal.csv")
}

#[test]
fn test_protected_name_is_skipped_for_any_destination() {
    let dir = tempdir().unwrap();
    let sink = dir.path().join("portal.csv");
    fs::write(&sink, b"key,attachments\n").unwrap();

    let r = relocator();
    for dest in ["a", "b/c", "."] {
        let outcome = r.move_into(&sink, &dir.path().join(dest)).unwrap();
        assert_eq!(outcome, MoveOutcome::Skipped);
    }
    assert!(sink.exists());
}

#[test]
fn test_second_move_reports_already_moved() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("spec.pdf");
    fs::write(&src, b"pdf").unwrap();
    let dest = dir.path().join("BID-1");

    let r = relocator();
    let first = r.move_into(&src, &dest).unwrap();
    assert_eq!(first, MoveOutcome::Moved(dest.join("spec.pdf")));

    let err = r.move_into(&src, &dest).unwrap_err();
    assert!(err.is_already_moved());
    assert!(matches!(err, RelocationError::SourceMissing(_)));
}

#[test]
fn test_collisions_never_overwrite() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("BID-1");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("report.pdf"), b"first").unwrap();
    fs::write(dest.join("report (1).pdf"), b"second").unwrap();

    let src = dir.path().join("report.pdf");
    fs::write(&src, b"third").unwrap();
    let outcome = relocator().move_into(&src, &dest).unwrap();

    assert_eq!(outcome, MoveOutcome::Moved(dest.join("report (2).pdf")));
    assert_eq!(fs::read(dest.join("report.pdf")).unwrap(), b"first");
    assert_eq!(fs::read(dest.join("report (1).pdf")).unwrap(), b"second");
}

#[test]
fn test_fail_policy_keeps_source() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("a.txt"), b"old").unwrap();
    let src = dir.path().join("a.txt");
    fs::write(&src, b"new").unwrap();

    let r = Relocator::new(RetryPolicy::default(), CollisionPolicy::Fail);
    let err = r.move_into(&src, &dest).unwrap_err();

    assert!(matches!(err, RelocationError::DestinationExists(_)));
    assert!(src.exists());
}

#[test]
fn test_sweep_sorts_leftovers() {
    let dir = tempdir().unwrap();
    let staging = dir.path().join("staging");
    fs::create_dir(&staging).unwrap();
    for name in ["BID-1_addendum.pdf", "BID-2 map.png", "stray.txt", "x.crdownload", "portal.csv"] {
        fs::write(staging.join(name), name).unwrap();
    }
    let folders: Vec<PathBuf> = vec![dir.path().join("BID-1"), dir.path().join("BID-2")];

    let report = relocator().sweep(&staging, &folders, &PartialMarkers::default());

    assert_eq!(report.moved.len(), 2);
    assert!(dir.path().join("BID-1").join("BID-1_addendum.pdf").exists());
    assert!(dir.path().join("BID-2").join("BID-2 map.png").exists());
    assert_eq!(report.orphaned, vec![staging.join("stray.txt")]);
    assert_eq!(report.skipped.len(), 2);
    assert!(report.failed.is_empty());
}

#[test]
fn test_sweep_prefers_the_longest_folder_name() {
    let dir = tempdir().unwrap();
    let staging = dir.path().join("staging");
    fs::create_dir(&staging).unwrap();
    for name in ["BID-10_addendum.pdf", "BID-1_addendum.pdf", "BID-100.pdf"] {
        fs::write(staging.join(name), name).unwrap();
    }
    let bid1 = dir.path().join("BID-1");
    let bid10 = dir.path().join("BID-10");

    let report = relocator().sweep(&staging, &[bid1.clone(), bid10.clone()], &PartialMarkers::default());

    assert!(bid10.join("BID-10_addendum.pdf").exists());
    assert!(bid1.join("BID-1_addendum.pdf").exists());
    assert!(!bid1.join("BID-10_addendum.pdf").exists());
    assert_eq!(report.moved.len(), 2);
    assert_eq!(report.orphaned, vec![staging.join("BID-100.pdf")]);
}

#[cfg(unix)]
#[test]
fn test_locked_destination_exhausts_retries() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let src = dir.path().join("spec.pdf");
    fs::write(&src, b"pdf").unwrap();
    let dest = dir.path().join("BID-1");
    fs::create_dir(&dest).unwrap();
    fs::set_permissions(&dest, fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits do not bind a privileged user.
    let check = dest.join(".write-check");
    if fs::write(&check, b"").is_ok() {
        let _ = fs::remove_file(&check);
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let err = relocator().move_into(&src, &dest).unwrap_err();
    fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).unwrap();

    match err {
        RelocationError::RelocationFailed {
            attempts, cause, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(cause.kind(), std::io::ErrorKind::PermissionDenied);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(src.exists());
}
