//! Integration tests for the key tracker across the resident-to-spilled transition.

use std::path::PathBuf;

use term_keyset::config::TrackerConfig;
use term_keyset::error::KeysetError;
use term_keyset::key;
use term_keyset::key::Key;
use term_keyset::tracker::{CheckOutcome, KeyTracker, TrackerMode};

fn int_key(i: u64) -> Key {
    Key::single(i)
}

#[test]
fn test_ceiling_of_three_scenario() {
    let mut tracker = KeyTracker::with_max_resident_keys(3).unwrap();

    for k in ["A", "B", "C"] {
        assert!(tracker.add(&key![k]).unwrap());
    }
    assert_eq!(tracker.mode(), TrackerMode::Resident);
    assert!(tracker.overflow_path().is_none());
    assert!(tracker.has_seen(&key!["A"]).unwrap());

    assert!(tracker.add(&key!["D"]).unwrap());
    assert_eq!(tracker.mode(), TrackerMode::Spilled);
    assert!(tracker.has_seen(&key!["A"]).unwrap());
    assert!(tracker.has_seen(&key!["D"]).unwrap());
    assert!(!tracker.has_seen(&key!["E"]).unwrap());

    assert_eq!(
        tracker.add_and_check(&key!["A"]).unwrap(),
        CheckOutcome {
            was_duplicate: true,
            was_added: false
        }
    );
    tracker.close().unwrap();
}

#[test]
fn test_hundred_thousand_keys_with_small_ceiling() {
    let mut tracker = KeyTracker::with_max_resident_keys(1_000).unwrap();

    for i in 0..100_000 {
        assert!(tracker.add(&int_key(i)).unwrap());
        if i == 999 {
            let stats = tracker.statistics();
            assert_eq!(stats.resident_keys, 1_000);
            assert!(!stats.is_spilled);
        }
    }

    let stats = tracker.statistics();
    assert!(stats.is_spilled);
    assert_eq!(stats.keys_at_spill, Some(1_000));
    assert_eq!(stats.total_keys, 100_000);
    assert_eq!(stats.total_adds, 100_000);

    for i in 0..100_000 {
        assert!(tracker.has_seen(&int_key(i)).unwrap(), "lost key {i}");
    }
    for i in 100_000..100_100 {
        assert!(!tracker.has_seen(&int_key(i)).unwrap());
    }
    assert_eq!(tracker.statistics().disk_lookups, 100_100);
    tracker.close().unwrap();
}

#[test]
fn test_duplicates_before_and_after_spill() {
    let config = TrackerConfig::new(50).with_write_batch_size(7);
    let mut tracker = KeyTracker::new(config).unwrap();

    for i in 0..200 {
        let outcome = tracker.add_and_check(&key!["row", i as i64]).unwrap();
        assert!(outcome.was_added);
    }
    for i in 0..200 {
        let outcome = tracker.add_and_check(&key!["row", i as i64]).unwrap();
        assert!(outcome.was_duplicate, "key {i} not reported as duplicate");
    }
    assert_eq!(tracker.statistics().total_keys, 200);
    tracker.close().unwrap();
}

#[test]
fn test_owned_overflow_files_removed_on_close() {
    let mut tracker = KeyTracker::with_max_resident_keys(2).unwrap();
    for i in 0..10 {
        tracker.add(&int_key(i)).unwrap();
    }
    let path = tracker.overflow_path().unwrap().to_path_buf();
    assert!(path.exists());

    tracker.close().unwrap();
    assert!(!path.exists());
    assert!(!sidecar(&path, "-wal").exists());
    assert!(!sidecar(&path, "-shm").exists());
    assert!(!path.parent().unwrap().exists());
}

#[test]
fn test_owned_overflow_files_removed_on_drop() {
    let path = {
        let mut tracker = KeyTracker::with_max_resident_keys(1).unwrap();
        tracker.add(&int_key(1)).unwrap();
        tracker.add(&int_key(2)).unwrap();
        tracker.overflow_path().unwrap().to_path_buf()
    };
    assert!(!path.exists());
}

#[test]
fn test_owned_overflow_file_kept_without_auto_cleanup() {
    let config = TrackerConfig::new(1).with_auto_cleanup(false);
    let mut tracker = KeyTracker::new(config).unwrap();
    tracker.add(&int_key(1)).unwrap();
    tracker.add(&int_key(2)).unwrap();
    let path = tracker.overflow_path().unwrap().to_path_buf();

    tracker.close().unwrap();
    assert!(path.exists());

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[test]
fn test_caller_supplied_path_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run-keys.db");

    let config = TrackerConfig::new(2).with_overflow_path(&path);
    let mut tracker = KeyTracker::new(config).unwrap();
    assert!(!path.exists(), "store must not be created before spilling");

    for i in 0..5 {
        tracker.add(&int_key(i)).unwrap();
    }
    assert_eq!(tracker.overflow_path(), Some(path.as_path()));
    tracker.close().unwrap();

    assert!(path.exists());
}

#[test]
fn test_caller_supplied_path_reused_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.db");

    let mut first = KeyTracker::new(TrackerConfig::new(1).with_overflow_path(&path)).unwrap();
    first.add(&int_key(1)).unwrap();
    first.add(&int_key(2)).unwrap();
    first.close().unwrap();

    let mut second = KeyTracker::new(TrackerConfig::new(1).with_overflow_path(&path)).unwrap();
    second.add(&int_key(3)).unwrap();
    second.add(&int_key(4)).unwrap();
    // keys from the previous run are not carried over
    assert!(!second.has_seen(&int_key(1)).unwrap());
    assert!(second.add(&int_key(2)).unwrap());
    second.close().unwrap();
}

#[test]
fn test_unwritable_overflow_path_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig::new(10).with_overflow_path(dir.path().join("nope/keys.db"));
    let err = KeyTracker::new(config).unwrap_err();
    assert!(matches!(err, KeysetError::Configuration(_)));

    let err = KeyTracker::with_max_resident_keys(0).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_composite_keys_stay_distinct_across_spill() {
    let mut tracker = KeyTracker::with_max_resident_keys(1).unwrap();
    assert!(tracker.add(&key!["ab", "c"]).unwrap());
    assert!(tracker.add(&key!["a", "bc"]).unwrap());
    assert!(tracker.add(&key!["abc"]).unwrap());
    assert!(tracker.has_seen(&key!["ab", "c"]).unwrap());
    assert!(!tracker.has_seen(&key!["a", "b", "c"]).unwrap());
    tracker.close().unwrap();
}

#[test]
fn test_spill_into_non_database_file_keeps_tracker_resident() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.db");
    let garbage = vec![b'x'; 4096];
    std::fs::write(&path, &garbage).unwrap();

    let mut tracker = KeyTracker::new(TrackerConfig::new(2).with_overflow_path(&path)).unwrap();
    assert!(tracker.add(&key!["a"]).unwrap());
    assert!(tracker.add(&key!["b"]).unwrap());

    let err = tracker.add(&key!["c"]).unwrap_err();
    assert!(matches!(err, KeysetError::Storage { .. }), "unexpected error: {err}");
    assert!(err.is_fatal());

    assert_eq!(tracker.mode(), TrackerMode::Resident);
    assert!(tracker.overflow_path().is_none());
    assert!(tracker.has_seen(&key!["a"]).unwrap());
    assert!(tracker.has_seen(&key!["b"]).unwrap());
    assert!(!tracker.has_seen(&key!["c"]).unwrap());

    let stats = tracker.statistics();
    assert_eq!(stats.total_keys, 2);
    assert_eq!(stats.resident_keys, 2);
    // the failed add is not counted
    assert_eq!(stats.total_adds, 2);
    assert_eq!(stats.keys_at_spill, None);

    tracker.close().unwrap();
    // the caller's file is left exactly as it was
    assert_eq!(std::fs::read(&path).unwrap(), garbage);
}

#[test]
fn test_spill_into_removed_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    std::fs::create_dir(&run_dir).unwrap();
    let path = run_dir.join("keys.db");

    let mut tracker = KeyTracker::new(TrackerConfig::new(1).with_overflow_path(&path)).unwrap();
    assert!(tracker.add(&int_key(1)).unwrap());
    std::fs::remove_dir_all(&run_dir).unwrap();

    let err = tracker.add(&int_key(2)).unwrap_err();
    assert!(
        matches!(&err, KeysetError::Storage { operation, .. } if operation == "open overflow store"),
        "unexpected error: {err}"
    );
    assert!(err.is_fatal());
    assert_eq!(tracker.mode(), TrackerMode::Resident);
    assert!(tracker.has_seen(&int_key(1)).unwrap());
    assert_eq!(tracker.statistics().total_adds, 1);
    assert!(!path.exists());
}

fn sidecar(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
