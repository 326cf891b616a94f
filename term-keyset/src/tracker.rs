//! The key tracker facade.
//!
//! [`KeyTracker`] answers "have I seen this key?" for one validation run. It keeps
//! fingerprints in a [`MemorySet`] until admitting one more would exceed
//! `max_resident_keys`; that insert moves every resident fingerprint into an
//! [`OverflowStore`] and all later traffic goes to disk. The move happens once and is
//! never undone.
//!
//! # Examples
//!
//! ```rust
//! use term_keyset::config::TrackerConfig;
//! use term_keyset::key;
//! use term_keyset::tracker::KeyTracker;
//!
//! # fn main() -> term_keyset::error::Result<()> {
//! let mut tracker = KeyTracker::new(TrackerConfig::new(2))?;
//! assert!(tracker.add(&key!["a", 1_i64])?);
//! assert!(tracker.add(&key!["b", 2_i64])?);
//! assert!(tracker.add(&key!["c", 3_i64])?); // spills
//!
//! let outcome = tracker.add_and_check(&key!["a", 1_i64])?;
//! assert!(outcome.was_duplicate);
//! assert!(tracker.statistics().is_spilled);
//! tracker.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::{KeysetError, Result};
use crate::key::{Fingerprint, Key};
use crate::logging::truncate_field;
use crate::memory::MemorySet;
use crate::overflow::{OverflowLocation, OverflowStore};

/// Operating mode of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMode {
    /// Fingerprints live in memory.
    Resident,
    /// Fingerprints live in the overflow store.
    Spilled,
}

/// Result of [`KeyTracker::add_and_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    /// An equal key had already been admitted
    pub was_duplicate: bool,
    /// The key was admitted by this call
    pub was_added: bool,
}

/// Snapshot of a tracker's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// Current mode
    pub mode: TrackerMode,
    /// Whether the tracker has spilled to disk
    pub is_spilled: bool,
    /// Unique keys admitted
    pub total_keys: u64,
    /// Keys currently held in memory
    pub resident_keys: u64,
    /// Keys held by the overflow store, including buffered writes
    pub overflow_keys: u64,
    /// Resident keys moved to disk at spillover
    pub keys_at_spill: Option<u64>,
    /// Membership queries answered
    pub total_lookups: u64,
    /// Queries answered from memory
    pub memory_lookups: u64,
    /// Queries answered from the overflow store
    pub disk_lookups: u64,
    /// Completed calls that tried to admit a key; failed calls are not counted
    pub total_adds: u64,
    /// Configured resident ceiling
    pub max_resident_keys: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_keys: u64,
    keys_at_spill: Option<u64>,
    total_lookups: u64,
    memory_lookups: u64,
    disk_lookups: u64,
    total_adds: u64,
}

#[derive(Debug)]
enum Backend {
    Resident(MemorySet),
    Spilled(OverflowStore),
    Closed,
}

/// Exact, bounded-memory set of keys seen during one validation run.
///
/// A tracker is owned by a single rule invocation and is not synchronized; wrap it in
/// a mutex if it must be shared.
#[derive(Debug)]
pub struct KeyTracker {
    config: TrackerConfig,
    backend: Backend,
    mode: TrackerMode,
    counters: Counters,
}

impl KeyTracker {
    /// Creates a tracker. Nothing is written to disk until the ceiling is crossed.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        // bounded so a huge ceiling does not reserve memory up front
        let capacity = config.max_resident_keys.min(64 * 1024);
        Ok(Self {
            backend: Backend::Resident(MemorySet::with_capacity(capacity)),
            mode: TrackerMode::Resident,
            counters: Counters::default(),
            config,
        })
    }

    /// Creates a tracker with the given ceiling and default settings.
    pub fn with_max_resident_keys(max_resident_keys: usize) -> Result<Self> {
        Self::new(TrackerConfig::new(max_resident_keys))
    }

    /// Current mode.
    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    /// The tracker's configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Path of the overflow store, once one has been opened.
    pub fn overflow_path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Spilled(store) => Some(store.location().path()),
            _ => None,
        }
    }

    /// Returns whether an equal key was admitted before.
    pub fn has_seen(&mut self, key: &Key) -> Result<bool> {
        let fingerprint = key.fingerprint()?;
        self.lookup(&fingerprint)
    }

    /// Admits a key. Returns true if it was not present before.
    pub fn add(&mut self, key: &Key) -> Result<bool> {
        self.ensure_open()?;
        let fingerprint = key.fingerprint()?;
        let payload = self.payload_for(key)?;
        let added = self.insert(fingerprint, payload)?;
        self.counters.total_adds += 1;
        Ok(added)
    }

    /// Admits a key and reports whether it was already present.
    ///
    /// Equivalent to [`has_seen`](Self::has_seen) followed by [`add`](Self::add), but
    /// the key is fingerprinted once and the backend probed once.
    pub fn add_and_check(&mut self, key: &Key) -> Result<CheckOutcome> {
        let fingerprint = key.fingerprint()?;
        let payload = self.payload_for(key)?;
        self.count_lookup()?;
        let was_added = self.insert(fingerprint, payload)?;
        self.counters.total_adds += 1;
        Ok(CheckOutcome {
            was_duplicate: !was_added,
            was_added,
        })
    }

    /// Returns a snapshot of the tracker's counters.
    pub fn statistics(&self) -> TrackerStats {
        let (resident_keys, overflow_keys) = match &self.backend {
            Backend::Resident(set) => (set.len() as u64, 0),
            Backend::Spilled(store) => (0, store.len() as u64),
            Backend::Closed => (0, 0),
        };
        TrackerStats {
            mode: self.mode,
            is_spilled: self.mode == TrackerMode::Spilled,
            total_keys: self.counters.total_keys,
            resident_keys,
            overflow_keys,
            keys_at_spill: self.counters.keys_at_spill,
            total_lookups: self.counters.total_lookups,
            memory_lookups: self.counters.memory_lookups,
            disk_lookups: self.counters.disk_lookups,
            total_adds: self.counters.total_adds,
            max_resident_keys: self.config.max_resident_keys as u64,
        }
    }

    /// Flushes pending writes, releases the overflow store and deletes files this
    /// tracker owns. Calling it again is a no-op.
    #[instrument(skip(self), fields(mode = ?self.mode, total_keys = self.counters.total_keys))]
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.backend, Backend::Closed) {
            Backend::Resident(_) | Backend::Closed => Ok(()),
            Backend::Spilled(store) => {
                let path = store.location().path().to_path_buf();
                let remove = self.config.auto_cleanup;
                store.close(remove)?;
                debug!(path = %path.display(), removed = remove, "Closed overflow store");
                Ok(())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.backend {
            Backend::Closed => Err(KeysetError::Closed),
            _ => Ok(()),
        }
    }

    fn payload_for(&self, key: &Key) -> Result<Option<String>> {
        if self.config.retain_key_payloads {
            key.payload().map(Some)
        } else {
            Ok(None)
        }
    }

    fn count_lookup(&mut self) -> Result<()> {
        match self.backend {
            Backend::Resident(_) => self.counters.memory_lookups += 1,
            Backend::Spilled(_) => self.counters.disk_lookups += 1,
            Backend::Closed => return Err(KeysetError::Closed),
        }
        self.counters.total_lookups += 1;
        Ok(())
    }

    fn lookup(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
        self.count_lookup()?;
        match &self.backend {
            Backend::Resident(set) => Ok(set.contains(fingerprint)),
            Backend::Spilled(store) => store.contains(fingerprint),
            Backend::Closed => Err(KeysetError::Closed),
        }
    }

    fn insert(&mut self, fingerprint: Fingerprint, payload: Option<String>) -> Result<bool> {
        let max = self.config.max_resident_keys;
        let crosses_ceiling = matches!(
            &self.backend,
            Backend::Resident(set) if set.len() >= max && !set.contains(&fingerprint)
        );
        if crosses_ceiling {
            // the triggering key is inserted below, into the overflow store
            self.spill()?;
        }

        let added = match &mut self.backend {
            Backend::Resident(set) => set.insert(fingerprint, payload),
            Backend::Spilled(store) => store.insert_if_absent(fingerprint, payload)?,
            Backend::Closed => return Err(KeysetError::Closed),
        };
        if added {
            self.counters.total_keys += 1;
        }
        Ok(added)
    }

    /// Moves every resident fingerprint into a freshly opened overflow store.
    ///
    /// If opening or loading fails the tracker stays resident with its keys intact.
    fn spill(&mut self) -> Result<()> {
        let Backend::Resident(set) = &self.backend else {
            return Ok(());
        };
        let start = Instant::now();

        let location = match &self.config.overflow_path {
            Some(path) => OverflowLocation::caller_supplied(path.clone()),
            None => OverflowLocation::private_temp()?,
        };
        let mut store = match OverflowStore::open(
            location.clone(),
            self.config.write_batch_size,
            self.config.log.clone(),
        ) {
            Ok(store) => store,
            Err(e) => {
                if let Err(cleanup) = location.remove() {
                    warn!(error = %cleanup, "Failed to remove partially created overflow store");
                }
                return Err(e);
            }
        };

        let moved = match store.bulk_load(set.records()) {
            Ok(moved) => moved,
            Err(e) => {
                store.discard();
                return Err(e);
            }
        };

        self.backend = Backend::Spilled(store);
        self.mode = TrackerMode::Spilled;
        self.counters.keys_at_spill = Some(moved as u64);

        crate::log_transition!(
            self.config.log,
            keys_moved = moved,
            max_resident_keys = self.config.max_resident_keys,
            path = %truncate_field(
                &location.path().display().to_string(),
                self.config.log.max_field_length
            ),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Key tracker spilled to disk"
        );
        Ok(())
    }
}

impl Drop for KeyTracker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close key tracker on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn tracker(max: usize) -> KeyTracker {
        KeyTracker::with_max_resident_keys(max).unwrap()
    }

    #[test]
    fn test_add_then_has_seen_while_resident() {
        let mut t = tracker(10);
        assert!(!t.has_seen(&key!["a"]).unwrap());
        assert!(t.add(&key!["a"]).unwrap());
        assert!(t.has_seen(&key!["a"]).unwrap());
        assert!(!t.has_seen(&key!["b"]).unwrap());
        assert_eq!(t.mode(), TrackerMode::Resident);
        assert!(t.overflow_path().is_none());
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut t = tracker(10);
        assert!(t.add(&key!["a", 1_i64]).unwrap());
        assert!(!t.add(&key!["a", 1_i64]).unwrap());
        assert!(t.has_seen(&key!["a", 1_i64]).unwrap());
        assert_eq!(t.statistics().total_keys, 1);
        assert_eq!(t.statistics().total_adds, 2);
    }

    #[test]
    fn test_ceiling_scenario() {
        let mut t = tracker(3);
        for k in ["A", "B", "C"] {
            assert!(t.add(&key![k]).unwrap());
        }
        assert_eq!(t.mode(), TrackerMode::Resident);
        assert!(t.has_seen(&key!["A"]).unwrap());
        assert_eq!(t.statistics().resident_keys, 3);

        assert!(t.add(&key!["D"]).unwrap());
        assert_eq!(t.mode(), TrackerMode::Spilled);
        assert!(t.overflow_path().is_some());
        assert!(t.has_seen(&key!["A"]).unwrap());
        assert!(t.has_seen(&key!["D"]).unwrap());
        assert!(!t.has_seen(&key!["E"]).unwrap());

        let outcome = t.add_and_check(&key!["A"]).unwrap();
        assert_eq!(
            outcome,
            CheckOutcome {
                was_duplicate: true,
                was_added: false
            }
        );

        let stats = t.statistics();
        assert!(stats.is_spilled);
        assert_eq!(stats.keys_at_spill, Some(3));
        assert_eq!(stats.total_keys, 4);
        assert_eq!(stats.resident_keys, 0);
        assert_eq!(stats.overflow_keys, 4);
        t.close().unwrap();
    }

    #[test]
    fn test_duplicate_at_ceiling_does_not_spill() {
        let mut t = tracker(2);
        t.add(&key![1_i64]).unwrap();
        t.add(&key![2_i64]).unwrap();
        assert!(!t.add(&key![1_i64]).unwrap());
        assert!(t.add_and_check(&key![2_i64]).unwrap().was_duplicate);
        assert_eq!(t.mode(), TrackerMode::Resident);
    }

    #[test]
    fn test_lookup_counters() {
        let mut t = tracker(1);
        t.has_seen(&key!["x"]).unwrap();
        t.add_and_check(&key!["x"]).unwrap();
        t.add_and_check(&key!["y"]).unwrap(); // spills
        t.has_seen(&key!["x"]).unwrap();

        let stats = t.statistics();
        assert_eq!(stats.total_lookups, 4);
        assert_eq!(stats.memory_lookups, 3);
        assert_eq!(stats.disk_lookups, 1);
        assert_eq!(stats.total_adds, 2);
        assert_eq!(stats.total_keys, 2);
    }

    #[test]
    fn test_encoding_error_leaves_state_untouched() {
        let mut t = tracker(4);
        t.add(&key!["a"]).unwrap();
        let empty = Key::composite(Vec::new());
        assert!(matches!(t.add(&empty), Err(KeysetError::Encoding(_))));
        assert!(matches!(t.has_seen(&empty), Err(KeysetError::Encoding(_))));
        assert!(t.has_seen(&key!["a"]).unwrap());
        assert_eq!(t.statistics().total_keys, 1);
    }

    #[test]
    fn test_use_after_close() {
        let mut t = tracker(1);
        t.add(&key!["a"]).unwrap();
        t.add(&key!["b"]).unwrap();
        t.close().unwrap();
        t.close().unwrap();

        assert!(matches!(t.has_seen(&key!["a"]), Err(KeysetError::Closed)));
        assert!(matches!(t.add(&key!["c"]), Err(KeysetError::Closed)));
        assert!(matches!(t.add_and_check(&key!["c"]), Err(KeysetError::Closed)));
        // counters survive for reporting
        let stats = t.statistics();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.total_lookups, 0);
        assert_eq!(stats.total_adds, 2);
    }

    #[test]
    fn test_payloads_follow_keys_to_disk() {
        let config = TrackerConfig::new(1).with_key_payloads(true);
        let mut t = KeyTracker::new(config).unwrap();
        t.add(&key!["first"]).unwrap();
        t.add(&key!["second"]).unwrap();

        let Backend::Spilled(store) = &t.backend else {
            panic!("expected spilled backend");
        };
        let fp = key!["first"].fingerprint().unwrap();
        let payload = store.payload(&fp).unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Key>(&payload).unwrap(), key!["first"]);
    }

    #[test]
    fn test_stats_serialize() {
        let t = tracker(5);
        let json = serde_json::to_value(t.statistics()).unwrap();
        assert_eq!(json["mode"], "resident");
        assert_eq!(json["max_resident_keys"], 5);
    }
}
