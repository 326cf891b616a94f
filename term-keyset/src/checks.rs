//! Duplicate-row and unique-key checks built on [`KeyTracker`].
//!
//! Both checks feed one key per row into a fresh tracker and report the rows whose
//! key was already seen. They differ only in null handling: a unique-key check skips
//! rows with a null key component, a duplicate-row check treats null as a value.
//!
//! A check never aborts its caller. When the tracker fails (for example the disk
//! fills up after spilling) [`KeyCheck::run`] returns a result with
//! [`CheckStatus::Error`] and the failure message, and other checks keep running.

use std::fmt;

use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::batch::KeyColumns;
use crate::config::TrackerConfig;
use crate::error::{KeysetError, Result};
use crate::key::Key;
use crate::logging::truncate_field;
use crate::tracker::{KeyTracker, TrackerStats};

/// Default number of duplicate samples kept per check.
pub const DEFAULT_MAX_SAMPLES: usize = 20;

/// Which key check to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCheckKind {
    /// Flags every row whose full key repeats an earlier row.
    DuplicateRows,
    /// Flags repeated keys, ignoring rows with a null key component.
    UniqueKey,
}

impl fmt::Display for KeyCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCheckKind::DuplicateRows => write!(f, "duplicate_rows"),
            KeyCheckKind::UniqueKey => write!(f, "unique_key"),
        }
    }
}

/// Outcome of a key check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// No repeated keys
    Success,
    /// At least one repeated key
    Failure,
    /// The check could not complete
    Error,
}

impl CheckStatus {
    /// Returns true if this is a Success status.
    pub fn is_success(&self) -> bool {
        matches!(self, CheckStatus::Success)
    }

    /// Returns true if this is a Failure status.
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Failure)
    }

    /// Returns true if this is an Error status.
    pub fn is_error(&self) -> bool {
        matches!(self, CheckStatus::Error)
    }
}

/// A row flagged as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSample {
    /// Zero-based row position across all observed batches
    pub row: u64,
    /// Display form of the repeated key
    pub key: String,
}

/// Result of running a key check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCheckResult {
    pub check_name: String,
    pub kind: KeyCheckKind,
    pub status: CheckStatus,
    /// Rows whose key was tracked
    pub rows_checked: u64,
    /// Rows not tracked because of a null key component
    pub rows_skipped: u64,
    /// Rows whose key had been seen before
    pub duplicate_count: u64,
    pub samples: Vec<DuplicateSample>,
    pub message: Option<String>,
    /// Tracker counters at the end of the run, when the tracker was created
    pub tracker: Option<TrackerStats>,
}

/// A duplicate-row or unique-key check over a fixed set of key columns.
///
/// # Examples
///
/// ```rust
/// use term_keyset::checks::KeyCheck;
/// use term_keyset::config::TrackerConfig;
/// use term_keyset::key;
///
/// let check = KeyCheck::unique_key("order_id_unique", ["order_id"])
///     .with_tracker_config(TrackerConfig::new(100_000));
///
/// let mut run = check.start().unwrap();
/// run.observe_key(&key![1_i64]).unwrap();
/// run.observe_key(&key![1_i64]).unwrap();
/// let result = run.finish();
/// assert!(result.status.is_failure());
/// assert_eq!(result.duplicate_count, 1);
/// ```
#[derive(Debug, Clone)]
pub struct KeyCheck {
    name: String,
    kind: KeyCheckKind,
    columns: KeyColumns,
    tracker_config: TrackerConfig,
    max_samples: usize,
}

impl KeyCheck {
    /// Creates a check of the given kind.
    pub fn new<I, S>(name: impl Into<String>, kind: KeyCheckKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            columns: KeyColumns::new(columns),
            tracker_config: TrackerConfig::default(),
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }

    /// Creates a duplicate-row check.
    pub fn duplicate_rows<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, KeyCheckKind::DuplicateRows, columns)
    }

    /// Creates a unique-key check.
    pub fn unique_key<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, KeyCheckKind::UniqueKey, columns)
    }

    /// Sets the tracker configuration used by each run.
    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    /// Sets how many duplicate rows are kept as samples.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> KeyCheckKind {
        self.kind
    }

    pub fn columns(&self) -> &[String] {
        self.columns.columns()
    }

    /// Starts a run with a fresh tracker.
    pub fn start(&self) -> Result<KeyCheckRun<'_>> {
        let tracker = KeyTracker::new(self.tracker_config.clone())?;
        Ok(KeyCheckRun {
            check: self,
            tracker,
            next_row: 0,
            rows_checked: 0,
            rows_skipped: 0,
            duplicate_count: 0,
            samples: Vec::new(),
        })
    }

    /// Runs the check over a sequence of batches.
    ///
    /// Tracker and extraction failures are reported as [`CheckStatus::Error`].
    #[instrument(skip(self, batches), fields(
        check.name = %self.name,
        check.kind = %self.kind,
        check.columns = self.columns().len()
    ))]
    pub fn run<'b>(&self, batches: impl IntoIterator<Item = &'b RecordBatch>) -> KeyCheckResult {
        let mut run = match self.start() {
            Ok(run) => run,
            Err(e) => return self.error_result(&e, None),
        };
        for batch in batches {
            if let Err(e) = run.observe_batch(batch) {
                return run.abort(e);
            }
        }
        run.finish()
    }

    fn error_result(&self, error: &KeysetError, tracker: Option<TrackerStats>) -> KeyCheckResult {
        warn!(check = %self.name, error = %error, "Key check failed to complete");
        KeyCheckResult {
            check_name: self.name.clone(),
            kind: self.kind,
            status: CheckStatus::Error,
            rows_checked: 0,
            rows_skipped: 0,
            duplicate_count: 0,
            samples: Vec::new(),
            message: Some(format!(
                "Key tracking failed for check '{}': {error}",
                self.name
            )),
            tracker,
        }
    }
}

/// An in-progress key check.
#[derive(Debug)]
pub struct KeyCheckRun<'c> {
    check: &'c KeyCheck,
    tracker: KeyTracker,
    next_row: u64,
    rows_checked: u64,
    rows_skipped: u64,
    duplicate_count: u64,
    samples: Vec<DuplicateSample>,
}

impl KeyCheckRun<'_> {
    /// Observes the key of the next row. Returns true if the row is a duplicate.
    pub fn observe_key(&mut self, key: &Key) -> Result<bool> {
        let row = self.next_row;
        self.next_row += 1;

        if self.check.kind == KeyCheckKind::UniqueKey && key.has_null() {
            self.rows_skipped += 1;
            return Ok(false);
        }

        let outcome = self.tracker.add_and_check(key)?;
        self.rows_checked += 1;
        if outcome.was_duplicate {
            self.duplicate_count += 1;
            if self.samples.len() < self.check.max_samples {
                let max_length = self.check.tracker_config.log.max_field_length;
                self.samples.push(DuplicateSample {
                    row,
                    key: truncate_field(&key.to_string(), max_length),
                });
            }
        }
        Ok(outcome.was_duplicate)
    }

    /// Observes every row of a batch. Returns the number of duplicates it contained.
    pub fn observe_batch(&mut self, batch: &RecordBatch) -> Result<u64> {
        let keys = self.check.columns.resolve(batch)?;
        let mut duplicates = 0;
        for key in keys.iter() {
            if self.observe_key(&key?)? {
                duplicates += 1;
            }
        }
        debug!(
            check = %self.check.name,
            rows = keys.num_rows(),
            duplicates,
            "Observed batch"
        );
        Ok(duplicates)
    }

    /// Current tracker counters.
    pub fn statistics(&self) -> TrackerStats {
        self.tracker.statistics()
    }

    /// Closes the tracker and produces the result.
    ///
    /// A failure to close the tracker yields a [`CheckStatus::Error`] result that keeps
    /// the counts gathered so far.
    pub fn finish(mut self) -> KeyCheckResult {
        let stats = self.tracker.statistics();
        if let Err(e) = self.tracker.close() {
            return self.partial_error(&e, stats);
        }

        let columns = self.check.columns().join(", ");
        let (status, message) = if self.duplicate_count == 0 {
            (CheckStatus::Success, None)
        } else {
            let message = match self.check.kind {
                KeyCheckKind::DuplicateRows => format!(
                    "Found {} duplicate rows on columns [{columns}]",
                    self.duplicate_count
                ),
                KeyCheckKind::UniqueKey => format!(
                    "Found {} rows violating uniqueness of [{columns}]",
                    self.duplicate_count
                ),
            };
            (CheckStatus::Failure, Some(message))
        };

        KeyCheckResult {
            check_name: self.check.name.clone(),
            kind: self.check.kind,
            status,
            rows_checked: self.rows_checked,
            rows_skipped: self.rows_skipped,
            duplicate_count: self.duplicate_count,
            samples: self.samples,
            message,
            tracker: Some(stats),
        }
    }

    /// Ends the run with an error result that keeps the counts gathered so far.
    fn abort(mut self, error: KeysetError) -> KeyCheckResult {
        let stats = self.tracker.statistics();
        if let Err(close_error) = self.tracker.close() {
            warn!(error = %close_error, "Failed to close key tracker after error");
        }
        self.partial_error(&error, stats)
    }

    fn partial_error(self, error: &KeysetError, stats: TrackerStats) -> KeyCheckResult {
        let mut result = self.check.error_result(error, Some(stats));
        result.rows_checked = self.rows_checked;
        result.rows_skipped = self.rows_skipped;
        result.duplicate_count = self.duplicate_count;
        result.samples = self.samples;
        result
    }
}
