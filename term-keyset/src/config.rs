//! Construction parameters for a [`KeyTracker`](crate::tracker::KeyTracker).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KeysetError, Result};
use crate::logging::LogConfig;

/// Default ceiling on resident keys before spilling to disk.
pub const DEFAULT_MAX_RESIDENT_KEYS: usize = 1_000_000;

/// Default number of records per overflow store write.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 1_000;

/// Configuration for a key tracker.
///
/// Deserializes with defaults for every missing field, so a rule configuration only
/// needs to name what it overrides.
///
/// # Examples
///
/// ```rust
/// use term_keyset::config::TrackerConfig;
///
/// let config = TrackerConfig::new(50_000)
///     .with_write_batch_size(5_000)
///     .with_auto_cleanup(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of distinct keys held in memory before spilling
    pub max_resident_keys: usize,
    /// Location of the overflow store; a private temporary file is used when absent
    pub overflow_path: Option<PathBuf>,
    /// Whether `close` deletes an overflow store the tracker created itself
    pub auto_cleanup: bool,
    /// Records buffered before one grouped write to the overflow store
    pub write_batch_size: usize,
    /// Whether to keep a JSON rendering of each key next to its fingerprint
    pub retain_key_payloads: bool,
    /// Logging switches
    pub log: LogConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_resident_keys: DEFAULT_MAX_RESIDENT_KEYS,
            overflow_path: None,
            auto_cleanup: true,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            retain_key_payloads: false,
            log: LogConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Creates a configuration with the given resident key ceiling.
    pub fn new(max_resident_keys: usize) -> Self {
        Self {
            max_resident_keys,
            ..Self::default()
        }
    }

    /// Sets the resident key ceiling.
    pub fn with_max_resident_keys(mut self, max_resident_keys: usize) -> Self {
        self.max_resident_keys = max_resident_keys;
        self
    }

    /// Uses a caller-owned overflow store location. It is never deleted by the tracker.
    pub fn with_overflow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.overflow_path = Some(path.into());
        self
    }

    /// Sets whether a tracker-owned overflow store is deleted on close.
    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    /// Sets the overflow store batch size.
    pub fn with_write_batch_size(mut self, write_batch_size: usize) -> Self {
        self.write_batch_size = write_batch_size;
        self
    }

    /// Sets whether key payloads are retained for diagnostics.
    pub fn with_key_payloads(mut self, retain: bool) -> Self {
        self.retain_key_payloads = retain;
        self
    }

    /// Sets the logging switches.
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Checks the configuration without touching the overflow store.
    ///
    /// A caller-supplied overflow path must not be a directory, its parent directory
    /// must exist and accept new files, and an existing file there must be writable.
    pub fn validate(&self) -> Result<()> {
        if self.max_resident_keys == 0 {
            return Err(KeysetError::configuration(
                "max_resident_keys must be greater than zero",
            ));
        }
        if self.write_batch_size == 0 {
            return Err(KeysetError::configuration(
                "write_batch_size must be greater than zero",
            ));
        }
        if let Some(path) = &self.overflow_path {
            check_writable(path)?;
        }
        Ok(())
    }
}

fn check_writable(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(KeysetError::configuration(format!(
            "overflow path {} is a directory",
            path.display()
        )));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(KeysetError::configuration(format!(
            "overflow directory {} does not exist",
            parent.display()
        )));
    }

    if let Ok(metadata) = fs::metadata(path) {
        if metadata.permissions().readonly() {
            return Err(KeysetError::configuration(format!(
                "overflow path {} is read-only",
                path.display()
            )));
        }
    }

    // SQLite also needs to create sidecar files next to the database.
    tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        KeysetError::configuration(format!(
            "overflow directory {} is not writable: {e}",
            parent.display()
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.max_resident_keys, DEFAULT_MAX_RESIDENT_KEYS);
        assert_eq!(config.write_batch_size, DEFAULT_WRITE_BATCH_SIZE);
        assert!(config.overflow_path.is_none());
        assert!(config.auto_cleanup);
        assert!(!config.retain_key_payloads);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let err = TrackerConfig::new(0).validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("max_resident_keys"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = TrackerConfig::new(10)
            .with_write_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_overflow_path_checks() {
        let dir = tempfile::tempdir().unwrap();

        let ok = TrackerConfig::new(10).with_overflow_path(dir.path().join("keys.db"));
        assert!(ok.validate().is_ok());

        let is_dir = TrackerConfig::new(10).with_overflow_path(dir.path());
        assert!(is_dir.validate().unwrap_err().is_configuration());

        let missing_parent =
            TrackerConfig::new(10).with_overflow_path(dir.path().join("missing/keys.db"));
        assert!(missing_parent.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_read_only_overflow_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        fs::write(&path, b"").unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        let err = TrackerConfig::new(10)
            .with_overflow_path(&path)
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{"max_resident_keys": 5000, "auto_cleanup": false, "log": {"log_transitions": false}}"#,
        )
        .unwrap();
        assert_eq!(config.max_resident_keys, 5000);
        assert!(!config.auto_cleanup);
        assert_eq!(config.write_batch_size, DEFAULT_WRITE_BATCH_SIZE);
        assert!(!config.log.log_transitions);
    }
}
