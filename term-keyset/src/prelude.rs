//! Prelude for commonly used types in term-keyset.

pub use crate::checks::{CheckStatus, KeyCheck, KeyCheckKind, KeyCheckResult};
pub use crate::config::TrackerConfig;
pub use crate::error::{KeysetError, Result};
pub use crate::key::{Fingerprint, Key, KeyValue};
pub use crate::logging::LogConfig;
pub use crate::tracker::{CheckOutcome, KeyTracker, TrackerMode, TrackerStats};
