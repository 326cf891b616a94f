//! # Term Keyset - Bounded-Memory Key Tracking
//!
//! Duplicate-row and unique-key validations need to remember every key they have
//! seen. On files larger than memory that set cannot stay resident. This crate
//! provides [`KeyTracker`](tracker::KeyTracker), an exact set of keys with a hard
//! ceiling on how many fingerprints it holds in memory. When the ceiling is crossed
//! the tracker moves its state into a SQLite file once and serves all later traffic
//! from disk.
//!
//! ## Quick Start
//!
//! ```rust
//! use term_keyset::prelude::*;
//! use term_keyset::key;
//!
//! # fn main() -> term_keyset::error::Result<()> {
//! let mut tracker = KeyTracker::new(TrackerConfig::new(10_000))?;
//!
//! for (customer, order) in [("c1", 1_i64), ("c2", 7), ("c1", 1)] {
//!     let outcome = tracker.add_and_check(&key![customer, order])?;
//!     if outcome.was_duplicate {
//!         println!("duplicate order {customer}/{order}");
//!     }
//! }
//!
//! let stats = tracker.statistics();
//! assert_eq!(stats.total_keys, 2);
//! assert!(!stats.is_spilled);
//! tracker.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Exactness
//!
//! Keys are reduced to SHA-256 fingerprints of a length-prefixed canonical encoding.
//! Equal keys always share a fingerprint; two different keys are only conflated on a
//! hash collision.
//!
//! ## Architecture
//!
//! - **`key`**: `Key`, `KeyValue` and fingerprinting
//! - **`memory`**: the resident fingerprint set
//! - **`overflow`**: the SQLite overflow store and its file ownership
//! - **`tracker`**: the facade that owns the resident-to-spilled transition
//! - **`batch`**: key extraction from Arrow record batches
//! - **`checks`**: duplicate-row and unique-key checks
//! - **`config`**, **`logging`**, **`error`**: construction parameters, tracing setup, errors

pub mod batch;
pub mod checks;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod memory;
pub mod overflow;
pub mod prelude;
pub mod tracker;
