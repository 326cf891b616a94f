//! SQLite-backed overflow store used once the tracker has spilled.
//!
//! The store is a single database file with one table, `seen_keys`, whose primary key
//! is the fingerprint. Inserts are buffered and written in grouped transactions; the
//! buffer is consulted on every lookup so a buffered fingerprint is already "seen".
//!
//! The database runs in WAL mode with `synchronous = NORMAL`. A crash can lose the
//! last few committed batches, which is acceptable because a crashed validation run
//! is re-executed from scratch.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::{KeysetError, Result};
use crate::key::Fingerprint;
use crate::logging::LogConfig;
use crate::memory::MembershipRecord;

const DATABASE_FILE: &str = "overflow.db";
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

const LOOKUP_SQL: &str = "SELECT 1 FROM seen_keys WHERE fingerprint = ?1";
const INSERT_SQL: &str = "INSERT OR IGNORE INTO seen_keys (fingerprint, payload) VALUES (?1, ?2)";
const PAYLOAD_SQL: &str = "SELECT payload FROM seen_keys WHERE fingerprint = ?1";

/// Who owns the overflow store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Created by the tracker inside a private temporary directory.
    Owned { dir: PathBuf },
    /// Supplied by the caller; never deleted by the tracker.
    CallerSupplied,
}

/// The overflow store's file path together with its ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowLocation {
    path: PathBuf,
    ownership: Ownership,
}

impl OverflowLocation {
    /// A location chosen by the caller.
    pub fn caller_supplied(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ownership: Ownership::CallerSupplied,
        }
    }

    /// Allocates a private temporary directory and places the store inside it.
    pub fn private_temp() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("term-keyset-")
            .tempdir()?
            .keep();
        Ok(Self {
            path: dir.join(DATABASE_FILE),
            ownership: Ownership::Owned { dir },
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the tracker created this location.
    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned { .. })
    }

    /// Database file plus the sidecar files SQLite may create next to it.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.path.clone()];
        for suffix in SIDECAR_SUFFIXES {
            let mut name = self.path.as_os_str().to_owned();
            name.push(suffix);
            files.push(PathBuf::from(name));
        }
        files
    }

    /// Deletes the store files and private directory. Caller-supplied paths are left alone.
    pub fn remove(&self) -> Result<()> {
        let Ownership::Owned { dir } = &self.ownership else {
            return Ok(());
        };
        for file in self.files() {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Disk-backed fingerprint index.
pub struct OverflowStore {
    conn: Connection,
    location: OverflowLocation,
    pending: Vec<MembershipRecord>,
    pending_set: HashSet<Fingerprint>,
    batch_size: usize,
    stored: usize,
    log: LogConfig,
}

impl std::fmt::Debug for OverflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverflowStore")
            .field("location", &self.location)
            .field("pending", &self.pending.len())
            .field("stored", &self.stored)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[allow(clippy::len_without_is_empty)]
impl OverflowStore {
    /// Opens the store at `location`, replacing any `seen_keys` table left there.
    pub fn open(location: OverflowLocation, batch_size: usize, log: LogConfig) -> Result<Self> {
        let conn = Connection::open(location.path())
            .map_err(|e| KeysetError::storage("open overflow store", e))?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| KeysetError::storage("enable WAL journal", e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode = %mode, "Overflow store is not running in WAL mode");
        }

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             DROP TABLE IF EXISTS seen_keys;
             CREATE TABLE seen_keys (
                 fingerprint BLOB PRIMARY KEY NOT NULL,
                 payload TEXT
             ) WITHOUT ROWID;",
        )
        .map_err(|e| KeysetError::storage("create overflow schema", e))?;

        Ok(Self {
            conn,
            location,
            pending: Vec::with_capacity(batch_size),
            pending_set: HashSet::with_capacity(batch_size),
            batch_size,
            stored: 0,
            log,
        })
    }

    /// Where the store lives.
    pub fn location(&self) -> &OverflowLocation {
        &self.location
    }

    /// Records written plus records still buffered.
    pub fn len(&self) -> usize {
        self.stored + self.pending.len()
    }

    /// Returns true if the fingerprint is buffered or stored.
    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        if self.pending_set.contains(fingerprint) {
            return Ok(true);
        }
        let mut stmt = self
            .conn
            .prepare_cached(LOOKUP_SQL)
            .map_err(|e| KeysetError::storage("prepare lookup", e))?;
        stmt.exists([&fingerprint.as_bytes()[..]])
            .map_err(|e| KeysetError::storage("lookup fingerprint", e))
    }

    /// Inserts the fingerprint unless present. Returns true if it was added.
    pub fn insert_if_absent(
        &mut self,
        fingerprint: Fingerprint,
        payload: Option<String>,
    ) -> Result<bool> {
        if self.contains(&fingerprint)? {
            return Ok(false);
        }
        self.buffer(fingerprint, payload)?;
        Ok(true)
    }

    /// Loads records known to be distinct, such as a drained resident set.
    pub fn bulk_load(&mut self, records: impl IntoIterator<Item = MembershipRecord>) -> Result<usize> {
        let mut loaded = 0;
        for (fingerprint, payload) in records {
            self.buffer(fingerprint, payload)?;
            loaded += 1;
        }
        self.flush()?;
        Ok(loaded)
    }

    fn buffer(&mut self, fingerprint: Fingerprint, payload: Option<String>) -> Result<()> {
        if self.pending_set.insert(fingerprint) {
            self.pending.push((fingerprint, payload));
        }
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes buffered records in one transaction.
    ///
    /// On failure the transaction rolls back and the buffer is kept intact.
    pub fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();

        let tx = self
            .conn
            .transaction()
            .map_err(|e| KeysetError::storage("begin batch", e))?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare_cached(INSERT_SQL)
                .map_err(|e| KeysetError::storage("prepare batch insert", e))?;
            for (fingerprint, payload) in &self.pending {
                inserted += stmt
                    .execute(params![&fingerprint.as_bytes()[..], payload])
                    .map_err(|e| KeysetError::storage("insert batch", e))?;
            }
        }
        tx.commit()
            .map_err(|e| KeysetError::storage("commit batch", e))?;

        let batch = self.pending.len();
        self.pending.clear();
        self.pending_set.clear();
        self.stored += inserted;

        crate::log_storage_op!(
            self.log,
            batch,
            inserted,
            stored = self.stored,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Flushed overflow batch"
        );
        Ok(inserted)
    }

    /// Diagnostic payload recorded for a fingerprint, if any.
    pub fn payload(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        if let Some((_, payload)) = self.pending.iter().find(|(fp, _)| fp == fingerprint) {
            return Ok(payload.clone());
        }
        let payload: Option<Option<String>> = self
            .conn
            .query_row(PAYLOAD_SQL, [&fingerprint.as_bytes()[..]], |row| row.get(0))
            .optional()
            .map_err(|e| KeysetError::storage("read payload", e))?;
        Ok(payload.flatten())
    }

    /// Flushes, closes the connection and, for owned locations with `remove_files`,
    /// deletes the store files.
    ///
    /// Files are removed even when the final flush fails; the flush error is returned.
    pub fn close(mut self, remove_files: bool) -> Result<()> {
        let flushed = self.flush();

        let OverflowStore { conn, location, .. } = self;
        let closed = conn
            .close()
            .map_err(|(_, e)| KeysetError::storage("close overflow store", e));

        let removed = if remove_files {
            location.remove()
        } else {
            Ok(())
        };

        flushed?;
        closed?;
        removed
    }

    /// Drops the store without flushing and removes owned files.
    pub fn discard(self) {
        let OverflowStore { conn, location, .. } = self;
        drop(conn);
        if let Err(e) = location.remove() {
            warn!(path = %location.path().display(), error = %e, "Failed to remove overflow store");
        }
    }
}
