//! Resident membership set used until the tracker spills.

use std::collections::{HashMap, HashSet};

use crate::key::Fingerprint;

/// A fingerprint plus its optional diagnostic payload.
pub type MembershipRecord = (Fingerprint, Option<String>);

/// Set of fingerprints held in memory.
///
/// Payloads are only stored when the tracker was configured to retain them, so the
/// common case costs one fingerprint per key.
#[derive(Debug, Default)]
pub struct MemorySet {
    fingerprints: HashSet<Fingerprint>,
    payloads: HashMap<Fingerprint, String>,
}

impl MemorySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set with room for `capacity` fingerprints.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fingerprints: HashSet::with_capacity(capacity),
            payloads: HashMap::new(),
        }
    }

    /// Returns true if the fingerprint is present.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Inserts a fingerprint, returning true if it was not already present.
    pub fn insert(&mut self, fingerprint: Fingerprint, payload: Option<String>) -> bool {
        if !self.fingerprints.insert(fingerprint) {
            return false;
        }
        if let Some(payload) = payload {
            self.payloads.insert(fingerprint, payload);
        }
        true
    }

    /// Number of resident fingerprints.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// Returns true if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Iterates every record without removing it.
    pub fn records(&self) -> impl Iterator<Item = MembershipRecord> + '_ {
        self.fingerprints
            .iter()
            .map(|fp| (*fp, self.payloads.get(fp).cloned()))
    }
}
