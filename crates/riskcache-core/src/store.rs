//! Persistence seam for the range index.
//!
//! A [`RangeStore`] is a dumb mirror: it returns whatever it holds in any
//! order and replaces its contents wholesale on flush. Ordering and
//! disjointness are the index's concern.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::types::{AccessMode, NetworkRange, RiskRecord};

/// Store contents read at open time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Loaded {
    pub entries: Vec<(NetworkRange, RiskRecord)>,
    /// Entries whose key or value failed to decode and were skipped.
    pub corrupt: usize,
}

/// Outcome of a flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    /// Stale keys deleted because the index no longer holds them.
    pub removed: usize,
    /// Entries skipped because they could not be encoded.
    pub failed: usize,
}

/// Durable `NetworkRange -> RiskRecord` storage.
pub trait RangeStore {
    /// Mode the store was opened in.
    fn mode(&self) -> AccessMode;

    /// Every stored entry, in arbitrary order.
    fn load_all(&self) -> Result<Loaded, StoreError>;

    /// Replace the stored contents with `entries`.
    ///
    /// Returns [`StoreError::ReadOnly`] without writing when opened read-only.
    fn write_all(&mut self, entries: &[(NetworkRange, RiskRecord)]) -> Result<FlushReport, StoreError>;
}

/// In-memory store, mainly for tests.
///
/// Backed by a `HashMap`, so `load_all` yields entries in no particular order.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    mode: AccessMode,
    entries: HashMap<NetworkRange, RiskRecord>,
    flushes: usize,
}

impl MemoryStore {
    pub fn new(mode: AccessMode) -> Self {
        Self { mode, entries: HashMap::new(), flushes: 0 }
    }

    /// Store pre-populated with `entries`. Later duplicates win.
    pub fn with_entries(
        mode: AccessMode,
        entries: impl IntoIterator<Item = (NetworkRange, RiskRecord)>,
    ) -> Self {
        Self { mode, entries: entries.into_iter().collect(), flushes: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, range: &NetworkRange) -> Option<&RiskRecord> {
        self.entries.get(range)
    }

    /// Number of successful `write_all` calls.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl RangeStore for MemoryStore {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn load_all(&self) -> Result<Loaded, StoreError> {
        Ok(Loaded {
            entries: self.entries.iter().map(|(r, v)| (*r, v.clone())).collect(),
            corrupt: 0,
        })
    }

    fn write_all(&mut self, entries: &[(NetworkRange, RiskRecord)]) -> Result<FlushReport, StoreError> {
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        let before = std::mem::take(&mut self.entries);
        self.entries = entries.iter().map(|(r, v)| (*r, v.clone())).collect();
        let removed = before.keys().filter(|k| !self.entries.contains_key(k)).count();
        self.flushes += 1;
        Ok(FlushReport { written: entries.len(), removed, failed: 0 })
    }
}
