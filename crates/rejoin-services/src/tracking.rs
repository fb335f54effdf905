//! Per stream pair byte counters.
//!
//! The receive loop records every incoming chunk; the watchdog reads and
//! resets the interval counters. A single lock covers the whole table so the
//! watchdog's read and reset happen as one step.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rejoin_core::StreamPair;

/// Counters for one (source, target) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingEntry {
    /// Bytes since the last watchdog run. Reset every interval.
    pub bytes_since_last_check: u64,
    /// Bytes since the pair was first seen. Never decreases.
    pub bytes_total: u64,
}

/// A point-in-time copy of one table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingSnapshot {
    pub pair: StreamPair,
    pub bytes_since_last_check: u64,
    pub bytes_total: u64,
}

impl TrackingSnapshot {
    fn new(pair: StreamPair, entry: &TrackingEntry) -> Self {
        Self {
            pair,
            bytes_since_last_check: entry.bytes_since_last_check,
            bytes_total: entry.bytes_total,
        }
    }
}

/// Shared tracking table. Cloning is cheap.
#[derive(Clone, Default)]
pub struct TransferTracking {
    // Ordered so watchdog output is stable between runs.
    entries: Arc<Mutex<BTreeMap<StreamPair, TrackingEntry>>>,
}

impl TransferTracking {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<StreamPair, TrackingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `bytes` to both counters of `pair`, creating the row on first use.
    /// Returns the updated counters.
    pub fn record(&self, pair: StreamPair, bytes: u64) -> TrackingEntry {
        let mut entries = self.lock();
        let entry = entries.entry(pair).or_default();
        entry.bytes_since_last_check += bytes;
        entry.bytes_total += bytes;
        *entry
    }

    /// Copy every row and zero its interval counter, atomically.
    pub fn snapshot_and_reset(&self) -> Vec<TrackingSnapshot> {
        let mut entries = self.lock();
        entries
            .iter_mut()
            .map(|(pair, entry)| {
                let snap = TrackingSnapshot::new(*pair, entry);
                entry.bytes_since_last_check = 0;
                snap
            })
            .collect()
    }

    /// Copy every row without resetting anything.
    pub fn snapshot(&self) -> Vec<TrackingSnapshot> {
        self.lock()
            .iter()
            .map(|(pair, entry)| TrackingSnapshot::new(*pair, entry))
            .collect()
    }

    pub fn get(&self, pair: &StreamPair) -> Option<TrackingEntry> {
        self.lock().get(pair).copied()
    }

    /// Drop the row for a finished pair. Returns its final counters.
    pub fn forget(&self, pair: &StreamPair) -> Option<TrackingEntry> {
        self.lock().remove(pair)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
