//! # Exhaustion Tracker
//!
//! Remembers which sources are known to be depleted for a service kind.
//! Entries are only ever added during a run: once a source is marked for a
//! kind, the allocator never asks the coordinator about that pair again.
//!
//! Backed by a sharded `DashSet`, so concurrent scans insert and read
//! without a global lock. A read racing an insert on the same pair may
//! miss it; the cost is one redundant availability check.

use dashmap::DashSet;

use crate::models::ServiceKind;

/// Concurrent, grow-only set of `(kind, location key)` pairs known to be depleted.
#[derive(Debug, Default)]
pub struct ExhaustionTracker {
    exhausted: DashSet<(ServiceKind, String)>,
}

impl ExhaustionTracker {
    /// Creates an empty tracker, one per run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `location_key` as depleted for `kind`.
    ///
    /// Idempotent. Returns `true` only for the call that inserted the pair.
    pub fn mark_exhausted(&self, kind: ServiceKind, location_key: &str) -> bool {
        let inserted = self.exhausted.insert((kind, location_key.to_string()));
        if inserted {
            log::debug!("Marked {} exhausted for {}", location_key, kind);
        }
        inserted
    }

    /// Whether `location_key` is known to be depleted for `kind`.
    pub fn is_exhausted(&self, kind: ServiceKind, location_key: &str) -> bool {
        self.exhausted.contains(&(kind, location_key.to_string()))
    }

    /// Total number of exhausted pairs across all kinds.
    pub fn len(&self) -> usize {
        self.exhausted.len()
    }

    /// Whether nothing has been marked yet.
    pub fn is_empty(&self) -> bool {
        self.exhausted.is_empty()
    }

    /// Location keys currently marked for `kind`, sorted for stable output.
    pub fn exhausted_for(&self, kind: ServiceKind) -> Vec<String> {
        let mut keys: Vec<String> = self
            .exhausted
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }
}
