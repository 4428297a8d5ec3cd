// =============================================================================
// SnapshotRing — fixed-size ring of periodic (timestamp, payload) snapshots
// =============================================================================

use std::collections::VecDeque;

use crate::types::TimestampMs;

/// Ring of periodic snapshots. On overflow the oldest is shifted out; a
/// max-age prune additionally drops entries older than the retention bound.
#[derive(Debug, Clone)]
pub struct SnapshotRing<T> {
    snapshots: VecDeque<(TimestampMs, T)>,
    max_snapshots: usize,
    max_age_ms: i64,
}

impl<T> SnapshotRing<T> {
    pub fn new(max_snapshots: usize, max_age_ms: i64) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(max_snapshots.max(1)),
            max_snapshots: max_snapshots.max(1),
            max_age_ms,
        }
    }

    pub fn push(&mut self, payload: T, t: TimestampMs) {
        if self.snapshots.len() >= self.max_snapshots {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back((t, payload));
    }

    /// Drop snapshots older than `now - max_age`.
    pub fn prune(&mut self, now: TimestampMs) {
        let cutoff = now - self.max_age_ms;
        while matches!(self.snapshots.front(), Some((t, _)) if *t < cutoff) {
            self.snapshots.pop_front();
        }
    }

    pub fn latest(&self) -> Option<(TimestampMs, &T)> {
        self.snapshots.back().map(|(t, p)| (*t, p))
    }

    /// Snapshot whose timestamp is closest to `ref_t - t_ago_ms`.
    pub fn closest_to(&self, t_ago_ms: i64, ref_t: TimestampMs) -> Option<(TimestampMs, &T)> {
        let target = ref_t - t_ago_ms;
        self.snapshots
            .iter()
            .min_by_key(|(t, _)| (t - target).abs())
            .map(|(t, p)| (*t, p))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
