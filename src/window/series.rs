// =============================================================================
// EventWindow — append-only timestamped sequence with bounded retention
// =============================================================================

use std::collections::VecDeque;

use crate::types::TimestampMs;

use super::CLEANUP_INTERVAL_MS;

/// Ordered sequence of `T` over time. Append-only; queries are relative to
/// a caller-supplied reference time so replay and live share the same code.
#[derive(Debug, Clone)]
pub struct EventWindow<T> {
    items: VecDeque<(TimestampMs, T)>,
    max_age_ms: i64,
    max_items: usize,
    last_cleanup_ms: TimestampMs,
}

impl<T> EventWindow<T> {
    pub fn new(max_age_ms: i64, max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_age_ms,
            max_items: max_items.max(1),
            last_cleanup_ms: 0,
        }
    }

    /// Append an item at time `t`.
    ///
    /// When the item cap is reached the oldest 10 % are evicted in one
    /// batch so writes stay amortised O(1). Age-based cleanup also runs
    /// opportunistically at most every ~30 s of event time.
    pub fn add(&mut self, item: T, t: TimestampMs) {
        if self.items.len() >= self.max_items {
            let drop = (self.max_items / 10).max(1).min(self.items.len());
            self.items.drain(..drop);
            tracing::debug!(dropped = drop, cap = self.max_items, "window overflow eviction");
        }
        self.items.push_back((t, item));

        if t - self.last_cleanup_ms >= CLEANUP_INTERVAL_MS {
            self.cleanup(t);
        }
    }

    /// Drop items older than `now - max_age`.
    pub fn cleanup(&mut self, now: TimestampMs) {
        let cutoff = now - self.max_age_ms;
        while matches!(self.items.front(), Some((t, _)) if *t < cutoff) {
            self.items.pop_front();
        }
        self.last_cleanup_ms = now;
    }

    /// Items with `timestamp >= ref_t - window_ms`, oldest first.
    pub fn items_in(&self, window_ms: i64, ref_t: TimestampMs) -> impl Iterator<Item = &T> {
        let cutoff = ref_t - window_ms;
        self.items
            .iter()
            .filter(move |(t, _)| *t >= cutoff)
            .map(|(_, item)| item)
    }

    /// Timestamped variant of [`items_in`].
    pub fn entries_in(
        &self,
        window_ms: i64,
        ref_t: TimestampMs,
    ) -> impl Iterator<Item = (TimestampMs, &T)> {
        let cutoff = ref_t - window_ms;
        self.items
            .iter()
            .filter(move |(t, _)| *t >= cutoff)
            .map(|(t, item)| (*t, item))
    }

    pub fn count_in(&self, window_ms: i64, ref_t: TimestampMs) -> usize {
        self.items_in(window_ms, ref_t).count()
    }

    pub fn oldest(&self) -> Option<(TimestampMs, &T)> {
        self.items.front().map(|(t, item)| (*t, item))
    }

    pub fn newest(&self) -> Option<(TimestampMs, &T)> {
        self.items.back().map(|(t, item)| (*t, item))
    }

    /// Item whose timestamp is closest to `ref_t - t_ago_ms`.
    pub fn closest_to(&self, t_ago_ms: i64, ref_t: TimestampMs) -> Option<(TimestampMs, &T)> {
        let target = ref_t - t_ago_ms;
        self.items
            .iter()
            .min_by_key(|(t, _)| (t - target).abs())
            .map(|(t, item)| (*t, item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_queries_are_time_bounded() {
        let mut w: EventWindow<u32> = EventWindow::new(3_600_000, 100);
        w.add(1, 1_000);
        w.add(2, 5_000);
        w.add(3, 9_000);

        let recent: Vec<_> = w.items_in(5_000, 9_000).copied().collect();
        assert_eq!(recent, vec![2, 3]); // cutoff at 4_000
        assert_eq!(w.count_in(100, 9_000), 1);
        assert_eq!(w.oldest().unwrap().0, 1_000);
        assert_eq!(w.newest().unwrap().0, 9_000);
    }

    #[test]
    fn closest_to_picks_nearest_timestamp() {
        let mut w: EventWindow<&str> = EventWindow::new(3_600_000, 100);
        w.add("a", 1_000);
        w.add("b", 5_000);
        w.add("c", 9_000);

        // target = 10_000 - 4_500 = 5_500 -> "b"
        let (t, item) = w.closest_to(4_500, 10_000).unwrap();
        assert_eq!(t, 5_000);
        assert_eq!(*item, "b");
    }

    #[test]
    fn max_items_never_exceeded() {
        let mut w: EventWindow<usize> = EventWindow::new(i64::MAX / 2, 50);
        for i in 0..500 {
            w.add(i, i as i64);
            assert!(w.len() <= 50, "len {} exceeded cap after {} adds", w.len(), i);
        }
    }

    #[test]
    fn overflow_drops_oldest_tenth() {
        let mut w: EventWindow<usize> = EventWindow::new(i64::MAX / 2, 10);
        for i in 0..10 {
            w.add(i, i as i64);
        }
        assert_eq!(w.len(), 10);
        w.add(10, 10);
        // 10 % of 10 = 1 dropped, then one appended.
        assert_eq!(w.len(), 10);
        assert_eq!(w.oldest().unwrap().0, 1);
    }

    #[test]
    fn cleanup_enforces_max_age() {
        let mut w: EventWindow<u8> = EventWindow::new(10_000, 100);
        w.add(1, 0);
        w.add(2, 4_000);
        w.add(3, 12_000);
        w.cleanup(15_000);
        // cutoff = 5_000: items at 0 and 4_000 gone.
        assert_eq!(w.len(), 1);
        assert!(w.oldest().unwrap().0 >= 5_000);
    }

    #[test]
    fn opportunistic_cleanup_on_add() {
        let mut w: EventWindow<u8> = EventWindow::new(5_000, 100);
        w.add(1, 0);
        // 40 s later: the add itself triggers cleanup of the stale item.
        w.add(2, 40_000);
        assert_eq!(w.len(), 1);
    }
}
