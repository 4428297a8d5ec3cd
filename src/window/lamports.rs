// =============================================================================
// LamportWindow — exact rolling sums of base-unit amounts
// =============================================================================

use crate::types::{Lamports, TimestampMs, LAMPORTS_PER_SOL};

use super::EventWindow;

/// Rolling window of lamport amounts. Sums accumulate in u128 so they are
/// exact for any realistic volume; the float conversion happens only at the
/// display/ratio boundary.
#[derive(Debug, Clone)]
pub struct LamportWindow {
    inner: EventWindow<Lamports>,
}

impl LamportWindow {
    pub fn new(max_age_ms: i64, max_items: usize) -> Self {
        Self {
            inner: EventWindow::new(max_age_ms, max_items),
        }
    }

    pub fn add(&mut self, amount: Lamports, t: TimestampMs) {
        self.inner.add(amount, t);
    }

    pub fn cleanup(&mut self, now: TimestampMs) {
        self.inner.cleanup(now);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn count_in(&self, window_ms: i64, ref_t: TimestampMs) -> usize {
        self.inner.count_in(window_ms, ref_t)
    }

    /// Exact sum over the window.
    pub fn sum_in(&self, window_ms: i64, ref_t: TimestampMs) -> u128 {
        self.inner
            .items_in(window_ms, ref_t)
            .map(|v| *v as u128)
            .sum()
    }

    /// Window sum converted to SOL for ratio math and display.
    pub fn sum_sol_in(&self, window_ms: i64, ref_t: TimestampMs) -> f64 {
        self.sum_in(window_ms, ref_t) as f64 / LAMPORTS_PER_SOL as f64
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_are_exact() {
        let mut w = LamportWindow::new(3_600_000, 1_000);
        w.add(u64::MAX, 1_000);
        w.add(u64::MAX, 2_000);
        // Two u64::MAX values overflow u64 but not u128.
        assert_eq!(w.sum_in(10_000, 2_000), 2 * (u64::MAX as u128));
    }

    #[test]
    fn sum_respects_window() {
        let mut w = LamportWindow::new(3_600_000, 1_000);
        w.add(1_000_000_000, 0);
        w.add(2_000_000_000, 60_000);
        w.add(4_000_000_000, 120_000);
        // 90 s window at t=120s excludes the first item.
        assert_eq!(w.sum_in(90_000, 120_000), 6_000_000_000);
        assert!((w.sum_sol_in(90_000, 120_000) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn empty_sum_is_zero() {
        let w = LamportWindow::new(3_600_000, 10);
        assert_eq!(w.sum_in(1_000, 0), 0);
        assert_eq!(w.sum_sol_in(1_000, 0), 0.0);
    }
}
