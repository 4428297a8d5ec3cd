// =============================================================================
// NumericWindow — f64 series with rolling statistics and velocity
// =============================================================================

use crate::types::TimestampMs;

use super::EventWindow;

/// Rolling numeric series. Sums here are derived metrics, not authoritative
/// state, so floating-point drift is acceptable; exact base-unit sums live
/// in `LamportWindow`.
#[derive(Debug, Clone)]
pub struct NumericWindow {
    inner: EventWindow<f64>,
}

impl NumericWindow {
    pub fn new(max_age_ms: i64, max_items: usize) -> Self {
        Self {
            inner: EventWindow::new(max_age_ms, max_items),
        }
    }

    pub fn add(&mut self, value: f64, t: TimestampMs) {
        self.inner.add(value, t);
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

    pub fn newest(&self) -> Option<(TimestampMs, f64)> {
        self.inner.newest().map(|(t, v)| (t, *v))
    }

    pub fn closest_to(&self, t_ago_ms: i64, ref_t: TimestampMs) -> Option<(TimestampMs, f64)> {
        self.inner.closest_to(t_ago_ms, ref_t).map(|(t, v)| (t, *v))
    }

    pub fn sum_in(&self, window_ms: i64, ref_t: TimestampMs) -> f64 {
        self.inner.items_in(window_ms, ref_t).sum()
    }

    pub fn avg_in(&self, window_ms: i64, ref_t: TimestampMs) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for v in self.inner.items_in(window_ms, ref_t) {
            sum += v;
            n += 1;
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    pub fn min_in(&self, window_ms: i64, ref_t: TimestampMs) -> Option<f64> {
        self.inner
            .items_in(window_ms, ref_t)
            .copied()
            .fold(None, |acc, v| match acc {
                None => Some(v),
                Some(m) => Some(m.min(v)),
            })
    }

    pub fn max_in(&self, window_ms: i64, ref_t: TimestampMs) -> Option<f64> {
        self.inner
            .items_in(window_ms, ref_t)
            .copied()
            .fold(None, |acc, v| match acc {
                None => Some(v),
                Some(m) => Some(m.max(v)),
            })
    }

    /// Population standard deviation over the window; 0 for fewer than two
    /// points.
    pub fn stddev_in(&self, window_ms: i64, ref_t: TimestampMs) -> f64 {
        let values: Vec<f64> = self.inner.items_in(window_ms, ref_t).copied().collect();
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        var.sqrt()
    }

    /// Slope of a least-squares fit of value against time (seconds,
    /// normalized to the oldest in-window point). Units: value per second.
    /// Returns 0 with fewer than two points or a degenerate time spread.
    pub fn velocity_in(&self, window_ms: i64, ref_t: TimestampMs) -> f64 {
        let entries: Vec<(TimestampMs, f64)> = self
            .inner
            .entries_in(window_ms, ref_t)
            .map(|(t, v)| (t, *v))
            .collect();
        if entries.len() < 2 {
            return 0.0;
        }

        let t0 = entries[0].0;
        let n = entries.len() as f64;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_x2 = 0.0;
        for (t, v) in &entries {
            let x = (t - t0) as f64 / 1_000.0;
            sum_x += x;
            sum_y += v;
            sum_xy += x * v;
            sum_x2 += x * x;
        }

        let denom = n * sum_x2 - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        (n * sum_xy - sum_x * sum_y) / denom
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> NumericWindow {
        let mut w = NumericWindow::new(3_600_000, 1_000);
        w.add(1.0, 1_000);
        w.add(3.0, 2_000);
        w.add(5.0, 3_000);
        w.add(7.0, 4_000);
        w
    }

    #[test]
    fn basic_stats() {
        let w = filled();
        assert_eq!(w.sum_in(10_000, 4_000), 16.0);
        assert_eq!(w.avg_in(10_000, 4_000), 4.0);
        assert_eq!(w.min_in(10_000, 4_000), Some(1.0));
        assert_eq!(w.max_in(10_000, 4_000), Some(7.0));
        // Population stddev of [1,3,5,7]: sqrt(5) ~ 2.2360
        assert!((w.stddev_in(10_000, 4_000) - 5.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn stats_respect_window_bound() {
        let w = filled();
        // Only the items at 3_000 and 4_000 are inside a 1 s window.
        assert_eq!(w.sum_in(1_000, 4_000), 12.0);
        assert_eq!(w.min_in(1_000, 4_000), Some(5.0));
    }

    #[test]
    fn empty_window_is_neutral() {
        let w = NumericWindow::new(3_600_000, 10);
        assert_eq!(w.sum_in(1_000, 0), 0.0);
        assert_eq!(w.avg_in(1_000, 0), 0.0);
        assert_eq!(w.stddev_in(1_000, 0), 0.0);
        assert_eq!(w.velocity_in(1_000, 0), 0.0);
        assert!(w.min_in(1_000, 0).is_none());
    }

    #[test]
    fn velocity_matches_known_slope() {
        // Values rise 2.0 per second exactly.
        let w = filled();
        let v = w.velocity_in(10_000, 4_000);
        assert!((v - 2.0).abs() < 1e-9, "velocity {v}");
    }

    #[test]
    fn velocity_zero_for_single_point() {
        let mut w = NumericWindow::new(3_600_000, 10);
        w.add(42.0, 1_000);
        assert_eq!(w.velocity_in(10_000, 1_000), 0.0);
    }

    #[test]
    fn velocity_zero_for_identical_timestamps() {
        let mut w = NumericWindow::new(3_600_000, 10);
        w.add(1.0, 1_000);
        w.add(9.0, 1_000);
        assert_eq!(w.velocity_in(10_000, 1_000), 0.0);
    }

    #[test]
    fn flat_series_has_zero_velocity() {
        let mut w = NumericWindow::new(3_600_000, 10);
        for i in 0..5 {
            w.add(3.5, i * 1_000);
        }
        assert!(w.velocity_in(10_000, 4_000).abs() < 1e-12);
    }
}
