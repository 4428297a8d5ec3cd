// =============================================================================
// Rolling window storage — time-bounded containers for analyzer state
// =============================================================================
//
// Four containers, all owned by a single analyzer (single writer, no locks):
//   - EventWindow<T>   ordered timestamped sequence
//   - NumericWindow    f64 values with sum/avg/min/max/stddev/velocity
//   - LamportWindow    exact base-unit sums (u128 accumulation)
//   - SnapshotRing<T>  fixed-size ring of periodic snapshots
//
// Retention is (max_age, max_items). Cleanup runs opportunistically on
// writes (every ~30 s of event time); when max_items is hit the oldest 10 %
// are dropped in one batch.
// =============================================================================

mod lamports;
mod numeric;
mod series;
mod snapshots;

pub use lamports::LamportWindow;
pub use numeric::NumericWindow;
pub use series::EventWindow;
pub use snapshots::SnapshotRing;

/// How often opportunistic cleanup runs, in event-time milliseconds.
pub(crate) const CLEANUP_INTERVAL_MS: i64 = 30_000;
