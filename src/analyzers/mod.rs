// =============================================================================
// Analyzers — per-token streaming metric computation
// =============================================================================
//
// Four analyzers consume venue events and maintain per-token rolling state:
//   volume, holders, liquidity, safety.
//
// Analyzers never fail the pipeline: an internal error is logged, counted
// against the error budget, and the affected metric goes stale. Ten
// consecutive errors demote an analyzer to Error health until a success
// clears the streak.
//
// Every analyzer exposes the same accessor contract:
//   latest_metrics(&TokenId) -> Option<…Metrics>
// =============================================================================

pub mod holders;
pub mod liquidity;
pub mod safety;
pub mod volume;

pub use holders::{HolderAnalyzer, HolderMetrics};
pub use liquidity::{LiquidityAnalyzer, LiquidityMetrics};
pub use safety::{SafetyAnalyzer, SafetyMetrics};
pub use volume::{VolumeAnalyzer, VolumeMetrics};

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Consecutive errors before an analyzer is demoted to Error health.
const ERROR_BUDGET: u32 = 10;

/// Milliseconds after which a metric snapshot counts as stale.
pub const STALE_AFTER_MS: i64 = 120_000;

/// Health of a single analyzer as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerHealth {
    Healthy,
    Degraded,
    Error,
}

impl std::fmt::Display for AnalyzerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Error-budget tracker shared by all analyzers. Errors accumulate until a
/// success intervenes.
#[derive(Debug, Default)]
pub struct ErrorBudget {
    consecutive_errors: AtomicU32,
}

impl ErrorBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    pub fn record_error(&self, analyzer: &str, error: &str) {
        let n = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(analyzer, error, consecutive = n, "analyzer error");
    }

    pub fn health(&self) -> AnalyzerHealth {
        let n = self.consecutive_errors.load(Ordering::Relaxed);
        if n >= ERROR_BUDGET {
            AnalyzerHealth::Error
        } else if n > 0 {
            AnalyzerHealth::Degraded
        } else {
            AnalyzerHealth::Healthy
        }
    }
}

/// Direction of a slow-moving series (holders, liquidity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Growing,
    Stable,
    Shrinking,
}

impl Default for Trend {
    fn default() -> Self {
        Self::Stable
    }
}

/// Direction of volume flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeTrend {
    Accelerating,
    Stable,
    Decelerating,
}

impl Default for VolumeTrend {
    fn default() -> Self {
        Self::Stable
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_budget_demotes_after_ten() {
        let budget = ErrorBudget::new();
        assert_eq!(budget.health(), AnalyzerHealth::Healthy);

        for _ in 0..9 {
            budget.record_error("volume", "boom");
        }
        assert_eq!(budget.health(), AnalyzerHealth::Degraded);

        budget.record_error("volume", "boom");
        assert_eq!(budget.health(), AnalyzerHealth::Error);
    }

    #[test]
    fn success_clears_the_streak() {
        let budget = ErrorBudget::new();
        for _ in 0..12 {
            budget.record_error("holders", "boom");
        }
        assert_eq!(budget.health(), AnalyzerHealth::Error);
        budget.record_success();
        assert_eq!(budget.health(), AnalyzerHealth::Healthy);
    }
}
