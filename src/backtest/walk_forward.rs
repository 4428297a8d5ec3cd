// =============================================================================
// Walk-Forward Optimizer — windowed train/validate with median consensus
// =============================================================================
//
// Tokens are ordered chronologically by launch and split into N windows.
// Inside each window the first 75 % (by default) trains a grid search and
// the remainder validates the winning parameters out of sample. The
// consensus parameter set is the per-parameter median of the window
// winners; even window counts take the lower middle so integer grids
// resolve deterministically to the smaller value.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BotConfig;

use super::engine::{self, PerformanceMetrics, TokenTimeline};
use super::optimizer::{self, Objective, ParamRange};

/// Default share of each window used for training.
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.75;

/// One window's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    pub best_params: Vec<(String, f64)>,
    pub train_metrics: PerformanceMetrics,
    pub validation_metrics: PerformanceMetrics,
}

/// The full walk-forward outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WindowResult>,
    /// Median-vote parameter set across windows.
    pub consensus: Vec<(String, f64)>,
}

/// Run a walk-forward search over `n_windows` chronological windows.
pub async fn run(
    base_config: &BotConfig,
    timelines: &[TokenTimeline],
    ranges: &[ParamRange],
    target: &str,
    objective: Objective,
    n_windows: usize,
    train_fraction: f64,
) -> Result<WalkForwardReport> {
    if n_windows == 0 {
        bail!("walk-forward needs at least one window");
    }
    if !(0.0..1.0).contains(&train_fraction) || train_fraction <= 0.0 {
        bail!("train fraction must be in (0, 1)");
    }

    // Chronological ordering by each token's first event.
    let mut ordered: Vec<&TokenTimeline> = timelines
        .iter()
        .filter(|t| !t.events.is_empty())
        .collect();
    ordered.sort_by_key(|t| t.events[0].timestamp());
    if ordered.len() < n_windows * 2 {
        bail!(
            "{} tokens cannot fill {} windows with train and validation portions",
            ordered.len(),
            n_windows
        );
    }

    let per_window = ordered.len() / n_windows;
    let mut windows = Vec::with_capacity(n_windows);

    for w in 0..n_windows {
        let begin = w * per_window;
        let end = if w + 1 == n_windows {
            ordered.len()
        } else {
            begin + per_window
        };
        let slice = &ordered[begin..end];

        let split = ((slice.len() as f64 * train_fraction).floor() as usize)
            .clamp(1, slice.len() - 1);
        let train: Vec<TokenTimeline> = slice[..split].iter().map(|t| (*t).clone()).collect();
        let validate: Vec<TokenTimeline> = slice[split..].iter().map(|t| (*t).clone()).collect();

        info!(
            window = w,
            train = train.len(),
            validate = validate.len(),
            "walk-forward window"
        );

        let grid = optimizer::run_grid(base_config, &train, ranges, target, objective).await?;
        let best = grid
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("empty grid for window {w}"))?;

        // Score the winner out of sample.
        let mut config = base_config.clone();
        for (name, value) in &best.params {
            optimizer::apply_param(&mut config, name, *value)?;
        }
        let validation = engine::run(&config, &validate).await;

        windows.push(WindowResult {
            index: w,
            best_params: best.params,
            train_metrics: best.metrics,
            validation_metrics: validation.metrics,
        });
    }

    let consensus = consensus_params(&windows);
    Ok(WalkForwardReport { windows, consensus })
}

/// Per-parameter median of the window winners; even counts take the lower
/// middle value.
fn consensus_params(windows: &[WindowResult]) -> Vec<(String, f64)> {
    let Some(first) = windows.first() else {
        return Vec::new();
    };

    first
        .best_params
        .iter()
        .map(|(name, _)| {
            let mut votes: Vec<f64> = windows
                .iter()
                .filter_map(|w| {
                    w.best_params
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| *v)
                })
                .collect();
            votes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            // Lower median: index (n-1)/2 is exact for odd n and the
            // smaller middle for even n.
            let median = votes[(votes.len() - 1) / 2];
            (name.clone(), median)
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn window(index: usize, stop: f64, trail: f64) -> WindowResult {
        let metrics = PerformanceMetrics {
            starting_capital_sol: 10.0,
            final_capital_sol: 10.0,
            total_return_pct: 0.0,
            trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            max_drawdown_pct: 0.0,
        };
        WindowResult {
            index,
            best_params: vec![
                ("stop_loss_pct".to_string(), stop),
                ("trailing_stop_pct".to_string(), trail),
            ],
            train_metrics: metrics.clone(),
            validation_metrics: metrics,
        }
    }

    #[test]
    fn odd_window_count_takes_true_median() {
        let windows = vec![window(0, 10.0, 15.0), window(1, 30.0, 5.0), window(2, 20.0, 10.0)];
        let consensus = consensus_params(&windows);
        assert_eq!(consensus[0], ("stop_loss_pct".to_string(), 20.0));
        assert_eq!(consensus[1], ("trailing_stop_pct".to_string(), 10.0));
    }

    #[test]
    fn even_window_count_breaks_ties_low() {
        let windows = vec![window(0, 10.0, 15.0), window(1, 20.0, 5.0)];
        let consensus = consensus_params(&windows);
        // Lower middle of [10, 20] is 10; of [5, 15] is 5.
        assert_eq!(consensus[0].1, 10.0);
        assert_eq!(consensus[1].1, 5.0);
    }

    #[tokio::test]
    async fn rejects_degenerate_splits() {
        let config = BotConfig::default();
        let ranges = vec![ParamRange {
            name: "stop_loss_pct".into(),
            values: vec![10.0],
        }];
        // One token cannot fill two windows.
        let one = vec![super::super::engine::TokenTimeline { events: Vec::new() }];
        assert!(run(
            &config,
            &one,
            &ranges,
            "total_return_pct",
            Objective::Maximize,
            2,
            DEFAULT_TRAIN_FRACTION
        )
        .await
        .is_err());
    }
}
