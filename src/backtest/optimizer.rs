// =============================================================================
// Grid Optimizer — Cartesian parameter search over backtests
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BotConfig;

use super::engine::{self, PerformanceMetrics, TokenTimeline};

/// One tunable parameter and the values to sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRange {
    pub name: String,
    pub values: Vec<f64>,
}

/// Whether the target metric is maximized or minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    Maximize,
    Minimize,
}

/// One evaluated grid point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPoint {
    pub params: Vec<(String, f64)>,
    pub metrics: PerformanceMetrics,
    pub target_value: f64,
}

/// Set a named parameter on the config. Unknown names are an error so a
/// typo in a sweep fails fast instead of silently optimizing nothing.
pub fn apply_param(config: &mut BotConfig, name: &str, value: f64) -> Result<()> {
    match name {
        "stop_loss_pct" => config.position.stop_loss_pct = value,
        "trailing_stop_pct" => config.position.trailing_stop_pct = value,
        "max_position_sol" => config.risk.max_position_sol = value,
        "max_daily_loss_pct" => config.risk.max_daily_loss_pct = value,
        "min_safety_score" => config.aggregator.min_safety_score = value,
        "spike_threshold" => config.aggregator.spike_threshold = value,
        "entry_zone_low" => config.aggregator.entry_zone_low = value,
        "entry_zone_high" => config.aggregator.entry_zone_high = value,
        "decay_half_life_secs" => config.aggregator.decay_half_life_secs = value,
        "min_data_completeness" => config.aggregator.min_data_completeness = value,
        _ => bail!("unknown optimizer parameter: {name}"),
    }
    Ok(())
}

/// Read the named metric off a result.
pub fn metric_value(metrics: &PerformanceMetrics, target: &str) -> Result<f64> {
    Ok(match target {
        "total_return_pct" => metrics.total_return_pct,
        "win_rate" => metrics.win_rate,
        "profit_factor" => metrics.profit_factor,
        "max_drawdown_pct" => metrics.max_drawdown_pct,
        "final_capital_sol" => metrics.final_capital_sol,
        _ => bail!("unknown target metric: {target}"),
    })
}

/// Run a backtest for every point in the Cartesian product of `ranges`.
/// Results come back sorted best-first by the target metric.
pub async fn run_grid(
    base_config: &BotConfig,
    timelines: &[TokenTimeline],
    ranges: &[ParamRange],
    target: &str,
    objective: Objective,
) -> Result<Vec<GridPoint>> {
    if ranges.is_empty() || ranges.iter().any(|r| r.values.is_empty()) {
        bail!("optimizer needs at least one non-empty parameter range");
    }

    let total: usize = ranges.iter().map(|r| r.values.len()).product();
    info!(points = total, target, "grid search starting");

    let mut results = Vec::with_capacity(total);
    let mut indices = vec![0usize; ranges.len()];

    loop {
        // Materialise this point.
        let mut config = base_config.clone();
        let mut params = Vec::with_capacity(ranges.len());
        for (range, idx) in ranges.iter().zip(indices.iter()) {
            let value = range.values[*idx];
            apply_param(&mut config, &range.name, value)?;
            params.push((range.name.clone(), value));
        }

        let result = engine::run(&config, timelines).await;
        let target_value = metric_value(&result.metrics, target)?;
        debug!(?params, target_value, "grid point evaluated");
        results.push(GridPoint {
            params,
            metrics: result.metrics,
            target_value,
        });

        // Odometer increment.
        let mut pos = ranges.len();
        loop {
            if pos == 0 {
                break;
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < ranges[pos].values.len() {
                break;
            }
            indices[pos] = 0;
            if pos == 0 {
                // Wrapped the most significant digit: done.
                sort_results(&mut results, objective);
                info!(best = ?results.first().map(|r| r.target_value), "grid search finished");
                return Ok(results);
            }
        }
    }
}

fn sort_results(results: &mut [GridPoint], objective: Objective) {
    results.sort_by(|a, b| {
        let ord = a
            .target_value
            .partial_cmp(&b.target_value)
            .unwrap_or(std::cmp::Ordering::Equal);
        match objective {
            Objective::Maximize => ord.reverse(),
            Objective::Minimize => ord,
        }
        // Deterministic tie-break: smaller parameter vector first.
        .then_with(|| {
            a.params
                .iter()
                .map(|(_, v)| *v)
                .partial_cmp(b.params.iter().map(|(_, v)| *v))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_param_rejects_typos() {
        let mut config = BotConfig::default();
        assert!(apply_param(&mut config, "stop_loss_pct", 12.5).is_ok());
        assert_eq!(config.position.stop_loss_pct, 12.5);
        assert!(apply_param(&mut config, "sto_loss_pct", 12.5).is_err());
    }

    #[test]
    fn metric_value_covers_known_targets() {
        let metrics = PerformanceMetrics {
            starting_capital_sol: 10.0,
            final_capital_sol: 11.0,
            total_return_pct: 10.0,
            trades: 4,
            wins: 2,
            losses: 2,
            win_rate: 50.0,
            profit_factor: 1.5,
            max_drawdown_pct: 3.0,
        };
        assert_eq!(metric_value(&metrics, "total_return_pct").unwrap(), 10.0);
        assert_eq!(metric_value(&metrics, "max_drawdown_pct").unwrap(), 3.0);
        assert!(metric_value(&metrics, "sharpe").is_err());
    }

    #[tokio::test]
    async fn grid_enumerates_full_product() {
        let config = BotConfig::default();
        let ranges = vec![
            ParamRange {
                name: "stop_loss_pct".into(),
                values: vec![10.0, 20.0, 30.0],
            },
            ParamRange {
                name: "trailing_stop_pct".into(),
                values: vec![10.0, 15.0],
            },
        ];
        // Empty timelines: every point evaluates instantly to zero return.
        let results = run_grid(&config, &[], &ranges, "total_return_pct", Objective::Maximize)
            .await
            .unwrap();
        assert_eq!(results.len(), 6);
        // Determinism: equal targets tie-break by parameter values.
        let first = &results[0];
        assert_eq!(first.params[0], ("stop_loss_pct".to_string(), 10.0));
        assert_eq!(first.params[1], ("trailing_stop_pct".to_string(), 10.0));
    }

    #[tokio::test]
    async fn empty_ranges_are_rejected() {
        let config = BotConfig::default();
        assert!(
            run_grid(&config, &[], &[], "total_return_pct", Objective::Maximize)
                .await
                .is_err()
        );
    }
}
