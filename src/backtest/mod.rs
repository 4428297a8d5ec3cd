// =============================================================================
// Backtesting — deterministic replay through the live pipeline
// =============================================================================
//
// The engine replays recorded token timelines into the same analyzers,
// aggregator, risk manager and (paper) executor the live engine runs, with
// a SimClock driven by the event timestamps. Identical inputs and config
// produce byte-identical trade CSVs.
//
// On top of the engine sit a Cartesian grid optimizer and a walk-forward
// splitter with a median-vote consensus across windows.
// =============================================================================

mod engine;
mod optimizer;
mod report;
mod walk_forward;

pub use engine::{BacktestResult, PerformanceMetrics, TokenTimeline, TradeFill};
pub use optimizer::{apply_param, GridPoint, Objective, ParamRange};
pub use report::write_reports;
pub use walk_forward::{WalkForwardReport, WindowResult};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::BotConfig;

/// CLI entry: replay a timeline file and write reports.
pub async fn run_cli(mut config: BotConfig, timeline_path: &str) -> Result<()> {
    config.trading_mode = crate::types::TradingMode::Paper;

    let raw = std::fs::read_to_string(timeline_path)
        .with_context(|| format!("failed to read timeline file {timeline_path}"))?;
    let timelines: Vec<TokenTimeline> =
        serde_json::from_str(&raw).context("failed to parse timeline JSON")?;
    info!(
        tokens = timelines.len(),
        path = %timeline_path,
        "backtest starting"
    );

    let result = engine::run(&config, &timelines).await;
    info!(
        trades = result.trades.len(),
        return_pct = format!("{:.2}", result.metrics.total_return_pct),
        win_rate = format!("{:.2}", result.metrics.win_rate),
        "backtest finished"
    );

    write_reports(&config.report_dir, &result).context("failed to write reports")?;
    info!(dir = %config.report_dir, "reports written");
    Ok(())
}

/// CLI entry: walk-forward optimization over a timeline file with the
/// default exit-parameter grid.
pub async fn run_optimize_cli(mut config: BotConfig, timeline_path: &str) -> Result<()> {
    config.trading_mode = crate::types::TradingMode::Paper;

    let raw = std::fs::read_to_string(timeline_path)
        .with_context(|| format!("failed to read timeline file {timeline_path}"))?;
    let timelines: Vec<TokenTimeline> =
        serde_json::from_str(&raw).context("failed to parse timeline JSON")?;

    let ranges = vec![
        ParamRange {
            name: "stop_loss_pct".into(),
            values: vec![10.0, 15.0, 20.0, 30.0],
        },
        ParamRange {
            name: "trailing_stop_pct".into(),
            values: vec![10.0, 15.0, 20.0],
        },
    ];
    info!(
        tokens = timelines.len(),
        "walk-forward optimization starting"
    );

    let report = walk_forward::run(
        &config,
        &timelines,
        &ranges,
        "total_return_pct",
        Objective::Maximize,
        3,
        walk_forward::DEFAULT_TRAIN_FRACTION,
    )
    .await?;

    for window in &report.windows {
        info!(
            window = window.index,
            train_return = format!("{:.2}%", window.train_metrics.total_return_pct),
            validation_return = format!("{:.2}%", window.validation_metrics.total_return_pct),
            params = ?window.best_params,
            "window result"
        );
    }
    info!(consensus = ?report.consensus, "walk-forward consensus");

    std::fs::create_dir_all(&config.report_dir)?;
    let out = std::path::Path::new(&config.report_dir).join("walk_forward.json");
    std::fs::write(&out, serde_json::to_string_pretty(&report)?)?;
    info!(path = %out.display(), "walk-forward report written");
    Ok(())
}
