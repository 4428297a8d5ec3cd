// =============================================================================
// Nova Launch Nexus — Main Entry Point
// =============================================================================
//
// A momentum engine for an on-chain token-launch venue: analyzers score
// each tracked token in real time, signals flow through risk checks into
// the executor, and positions are managed with laddered take-profits and
// trailing stops.
//
// The engine always starts in paper mode; live trading requires the
// explicit NOVA_LIVE_TRADING=1 opt-in.
//
// Usage:
//   nova-bot [start]             run the live engine (default)
//   nova-bot backtest <file>     replay a recorded timeline file
//
// Exit codes: 0 normal, 1 startup failure or critical error, 130 signal.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod analyzers;
mod app_state;
mod backtest;
mod clock;
mod config;
mod dashboard;
mod error;
mod event_source;
mod events;
mod executor;
mod health;
mod kill_switch;
mod orchestrator;
mod positions;
mod quote;
mod rankings;
mod risk;
mod store;
mod tracker;
mod types;
mod window;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::BotConfig;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Nova Launch Nexus — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Config: defaults <- JSON file <- environment ──────────────────
    let config_path =
        std::env::var("NOVA_CONFIG").unwrap_or_else(|_| "nova_config.json".to_string());
    let mut config = BotConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "no config file — using defaults");
        BotConfig::default()
    });
    config.apply_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid");
        return 1;
    }
    info!(
        mode = %config.trading_mode,
        capital_sol = config.starting_capital_sol,
        "configuration ready"
    );

    // ── 3. Command dispatch ──────────────────────────────────────────────
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("start") => {
            let clock: clock::SharedClock = Arc::new(SystemClock);
            match orchestrator::run(config, clock).await {
                Ok(code) => code,
                Err(e) => {
                    error!(error = %e, "startup failed");
                    1
                }
            }
        }
        Some("backtest") => {
            let Some(path) = args.get(1) else {
                error!("usage: nova-bot backtest <timeline.json>");
                return 1;
            };
            match backtest::run_cli(config, path).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "backtest failed");
                    1
                }
            }
        }
        Some("optimize") => {
            let Some(path) = args.get(1) else {
                error!("usage: nova-bot optimize <timeline.json>");
                return 1;
            };
            match backtest::run_optimize_cli(config, path).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "optimization failed");
                    1
                }
            }
        }
        Some(other) => {
            error!(command = %other, "unknown command (expected: start, backtest, optimize)");
            1
        }
    }
}
