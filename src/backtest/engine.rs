// =============================================================================
// Backtest Engine — replay token timelines through the live stack
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_state::AppState;
use crate::clock::{Clock, SimClock};
use crate::config::BotConfig;
use crate::events::VenueEvent;
use crate::executor::{ExecEvent, Executor};
use crate::orchestrator::{execute_decisions, run_position_tick};
use crate::positions::{Position, PositionTrigger};
use crate::quote::{PaperQuoteProvider, QuoteProvider};
use crate::types::{
    lamports_to_sol, ExitReason, Side, TimestampMs, TokenId,
};

/// One token's recorded history, events in ascending time order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTimeline {
    pub events: Vec<VenueEvent>,
}

/// A confirmed fill extracted from the replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub timestamp: TimestampMs,
    pub token: TokenId,
    pub side: Side,
    pub sol_amount: f64,
    pub token_amount: u64,
    pub price_sol: f64,
    pub reason: Option<ExitReason>,
    pub order_id: String,
}

/// Headline performance numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub starting_capital_sol: f64,
    pub final_capital_sol: f64,
    pub total_return_pct: f64,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
}

/// Everything a replay produces.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub trades: Vec<TradeFill>,
    pub closed_positions: Vec<Position>,
    pub equity_curve: Vec<(TimestampMs, f64)>,
    pub metrics: PerformanceMetrics,
}

/// Replay `timelines` under `config`. Deterministic: same inputs and
/// config produce the same result, byte for byte.
pub async fn run(config: &BotConfig, timelines: &[TokenTimeline]) -> BacktestResult {
    // Merge and order all events; ties resolve by token id then kind so
    // interleavings never depend on input ordering.
    let mut events: Vec<&VenueEvent> = timelines.iter().flat_map(|t| t.events.iter()).collect();
    events.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.mint().cmp(&b.mint()))
            .then_with(|| a.kind().cmp(b.kind()))
    });

    let mut config = config.clone();
    config.trading_mode = crate::types::TradingMode::Paper;

    let start = events.first().map(|e| e.timestamp()).unwrap_or(0);
    let clock = SimClock::new(start);
    let state = Arc::new(AppState::new(config.clone(), clock.clone()));

    let provider =
        QuoteProvider::Paper(PaperQuoteProvider::new(clock.clone(), state.liquidity.clone()));
    let (executor, mut exec_events) = Executor::new(
        clock.clone(),
        config.executor.clone(),
        config.risk.max_slippage_bps,
        provider,
        state.risk.clone(),
        state.positions.clone(),
        state.kill_switch.clone(),
        Vec::new(),
    );
    let executor = Arc::new(executor);

    let refresh_ms: i64 = 30_000;
    let aggregator_ms = config.aggregator.update_interval_secs as i64 * 1_000;
    let monitor_ms = config.position.monitor_interval_secs as i64 * 1_000;
    let mut next_refresh = start + refresh_ms;
    let mut next_aggregator = start + aggregator_ms;
    let mut next_monitor = start + monitor_ms;

    let mut equity_curve: Vec<(TimestampMs, f64)> = Vec::new();

    for event in events {
        let ev_t = event.timestamp();

        // Run every due tick before the event, in deterministic order.
        loop {
            let next = next_refresh.min(next_aggregator).min(next_monitor);
            if next > ev_t {
                break;
            }
            clock.set(next);
            if next_refresh == next {
                for token in state.tracker.tracked_ids() {
                    state.refresh_analyzers(&token);
                }
                next_refresh += refresh_ms;
            } else if next_aggregator == next {
                let metrics = state.aggregator.update_all();
                state.rankings.update(&metrics);
                execute_decisions(&state, &executor, &metrics).await;
                let equity = state.risk.total_capital_sol() + state.positions.total_unrealized_sol();
                equity_curve.push((next, equity));
                next_aggregator += aggregator_ms;
            } else {
                run_position_tick(&state, &executor).await;
                next_monitor += monitor_ms;
            }
        }

        clock.set(ev_t);
        state.dispatch(event);
    }

    // Final pass at the end of the timeline, then flatten.
    let end = clock.now_ms();
    for token in state.tracker.tracked_ids() {
        state.refresh_analyzers(&token);
    }
    run_position_tick(&state, &executor).await;
    for position in state.positions.open_positions() {
        let trigger = PositionTrigger {
            position_id: position.id.clone(),
            token: position.token,
            reason: ExitReason::Shutdown,
            sell_amount: position.current_amount,
            level: None,
        };
        if let Err(e) = executor.execute_sell(&trigger).await {
            debug!(position = %position.id, error = %e, "end-of-replay flatten failed");
        }
    }
    let final_equity = state.risk.total_capital_sol() + state.positions.total_unrealized_sol();
    equity_curve.push((end, final_equity));

    // Collect fills and closures from the executor's event stream.
    let mut trades = Vec::new();
    let mut closed_positions = Vec::new();
    while let Ok(event) = exec_events.try_recv() {
        match event {
            ExecEvent::OrderFilled(order) => {
                let (sol_amount, token_amount) = match order.side {
                    Side::Buy => (
                        lamports_to_sol(order.amount_in),
                        order.actual_out.unwrap_or(0),
                    ),
                    Side::Sell => (
                        lamports_to_sol(order.actual_out.unwrap_or(0)),
                        order.amount_in,
                    ),
                };
                let price_sol = if token_amount > 0 {
                    sol_amount / (token_amount as f64 / 1_000_000.0)
                } else {
                    0.0
                };
                trades.push(TradeFill {
                    timestamp: order.confirmed_at.unwrap_or(order.created_at),
                    token: order.token,
                    side: order.side,
                    sol_amount,
                    token_amount,
                    price_sol,
                    reason: order.exit_reason,
                    order_id: order.id,
                });
            }
            ExecEvent::PositionClosed(position) => closed_positions.push(position),
            _ => {}
        }
    }

    let metrics = compute_metrics(
        config.starting_capital_sol,
        final_equity,
        &trades,
        &closed_positions,
        &equity_curve,
    );

    BacktestResult {
        trades,
        closed_positions,
        equity_curve,
        metrics,
    }
}

fn compute_metrics(
    starting_capital: f64,
    final_capital: f64,
    trades: &[TradeFill],
    closed: &[Position],
    equity_curve: &[(TimestampMs, f64)],
) -> PerformanceMetrics {
    let wins = closed
        .iter()
        .filter(|p| p.total_pnl_sol.unwrap_or(0.0) >= 0.0)
        .count();
    let losses = closed.len() - wins;

    let gross_profit: f64 = closed
        .iter()
        .filter_map(|p| p.total_pnl_sol)
        .filter(|p| *p > 0.0)
        .sum();
    let gross_loss: f64 = closed
        .iter()
        .filter_map(|p| p.total_pnl_sol)
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let mut peak = f64::MIN;
    let mut max_drawdown = 0.0_f64;
    for (_, equity) in equity_curve {
        peak = peak.max(*equity);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - equity) / peak * 100.0);
        }
    }

    PerformanceMetrics {
        starting_capital_sol: starting_capital,
        final_capital_sol: final_capital,
        total_return_pct: if starting_capital > 0.0 {
            (final_capital - starting_capital) / starting_capital * 100.0
        } else {
            0.0
        },
        trades: trades.len(),
        wins,
        losses,
        win_rate: if !closed.is_empty() {
            wins as f64 / closed.len() as f64 * 100.0
        } else {
            0.0
        },
        profit_factor,
        max_drawdown_pct: max_drawdown,
    }
}
