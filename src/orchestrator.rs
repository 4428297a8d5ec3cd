// =============================================================================
// Orchestrator — startup phases, runtime gates, graceful shutdown
// =============================================================================
//
// Startup is fail-fast, each phase a gate:
//   1. validate config          2. open the data store
//   3. register health checks   4. start the health gate
//   5. load persisted state     6. start periodic tasks
//   7. transition to Running
//
// Runtime: a critical service failure pauses entries; recovery resumes
// them. Shutdown (signal, kill switch, or stream end) runs in order: stop
// periodic tasks -> forbid new entries -> close open positions best effort
// -> persist final state -> flush signals -> Stopped.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app_state::{AppState, EngineStatus};
use crate::clock::SharedClock;
use crate::config::BotConfig;
use crate::dashboard;
use crate::event_source;
use crate::events::StreamEvent;
use crate::executor::{ExecEvent, Executor};
use crate::positions::PositionTrigger;
use crate::quote::{HttpQuoteProvider, PaperQuoteProvider, QuoteProvider};
use crate::store::{PersistedState, SignalRecord, Store};
use crate::types::{ExitReason, KillReason, SignalType, TokenId, TradingMode};

/// Why the engine is going down; maps to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    KillSwitch,
    StreamEnded,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signal => 130,
            Self::KillSwitch => 1,
            Self::StreamEnded => 0,
        }
    }
}

/// Run the live engine until shutdown; returns the process exit code.
pub async fn run(config: BotConfig, clock: SharedClock) -> Result<i32> {
    // ── Phase 1: config ──────────────────────────────────────────────────
    config.validate().context("configuration rejected")?;

    // ── Phase 2: data store ──────────────────────────────────────────────
    let store = Arc::new(
        Store::open(&config.db_path)
            .with_context(|| format!("failed to open data store at {}", config.db_path))?,
    );

    // ── Phase 3: state + health checks ──────────────────────────────────
    let state = Arc::new(AppState::new(config.clone(), clock.clone()));
    for (service, critical) in [
        ("data_store", true),
        ("event_stream", true),
        ("quote_provider", true),
        ("aggregator", false),
        ("executor", false),
    ] {
        state.health.register(service, critical);
    }

    // Executor wiring (paper provider in paper mode).
    let provider = match config.trading_mode {
        TradingMode::Paper => {
            QuoteProvider::Paper(PaperQuoteProvider::new(clock.clone(), state.liquidity.clone()))
        }
        TradingMode::Live => QuoteProvider::Http(HttpQuoteProvider::new(
            clock.clone(),
            config.quote_url.clone(),
            config.bundle_url.clone(),
            config.executor.quote_timeout_secs,
        )?),
    };
    let wallets: Vec<TokenId> = config
        .wallets
        .iter()
        .filter_map(|w| TokenId::from_hex(w))
        .collect();
    let (executor, exec_events) = Executor::new(
        clock.clone(),
        config.executor.clone(),
        config.risk.max_slippage_bps,
        provider,
        state.risk.clone(),
        state.positions.clone(),
        state.kill_switch.clone(),
        wallets,
    );
    let executor = Arc::new(executor);

    // ── Phase 4: shutdown plumbing + kill-switch callback ───────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel::<Option<ShutdownReason>>(None);
    {
        let shutdown_tx = shutdown_tx.clone();
        state.kill_switch.on_activate("initiate_shutdown", move |_reason| {
            let _ = shutdown_tx.send(Some(ShutdownReason::KillSwitch));
        });
    }
    {
        let risk = state.risk.clone();
        state.kill_switch.on_activate("pause_trading", move |_| {
            risk.set_paused(true);
        });
    }

    // ── Phase 5: persisted state ─────────────────────────────────────────
    match store.load_state() {
        Ok(Some(persisted)) => {
            if persisted.kill_switch.active {
                warn!(
                    reason = ?persisted.kill_switch.reason,
                    "previous session ended with the kill switch active"
                );
            }
            for position in persisted.open_positions {
                info!(id = %position.id, token = %position.token, "restoring open position");
                state.positions.restore(position);
            }
            state.health.report_ok("data_store");
        }
        Ok(None) => state.health.report_ok("data_store"),
        Err(e) => {
            state.health.report_failure("data_store", e.to_string());
            return Err(e).context("failed to load persisted state");
        }
    }

    // ── Phase 6: periodic tasks ──────────────────────────────────────────
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Event stream + pump.
    let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(4_096);
    {
        let url = config.stream_url.clone();
        let stats = state.stream_stats.clone();
        let shutdown_tx = shutdown_tx.clone();
        let stream_state = state.clone();
        tasks.push(tokio::spawn(async move {
            match event_source::run_event_stream(url, event_tx, stats).await {
                Ok(()) => {
                    info!("event stream ended");
                    let _ = shutdown_tx.send(Some(ShutdownReason::StreamEnded));
                }
                Err(e) => {
                    error!(error = %e, "event stream failed permanently");
                    stream_state
                        .kill_switch
                        .activate(KillReason::RpcFailure, e.to_string());
                }
            }
        }));
    }
    {
        let pump_state = state.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                pump_state.dispatch_stream(&event);
            }
        }));
    }

    // Analyzer refresh (30 s).
    {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                for token in state.tracker.tracked_ids() {
                    state.refresh_analyzers(&token);
                }
            }
        }));
    }

    // Aggregator tick (15 s): score, rank, persist signals, run entries
    // and signal-driven exits.
    {
        let state = state.clone();
        let store = store.clone();
        let executor = executor.clone();
        let interval = config.aggregator.update_interval_secs;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                run_aggregator_tick(&state, &store, &executor).await;
            }
        }));
    }

    // Position monitor (5 s).
    {
        let state = state.clone();
        let executor = executor.clone();
        let interval = config.position.monitor_interval_secs;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                run_position_tick(&state, &executor).await;
            }
        }));
    }

    // Executor event consumer: persistence + failure counters.
    {
        let state = state.clone();
        let store = store.clone();
        let mut exec_events = exec_events;
        tasks.push(tokio::spawn(async move {
            while let Some(event) = exec_events.recv().await {
                persist_exec_event(&state, &store, event);
            }
        }));
    }

    // Health gate (10 s): pause entries while a critical service is down.
    {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(10));
            let mut was_down = false;
            loop {
                ticker.tick().await;

                // Fold the analyzer error budgets into the aggregator's
                // service health.
                let worst = [
                    state.volume.budget().health(),
                    state.holders.budget().health(),
                    state.liquidity.budget().health(),
                    state.safety.budget().health(),
                ]
                .into_iter()
                .max_by_key(|h| matches!(h, crate::analyzers::AnalyzerHealth::Error) as u8);
                if matches!(worst, Some(crate::analyzers::AnalyzerHealth::Error)) {
                    state
                        .health
                        .report_failure("aggregator", "analyzer error budget exhausted");
                } else {
                    state.health.report_ok("aggregator");
                }

                let down = state.health.any_critical_down();
                if down != was_down {
                    state.risk.set_paused(down);
                    state.set_status(if down {
                        EngineStatus::Paused
                    } else {
                        EngineStatus::Running
                    });
                    was_down = down;
                }
            }
        }));
    }

    // State persistence (30 s) + token expiry (60 s).
    {
        let state = state.clone();
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut persist = tokio::time::interval(tokio::time::Duration::from_secs(30));
            let mut expiry = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = persist.tick() => {
                        if let Err(e) = persist_state(&state, &store) {
                            state.health.report_failure("data_store", e.to_string());
                        } else {
                            state.health.report_ok("data_store");
                        }
                    }
                    _ = expiry.tick() => {
                        let expired = state.expire_tokens();
                        if !expired.is_empty() {
                            info!(count = expired.len(), "expired tokens cleaned up");
                        }
                    }
                }
            }
        }));
    }

    // Dashboard.
    {
        let state = state.clone();
        let refresh = config.dashboard_refresh_secs;
        tasks.push(tokio::spawn(async move {
            dashboard::run_dashboard(state, refresh).await;
        }));
    }

    // ── Phase 7: running ─────────────────────────────────────────────────
    state.set_status(EngineStatus::Running);
    info!(mode = %config.trading_mode, "Nova engine running");

    // ── Wait for shutdown ────────────────────────────────────────────────
    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Signal,
        _ = shutdown_rx.changed() => (*shutdown_rx.borrow()).unwrap_or(ShutdownReason::KillSwitch),
    };
    warn!(reason = ?reason, "shutdown initiated");

    shutdown(&state, &store, &executor, tasks, reason).await;
    Ok(reason.exit_code())
}

// =============================================================================
// Tick bodies
// =============================================================================

/// How an entry attempt resolved, for the signal audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Success,
    Skipped,
    Failed,
}

impl EntryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Act on one tick's momentum metrics: open entries for `should_enter`
/// tokens without a position, and run signal-driven exits (migration /
/// DO_NOT_TRADE / sell). Shared verbatim by the live loop and the
/// backtest engine.
pub async fn execute_decisions(
    state: &Arc<AppState>,
    executor: &Arc<Executor>,
    metrics: &[crate::aggregator::MomentumMetrics],
) -> Vec<(TokenId, EntryOutcome)> {
    let mut outcomes = Vec::new();

    for m in metrics {
        if m.should_enter && state.positions.open_for_token(&m.token).is_empty() {
            let size = state.config.risk.max_position_sol * (m.score / 100.0);
            let outcome = match executor.execute_buy(m, size).await {
                Ok(order) => {
                    info!(order = %order.id, token = %m.token, "entry filled");
                    EntryOutcome::Success
                }
                Err(crate::error::BotError::Risk(reason)) => {
                    info!(token = %m.token, reason = %reason, "entry skipped by risk");
                    EntryOutcome::Skipped
                }
                Err(e) => {
                    state.record_error(format!("entry failed for {}: {e}", m.token));
                    EntryOutcome::Failed
                }
            };
            outcomes.push((m.token, outcome));
        }

        if m.should_exit {
            let migrated = state.tracker.is_migrated(&m.token)
                || state
                    .liquidity
                    .latest_metrics(&m.token)
                    .map(|l| l.is_complete)
                    .unwrap_or(false);
            for position in state.positions.open_for_token(&m.token) {
                if position.status != crate::types::PositionStatus::Open {
                    continue;
                }
                let trigger = PositionTrigger {
                    position_id: position.id.clone(),
                    token: m.token,
                    reason: if migrated {
                        ExitReason::Migration
                    } else {
                        ExitReason::Signal
                    },
                    sell_amount: position.current_amount,
                    level: None,
                };
                if let Err(e) = executor.execute_sell(&trigger).await {
                    state.record_error(format!("signal exit failed for {}: {e}", m.token));
                }
            }
        }
    }
    outcomes
}

/// One aggregator pass: update momentum, refresh rankings, persist
/// signals and metrics, then act on the decisions.
pub async fn run_aggregator_tick(state: &Arc<AppState>, store: &Arc<Store>, executor: &Arc<Executor>) {
    let metrics = state.aggregator.update_all();
    let events = state.rankings.update(&metrics);
    for event in &events {
        info!(event = ?event, "leaderboard change");
    }

    // Persist metrics and actionable signals; HOLD is the steady state.
    let mut signal_ids: std::collections::HashMap<TokenId, String> = std::collections::HashMap::new();
    for m in &metrics {
        if let Err(e) = store.insert_token_metric(m) {
            state.health.report_failure("data_store", e.to_string());
        }
        if m.signal != SignalType::Hold {
            let record = SignalRecord::from_metrics(m);
            signal_ids.insert(m.token, record.id.clone());
            state
                .signals_emitted
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            if let Err(e) = store.record_signal(record) {
                state.health.report_failure("data_store", e.to_string());
            }
        }
    }

    let outcomes = execute_decisions(state, executor, &metrics).await;
    for (token, outcome) in outcomes {
        if let Some(id) = signal_ids.get(&token) {
            let _ = store.mark_signal_executed(id, state.clock.now_ms(), outcome.as_str());
        }
    }
}

/// One position-monitor pass: refresh prices, fire SL/TP triggers.
pub async fn run_position_tick(state: &Arc<AppState>, executor: &Arc<Executor>) {
    let liquidity = state.liquidity.clone();
    let triggers = state
        .positions
        .tick(|token| liquidity.latest_metrics(token).map(|m| m.price_sol));
    state
        .risk
        .set_unrealized(state.positions.total_unrealized_sol());

    for trigger in triggers {
        if let Err(e) = executor.execute_sell(&trigger).await {
            state.record_error(format!(
                "exit {} failed for position {}: {e}",
                trigger.reason, trigger.position_id
            ));
        }
    }
}

fn persist_exec_event(state: &Arc<AppState>, store: &Arc<Store>, event: ExecEvent) {
    let now = state.clock.now_ms();
    let result = match &event {
        ExecEvent::OrderFilled(order) => store.insert_trade(order),
        ExecEvent::OrderFailed(order) => {
            state
                .orders_failed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            store.insert_trade(order)
        }
        ExecEvent::PositionOpened(p) | ExecEvent::PositionUpdated(p) | ExecEvent::PositionClosed(p) => {
            store.upsert_position(p, now)
        }
    };
    if let Err(e) = result {
        state.health.report_failure("data_store", e.to_string());
    } else {
        state.health.report_ok("data_store");
    }
    state.increment_version();
}

fn persist_state(state: &Arc<AppState>, store: &Arc<Store>) -> rusqlite::Result<()> {
    for token in state.tracker.tracked_ids() {
        if let Some(tracked) = state.tracker.get(&token) {
            store.upsert_token(&token, &tracked)?;
        }
    }
    store.save_state(&PersistedState {
        open_positions: state.positions.open_positions(),
        risk: state.risk.snapshot(),
        kill_switch: state.kill_switch.state(),
        saved_at: state.clock.now_ms(),
    })?;
    store.flush_signals()?;
    Ok(())
}

// =============================================================================
// Shutdown sequence
// =============================================================================

async fn shutdown(
    state: &Arc<AppState>,
    store: &Arc<Store>,
    executor: &Arc<Executor>,
    tasks: Vec<JoinHandle<()>>,
    reason: ShutdownReason,
) {
    state.set_status(EngineStatus::ShuttingDown);

    // Stop periodic work and forbid new entries.
    for task in &tasks {
        task.abort();
    }
    state.risk.set_paused(true);

    // Close open positions, best effort, one attempt each.
    let open = state.positions.open_positions();
    if !open.is_empty() {
        warn!(count = open.len(), "closing open positions before exit");
    }
    for position in open {
        let trigger = PositionTrigger {
            position_id: position.id.clone(),
            token: position.token,
            reason: ExitReason::Shutdown,
            sell_amount: position.current_amount,
            level: None,
        };
        match executor.execute_sell(&trigger).await {
            Ok(order) => info!(order = %order.id, position = %position.id, "position flattened"),
            Err(e) => error!(position = %position.id, error = %e, "failed to flatten position"),
        }
    }

    // Final persistence.
    if let Err(e) = persist_state(state, store) {
        error!(error = %e, "failed to persist final state");
    }

    state.set_status(EngineStatus::Stopped);
    info!(reason = ?reason, "Nova engine stopped");
}
