// =============================================================================
// Central Application State — Nova Launch Nexus
// =============================================================================
//
// The single source of truth for the engine. Subsystems manage their own
// interior mutability; AppState ties them together, fans venue events out
// to the analyzers, and provides the dashboard snapshot inputs.
//
// Event dispatch lives here so the live loop and the backtest replay drive
// exactly the same code path.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::aggregator::MomentumAggregator;
use crate::analyzers::{HolderAnalyzer, LiquidityAnalyzer, SafetyAnalyzer, VolumeAnalyzer};
use crate::clock::SharedClock;
use crate::config::BotConfig;
use crate::event_source::StreamStats;
use crate::events::{StreamEvent, VenueEvent};
use crate::health::HealthMonitor;
use crate::kill_switch::KillSwitch;
use crate::positions::PositionManager;
use crate::rankings::Rankings;
use crate::risk::RiskManager;
use crate::tracker::TokenTracker;
use crate::types::TokenId;

/// Maximum number of recent errors retained for the dashboard.
const MAX_RECENT_ERRORS: usize = 50;

/// Engine lifecycle as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineStatus {
    Starting,
    Running,
    Paused,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: String,
}

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    pub config: BotConfig,
    pub clock: SharedClock,

    // ── Token pipeline ──────────────────────────────────────────────────
    pub tracker: Arc<TokenTracker>,
    pub volume: Arc<VolumeAnalyzer>,
    pub holders: Arc<HolderAnalyzer>,
    pub liquidity: Arc<LiquidityAnalyzer>,
    pub safety: Arc<SafetyAnalyzer>,
    pub aggregator: Arc<MomentumAggregator>,
    pub rankings: Arc<Rankings>,

    // ── Trading ─────────────────────────────────────────────────────────
    pub kill_switch: Arc<KillSwitch>,
    pub risk: Arc<RiskManager>,
    pub positions: Arc<PositionManager>,

    // ── Operational ─────────────────────────────────────────────────────
    pub health: Arc<HealthMonitor>,
    pub stream_stats: Arc<StreamStats>,
    pub status: RwLock<EngineStatus>,
    pub state_version: AtomicU64,
    pub signals_emitted: AtomicU64,
    pub orders_failed: AtomicU64,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub started_at_ms: i64,
}

impl AppState {
    /// Wire up every subsystem from the given config and clock.
    pub fn new(config: BotConfig, clock: SharedClock) -> Self {
        let tracker = Arc::new(TokenTracker::new());
        let volume = Arc::new(VolumeAnalyzer::new(
            clock.clone(),
            config.aggregator.spike_threshold,
        ));
        let holders = Arc::new(HolderAnalyzer::new(clock.clone()));
        let liquidity = Arc::new(LiquidityAnalyzer::new(
            clock.clone(),
            config.venue.graduation_threshold_sol,
            config.venue.max_acceptable_slippage_pct,
            config.executor.market_move_buffer_pct,
        ));
        let safety = Arc::new(SafetyAnalyzer::new(
            clock.clone(),
            config.safety_weights.clone(),
        ));
        let aggregator = Arc::new(MomentumAggregator::new(
            clock.clone(),
            config.aggregator.clone(),
            volume.clone(),
            holders.clone(),
            liquidity.clone(),
            safety.clone(),
            tracker.clone(),
        ));
        let rankings = Arc::new(Rankings::new(config.top_n));
        let kill_switch = Arc::new(KillSwitch::new(clock.clone()));
        let risk = Arc::new(RiskManager::new(
            clock.clone(),
            config.risk.clone(),
            kill_switch.clone(),
            config.starting_capital_sol,
        ));
        let positions = Arc::new(PositionManager::new(clock.clone(), config.position.clone()));
        let health = Arc::new(HealthMonitor::new(clock.clone()));
        let started_at_ms = clock.now_ms();

        Self {
            config,
            clock,
            tracker,
            volume,
            holders,
            liquidity,
            safety,
            aggregator,
            rankings,
            kill_switch,
            risk,
            positions,
            health,
            stream_stats: Arc::new(StreamStats::default()),
            status: RwLock::new(EngineStatus::Starting),
            state_version: AtomicU64::new(1),
            signals_emitted: AtomicU64::new(0),
            orders_failed: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
            started_at_ms,
        }
    }

    pub fn increment_version(&self) {
        self.state_version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.write() = status;
        self.increment_version();
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.read()
    }

    pub fn uptime_secs(&self) -> i64 {
        (self.clock.now_ms() - self.started_at_ms) / 1_000
    }

    /// Append to the bounded error ring.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "engine error recorded");
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        });
        if errors.len() > MAX_RECENT_ERRORS {
            let drop = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..drop);
        }
        self.increment_version();
    }

    // -------------------------------------------------------------------------
    // Event fan-out
    // -------------------------------------------------------------------------

    /// Route one venue event through the tracker and the analyzer chain.
    /// Events for a single token arrive serially, so per-token analyzer
    /// state needs no cross-event coordination.
    pub fn dispatch(&self, event: &VenueEvent) {
        match event {
            VenueEvent::TokenLaunched(ev) => {
                self.tracker.on_launch(
                    ev.mint,
                    ev.creator,
                    ev.name.clone(),
                    ev.symbol.clone(),
                    ev.timestamp,
                );
                self.holders.on_launch(ev.mint, ev.creator);
                self.safety.on_launch(ev);
            }
            VenueEvent::BondingProgress(ev) => {
                self.tracker.touch(&ev.mint, ev.timestamp);
                self.liquidity.on_progress(ev);
            }
            VenueEvent::TokenTrade(ev) => {
                self.tracker.touch(&ev.mint, ev.timestamp);
                self.volume.on_trade(ev);
                self.holders.on_trade(ev);
                self.safety.on_trade(ev);
            }
            VenueEvent::TokenMigration(ev) => {
                self.tracker.on_migration(&ev.mint, ev.timestamp);
                self.liquidity.on_migration(&ev.mint);
            }
        }
        self.increment_version();
    }

    /// Route a stream-level event (lifecycle goes to health/error logs).
    pub fn dispatch_stream(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Venue(ev) => self.dispatch(ev),
            StreamEvent::Connected { attempt } => {
                tracing::info!(attempt, "event stream connected");
                self.health.report_ok("event_stream");
            }
            StreamEvent::Disconnected {
                reason,
                will_reconnect,
            } => {
                self.health.report_failure("event_stream", reason.clone());
                if !will_reconnect {
                    self.record_error(format!("event stream gone: {reason}"));
                }
            }
            StreamEvent::Error { message } => {
                self.record_error(format!("stream error: {message}"));
            }
        }
    }

    /// Refresh every analyzer snapshot for `token` (30 s cadence live, and
    /// between replayed batches in a backtest).
    pub fn refresh_analyzers(&self, token: &TokenId) {
        self.volume.update(token);
        self.holders.update(token);
        self.liquidity.update(token);
        self.safety.update(token);
    }

    /// Expire stale tokens from the tracker and clean every per-token
    /// structure in lockstep.
    pub fn expire_tokens(&self) -> Vec<TokenId> {
        let expired = self.tracker.expire(self.clock.now_ms());
        for token in &expired {
            self.volume.remove_token(token);
            self.holders.remove_token(token);
            self.liquidity.remove_token(token);
            self.safety.remove_token(token);
            self.aggregator.remove_token(token);
            self.rankings.remove_token(token);
        }
        expired
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("status", &self.status())
            .field("tracked", &self.tracker.len())
            .field("open_positions", &self.positions.open_len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::events::{TokenLaunched, TokenMigration, TokenTrade};
    use crate::types::Side;

    fn state() -> (AppState, Arc<SimClock>) {
        let clock = SimClock::new(0);
        (AppState::new(BotConfig::default(), clock.clone()), clock)
    }

    fn launch(mint: u8, t: i64) -> VenueEvent {
        VenueEvent::TokenLaunched(TokenLaunched {
            mint: TokenId([mint; 32]),
            curve: TokenId([0xCC; 32]),
            name: Some("Nova".into()),
            symbol: Some("NOVA".into()),
            uri: None,
            creator: TokenId([9; 32]),
            signature: String::new(),
            timestamp: t,
            slot: 0,
        })
    }

    #[test]
    fn dispatch_fans_out_to_all_analyzers() {
        let (state, clock) = state();
        let mint = TokenId([1; 32]);
        state.dispatch(&launch(1, 1_000));
        assert!(state.tracker.is_tracked(&mint));

        state.dispatch(&VenueEvent::TokenTrade(TokenTrade {
            mint,
            curve: TokenId([0xCC; 32]),
            side: Side::Buy,
            trader: TokenId([3; 32]),
            sol_amount: 500_000_000,
            token_amount: 1_000_000,
            signature: String::new(),
            timestamp: 2_000,
            slot: 0,
        }));

        clock.set(10_000);
        state.refresh_analyzers(&mint);
        assert!(state.volume.latest_metrics(&mint).is_some());
        assert!(state.holders.latest_metrics(&mint).is_some());
        assert!(state.safety.latest_metrics(&mint).is_some());
    }

    #[test]
    fn expiry_cleans_every_structure() {
        let (state, clock) = state();
        let mint = TokenId([1; 32]);
        state.dispatch(&launch(1, 0));
        state.dispatch(&VenueEvent::TokenMigration(TokenMigration {
            mint,
            curve: TokenId([0xCC; 32]),
            pool: TokenId([0xDD; 32]),
            final_progress_pct: 100.0,
            signature: String::new(),
            timestamp: 1_000,
            slot: 0,
        }));

        // Five minutes after migration the token and all state are gone.
        clock.set(1_000 + 5 * 60 * 1_000);
        let expired = state.expire_tokens();
        assert_eq!(expired, vec![mint]);
        assert!(!state.tracker.is_tracked(&mint));
        assert!(state.volume.latest_metrics(&mint).is_none());
        assert!(state.aggregator.latest_metrics(&mint).is_none());
    }

    #[test]
    fn error_ring_is_bounded() {
        let (state, _) = state();
        for i in 0..80 {
            state.record_error(format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert!(errors.last().unwrap().message.contains("79"));
    }
}
