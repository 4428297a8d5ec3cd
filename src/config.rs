// =============================================================================
// Bot Configuration — env-driven settings with atomic JSON persistence
// =============================================================================
//
// Central configuration hub for the Nova trading engine. Defaults are baked
// in, a JSON settings file may override them, and NOVA_* environment
// variables override both.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// The engine always boots in paper mode unless NOVA_LIVE_TRADING=1 is set
// explicitly.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_stream_url() -> String {
    "wss://launchpad.nova.local/stream".to_string()
}

fn default_quote_url() -> String {
    "https://quote.nova.local/v1".to_string()
}

fn default_bundle_url() -> String {
    "https://bundles.nova.local/v1".to_string()
}

fn default_db_path() -> String {
    "nova.db".to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

fn default_starting_capital_sol() -> f64 {
    10.0
}

fn default_dashboard_refresh_secs() -> u64 {
    5
}

fn default_top_n() -> usize {
    20
}

fn default_max_position_sol() -> f64 {
    1.0
}

fn default_max_total_exposure_sol() -> f64 {
    5.0
}

fn default_max_concurrent_positions() -> u32 {
    5
}

fn default_max_trade_capital_fraction() -> f64 {
    0.20
}

fn default_max_daily_loss_pct() -> f64 {
    10.0
}

fn default_max_slippage_bps() -> u32 {
    500
}

fn default_fee_reserve_sol() -> f64 {
    0.05
}

fn default_volume_weight() -> f64 {
    0.25
}

fn default_holder_weight() -> f64 {
    0.20
}

fn default_liquidity_weight() -> f64 {
    0.30
}

fn default_safety_weight() -> f64 {
    0.25
}

fn default_update_interval_secs() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_decay_half_life_secs() -> f64 {
    300.0
}

fn default_min_data_completeness() -> f64 {
    0.5
}

fn default_entry_zone_low() -> f64 {
    70.0
}

fn default_entry_zone_high() -> f64 {
    95.0
}

fn default_spike_threshold() -> f64 {
    3.0
}

fn default_min_safety_score() -> f64 {
    50.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_base_priority_fee() -> u64 {
    100_000
}

fn default_max_priority_fee() -> u64 {
    2_000_000
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

fn default_quote_ttl_secs() -> u64 {
    10
}

fn default_quote_timeout_secs() -> u64 {
    30
}

fn default_market_move_buffer_pct() -> f64 {
    0.5
}

fn default_max_price_impact_pct() -> f64 {
    10.0
}

fn default_fee_escalation_factor() -> f64 {
    1.5
}

fn default_stop_loss_pct() -> f64 {
    20.0
}

fn default_trailing_stop_pct() -> f64 {
    15.0
}

fn default_monitor_interval_secs() -> u64 {
    5
}

fn default_take_profit_levels() -> Vec<TakeProfitLevel> {
    vec![
        TakeProfitLevel {
            multiplier: 2.0,
            sell_percent: 25.0,
        },
        TakeProfitLevel {
            multiplier: 3.0,
            sell_percent: 25.0,
        },
        TakeProfitLevel {
            multiplier: 5.0,
            sell_percent: 50.0,
        },
    ]
}

fn default_graduation_threshold_sol() -> f64 {
    85.0
}

fn default_max_acceptable_slippage_pct() -> f64 {
    5.0
}

// =============================================================================
// Sections
// =============================================================================

/// Hard limits enforced by the risk manager before every buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum size of a single position in SOL.
    #[serde(default = "default_max_position_sol")]
    pub max_position_sol: f64,

    /// Maximum total exposure across all open positions in SOL.
    #[serde(default = "default_max_total_exposure_sol")]
    pub max_total_exposure_sol: f64,

    /// Maximum number of concurrently open positions.
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    /// Maximum single trade as a fraction of current capital.
    #[serde(default = "default_max_trade_capital_fraction")]
    pub max_trade_capital_fraction: f64,

    /// Maximum daily loss as a percentage of starting capital before trading
    /// pauses and the kill switch fires.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Maximum slippage in basis points accepted on any order.
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,

    /// SOL kept aside for transaction fees, never spent on entries.
    #[serde(default = "default_fee_reserve_sol")]
    pub fee_reserve_sol: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_sol: default_max_position_sol(),
            max_total_exposure_sol: default_max_total_exposure_sol(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_trade_capital_fraction: default_max_trade_capital_fraction(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_slippage_bps: default_max_slippage_bps(),
            fee_reserve_sol: default_fee_reserve_sol(),
        }
    }
}

/// Channel weights and thresholds for the momentum aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorParams {
    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,

    #[serde(default = "default_holder_weight")]
    pub holder_weight: f64,

    #[serde(default = "default_liquidity_weight")]
    pub liquidity_weight: f64,

    #[serde(default = "default_safety_weight")]
    pub safety_weight: f64,

    /// Seconds between aggregator update ticks.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Exponential time decay toward neutral since the last signal.
    #[serde(default = "default_true")]
    pub decay_enabled: bool,

    /// Half-life of the decay in seconds.
    #[serde(default = "default_decay_half_life_secs")]
    pub decay_half_life_secs: f64,

    /// Below this data completeness every signal collapses to HOLD.
    #[serde(default = "default_min_data_completeness")]
    pub min_data_completeness: f64,

    /// Bonding progress band in which entries are attempted.
    #[serde(default = "default_entry_zone_low")]
    pub entry_zone_low: f64,

    #[serde(default = "default_entry_zone_high")]
    pub entry_zone_high: f64,

    /// Volume spike multiple over the hourly per-5m average.
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,

    /// Safety score below which the signal is forced to DO_NOT_TRADE.
    #[serde(default = "default_min_safety_score")]
    pub min_safety_score: f64,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            volume_weight: default_volume_weight(),
            holder_weight: default_holder_weight(),
            liquidity_weight: default_liquidity_weight(),
            safety_weight: default_safety_weight(),
            update_interval_secs: default_update_interval_secs(),
            decay_enabled: true,
            decay_half_life_secs: default_decay_half_life_secs(),
            min_data_completeness: default_min_data_completeness(),
            entry_zone_low: default_entry_zone_low(),
            entry_zone_high: default_entry_zone_high(),
            spike_threshold: default_spike_threshold(),
            min_safety_score: default_min_safety_score(),
        }
    }
}

/// Per-check weights for the safety analyzer. The eight weights sum to 1.0
/// by default and are deliberately configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyWeights {
    pub authority: f64,
    pub concentration: f64,
    pub distribution: f64,
    pub creator: f64,
    pub age: f64,
    pub liquidity_lock: f64,
    pub social: f64,
    pub trading_pattern: f64,
}

impl Default for SafetyWeights {
    fn default() -> Self {
        Self {
            authority: 0.20,
            concentration: 0.20,
            distribution: 0.10,
            creator: 0.15,
            age: 0.10,
            liquidity_lock: 0.10,
            social: 0.05,
            trading_pattern: 0.10,
        }
    }
}

/// Tuning for the buy/sell execution pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorParams {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries; attempt N sleeps N times this long.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Starting priority fee in micro-lamports per compute unit.
    #[serde(default = "default_base_priority_fee")]
    pub base_priority_fee: u64,

    /// Ceiling the escalation never exceeds.
    #[serde(default = "default_max_priority_fee")]
    pub max_priority_fee: u64,

    /// Per-retry fee multiplier.
    #[serde(default = "default_fee_escalation_factor")]
    pub fee_escalation_factor: f64,

    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// How long a fetched quote stays usable.
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,

    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,

    /// Fixed market-movement buffer added on top of computed slippage.
    #[serde(default = "default_market_move_buffer_pct")]
    pub market_move_buffer_pct: f64,

    /// Quotes with a larger price impact than this are rejected outright.
    #[serde(default = "default_max_price_impact_pct")]
    pub max_price_impact_pct: f64,
}

impl Default for ExecutorParams {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            base_priority_fee: default_base_priority_fee(),
            max_priority_fee: default_max_priority_fee(),
            fee_escalation_factor: default_fee_escalation_factor(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            quote_ttl_secs: default_quote_ttl_secs(),
            quote_timeout_secs: default_quote_timeout_secs(),
            market_move_buffer_pct: default_market_move_buffer_pct(),
            max_price_impact_pct: default_max_price_impact_pct(),
        }
    }
}

/// One rung of the take-profit ladder: at `multiplier` times the entry
/// price, sell `sell_percent` of the initial amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub multiplier: f64,
    pub sell_percent: f64,
}

/// Stop-loss / take-profit / trailing parameters for the position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionParams {
    /// Initial stop loss as a percentage below entry.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Trailing distance as a percentage below the last sell price.
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,

    #[serde(default = "default_take_profit_levels")]
    pub take_profit_levels: Vec<TakeProfitLevel>,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

impl Default for PositionParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            take_profit_levels: default_take_profit_levels(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

/// Venue constants for the bonding-curve math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueParams {
    /// Real SOL reserves at which a token graduates.
    #[serde(default = "default_graduation_threshold_sol")]
    pub graduation_threshold_sol: f64,

    /// Largest slippage considered executable.
    #[serde(default = "default_max_acceptable_slippage_pct")]
    pub max_acceptable_slippage_pct: f64,
}

impl Default for VenueParams {
    fn default() -> Self {
        Self {
            graduation_threshold_sol: default_graduation_threshold_sol(),
            max_acceptable_slippage_pct: default_max_acceptable_slippage_pct(),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Nova engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Operational mode ----------------------------------------------------

    /// Paper (simulated fills) or Live. Paper is the default.
    #[serde(default)]
    pub trading_mode: TradingMode,

    // --- Endpoints ------------------------------------------------------------

    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    #[serde(default = "default_quote_url")]
    pub quote_url: String,

    #[serde(default = "default_bundle_url")]
    pub bundle_url: String,

    /// Wallet identifiers used round-robin for entries (hex, 32 bytes each).
    #[serde(default)]
    pub wallets: Vec<String>,

    // --- Storage and output ---------------------------------------------------

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    // --- Capital --------------------------------------------------------------

    #[serde(default = "default_starting_capital_sol")]
    pub starting_capital_sol: f64,

    // --- Sections -------------------------------------------------------------

    #[serde(default)]
    pub risk: RiskLimits,

    #[serde(default)]
    pub aggregator: AggregatorParams,

    #[serde(default)]
    pub safety_weights: SafetyWeights,

    #[serde(default)]
    pub executor: ExecutorParams,

    #[serde(default)]
    pub position: PositionParams,

    #[serde(default)]
    pub venue: VenueParams,

    // --- Dashboard / rankings -------------------------------------------------

    #[serde(default = "default_dashboard_refresh_secs")]
    pub dashboard_refresh_secs: u64,

    /// Leaderboard size.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paper,
            stream_url: default_stream_url(),
            quote_url: default_quote_url(),
            bundle_url: default_bundle_url(),
            wallets: Vec::new(),
            db_path: default_db_path(),
            report_dir: default_report_dir(),
            starting_capital_sol: default_starting_capital_sol(),
            risk: RiskLimits::default(),
            aggregator: AggregatorParams::default(),
            safety_weights: SafetyWeights::default(),
            executor: ExecutorParams::default(),
            position: PositionParams::default(),
            venue: VenueParams::default(),
            dashboard_refresh_secs: default_dashboard_refresh_secs(),
            top_n: default_top_n(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            trading_mode = %config.trading_mode,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply NOVA_* environment overrides on top of the loaded values.
    ///
    /// Live trading requires the explicit opt-in `NOVA_LIVE_TRADING=1`;
    /// anything else (including a `trading_mode: Live` in the JSON file)
    /// is clamped back to paper.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("NOVA_STREAM_URL") {
            self.stream_url = v;
        }
        if let Ok(v) = std::env::var("NOVA_QUOTE_URL") {
            self.quote_url = v;
        }
        if let Ok(v) = std::env::var("NOVA_BUNDLE_URL") {
            self.bundle_url = v;
        }
        if let Ok(v) = std::env::var("NOVA_DB_PATH") {
            self.db_path = v;
        }
        if let Ok(v) = std::env::var("NOVA_REPORT_DIR") {
            self.report_dir = v;
        }
        if let Ok(v) = std::env::var("NOVA_WALLETS") {
            self.wallets = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("NOVA_STARTING_CAPITAL_SOL") {
            match v.parse::<f64>() {
                Ok(cap) if cap > 0.0 => self.starting_capital_sol = cap,
                _ => warn!(value = %v, "ignoring invalid NOVA_STARTING_CAPITAL_SOL"),
            }
        }
        if let Ok(v) = std::env::var("NOVA_MAX_DAILY_LOSS_PCT") {
            match v.parse::<f64>() {
                Ok(pct) if pct > 0.0 => self.risk.max_daily_loss_pct = pct,
                _ => warn!(value = %v, "ignoring invalid NOVA_MAX_DAILY_LOSS_PCT"),
            }
        }
        if let Ok(v) = std::env::var("NOVA_MAX_POSITION_SOL") {
            match v.parse::<f64>() {
                Ok(sol) if sol > 0.0 => self.risk.max_position_sol = sol,
                _ => warn!(value = %v, "ignoring invalid NOVA_MAX_POSITION_SOL"),
            }
        }

        // Live trading is an explicit opt-in, never a file default.
        let live_opt_in = std::env::var("NOVA_LIVE_TRADING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if live_opt_in {
            self.trading_mode = TradingMode::Live;
        } else {
            if self.trading_mode == TradingMode::Live {
                warn!("trading_mode=Live without NOVA_LIVE_TRADING opt-in — forcing paper mode");
            }
            self.trading_mode = TradingMode::Paper;
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.starting_capital_sol <= 0.0 {
            anyhow::bail!("starting capital must be positive");
        }
        if self.risk.max_daily_loss_pct <= 0.0 || self.risk.max_daily_loss_pct > 100.0 {
            anyhow::bail!("max_daily_loss_pct must be in (0, 100]");
        }
        let w = &self.aggregator;
        let sum = w.volume_weight + w.holder_weight + w.liquidity_weight + w.safety_weight;
        if (sum - 1.0).abs() > 0.01 {
            anyhow::bail!("aggregator channel weights must sum to 1.0 (got {sum:.3})");
        }
        if self.position.take_profit_levels.is_empty() {
            anyhow::bail!("at least one take-profit level is required");
        }
        if self.trading_mode == TradingMode::Live && self.wallets.is_empty() {
            anyhow::bail!("live trading requires at least one wallet (NOVA_WALLETS)");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paper);
        assert_eq!(cfg.risk.max_daily_loss_pct, 10.0);
        assert_eq!(cfg.aggregator.update_interval_secs, 15);
        assert_eq!(cfg.position.take_profit_levels.len(), 3);
        assert_eq!(cfg.position.take_profit_levels[0].multiplier, 2.0);
        assert_eq!(cfg.position.take_profit_levels[2].sell_percent, 50.0);
        assert_eq!(cfg.top_n, 20);
        assert_eq!(cfg.executor.market_move_buffer_pct, 0.5);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let cfg = BotConfig::default();
        assert!(cfg.validate().is_ok());
        let sw = &cfg.safety_weights;
        let sum = sw.authority
            + sw.concentration
            + sw.distribution
            + sw.creator
            + sw.age
            + sw.liquidity_lock
            + sw.social
            + sw.trading_pattern;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paper);
        assert_eq!(cfg.aggregator.liquidity_weight, 0.30);
        assert_eq!(cfg.executor.max_retries, 3);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "starting_capital_sol": 42.0, "risk": { "max_position_sol": 2.5 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.starting_capital_sol, 42.0);
        assert_eq!(cfg.risk.max_position_sol, 2.5);
        // Untouched sibling fields keep their defaults.
        assert_eq!(cfg.risk.max_concurrent_positions, 5);
        assert_eq!(cfg.position.trailing_stop_pct, 15.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.risk.max_slippage_bps, cfg2.risk.max_slippage_bps);
        assert_eq!(cfg.aggregator.volume_weight, cfg2.aggregator.volume_weight);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn validate_rejects_bad_weights() {
        let mut cfg = BotConfig::default();
        cfg.aggregator.volume_weight = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_live_without_wallets() {
        let mut cfg = BotConfig::default();
        cfg.trading_mode = TradingMode::Live;
        assert!(cfg.validate().is_err());
        cfg.wallets = vec!["00".repeat(32)];
        assert!(cfg.validate().is_ok());
    }
}
