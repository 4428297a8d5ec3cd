// =============================================================================
// Volume Analyzer — per-token trade flow metrics
// =============================================================================
//
// Consumes TokenTrade events and derives rolling volume, buy pressure,
// spike detection and wash-trading heuristics. Lamport sums are exact
// (LamportWindow); ratios are computed in SOL space.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::events::TokenTrade;
use crate::types::{lamports_to_sol, Side, TimestampMs, TokenId, WalletId};
use crate::window::{EventWindow, LamportWindow};

use super::{ErrorBudget, VolumeTrend, STALE_AFTER_MS};

const FIVE_MIN_MS: i64 = 5 * 60 * 1_000;
const FIFTEEN_MIN_MS: i64 = 15 * 60 * 1_000;
const ONE_HOUR_MS: i64 = 60 * 60 * 1_000;
const WINDOW_RETENTION_MS: i64 = 2 * 60 * 60 * 1_000;
const MAX_TRADES: usize = 5_000;
const MAX_AMOUNTS: usize = 5_000;

/// Wash heuristics need at least this many trades in the 5-minute window.
const WASH_MIN_TRADES: usize = 4;

/// Immutable per-token volume snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub token: TokenId,
    pub calculated_at: TimestampMs,
    /// Data availability in [0, 1], not data quality.
    pub confidence: f64,
    pub is_stale: bool,
    pub data_age_ms: i64,

    pub volume_5m_sol: f64,
    pub volume_15m_sol: f64,
    pub volume_1h_sol: f64,
    /// Hourly volume spread evenly over twelve 5-minute buckets.
    pub avg_per_5m_sol: f64,
    /// Relative deviation of the current 5-minute bucket from the hourly
    /// average; 0 when no hourly baseline exists.
    pub velocity: f64,
    /// Buy share of 5-minute volume; 0.5 when there is no volume.
    pub buy_ratio: f64,
    pub has_spike: bool,
    /// Fraction of wash heuristics firing, in [0, 1].
    pub wash_score: f64,
    /// Coefficient-of-variation bot-likeness in [-1, +1]; positive when
    /// trade sizes are suspiciously uniform.
    pub size_skew: f64,
    pub trend: VolumeTrend,

    pub trades_5m: usize,
    pub trades_1h: usize,
    pub unique_traders_1h: usize,
}

#[derive(Debug, Clone)]
struct TradeRecord {
    side: Side,
    trader: WalletId,
    sol_amount: u64,
}

struct VolumeState {
    trades: EventWindow<TradeRecord>,
    buys: LamportWindow,
    sells: LamportWindow,
    trader_last_seen: HashMap<WalletId, TimestampMs>,
    trader_trade_count: HashMap<WalletId, u32>,
}

impl VolumeState {
    fn new() -> Self {
        Self {
            trades: EventWindow::new(WINDOW_RETENTION_MS, MAX_TRADES),
            buys: LamportWindow::new(WINDOW_RETENTION_MS, MAX_AMOUNTS),
            sells: LamportWindow::new(WINDOW_RETENTION_MS, MAX_AMOUNTS),
            trader_last_seen: HashMap::new(),
            trader_trade_count: HashMap::new(),
        }
    }
}

/// Per-token trade ingestion and metric computation.
pub struct VolumeAnalyzer {
    clock: SharedClock,
    spike_threshold: f64,
    budget: ErrorBudget,
    states: RwLock<HashMap<TokenId, VolumeState>>,
    latest: RwLock<HashMap<TokenId, VolumeMetrics>>,
}

impl VolumeAnalyzer {
    pub fn new(clock: SharedClock, spike_threshold: f64) -> Self {
        Self {
            clock,
            spike_threshold,
            budget: ErrorBudget::new(),
            states: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// Ingest one trade. State is created lazily on first sight.
    pub fn on_trade(&self, ev: &TokenTrade) {
        let mut states = self.states.write();
        let state = states.entry(ev.mint).or_insert_with(VolumeState::new);

        state.trades.add(
            TradeRecord {
                side: ev.side,
                trader: ev.trader,
                sol_amount: ev.sol_amount,
            },
            ev.timestamp,
        );
        match ev.side {
            Side::Buy => state.buys.add(ev.sol_amount, ev.timestamp),
            Side::Sell => state.sells.add(ev.sol_amount, ev.timestamp),
        }
        state.trader_last_seen.insert(ev.trader, ev.timestamp);
        *state.trader_trade_count.entry(ev.trader).or_insert(0) += 1;
    }

    /// Recompute and store the metrics snapshot for `token` (30 s tick).
    pub fn update(&self, token: &TokenId) -> Option<VolumeMetrics> {
        let now = self.clock.now_ms();
        let mut states = self.states.write();
        let state = states.get_mut(token)?;

        // Trader-map hygiene: forget anyone idle for over an hour.
        let cutoff = now - ONE_HOUR_MS;
        state.trader_last_seen.retain(|_, seen| *seen >= cutoff);
        let live: HashSet<WalletId> = state.trader_last_seen.keys().copied().collect();
        state.trader_trade_count.retain(|w, _| live.contains(w));

        let metrics = compute_metrics(state, *token, now, self.spike_threshold);
        self.budget.record_success();
        self.latest.write().insert(*token, metrics.clone());
        Some(metrics)
    }

    /// Latest stored snapshot with staleness recomputed against the clock.
    pub fn latest_metrics(&self, token: &TokenId) -> Option<VolumeMetrics> {
        let now = self.clock.now_ms();
        let mut m = self.latest.read().get(token)?.clone();
        m.data_age_ms = now - m.calculated_at;
        m.is_stale = m.data_age_ms > STALE_AFTER_MS;
        Some(m)
    }

    /// Drop all state for an expired token.
    pub fn remove_token(&self, token: &TokenId) {
        self.states.write().remove(token);
        self.latest.write().remove(token);
    }

    pub fn tracked_len(&self) -> usize {
        self.states.read().len()
    }
}

fn compute_metrics(
    state: &VolumeState,
    token: TokenId,
    now: TimestampMs,
    spike_threshold: f64,
) -> VolumeMetrics {
    let buy_5m = state.buys.sum_sol_in(FIVE_MIN_MS, now);
    let sell_5m = state.sells.sum_sol_in(FIVE_MIN_MS, now);
    let volume_5m = buy_5m + sell_5m;
    let volume_15m =
        state.buys.sum_sol_in(FIFTEEN_MIN_MS, now) + state.sells.sum_sol_in(FIFTEEN_MIN_MS, now);
    let volume_1h =
        state.buys.sum_sol_in(ONE_HOUR_MS, now) + state.sells.sum_sol_in(ONE_HOUR_MS, now);

    let avg_per_5m = volume_1h / 12.0;
    let velocity = if avg_per_5m > 0.0 {
        (volume_5m - avg_per_5m) / avg_per_5m
    } else {
        0.0
    };
    let buy_ratio = if volume_5m > 0.0 {
        buy_5m / volume_5m
    } else {
        0.5
    };
    let has_spike = avg_per_5m > 0.0 && volume_5m >= spike_threshold * avg_per_5m;

    let recent: Vec<&TradeRecord> = state.trades.items_in(FIVE_MIN_MS, now).collect();
    let trades_5m = recent.len();
    let trades_1h = state.trades.count_in(ONE_HOUR_MS, now);
    let unique_traders_1h = state
        .trades
        .items_in(ONE_HOUR_MS, now)
        .map(|t| t.trader)
        .collect::<HashSet<_>>()
        .len();

    let wash_score = wash_score(&recent);
    let size_skew = size_skew(&recent);

    let trend = if velocity > 0.5 {
        VolumeTrend::Accelerating
    } else if velocity < -0.3 {
        VolumeTrend::Decelerating
    } else {
        VolumeTrend::Stable
    };

    VolumeMetrics {
        token,
        calculated_at: now,
        confidence: confidence(trades_5m, trades_1h),
        is_stale: false,
        data_age_ms: 0,
        volume_5m_sol: volume_5m,
        volume_15m_sol: volume_15m,
        volume_1h_sol: volume_1h,
        avg_per_5m_sol: avg_per_5m,
        velocity,
        buy_ratio,
        has_spike,
        wash_score,
        size_skew,
        trend,
        trades_5m,
        trades_1h,
        unique_traders_1h,
    }
}

/// Stepwise data-availability confidence from recent and hourly activity.
fn confidence(trades_5m: usize, trades_1h: usize) -> f64 {
    let recent: f64 = match trades_5m {
        0 => 0.0,
        1..=3 => 0.15,
        4..=9 => 0.3,
        _ => 0.5,
    };
    let hourly: f64 = match trades_1h {
        0..=9 => 0.0,
        10..=29 => 0.2,
        30..=99 => 0.35,
        _ => 0.5,
    };
    (recent + hourly).min(1.0)
}

/// Fraction of the five wash heuristics firing on the 5-minute window.
fn wash_score(recent: &[&TradeRecord]) -> f64 {
    if recent.len() < WASH_MIN_TRADES {
        return 0.0;
    }
    let n = recent.len() as f64;

    let mut buyers: HashSet<WalletId> = HashSet::new();
    let mut sellers: HashSet<WalletId> = HashSet::new();
    let mut per_trader: HashMap<WalletId, u32> = HashMap::new();
    for tr in recent {
        match tr.side {
            Side::Buy => buyers.insert(tr.trader),
            Side::Sell => sellers.insert(tr.trader),
        };
        *per_trader.entry(tr.trader).or_insert(0) += 1;
    }
    let unique = per_trader.len() as f64;

    let mut fired = 0u32;

    // 1. Traders appearing on both sides.
    let both_sides = buyers.intersection(&sellers).count() as f64;
    if both_sides / unique > 0.3 {
        fired += 1;
    }

    // 2. Traders with three or more trades.
    let repeaters = per_trader.values().filter(|c| **c >= 3).count() as f64;
    if repeaters / unique > 0.2 {
        fired += 1;
    }

    // 3. Few unique traders relative to trade count.
    if unique / n <= 0.3 {
        fired += 1;
    }

    // 4. Round-number sizing: SOL amount a multiple of 0.1.
    let round = recent
        .iter()
        .filter(|tr| tr.sol_amount > 0 && tr.sol_amount % 100_000_000 == 0)
        .count() as f64;
    if round / n > 0.5 {
        fired += 1;
    }

    // 5. Side alternation.
    let alternations = recent
        .windows(2)
        .filter(|pair| pair[0].side != pair[1].side)
        .count() as f64;
    if alternations / (n - 1.0) > 0.7 {
        fired += 1;
    }

    fired as f64 / 5.0
}

/// Coefficient-of-variation bot-likeness: near-identical sizes score
/// positive (bot-like), highly dispersed sizes score negative (organic).
fn size_skew(recent: &[&TradeRecord]) -> f64 {
    if recent.len() < 2 {
        return 0.0;
    }
    let amounts: Vec<f64> = recent
        .iter()
        .map(|tr| lamports_to_sol(tr.sol_amount))
        .collect();
    let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;
    let cv = var.sqrt() / mean;

    if cv < 0.3 {
        (0.3 - cv) / 0.3
    } else if cv > 1.0 {
        -((cv - 1.0).min(1.0))
    } else {
        0.0
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::types::sol_to_lamports;

    fn analyzer(start_ms: i64) -> (VolumeAnalyzer, std::sync::Arc<SimClock>) {
        let clock = SimClock::new(start_ms);
        (VolumeAnalyzer::new(clock.clone(), 3.0), clock)
    }

    fn trade(mint: u8, trader: u8, side: Side, sol: f64, t: i64) -> TokenTrade {
        TokenTrade {
            mint: TokenId([mint; 32]),
            curve: TokenId([0xCC; 32]),
            side,
            trader: TokenId([trader; 32]),
            sol_amount: sol_to_lamports(sol),
            token_amount: 1_000_000,
            signature: String::new(),
            timestamp: t,
            slot: 0,
        }
    }

    #[test]
    fn velocity_and_spike_from_hourly_baseline() {
        // 7 SOL spread over the first 55 minutes, then 5 SOL in the last 5
        // minutes: volume_1h = 12, avg_per_5m = 1, velocity = 4, spike.
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);

        for i in 0..7 {
            va.on_trade(&trade(1, 10 + i, Side::Buy, 1.0, i as i64 * 7 * 60 * 1_000));
        }
        let late = 58 * 60 * 1_000;
        for i in 0..5 {
            va.on_trade(&trade(1, 30 + i, Side::Buy, 1.0, late + i as i64 * 20_000));
        }

        clock.set(ONE_HOUR_MS);
        let m = va.update(&mint).unwrap();
        assert!((m.volume_1h_sol - 12.0).abs() < 1e-9);
        assert!((m.avg_per_5m_sol - 1.0).abs() < 1e-9);
        assert!((m.velocity - 4.0).abs() < 1e-9);
        assert!(m.has_spike);
        assert_eq!(m.trend, VolumeTrend::Accelerating);
    }

    #[test]
    fn zero_volume_is_neutral() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        // A single ancient trade creates state but is outside every window.
        va.on_trade(&trade(1, 2, Side::Buy, 1.0, 0));
        clock.set(3 * ONE_HOUR_MS);
        let m = va.update(&mint).unwrap();
        assert_eq!(m.buy_ratio, 0.5);
        assert_eq!(m.velocity, 0.0);
        assert!(!m.has_spike);
        assert_eq!(m.volume_5m_sol, 0.0);
    }

    #[test]
    fn buy_ratio_reflects_flow() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        va.on_trade(&trade(1, 2, Side::Buy, 3.0, 1_000));
        va.on_trade(&trade(1, 3, Side::Sell, 1.0, 2_000));
        clock.set(10_000);
        let m = va.update(&mint).unwrap();
        assert!((m.buy_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn wash_trading_all_heuristics_fire() {
        // 10 trades, 3 traders all on both sides, sides alternating in 8 of
        // 9 adjacent pairs, every amount exactly 0.1 SOL.
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);

        let traders = [2u8, 3, 4];
        for i in 0..10usize {
            // Alternate sides except one repeated pair in the middle.
            let side = match i {
                4 | 5 => Side::Sell,
                i if i % 2 == 0 => Side::Buy,
                _ => Side::Sell,
            };
            let trader = traders[i % 3];
            va.on_trade(&trade(1, trader, side, 0.1, 1_000 + i as i64 * 1_000));
        }
        clock.set(60_000);
        let m = va.update(&mint).unwrap();
        assert!(
            (m.wash_score - 1.0).abs() < 1e-9,
            "wash_score {}",
            m.wash_score
        );
        // Identical amounts: strongly bot-like sizing.
        assert!(m.size_skew > 0.9);
    }

    #[test]
    fn wash_score_requires_minimum_trades() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        for i in 0..3 {
            va.on_trade(&trade(1, 2, Side::Buy, 0.1, 1_000 + i * 1_000));
        }
        clock.set(10_000);
        let m = va.update(&mint).unwrap();
        assert_eq!(m.wash_score, 0.0);
    }

    #[test]
    fn dispersed_sizes_skew_negative() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        let sizes = [0.01, 0.02, 5.0, 0.03, 8.0];
        for (i, s) in sizes.iter().enumerate() {
            va.on_trade(&trade(1, 10 + i as u8, Side::Buy, *s, 1_000 + i as i64 * 1_000));
        }
        clock.set(60_000);
        let m = va.update(&mint).unwrap();
        assert!(m.size_skew < 0.0, "size_skew {}", m.size_skew);
    }

    #[test]
    fn confidence_steps_with_activity() {
        assert_eq!(confidence(0, 0), 0.0);
        assert!(confidence(2, 5) > 0.0);
        assert!(confidence(12, 120) > confidence(2, 12));
        assert_eq!(confidence(50, 500), 1.0);
    }

    #[test]
    fn stale_flag_tracks_clock() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        va.on_trade(&trade(1, 2, Side::Buy, 1.0, 1_000));
        clock.set(2_000);
        va.update(&mint).unwrap();

        let fresh = va.latest_metrics(&mint).unwrap();
        assert!(!fresh.is_stale);

        clock.set(2_000 + STALE_AFTER_MS + 1);
        let stale = va.latest_metrics(&mint).unwrap();
        assert!(stale.is_stale);
        assert!(stale.data_age_ms > STALE_AFTER_MS);
    }

    #[test]
    fn remove_token_clears_state() {
        let (va, clock) = analyzer(0);
        let mint = TokenId([1; 32]);
        va.on_trade(&trade(1, 2, Side::Buy, 1.0, 1_000));
        clock.set(2_000);
        va.update(&mint).unwrap();
        va.remove_token(&mint);
        assert!(va.latest_metrics(&mint).is_none());
        assert_eq!(va.tracked_len(), 0);
    }
}
