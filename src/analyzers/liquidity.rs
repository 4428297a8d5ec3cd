// =============================================================================
// Liquidity Analyzer — bonding-curve state, price and slippage
// =============================================================================
//
// The venue's pre-graduation pool is a constant-product pair:
//   virtual_sol * virtual_tokens = k
// Buying `s` lamports moves the reserves to (virtual_sol + s, k / (virtual_sol + s));
// the received tokens are the difference in token reserves. Reported
// slippage is the relative price degradation plus a fixed market-movement
// buffer.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::events::BondingProgress;
use crate::types::{Lamports, TimestampMs, TokenId, LAMPORTS_PER_SOL};
use crate::window::NumericWindow;

use super::{ErrorBudget, Trend, STALE_AFTER_MS};

/// Token base units per display token (six decimals on this venue).
const TOKEN_BASE: f64 = 1_000_000.0;

const FIFTEEN_MIN_MS: i64 = 15 * 60 * 1_000;
const PROGRESS_WINDOW_ITEMS: usize = 1_000;

/// Trade sizes (SOL) at which the slippage curve is sampled.
pub const SLIPPAGE_SIZES_SOL: [f64; 6] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// One sampled point on the slippage curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippagePoint {
    pub size_sol: f64,
    pub slippage_pct: f64,
    pub executable: bool,
}

/// Immutable per-token liquidity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityMetrics {
    pub token: TokenId,
    pub calculated_at: TimestampMs,
    pub confidence: f64,
    pub is_stale: bool,
    pub data_age_ms: i64,

    /// Spot price in SOL per display token.
    pub price_sol: f64,
    pub market_cap_sol: f64,
    pub progress_pct: f64,
    pub is_complete: bool,
    pub in_entry_zone: bool,
    pub slippage_curve: Vec<SlippagePoint>,
    /// 0–10, from how much of the slippage curve is executable.
    pub depth_score: f64,
    pub distance_to_migration_pct: f64,
    /// Progress percentage points per minute (regression over 15 m).
    pub velocity_pct_per_min: f64,
    /// None when velocity is non-positive.
    pub est_minutes_to_migration: Option<f64>,
    pub trend: Trend,
}

struct CurveState {
    virtual_sol: Lamports,
    virtual_tokens: u64,
    real_sol: Lamports,
    total_supply: u64,
    in_entry_zone: bool,
    is_complete: bool,
    progress_history: NumericWindow,
    updates: u64,
}

impl CurveState {
    fn new() -> Self {
        Self {
            virtual_sol: 0,
            virtual_tokens: 0,
            real_sol: 0,
            total_supply: 0,
            in_entry_zone: false,
            is_complete: false,
            progress_history: NumericWindow::new(FIFTEEN_MIN_MS * 2, PROGRESS_WINDOW_ITEMS),
            updates: 0,
        }
    }
}

/// Per-token bonding-state tracking.
pub struct LiquidityAnalyzer {
    clock: SharedClock,
    graduation_threshold_sol: f64,
    max_acceptable_slippage_pct: f64,
    market_move_buffer_pct: f64,
    budget: ErrorBudget,
    states: RwLock<HashMap<TokenId, CurveState>>,
    latest: RwLock<HashMap<TokenId, LiquidityMetrics>>,
}

impl LiquidityAnalyzer {
    pub fn new(
        clock: SharedClock,
        graduation_threshold_sol: f64,
        max_acceptable_slippage_pct: f64,
        market_move_buffer_pct: f64,
    ) -> Self {
        Self {
            clock,
            graduation_threshold_sol,
            max_acceptable_slippage_pct,
            market_move_buffer_pct,
            budget: ErrorBudget::new(),
            states: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    pub fn on_progress(&self, ev: &BondingProgress) {
        let mut states = self.states.write();
        let state = states.entry(ev.mint).or_insert_with(CurveState::new);
        state.virtual_sol = ev.virtual_sol;
        state.virtual_tokens = ev.virtual_tokens;
        state.real_sol = ev.real_sol;
        state.total_supply = ev.total_supply;
        state.in_entry_zone = ev.in_entry_zone;
        state.updates += 1;

        let progress = self.progress_pct(ev.real_sol);
        state.progress_history.add(progress, ev.timestamp);
    }

    /// Latch completion; a migrated curve never reopens.
    pub fn on_migration(&self, mint: &TokenId) {
        let mut states = self.states.write();
        let state = states.entry(*mint).or_insert_with(CurveState::new);
        state.is_complete = true;
    }

    fn progress_pct(&self, real_sol: Lamports) -> f64 {
        let sol = real_sol as f64 / LAMPORTS_PER_SOL as f64;
        (sol / self.graduation_threshold_sol * 100.0).clamp(0.0, 100.0)
    }

    /// Recompute and store the metrics snapshot for `token`.
    pub fn update(&self, token: &TokenId) -> Option<LiquidityMetrics> {
        let now = self.clock.now_ms();
        let states = self.states.read();
        let state = states.get(token)?;
        if state.virtual_tokens == 0 && !state.is_complete {
            return None; // never saw reserves
        }

        let price_sol = spot_price_sol(state.virtual_sol, state.virtual_tokens);
        let market_cap_sol = price_sol * state.total_supply as f64 / TOKEN_BASE;
        let progress = self.progress_pct(state.real_sol);

        let slippage_curve: Vec<SlippagePoint> = SLIPPAGE_SIZES_SOL
            .iter()
            .map(|size| {
                let slip = buy_slippage_pct(
                    state.virtual_sol,
                    state.virtual_tokens,
                    (*size * LAMPORTS_PER_SOL as f64) as u64,
                    self.market_move_buffer_pct,
                );
                SlippagePoint {
                    size_sol: *size,
                    slippage_pct: slip,
                    executable: slip <= self.max_acceptable_slippage_pct,
                }
            })
            .collect();

        let executable = slippage_curve.iter().filter(|p| p.executable).count();
        let depth_score = executable as f64 / SLIPPAGE_SIZES_SOL.len() as f64 * 10.0;

        // Regression slope is % per second; report per minute.
        let velocity_pct_per_min = state.progress_history.velocity_in(FIFTEEN_MIN_MS, now) * 60.0;
        let distance = 100.0 - progress;
        let est_minutes_to_migration = if velocity_pct_per_min > 0.0 && !state.is_complete {
            Some(distance / velocity_pct_per_min)
        } else {
            None
        };

        let trend = if velocity_pct_per_min > 0.1 {
            Trend::Growing
        } else if velocity_pct_per_min < -0.1 {
            Trend::Shrinking
        } else {
            Trend::Stable
        };

        let metrics = LiquidityMetrics {
            token: *token,
            calculated_at: now,
            confidence: confidence(state.updates),
            is_stale: false,
            data_age_ms: 0,
            price_sol,
            market_cap_sol,
            progress_pct: progress,
            is_complete: state.is_complete,
            in_entry_zone: state.in_entry_zone,
            slippage_curve,
            depth_score,
            distance_to_migration_pct: distance,
            velocity_pct_per_min,
            est_minutes_to_migration,
            trend,
        };
        drop(states);

        self.budget.record_success();
        self.latest.write().insert(*token, metrics.clone());
        Some(metrics)
    }

    pub fn latest_metrics(&self, token: &TokenId) -> Option<LiquidityMetrics> {
        let now = self.clock.now_ms();
        let mut m = self.latest.read().get(token)?.clone();
        m.data_age_ms = now - m.calculated_at;
        m.is_stale = m.data_age_ms > STALE_AFTER_MS;
        Some(m)
    }

    pub fn remove_token(&self, token: &TokenId) {
        self.states.write().remove(token);
        self.latest.write().remove(token);
    }

    /// Slippage for an arbitrary size, for executor pre-checks.
    pub fn slippage_for_size(&self, token: &TokenId, size_lamports: Lamports) -> Option<f64> {
        let states = self.states.read();
        let state = states.get(token)?;
        if state.virtual_tokens == 0 {
            return None;
        }
        Some(buy_slippage_pct(
            state.virtual_sol,
            state.virtual_tokens,
            size_lamports,
            self.market_move_buffer_pct,
        ))
    }
}

/// Spot price in SOL per display token.
fn spot_price_sol(virtual_sol: Lamports, virtual_tokens: u64) -> f64 {
    if virtual_tokens == 0 {
        return 0.0;
    }
    (virtual_sol as f64 / LAMPORTS_PER_SOL as f64) / (virtual_tokens as f64 / TOKEN_BASE)
}

/// Tokens (base units) received for a buy of `sol_in` lamports.
pub fn buy_tokens_out(virtual_sol: Lamports, virtual_tokens: u64, sol_in: Lamports) -> f64 {
    if virtual_tokens == 0 || sol_in == 0 {
        return 0.0;
    }
    let k = virtual_sol as f64 * virtual_tokens as f64;
    let new_sol = (virtual_sol + sol_in) as f64;
    virtual_tokens as f64 - k / new_sol
}

/// Relative price degradation for a buy, in percent, plus the fixed
/// market-movement buffer.
pub fn buy_slippage_pct(
    virtual_sol: Lamports,
    virtual_tokens: u64,
    sol_in: Lamports,
    buffer_pct: f64,
) -> f64 {
    let tokens_out = buy_tokens_out(virtual_sol, virtual_tokens, sol_in);
    if tokens_out <= 0.0 {
        return f64::INFINITY;
    }
    let spot = virtual_sol as f64 / virtual_tokens as f64;
    let effective = sol_in as f64 / tokens_out;
    (effective / spot - 1.0) * 100.0 + buffer_pct
}

/// Confidence grows with the number of reserve updates seen.
fn confidence(updates: u64) -> f64 {
    match updates {
        0 => 0.0,
        1..=2 => 0.3,
        3..=9 => 0.6,
        10..=29 => 0.8,
        _ => 1.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;

    const VSOL: Lamports = 30 * LAMPORTS_PER_SOL; // 30 SOL
    const VTOK: u64 = 1_000_000 * 1_000_000; // 1M tokens at 6 decimals

    fn progress_event(mint: u8, real_sol: Lamports, t: i64) -> BondingProgress {
        BondingProgress {
            mint: TokenId([mint; 32]),
            curve: TokenId([0xCC; 32]),
            progress_pct: 0.0,
            virtual_sol: VSOL,
            virtual_tokens: VTOK,
            real_sol,
            real_tokens: VTOK,
            total_supply: VTOK,
            in_entry_zone: false,
            signature: String::new(),
            timestamp: t,
            slot: 0,
        }
    }

    #[test]
    fn constant_product_tokens_out() {
        // 1 SOL into (30 SOL, 1M tokens): ~32_258.06 display tokens.
        let out = buy_tokens_out(VSOL, VTOK, LAMPORTS_PER_SOL);
        let display = out / TOKEN_BASE;
        assert!((display - 32_258.06).abs() < 0.1, "tokens out {display}");
    }

    #[test]
    fn constant_product_slippage_with_buffer() {
        let slip = buy_slippage_pct(VSOL, VTOK, LAMPORTS_PER_SOL, 0.5);
        // 3.33 % price move + 0.5 % buffer.
        assert!((slip - 3.8333).abs() < 0.01, "slippage {slip}");
    }

    #[test]
    fn zero_size_has_no_output() {
        assert_eq!(buy_tokens_out(VSOL, VTOK, 0), 0.0);
        assert!(buy_slippage_pct(VSOL, VTOK, 0, 0.5).is_infinite());
    }

    #[test]
    fn progress_clamps_to_bounds() {
        let clock = SimClock::new(0);
        let la = LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5);
        let mint = TokenId([1; 32]);

        la.on_progress(&progress_event(1, 200 * LAMPORTS_PER_SOL, 1_000));
        clock.set(2_000);
        let m = la.update(&mint).unwrap();
        assert_eq!(m.progress_pct, 100.0);
        assert_eq!(m.distance_to_migration_pct, 0.0);
    }

    #[test]
    fn depth_score_counts_executable_sizes() {
        let clock = SimClock::new(0);
        let la = LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5);
        let mint = TokenId([1; 32]);

        la.on_progress(&progress_event(1, 40 * LAMPORTS_PER_SOL, 1_000));
        clock.set(2_000);
        let m = la.update(&mint).unwrap();

        // With 30 SOL of virtual depth, 0.1/0.5/1 SOL trades fit inside a
        // 5 % budget; 2, 5 and 10 SOL do not.
        let executable: Vec<bool> = m.slippage_curve.iter().map(|p| p.executable).collect();
        assert_eq!(executable, vec![true, true, true, false, false, false]);
        assert!((m.depth_score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn migration_latch_and_eta() {
        let clock = SimClock::new(0);
        let la = LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5);
        let mint = TokenId([1; 32]);

        // Progress climbing 1 % of 85 SOL per minute.
        for i in 0..10i64 {
            let sol = (40 + i) as u64 * LAMPORTS_PER_SOL;
            la.on_progress(&progress_event(1, sol, i * 60_000));
        }
        clock.set(9 * 60_000);
        let m = la.update(&mint).unwrap();
        assert!(m.velocity_pct_per_min > 0.0);
        assert_eq!(m.trend, Trend::Growing);
        let eta = m.est_minutes_to_migration.unwrap();
        assert!(eta > 0.0 && eta < 120.0, "eta {eta}");

        la.on_migration(&mint);
        clock.set(10 * 60_000);
        let m = la.update(&mint).unwrap();
        assert!(m.is_complete);
        assert!(m.est_minutes_to_migration.is_none());
    }

    #[test]
    fn price_and_market_cap() {
        let clock = SimClock::new(0);
        let la = LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5);
        let mint = TokenId([1; 32]);
        la.on_progress(&progress_event(1, 10 * LAMPORTS_PER_SOL, 1_000));
        clock.set(2_000);
        let m = la.update(&mint).unwrap();
        // 30 SOL / 1M tokens = 3e-5 SOL per token.
        assert!((m.price_sol - 3.0e-5).abs() < 1e-12);
        // 1M token supply at 3e-5 = 30 SOL market cap.
        assert!((m.market_cap_sol - 30.0).abs() < 1e-6);
    }
}
