// =============================================================================
// Holder Analyzer — trader-set holder estimation and wallet quality
// =============================================================================
//
// Holder counts are approximated from the trader set derived from trade
// events: a wallet with a positive net token balance counts as a holder.
// The contract is identical if an RPC-backed snapshot source is substituted.
//
// Funding-source links arrive out of band (an RPC walker in production,
// fixtures in tests) via `note_funding_source`; wallets sharing a source in
// groups of two or more form clusters.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::events::TokenTrade;
use crate::types::{Side, TimestampMs, TokenId, WalletId};
use crate::window::SnapshotRing;

use super::{ErrorBudget, Trend, STALE_AFTER_MS};

const FIVE_MIN_MS: i64 = 5 * 60 * 1_000;
const ONE_HOUR_MS: i64 = 60 * 60 * 1_000;
const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1_000;
/// One snapshot per minute, two hours of retention.
const MAX_SNAPSHOTS: usize = 120;
const SNAPSHOT_RETENTION_MS: i64 = 2 * 60 * 60 * 1_000;

/// Immutable per-token holder snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderMetrics {
    pub token: TokenId,
    pub calculated_at: TimestampMs,
    pub confidence: f64,
    pub is_stale: bool,
    pub data_age_ms: i64,

    pub total_holders: usize,
    /// New holders per minute, from the 5-minute snapshot diff.
    pub holder_velocity: f64,
    /// Percentage growth over the last hour.
    pub growth_rate_1h_pct: f64,
    /// Estimated share of supply held by the largest 10 / 20 wallets.
    pub top10_concentration_pct: f64,
    pub top20_concentration_pct: f64,
    /// Creator's share of the estimated held supply.
    pub creator_holdings_pct: f64,
    /// Funding-source clusters of two or more wallets.
    pub cluster_count: usize,
    /// Mean wallet age in hours, measured from first sight.
    pub avg_wallet_age_hours: f64,
    /// Share of holders first seen less than 24 h ago.
    pub new_wallet_pct: f64,
    /// 0–10; penalises concentration.
    pub distribution_score: f64,
    /// 0–10; rewards older wallets, penalises clustering and fresh wallets.
    pub quality_score: f64,
    pub trend: Trend,
    pub red_flags: Vec<String>,
}

#[derive(Debug, Clone)]
struct WalletStats {
    first_seen: TimestampMs,
    last_seen: TimestampMs,
    /// Net token balance from observed trades; negative clamps to zero.
    net_tokens: i128,
}

struct HolderState {
    creator: Option<WalletId>,
    wallets: HashMap<WalletId, WalletStats>,
    funding_sources: HashMap<WalletId, WalletId>,
    snapshots: SnapshotRing<usize>,
    last_snapshot_at: TimestampMs,
}

impl HolderState {
    fn new() -> Self {
        Self {
            creator: None,
            wallets: HashMap::new(),
            funding_sources: HashMap::new(),
            snapshots: SnapshotRing::new(MAX_SNAPSHOTS, SNAPSHOT_RETENTION_MS),
            last_snapshot_at: 0,
        }
    }

    fn holder_count(&self) -> usize {
        self.wallets.values().filter(|w| w.net_tokens > 0).count()
    }
}

/// Per-token trader-set tracking and holder metrics.
pub struct HolderAnalyzer {
    clock: SharedClock,
    budget: ErrorBudget,
    states: RwLock<HashMap<TokenId, HolderState>>,
    latest: RwLock<HashMap<TokenId, HolderMetrics>>,
}

impl HolderAnalyzer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            budget: ErrorBudget::new(),
            states: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// Remember the creator so concentration checks can single it out.
    pub fn on_launch(&self, mint: TokenId, creator: WalletId) {
        let mut states = self.states.write();
        states.entry(mint).or_insert_with(HolderState::new).creator = Some(creator);
    }

    pub fn on_trade(&self, ev: &TokenTrade) {
        let mut states = self.states.write();
        let state = states.entry(ev.mint).or_insert_with(HolderState::new);

        let stats = state
            .wallets
            .entry(ev.trader)
            .or_insert_with(|| WalletStats {
                first_seen: ev.timestamp,
                last_seen: ev.timestamp,
                net_tokens: 0,
            });
        stats.last_seen = stats.last_seen.max(ev.timestamp);
        match ev.side {
            Side::Buy => stats.net_tokens += ev.token_amount as i128,
            Side::Sell => stats.net_tokens -= ev.token_amount as i128,
        }

        // Once-per-minute holder-count snapshot, driven by event time.
        if ev.timestamp - state.last_snapshot_at >= 60_000 {
            let count = state.holder_count();
            state.snapshots.push(count, ev.timestamp);
            state.last_snapshot_at = ev.timestamp;
        }
    }

    /// Record a funding link discovered out of band.
    pub fn note_funding_source(&self, mint: TokenId, wallet: WalletId, source: WalletId) {
        let mut states = self.states.write();
        let state = states.entry(mint).or_insert_with(HolderState::new);
        state.funding_sources.insert(wallet, source);
    }

    /// Recompute and store the metrics snapshot for `token`.
    pub fn update(&self, token: &TokenId) -> Option<HolderMetrics> {
        let now = self.clock.now_ms();
        let states = self.states.read();
        let state = states.get(token)?;
        let metrics = compute_metrics(state, *token, now);
        drop(states);

        self.budget.record_success();
        self.latest.write().insert(*token, metrics.clone());
        Some(metrics)
    }

    pub fn latest_metrics(&self, token: &TokenId) -> Option<HolderMetrics> {
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
}

fn compute_metrics(state: &HolderState, token: TokenId, now: TimestampMs) -> HolderMetrics {
    let holders: Vec<(&WalletId, &WalletStats)> = state
        .wallets
        .iter()
        .filter(|(_, w)| w.net_tokens > 0)
        .collect();
    let total_holders = holders.len();

    // Concentration over the estimated held supply.
    let held_total: i128 = holders.iter().map(|(_, w)| w.net_tokens).sum();
    let mut balances: Vec<i128> = holders.iter().map(|(_, w)| w.net_tokens).collect();
    balances.sort_unstable_by(|a, b| b.cmp(a));
    let top_n_pct = |n: usize| -> f64 {
        if held_total <= 0 {
            return 0.0;
        }
        let top: i128 = balances.iter().take(n).sum();
        top as f64 / held_total as f64 * 100.0
    };
    let top10 = top_n_pct(10);
    let top20 = top_n_pct(20);

    let creator_pct = match (state.creator, held_total) {
        (Some(creator), t) if t > 0 => state
            .wallets
            .get(&creator)
            .map(|w| (w.net_tokens.max(0)) as f64 / t as f64 * 100.0)
            .unwrap_or(0.0),
        _ => 0.0,
    };

    // Snapshot-diff velocity and hourly growth.
    let count_5m_ago = state
        .snapshots
        .closest_to(FIVE_MIN_MS, now)
        .map(|(_, c)| *c);
    let holder_velocity = match count_5m_ago {
        Some(old) if total_holders >= old => (total_holders - old) as f64 / 5.0,
        Some(old) => -((old - total_holders) as f64) / 5.0,
        None => 0.0,
    };
    let growth_rate_1h = match state.snapshots.closest_to(ONE_HOUR_MS, now) {
        Some((_, old)) if *old > 0 => {
            (total_holders as f64 - *old as f64) / *old as f64 * 100.0
        }
        _ => 0.0,
    };

    // Funding clusters: sources shared by two or more wallets.
    let mut per_source: HashMap<WalletId, usize> = HashMap::new();
    for source in state.funding_sources.values() {
        *per_source.entry(*source).or_insert(0) += 1;
    }
    let cluster_count = per_source.values().filter(|n| **n >= 2).count();

    // Wallet ages from first sight.
    let (avg_age_hours, new_wallet_pct) = if total_holders > 0 {
        let ages_ms: Vec<i64> = holders.iter().map(|(_, w)| now - w.first_seen).collect();
        let avg = ages_ms.iter().sum::<i64>() as f64 / ages_ms.len() as f64 / 3_600_000.0;
        let fresh = ages_ms.iter().filter(|a| **a < ONE_DAY_MS).count();
        (avg, fresh as f64 / total_holders as f64 * 100.0)
    } else {
        (0.0, 0.0)
    };

    let distribution_score = (10.0 - top10 / 10.0).clamp(0.0, 10.0);

    let mut quality: f64 = 5.0;
    quality += (avg_age_hours / 24.0).min(3.0); // up to +3 for day-old wallets
    quality -= (cluster_count as f64 * 0.5).min(3.0);
    quality -= (new_wallet_pct / 100.0) * 2.0;
    let quality_score = quality.clamp(0.0, 10.0);

    let trend = if holder_velocity > 0.2 {
        Trend::Growing
    } else if holder_velocity < -0.2 {
        Trend::Shrinking
    } else {
        Trend::Stable
    };

    let mut red_flags = Vec::new();
    if top10 > 60.0 {
        red_flags.push(format!("top-10 wallets hold {top10:.0}% of supply"));
    }
    if creator_pct > 20.0 {
        red_flags.push(format!("creator holds {creator_pct:.0}% of supply"));
    }
    if cluster_count >= 3 {
        red_flags.push(format!("{cluster_count} funding clusters detected"));
    }
    if new_wallet_pct > 80.0 && total_holders >= 10 {
        red_flags.push("holder base is mostly fresh wallets".to_string());
    }

    HolderMetrics {
        token,
        calculated_at: now,
        confidence: confidence(state.snapshots.len(), total_holders),
        is_stale: false,
        data_age_ms: 0,
        total_holders,
        holder_velocity,
        growth_rate_1h_pct: growth_rate_1h,
        top10_concentration_pct: top10,
        top20_concentration_pct: top20,
        creator_holdings_pct: creator_pct,
        cluster_count,
        avg_wallet_age_hours: avg_age_hours,
        new_wallet_pct,
        distribution_score,
        quality_score,
        trend,
        red_flags,
    }
}

/// Confidence scales with snapshot history and trader-set size.
fn confidence(snapshots: usize, holders: usize) -> f64 {
    let history: f64 = match snapshots {
        0 => 0.0,
        1..=4 => 0.2,
        5..=14 => 0.35,
        _ => 0.5,
    };
    let breadth: f64 = match holders {
        0 => 0.0,
        1..=9 => 0.2,
        10..=49 => 0.35,
        _ => 0.5,
    };
    (history + breadth).min(1.0)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;

    fn wallet(n: u8) -> WalletId {
        TokenId([n; 32])
    }

    fn trade(mint: u8, trader: u8, side: Side, tokens: u64, t: i64) -> TokenTrade {
        TokenTrade {
            mint: TokenId([mint; 32]),
            curve: TokenId([0xCC; 32]),
            side,
            trader: wallet(trader),
            sol_amount: 100_000_000,
            token_amount: tokens,
            signature: String::new(),
            timestamp: t,
            slot: 0,
        }
    }

    #[test]
    fn net_sellers_are_not_holders() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);

        ha.on_trade(&trade(1, 2, Side::Buy, 100, 1_000));
        ha.on_trade(&trade(1, 3, Side::Buy, 100, 2_000));
        ha.on_trade(&trade(1, 3, Side::Sell, 100, 3_000));

        clock.set(10_000);
        let m = ha.update(&mint).unwrap();
        assert_eq!(m.total_holders, 1);
    }

    #[test]
    fn concentration_sums_top_wallets() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);

        // One whale with 900, nine minnows with 100 total.
        ha.on_trade(&trade(1, 2, Side::Buy, 900, 1_000));
        for i in 0..9u8 {
            ha.on_trade(&trade(1, 10 + i, Side::Buy, 100, 2_000 + i as i64));
        }

        clock.set(10_000);
        let m = ha.update(&mint).unwrap();
        assert_eq!(m.total_holders, 10);
        // Whale alone is 900/1800 = 50 %, top 10 covers everyone.
        assert!((m.top10_concentration_pct - 100.0).abs() < 1e-9);
        assert!(m.distribution_score < 1.0);
    }

    #[test]
    fn creator_share_is_flagged() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);
        ha.on_launch(mint, wallet(9));

        ha.on_trade(&trade(1, 9, Side::Buy, 500, 1_000));
        ha.on_trade(&trade(1, 2, Side::Buy, 500, 2_000));

        clock.set(10_000);
        let m = ha.update(&mint).unwrap();
        assert!((m.creator_holdings_pct - 50.0).abs() < 1e-9);
        assert!(m.red_flags.iter().any(|f| f.contains("creator")));
    }

    #[test]
    fn funding_clusters_need_two_members() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);

        ha.on_trade(&trade(1, 2, Side::Buy, 100, 1_000));
        ha.on_trade(&trade(1, 3, Side::Buy, 100, 1_100));
        ha.on_trade(&trade(1, 4, Side::Buy, 100, 1_200));

        ha.note_funding_source(mint, wallet(2), wallet(50));
        ha.note_funding_source(mint, wallet(3), wallet(50));
        ha.note_funding_source(mint, wallet(4), wallet(51)); // singleton, no cluster

        clock.set(10_000);
        let m = ha.update(&mint).unwrap();
        assert_eq!(m.cluster_count, 1);
    }

    #[test]
    fn velocity_from_snapshot_diff() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);

        // First snapshot at t=60s with 1 holder.
        ha.on_trade(&trade(1, 2, Side::Buy, 100, 60_000));
        // Five minutes later ten more holders arrive and snapshot again.
        for i in 0..10u8 {
            ha.on_trade(&trade(1, 20 + i, Side::Buy, 100, 360_000 + i as i64));
        }
        ha.on_trade(&trade(1, 40, Side::Buy, 100, 421_000));

        clock.set(421_000);
        let m = ha.update(&mint).unwrap();
        assert!(m.holder_velocity > 0.0, "velocity {}", m.holder_velocity);
        assert_eq!(m.trend, Trend::Growing);
    }

    #[test]
    fn stale_after_inactivity() {
        let clock = SimClock::new(0);
        let ha = HolderAnalyzer::new(clock.clone());
        let mint = TokenId([1; 32]);
        ha.on_trade(&trade(1, 2, Side::Buy, 100, 1_000));
        clock.set(2_000);
        ha.update(&mint).unwrap();
        clock.set(2_000 + STALE_AFTER_MS + 1);
        assert!(ha.latest_metrics(&mint).unwrap().is_stale);
    }
}
