// =============================================================================
// Momentum Aggregator — combines analyzer channels into one 0–100 score
// =============================================================================
//
// Every update tick (15 s) the aggregator walks the tracked, non-migrated
// tokens and:
//   1. Reads the latest analyzer snapshots (missing channel => neutral 50,
//      zero confidence).
//   2. Computes per-channel subscores via piecewise rules.
//   3. Takes the weighted sum and applies exponential decay toward 50
//      since the last signal (5-minute half-life).
//   4. Derives data completeness, the signal tag, and the entry/exit flags.
//
// Signal priority: unsafe => DO_NOT_TRADE, thin data => HOLD, migrated
// curve => STRONG_SELL, then plain score thresholds.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzers::{
    HolderAnalyzer, LiquidityAnalyzer, SafetyAnalyzer, Trend, VolumeAnalyzer, VolumeTrend,
};
use crate::clock::SharedClock;
use crate::config::AggregatorParams;
use crate::tracker::TokenTracker;
use crate::types::{SignalType, TimestampMs, TokenId};

/// Signal history depth kept per token for decay and the audit trail.
const HISTORY_LEN: usize = 20;

/// Per-channel subscores feeding the composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub volume: f64,
    pub holders: f64,
    pub liquidity: f64,
    pub safety: f64,
}

/// The aggregator's per-token output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumMetrics {
    pub token: TokenId,
    pub calculated_at: TimestampMs,
    /// Composite score after decay, 0–100.
    pub score: f64,
    /// Composite before decay.
    pub raw_score: f64,
    pub signal: SignalType,
    pub breakdown: ScoreBreakdown,
    pub in_entry_zone: bool,
    pub should_enter: bool,
    pub should_exit: bool,
    pub reasons: Vec<String>,
    pub decay_applied: bool,
    /// Weighted coverage of channels with confidence > 0.3, in [0, 1].
    pub data_completeness: f64,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    at: TimestampMs,
    #[allow(dead_code)]
    score: f64,
    signal: SignalType,
}

/// Combines the four analyzer channels into momentum metrics and signals.
pub struct MomentumAggregator {
    clock: SharedClock,
    params: AggregatorParams,
    volume: Arc<VolumeAnalyzer>,
    holders: Arc<HolderAnalyzer>,
    liquidity: Arc<LiquidityAnalyzer>,
    safety: Arc<SafetyAnalyzer>,
    tracker: Arc<TokenTracker>,
    history: RwLock<HashMap<TokenId, VecDeque<HistoryEntry>>>,
    latest: RwLock<HashMap<TokenId, MomentumMetrics>>,
}

impl MomentumAggregator {
    pub fn new(
        clock: SharedClock,
        params: AggregatorParams,
        volume: Arc<VolumeAnalyzer>,
        holders: Arc<HolderAnalyzer>,
        liquidity: Arc<LiquidityAnalyzer>,
        safety: Arc<SafetyAnalyzer>,
        tracker: Arc<TokenTracker>,
    ) -> Self {
        Self {
            clock,
            params,
            volume,
            holders,
            liquidity,
            safety,
            tracker,
            history: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// One aggregator tick over all tracked, non-migrated tokens.
    pub fn update_all(&self) -> Vec<MomentumMetrics> {
        let mut out = Vec::new();
        for token in self.tracker.active_ids() {
            if let Some(m) = self.update_token(&token) {
                out.push(m);
            }
        }
        out
    }

    /// Recompute momentum for a single token.
    pub fn update_token(&self, token: &TokenId) -> Option<MomentumMetrics> {
        let now = self.clock.now_ms();
        let p = &self.params;
        let mut reasons = Vec::new();

        // ── 1. Read analyzer snapshots (tick-start consistency) ──────────
        let vol = self.volume.latest_metrics(token);
        let hold = self.holders.latest_metrics(token);
        let liq = self.liquidity.latest_metrics(token);
        let safe = self.safety.latest_metrics(token);

        // ── 2. Channel subscores ─────────────────────────────────────────
        let volume_score = vol
            .as_ref()
            .map(|m| {
                volume_subscore(
                    m.has_spike,
                    m.trend,
                    m.buy_ratio,
                    m.size_skew,
                    m.wash_score,
                    m.confidence,
                )
            })
            .unwrap_or(50.0);
        let holder_score = hold
            .as_ref()
            .map(|m| {
                holder_subscore(
                    m.distribution_score,
                    m.quality_score,
                    m.trend,
                    m.red_flags.len(),
                    m.confidence,
                )
            })
            .unwrap_or(50.0);
        let liquidity_score = liq
            .as_ref()
            .map(|m| {
                liquidity_subscore(
                    m.depth_score,
                    m.progress_pct,
                    m.velocity_pct_per_min,
                    m.trend,
                    m.confidence,
                    p.entry_zone_low,
                    p.entry_zone_high,
                )
            })
            .unwrap_or(50.0);
        let safety_score = safe.as_ref().map(|m| m.score).unwrap_or(50.0);

        let breakdown = ScoreBreakdown {
            volume: volume_score,
            holders: holder_score,
            liquidity: liquidity_score,
            safety: safety_score,
        };

        // ── 3. Weighted composite and decay ──────────────────────────────
        let raw_score = volume_score * p.volume_weight
            + holder_score * p.holder_weight
            + liquidity_score * p.liquidity_weight
            + safety_score * p.safety_weight;

        let last_signal_at = self
            .history
            .read()
            .get(token)
            .and_then(|h| h.back().map(|e| e.at));
        let (score, decay_applied) = if p.decay_enabled {
            match last_signal_at {
                Some(at) if now > at => {
                    let dt_secs = (now - at) as f64 / 1_000.0;
                    let factor = 0.5_f64.powf(dt_secs / p.decay_half_life_secs);
                    (50.0 + (raw_score - 50.0) * factor, true)
                }
                _ => (raw_score, false),
            }
        } else {
            (raw_score, false)
        };

        // ── 4. Data completeness ─────────────────────────────────────────
        let mut completeness = 0.0;
        if vol.as_ref().map(|m| m.confidence > 0.3).unwrap_or(false) {
            completeness += p.volume_weight;
        }
        if hold.as_ref().map(|m| m.confidence > 0.3).unwrap_or(false) {
            completeness += p.holder_weight;
        }
        if liq.as_ref().map(|m| m.confidence > 0.3).unwrap_or(false) {
            completeness += p.liquidity_weight;
        }
        if safe.as_ref().map(|m| m.confidence > 0.3).unwrap_or(false) {
            completeness += p.safety_weight;
        }

        // ── 5. Signal resolution ─────────────────────────────────────────
        let safety_ok = safe
            .as_ref()
            .map(|m| m.is_safe_to_trade && m.score >= p.min_safety_score)
            .unwrap_or(true);
        if !safety_ok {
            if let Some(m) = safe.as_ref() {
                match &m.instant_reject {
                    Some(r) => reasons.push(r.clone()),
                    None => reasons.push(format!(
                        "safety score {:.0} below minimum {:.0}",
                        m.score, p.min_safety_score
                    )),
                }
            }
        }
        let migrated =
            liq.as_ref().map(|m| m.is_complete).unwrap_or(false) || self.tracker.is_migrated(token);
        if migrated {
            reasons.push("bonding curve complete — exit only".to_string());
        }

        let signal = resolve_signal(score, completeness, safety_ok, migrated, p);
        if signal == SignalType::Hold && completeness < p.min_data_completeness {
            reasons.push(format!(
                "data completeness {completeness:.2} below {:.2}",
                p.min_data_completeness
            ));
        }

        let in_entry_zone = liq
            .as_ref()
            .map(|m| m.progress_pct >= p.entry_zone_low && m.progress_pct <= p.entry_zone_high)
            .unwrap_or(false);

        let should_enter = signal.is_buy() && in_entry_zone && safety_ok && !migrated;
        let should_exit = signal.is_sell() || signal == SignalType::DoNotTrade;

        if should_enter {
            reasons.push(format!("score {score:.0} with progress in entry zone"));
        }

        // ── 6. History + emit ────────────────────────────────────────────
        let metrics = MomentumMetrics {
            token: *token,
            calculated_at: now,
            score,
            raw_score,
            signal,
            breakdown,
            in_entry_zone,
            should_enter,
            should_exit,
            reasons,
            decay_applied,
            data_completeness: completeness,
        };

        {
            let mut history = self.history.write();
            let entries = history.entry(*token).or_default();
            // Identical re-runs within one tick must stay idempotent, so a
            // same-timestamp entry replaces rather than appends.
            if entries.back().map(|e| e.at) == Some(now) {
                entries.pop_back();
            }
            entries.push_back(HistoryEntry {
                at: now,
                score,
                signal,
            });
            while entries.len() > HISTORY_LEN {
                entries.pop_front();
            }
        }

        debug!(
            token = %token,
            score = format!("{score:.1}"),
            signal = %signal,
            completeness = format!("{completeness:.2}"),
            "momentum updated"
        );

        self.latest.write().insert(*token, metrics.clone());
        Some(metrics)
    }

    pub fn latest_metrics(&self, token: &TokenId) -> Option<MomentumMetrics> {
        self.latest.read().get(token).cloned()
    }

    /// All latest metrics (for rankings and the dashboard).
    pub fn all_latest(&self) -> Vec<MomentumMetrics> {
        self.latest.read().values().cloned().collect()
    }

    /// Most recent signals for a token, newest last.
    pub fn signal_history(&self, token: &TokenId) -> Vec<(TimestampMs, SignalType)> {
        self.history
            .read()
            .get(token)
            .map(|h| h.iter().map(|e| (e.at, e.signal)).collect())
            .unwrap_or_default()
    }

    pub fn remove_token(&self, token: &TokenId) {
        self.history.write().remove(token);
        self.latest.write().remove(token);
    }
}

// =============================================================================
// Subscore rules
// =============================================================================

/// Pull `raw` toward neutral 50 in proportion to data confidence.
fn confidence_scaled(raw: f64, confidence: f64) -> f64 {
    50.0 + (raw - 50.0) * confidence.clamp(0.0, 1.0)
}

fn volume_subscore(
    has_spike: bool,
    trend: VolumeTrend,
    buy_ratio: f64,
    size_skew: f64,
    wash_score: f64,
    confidence: f64,
) -> f64 {
    let mut s: f64 = 50.0;
    if has_spike {
        s += 20.0;
    }
    match trend {
        VolumeTrend::Accelerating => s += 15.0,
        VolumeTrend::Decelerating => s -= 15.0,
        VolumeTrend::Stable => {}
    }
    if buy_ratio >= 0.6 {
        s += 10.0;
    } else if buy_ratio <= 0.4 {
        s -= 10.0;
    }
    // Bot-like uniform sizing is penalised, organic dispersion rewarded.
    s -= 20.0 * size_skew;
    if wash_score >= 0.6 {
        s -= 20.0;
    }
    confidence_scaled(s.clamp(0.0, 100.0), confidence)
}

fn holder_subscore(
    distribution_score: f64,
    quality_score: f64,
    trend: Trend,
    red_flags: usize,
    confidence: f64,
) -> f64 {
    let mut s = (distribution_score * 5.0 + quality_score * 5.0) / 2.0;
    match trend {
        Trend::Growing => s += 10.0,
        Trend::Shrinking => s -= 10.0,
        Trend::Stable => {}
    }
    s -= (red_flags as f64 * 5.0).min(20.0);
    confidence_scaled(s.clamp(0.0, 100.0), confidence)
}

#[allow(clippy::too_many_arguments)]
fn liquidity_subscore(
    depth_score: f64,
    progress_pct: f64,
    velocity_pct_per_min: f64,
    trend: Trend,
    confidence: f64,
    entry_zone_low: f64,
    entry_zone_high: f64,
) -> f64 {
    let mut s = depth_score * 10.0;
    if progress_pct >= entry_zone_low && progress_pct <= entry_zone_high {
        s += 15.0;
    }
    if progress_pct < 30.0 {
        s -= 25.0;
    }
    if velocity_pct_per_min > 0.5 {
        s += 10.0;
    }
    if trend == Trend::Shrinking {
        s -= 10.0;
    }
    confidence_scaled(s.clamp(0.0, 100.0), confidence)
}

/// Signal priority rules. `safety_ok` is false when the safety analyzer
/// flags the token or its score is below the configured minimum.
fn resolve_signal(
    score: f64,
    completeness: f64,
    safety_ok: bool,
    migrated: bool,
    p: &AggregatorParams,
) -> SignalType {
    if !safety_ok {
        return SignalType::DoNotTrade;
    }
    if completeness < p.min_data_completeness {
        return SignalType::Hold;
    }
    if migrated {
        return SignalType::StrongSell;
    }
    if score >= 80.0 {
        SignalType::StrongBuy
    } else if score >= 65.0 {
        SignalType::Buy
    } else if score < 25.0 {
        SignalType::StrongSell
    } else if score < 40.0 {
        SignalType::Sell
    } else {
        SignalType::Hold
    }
}
