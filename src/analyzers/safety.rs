// =============================================================================
// Safety Analyzer — weighted rug-pull checks with instant-reject gates
// =============================================================================
//
// Eight weighted checks produce a 0–100 score. Independently of the score,
// any instant-reject condition (active authority, critical concentration,
// too-young token, creator dump heuristic) marks the token not safe to
// trade; the aggregator turns that into DO_NOT_TRADE.
//
// Authority and lock facts cannot be derived from the event stream; they
// arrive via `set_facts` (an RPC checker in production, fixtures in tests)
// and default to "unknown", which scores conservatively but does not
// reject.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::config::SafetyWeights;
use crate::events::{TokenLaunched, TokenTrade};
use crate::types::{Side, TimestampMs, TokenId, WalletId};
use crate::window::LamportWindow;

use super::{ErrorBudget, STALE_AFTER_MS};

const FIVE_MIN_MS: i64 = 5 * 60 * 1_000;
const WINDOW_RETENTION_MS: i64 = 2 * 60 * 60 * 1_000;

/// Minimum token age before entries are considered at all.
const MIN_TOKEN_AGE_MS: i64 = 60_000;
/// Age at which the age subscore saturates.
const MATURE_AGE_MS: i64 = 30 * 60 * 1_000;
/// Top-10 concentration above this is an instant reject.
const CRITICAL_TOP10_PCT: f64 = 70.0;
/// Creator selling this share of their holdings soon after launch is
/// treated as a known scam pattern.
const CREATOR_DUMP_PCT: f64 = 50.0;
const CREATOR_DUMP_WINDOW_MS: i64 = 5 * 60 * 1_000;

/// Externally supplied on-chain facts. `None` means unknown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenFacts {
    pub mint_authority_active: Option<bool>,
    pub freeze_authority_active: Option<bool>,
    pub lp_locked: Option<bool>,
}

/// One scored check in the safety breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

/// Immutable per-token safety snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyMetrics {
    pub token: TokenId,
    pub calculated_at: TimestampMs,
    pub confidence: f64,
    pub is_stale: bool,
    pub data_age_ms: i64,

    /// Weighted composite in [0, 100].
    pub score: f64,
    pub is_safe_to_trade: bool,
    pub instant_reject: Option<String>,
    pub checks: Vec<SafetyCheck>,
}

struct SafetyState {
    creator: Option<WalletId>,
    launched_at: Option<TimestampMs>,
    has_name: bool,
    has_symbol: bool,
    has_uri: bool,
    facts: TokenFacts,
    balances: HashMap<WalletId, i128>,
    creator_bought: u64,
    creator_sold: u64,
    creator_first_sell_at: Option<TimestampMs>,
    buys: LamportWindow,
    sells: LamportWindow,
    trades_seen: u64,
}

impl SafetyState {
    fn new() -> Self {
        Self {
            creator: None,
            launched_at: None,
            has_name: false,
            has_symbol: false,
            has_uri: false,
            facts: TokenFacts::default(),
            balances: HashMap::new(),
            creator_bought: 0,
            creator_sold: 0,
            creator_first_sell_at: None,
            buys: LamportWindow::new(WINDOW_RETENTION_MS, 5_000),
            sells: LamportWindow::new(WINDOW_RETENTION_MS, 5_000),
            trades_seen: 0,
        }
    }
}

/// Per-token one-shot and periodic safety checks.
pub struct SafetyAnalyzer {
    clock: SharedClock,
    weights: SafetyWeights,
    budget: ErrorBudget,
    states: RwLock<HashMap<TokenId, SafetyState>>,
    latest: RwLock<HashMap<TokenId, SafetyMetrics>>,
}

impl SafetyAnalyzer {
    pub fn new(clock: SharedClock, weights: SafetyWeights) -> Self {
        Self {
            clock,
            weights,
            budget: ErrorBudget::new(),
            states: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    pub fn on_launch(&self, ev: &TokenLaunched) {
        let mut states = self.states.write();
        let state = states.entry(ev.mint).or_insert_with(SafetyState::new);
        state.creator = Some(ev.creator);
        state.launched_at = Some(ev.timestamp);
        state.has_name = ev.name.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
        state.has_symbol = ev.symbol.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
        state.has_uri = ev.uri.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
    }

    pub fn on_trade(&self, ev: &TokenTrade) {
        let mut states = self.states.write();
        let state = states.entry(ev.mint).or_insert_with(SafetyState::new);
        state.trades_seen += 1;

        let entry = state.balances.entry(ev.trader).or_insert(0);
        match ev.side {
            Side::Buy => {
                *entry += ev.token_amount as i128;
                state.buys.add(ev.sol_amount, ev.timestamp);
            }
            Side::Sell => {
                *entry -= ev.token_amount as i128;
                state.sells.add(ev.sol_amount, ev.timestamp);
            }
        }

        if Some(ev.trader) == state.creator {
            match ev.side {
                Side::Buy => state.creator_bought += ev.token_amount,
                Side::Sell => {
                    state.creator_sold += ev.token_amount;
                    state.creator_first_sell_at.get_or_insert(ev.timestamp);
                }
            }
        }
    }

    /// Supply authority / lock facts discovered out of band.
    pub fn set_facts(&self, mint: TokenId, facts: TokenFacts) {
        let mut states = self.states.write();
        states.entry(mint).or_insert_with(SafetyState::new).facts = facts;
    }

    /// Recompute and store the safety snapshot for `token`.
    pub fn update(&self, token: &TokenId) -> Option<SafetyMetrics> {
        let now = self.clock.now_ms();
        let states = self.states.read();
        let state = states.get(token)?;
        let metrics = compute_metrics(state, *token, now, &self.weights);
        drop(states);

        self.budget.record_success();
        self.latest.write().insert(*token, metrics.clone());
        Some(metrics)
    }

    pub fn latest_metrics(&self, token: &TokenId) -> Option<SafetyMetrics> {
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

fn compute_metrics(
    state: &SafetyState,
    token: TokenId,
    now: TimestampMs,
    weights: &SafetyWeights,
) -> SafetyMetrics {
    let mut instant_reject: Option<String> = None;

    // --- Authority -----------------------------------------------------------
    let authority_score = match (
        state.facts.mint_authority_active,
        state.facts.freeze_authority_active,
    ) {
        (Some(true), _) | (_, Some(true)) => {
            instant_reject.get_or_insert_with(|| "token authority still active".to_string());
            0.0
        }
        (Some(false), Some(false)) => 100.0,
        _ => 70.0, // unknown
    };

    // --- Concentration -------------------------------------------------------
    let top10 = top10_concentration_pct(&state.balances);
    if top10 > CRITICAL_TOP10_PCT {
        instant_reject
            .get_or_insert_with(|| format!("top-10 concentration {top10:.0}% above critical"));
    }
    // 100 at <= 30 %, linearly down to 0 at >= 60 %.
    let concentration_score = (100.0 - (top10 - 30.0) / 30.0 * 100.0).clamp(0.0, 100.0);

    // --- Distribution --------------------------------------------------------
    let holders = state.balances.values().filter(|b| **b > 0).count();
    let distribution_score = (holders as f64 / 100.0 * 100.0).min(100.0);

    // --- Creator behaviour ---------------------------------------------------
    let creator_sold_pct = if state.creator_bought > 0 {
        state.creator_sold as f64 / state.creator_bought as f64 * 100.0
    } else if state.creator_sold > 0 {
        100.0
    } else {
        0.0
    };
    let dumped_early = match (state.creator_first_sell_at, state.launched_at) {
        (Some(sell_at), Some(launch_at)) => {
            creator_sold_pct >= CREATOR_DUMP_PCT && sell_at - launch_at <= CREATOR_DUMP_WINDOW_MS
        }
        _ => false,
    };
    if dumped_early {
        instant_reject.get_or_insert_with(|| {
            format!("creator sold {creator_sold_pct:.0}% of holdings right after launch")
        });
    }
    let creator_score = (100.0 - creator_sold_pct).clamp(0.0, 100.0);

    // --- Age -----------------------------------------------------------------
    let age_ms = state.launched_at.map(|t| now - t).unwrap_or(0);
    if state.launched_at.is_some() && age_ms < MIN_TOKEN_AGE_MS {
        instant_reject.get_or_insert_with(|| "token younger than minimum age".to_string());
    }
    let age_score = (age_ms as f64 / MATURE_AGE_MS as f64 * 100.0).clamp(0.0, 100.0);

    // --- Liquidity lock ------------------------------------------------------
    let lock_score = match state.facts.lp_locked {
        Some(true) => 100.0,
        Some(false) => 20.0,
        None => 60.0,
    };

    // --- Social presence -----------------------------------------------------
    let present = [state.has_name, state.has_symbol, state.has_uri]
        .iter()
        .filter(|b| **b)
        .count();
    let social_score = present as f64 / 3.0 * 100.0;

    // --- Trading pattern -----------------------------------------------------
    let buy_5m = state.buys.sum_sol_in(FIVE_MIN_MS, now);
    let sell_5m = state.sells.sum_sol_in(FIVE_MIN_MS, now);
    let pattern_score = if buy_5m <= 0.0 && sell_5m <= 0.0 {
        70.0 // nothing recent to judge
    } else if buy_5m <= 0.0 {
        0.0 // pure selling
    } else {
        let ratio = sell_5m / buy_5m;
        // 100 while sells <= buys, down to 0 at 3x sell pressure.
        (100.0 - (ratio - 1.0) / 2.0 * 100.0).clamp(0.0, 100.0)
    };

    let checks = vec![
        SafetyCheck { name: "authority".to_string(), score: authority_score, weight: weights.authority },
        SafetyCheck { name: "concentration".to_string(), score: concentration_score, weight: weights.concentration },
        SafetyCheck { name: "distribution".to_string(), score: distribution_score, weight: weights.distribution },
        SafetyCheck { name: "creator".to_string(), score: creator_score, weight: weights.creator },
        SafetyCheck { name: "age".to_string(), score: age_score, weight: weights.age },
        SafetyCheck { name: "liquidity_lock".to_string(), score: lock_score, weight: weights.liquidity_lock },
        SafetyCheck { name: "social".to_string(), score: social_score, weight: weights.social },
        SafetyCheck { name: "trading_pattern".to_string(), score: pattern_score, weight: weights.trading_pattern },
    ];

    let score: f64 = checks.iter().map(|c| c.score * c.weight).sum();

    SafetyMetrics {
        token,
        calculated_at: now,
        confidence: confidence(state, &state.facts),
        is_stale: false,
        data_age_ms: 0,
        score,
        is_safe_to_trade: instant_reject.is_none(),
        instant_reject,
        checks,
    }
}

fn top10_concentration_pct(balances: &HashMap<WalletId, i128>) -> f64 {
    let mut held: Vec<i128> = balances.values().copied().filter(|b| *b > 0).collect();
    let total: i128 = held.iter().sum();
    if total <= 0 {
        return 0.0;
    }
    held.sort_unstable_by(|a, b| b.cmp(a));
    let top: i128 = held.iter().take(10).sum();
    top as f64 / total as f64 * 100.0
}

/// Confidence reflects how much of the input space we have actually seen.
fn confidence(state: &SafetyState, facts: &TokenFacts) -> f64 {
    let mut c: f64 = 0.0;
    if state.launched_at.is_some() {
        c += 0.2;
    }
    let known_facts = [
        facts.mint_authority_active,
        facts.freeze_authority_active,
        facts.lp_locked,
    ]
    .iter()
    .filter(|f| f.is_some())
    .count();
    c += known_facts as f64 * 0.1;
    c += match state.trades_seen {
        0 => 0.0,
        1..=9 => 0.2,
        10..=49 => 0.35,
        _ => 0.5,
    };
    c.min(1.0)
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

    fn launch(mint: u8, creator: u8, t: i64) -> TokenLaunched {
        TokenLaunched {
            mint: TokenId([mint; 32]),
            curve: TokenId([0xCC; 32]),
            name: Some("Nova".into()),
            symbol: Some("NOVA".into()),
            uri: Some("https://meta".into()),
            creator: wallet(creator),
            signature: String::new(),
            timestamp: t,
            slot: 0,
        }
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

    fn analyzer() -> (SafetyAnalyzer, std::sync::Arc<SimClock>) {
        let clock = SimClock::new(0);
        (
            SafetyAnalyzer::new(clock.clone(), SafetyWeights::default()),
            clock,
        )
    }

    #[test]
    fn active_authority_is_instant_reject() {
        let (sa, clock) = analyzer();
        let mint = TokenId([1; 32]);
        sa.on_launch(&launch(1, 9, 0));
        sa.set_facts(
            mint,
            TokenFacts {
                mint_authority_active: Some(true),
                freeze_authority_active: Some(false),
                lp_locked: None,
            },
        );
        clock.set(MATURE_AGE_MS);
        let m = sa.update(&mint).unwrap();
        assert!(!m.is_safe_to_trade);
        assert!(m.instant_reject.unwrap().contains("authority"));
    }

    #[test]
    fn young_token_is_rejected_then_accepted() {
        let (sa, clock) = analyzer();
        let mint = TokenId([1; 32]);
        sa.on_launch(&launch(1, 9, 0));

        clock.set(30_000);
        let m = sa.update(&mint).unwrap();
        assert!(!m.is_safe_to_trade);

        clock.set(MIN_TOKEN_AGE_MS + 1);
        let m = sa.update(&mint).unwrap();
        assert!(m.is_safe_to_trade);
    }

    #[test]
    fn critical_concentration_rejects() {
        let (sa, clock) = analyzer();
        let mint = TokenId([1; 32]);
        sa.on_launch(&launch(1, 9, 0));

        // One whale holds everything.
        sa.on_trade(&trade(1, 2, Side::Buy, 1_000_000, 1_000));
        clock.set(MATURE_AGE_MS);
        let m = sa.update(&mint).unwrap();
        assert!(!m.is_safe_to_trade);
        assert!(m.instant_reject.unwrap().contains("concentration"));
    }

    #[test]
    fn creator_dump_right_after_launch_rejects() {
        let (sa, clock) = analyzer();
        let mint = TokenId([1; 32]);
        sa.on_launch(&launch(1, 9, 0));

        // Spread supply around so concentration stays clear of critical.
        for i in 0..30u8 {
            sa.on_trade(&trade(1, 100 + i, Side::Buy, 100_000, 1_000 + i as i64));
        }
        sa.on_trade(&trade(1, 9, Side::Buy, 200_000, 2_000));
        sa.on_trade(&trade(1, 9, Side::Sell, 150_000, 120_000)); // 75 % inside 5 min

        clock.set(MATURE_AGE_MS);
        let m = sa.update(&mint).unwrap();
        assert!(!m.is_safe_to_trade);
        assert!(m.instant_reject.unwrap().contains("creator"));
    }

    #[test]
    fn healthy_token_scores_well() {
        let (sa, clock) = analyzer();
        let mint = TokenId([1; 32]);
        sa.on_launch(&launch(1, 9, 0));
        sa.set_facts(
            mint,
            TokenFacts {
                mint_authority_active: Some(false),
                freeze_authority_active: Some(false),
                lp_locked: Some(true),
            },
        );
        for i in 0..50u8 {
            sa.on_trade(&trade(1, 100 + i, Side::Buy, 100_000, 1_000 + i as i64 * 100));
        }

        clock.set(MATURE_AGE_MS + 1);
        let m = sa.update(&mint).unwrap();
        assert!(m.is_safe_to_trade);
        assert!(m.score > 70.0, "score {}", m.score);
        assert_eq!(m.checks.len(), 8);
        // Weighted sum of the breakdown reproduces the composite.
        let recomputed: f64 = m.checks.iter().map(|c| c.score * c.weight).sum();
        assert!((recomputed - m.score).abs() < 1e-9);
    }
}
