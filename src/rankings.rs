// =============================================================================
// Rankings — top-N momentum leaderboard with rank-change tracking
// =============================================================================
//
// Rebuilt on every aggregator tick from the latest momentum metrics. Ties
// break by token id so replays produce identical boards. Entry/exit events
// fire when top-10 membership changes.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::MomentumMetrics;
use crate::types::{SignalType, TokenId};

/// Membership band that triggers entry/exit events.
const EVENT_BAND: usize = 10;

/// One leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankEntry {
    pub token: TokenId,
    pub score: f64,
    pub signal: SignalType,
    /// 1-based rank.
    pub rank: usize,
    /// Positive = climbed since the previous tick.
    pub rank_change: i64,
}

/// Emitted when the top-10 membership changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RankingEvent {
    TopEntry {
        token: TokenId,
        rank: usize,
        score: f64,
    },
    TopExit {
        token: TokenId,
    },
}

/// Maintains the sorted top-N view.
pub struct Rankings {
    top_n: usize,
    board: RwLock<Vec<RankEntry>>,
    prev_ranks: RwLock<HashMap<TokenId, usize>>,
}

impl Rankings {
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n: top_n.max(1),
            board: RwLock::new(Vec::new()),
            prev_ranks: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the board from this tick's metrics and diff the top-10.
    pub fn update(&self, metrics: &[MomentumMetrics]) -> Vec<RankingEvent> {
        let mut sorted: Vec<&MomentumMetrics> = metrics.iter().collect();
        sorted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.token.cmp(&b.token))
        });
        sorted.truncate(self.top_n);

        let prev_ranks = self.prev_ranks.read().clone();
        let board: Vec<RankEntry> = sorted
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let rank = i + 1;
                let rank_change = prev_ranks
                    .get(&m.token)
                    .map(|prev| *prev as i64 - rank as i64)
                    .unwrap_or(0);
                RankEntry {
                    token: m.token,
                    score: m.score,
                    signal: m.signal,
                    rank,
                    rank_change,
                }
            })
            .collect();

        // Top-10 membership diff.
        let prev_top: HashSet<TokenId> = prev_ranks
            .iter()
            .filter(|(_, r)| **r <= EVENT_BAND)
            .map(|(t, _)| *t)
            .collect();
        let new_top: HashSet<TokenId> = board
            .iter()
            .filter(|e| e.rank <= EVENT_BAND)
            .map(|e| e.token)
            .collect();

        let mut events = Vec::new();
        for entry in board.iter().filter(|e| e.rank <= EVENT_BAND) {
            if !prev_top.contains(&entry.token) {
                debug!(token = %entry.token, rank = entry.rank, "entered top 10");
                events.push(RankingEvent::TopEntry {
                    token: entry.token,
                    rank: entry.rank,
                    score: entry.score,
                });
            }
        }
        for token in prev_top.difference(&new_top) {
            debug!(token = %token, "left top 10");
            events.push(RankingEvent::TopExit { token: *token });
        }

        *self.prev_ranks.write() = board.iter().map(|e| (e.token, e.rank)).collect();
        *self.board.write() = board;
        events
    }

    /// Current leaderboard, best first.
    pub fn board(&self) -> Vec<RankEntry> {
        self.board.read().clone()
    }

    /// Top `n` rows for the dashboard.
    pub fn top(&self, n: usize) -> Vec<RankEntry> {
        self.board.read().iter().take(n).cloned().collect()
    }

    pub fn remove_token(&self, token: &TokenId) {
        self.board.write().retain(|e| e.token != *token);
        self.prev_ranks.write().remove(token);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ScoreBreakdown;

    fn metrics(token_byte: u8, score: f64) -> MomentumMetrics {
        MomentumMetrics {
            token: TokenId([token_byte; 32]),
            calculated_at: 0,
            score,
            raw_score: score,
            signal: SignalType::Hold,
            breakdown: ScoreBreakdown {
                volume: 50.0,
                holders: 50.0,
                liquidity: 50.0,
                safety: 50.0,
            },
            in_entry_zone: false,
            should_enter: false,
            should_exit: false,
            reasons: Vec::new(),
            decay_applied: false,
            data_completeness: 1.0,
        }
    }

    #[test]
    fn board_sorts_and_truncates() {
        let rankings = Rankings::new(3);
        let input: Vec<MomentumMetrics> = (1..=5u8)
            .map(|i| metrics(i, i as f64 * 10.0))
            .collect();
        rankings.update(&input);

        let board = rankings.board();
        assert_eq!(board.len(), 3);
        assert_eq!(board[0].token, TokenId([5; 32]));
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].token, TokenId([3; 32]));
    }

    #[test]
    fn ties_break_by_token_id() {
        let rankings = Rankings::new(5);
        let input = vec![metrics(7, 60.0), metrics(2, 60.0)];
        rankings.update(&input);
        let board = rankings.board();
        assert_eq!(board[0].token, TokenId([2; 32]));
        assert_eq!(board[1].token, TokenId([7; 32]));
    }

    #[test]
    fn first_tick_emits_entries_only() {
        let rankings = Rankings::new(20);
        let events = rankings.update(&[metrics(1, 80.0), metrics(2, 70.0)]);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, RankingEvent::TopEntry { .. })));
    }

    #[test]
    fn membership_changes_emit_entry_and_exit() {
        let rankings = Rankings::new(20);
        // Fill the top 10 with tokens 1..=10.
        let first: Vec<MomentumMetrics> = (1..=10u8)
            .map(|i| metrics(i, 100.0 - i as f64))
            .collect();
        rankings.update(&first);

        // Token 11 displaces token 10.
        let mut second = first.clone();
        second[9] = metrics(10, 10.0);
        second.push(metrics(11, 95.0));
        let events = rankings.update(&second);

        assert!(events.contains(&RankingEvent::TopEntry {
            token: TokenId([11; 32]),
            rank: 2,
            score: 95.0
        }));
        assert!(events.contains(&RankingEvent::TopExit {
            token: TokenId([10; 32])
        }));
    }

    #[test]
    fn rank_change_tracks_movement() {
        let rankings = Rankings::new(20);
        rankings.update(&[metrics(1, 90.0), metrics(2, 80.0)]);
        // Token 2 overtakes token 1.
        rankings.update(&[metrics(1, 70.0), metrics(2, 85.0)]);
        let board = rankings.board();
        let two = board.iter().find(|e| e.token == TokenId([2; 32])).unwrap();
        assert_eq!(two.rank, 1);
        assert_eq!(two.rank_change, 1);
        let one = board.iter().find(|e| e.token == TokenId([1; 32])).unwrap();
        assert_eq!(one.rank_change, -1);
    }
}
