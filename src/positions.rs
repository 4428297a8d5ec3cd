// =============================================================================
// Position Manager — lifecycle of entries, ladder exits and trailing stops
// =============================================================================
//
// Life-cycle:
//   Pending -> Open -> (partial take-profit sells) -> Closed
//   Open -> Liquidated (stop loss)
//
// The monitor tick (5 s) refreshes prices, recomputes unrealized P&L and
// emits at most one trigger per position per tick, take-profit before
// stop-loss so simultaneous hits resolve deterministically:
//   - take-profit level i: sell level.sell_percent of the *initial* amount
//     (capped by what remains); the final level sells everything left; the
//     first level also moves the stop to break-even
//   - stop loss: sell 100 % of the remaining amount, position Liquidated
//   - after every confirmed sell at price p the stop trails up to
//     max(stop, p * (1 - trailing_pct/100))
//
// Partial sells release cost basis proportional to the sold fraction of
// the initial amount, which keeps realized P&L monotonic per position.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::{PositionParams, TakeProfitLevel};
use crate::types::{ExitReason, PositionStatus, TimestampMs, TokenId};

/// One rung of the ladder plus its fired flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderLevel {
    pub multiplier: f64,
    pub sell_percent: f64,
    pub triggered: bool,
}

/// A tracked position. Amounts are token base units; prices are SOL per
/// display token; cost/proceeds are SOL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token: TokenId,
    pub status: PositionStatus,
    pub entry_price: f64,
    pub entry_time: TimestampMs,
    pub initial_amount: u64,
    pub current_amount: u64,
    pub cost_basis_sol: f64,
    pub current_price: f64,
    pub unrealized_pnl_sol: f64,
    pub realized_pnl_sol: f64,
    pub total_pnl_sol: Option<f64>,
    pub stop_loss_price: f64,
    pub take_profit_levels: Vec<LadderLevel>,
    pub exit_order_ids: Vec<String>,
    pub exit_reason: Option<ExitReason>,
    pub closed_at: Option<TimestampMs>,
}

impl Position {
    /// Cost basis still locked in the remaining amount.
    pub fn remaining_cost_sol(&self) -> f64 {
        if self.initial_amount == 0 {
            return 0.0;
        }
        self.cost_basis_sol * self.current_amount as f64 / self.initial_amount as f64
    }

    fn token_display_amount(amount: u64) -> f64 {
        amount as f64 / 1_000_000.0
    }

    fn market_value_sol(&self) -> f64 {
        Self::token_display_amount(self.current_amount) * self.current_price
    }
}

/// An exit the executor must perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTrigger {
    pub position_id: String,
    pub token: TokenId,
    pub reason: ExitReason,
    /// Token base units to sell.
    pub sell_amount: u64,
    /// Ladder index for take-profit triggers.
    pub level: Option<usize>,
}

/// Thread-safe owner of all open and closed positions.
pub struct PositionManager {
    clock: SharedClock,
    params: PositionParams,
    open: RwLock<HashMap<String, Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionManager {
    pub fn new(clock: SharedClock, params: PositionParams) -> Self {
        Self {
            clock,
            params,
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Entry
    // -------------------------------------------------------------------------

    /// Open a position from a confirmed buy and return its id.
    pub fn open_position(
        &self,
        token: TokenId,
        entry_price: f64,
        amount: u64,
        cost_sol: f64,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now_ms();

        let ladder: Vec<LadderLevel> = self
            .params
            .take_profit_levels
            .iter()
            .map(|l: &TakeProfitLevel| LadderLevel {
                multiplier: l.multiplier,
                sell_percent: l.sell_percent,
                triggered: false,
            })
            .collect();

        let position = Position {
            id: id.clone(),
            token,
            status: PositionStatus::Open,
            entry_price,
            entry_time: now,
            initial_amount: amount,
            current_amount: amount,
            cost_basis_sol: cost_sol,
            current_price: entry_price,
            unrealized_pnl_sol: 0.0,
            realized_pnl_sol: 0.0,
            total_pnl_sol: None,
            stop_loss_price: entry_price * (1.0 - self.params.stop_loss_pct / 100.0),
            take_profit_levels: ladder,
            exit_order_ids: Vec::new(),
            exit_reason: None,
            closed_at: None,
        };

        info!(
            id = %id,
            token = %token,
            entry_price,
            amount,
            cost_sol,
            stop_loss = position.stop_loss_price,
            "position opened"
        );

        self.open.write().insert(id.clone(), position);
        id
    }

    // -------------------------------------------------------------------------
    // Monitor tick
    // -------------------------------------------------------------------------

    /// One monitor pass: refresh prices via `price_of`, recompute unrealized
    /// P&L and collect exit triggers (at most one per position,
    /// take-profit first).
    pub fn tick(&self, price_of: impl Fn(&TokenId) -> Option<f64>) -> Vec<PositionTrigger> {
        let mut triggers = Vec::new();
        let mut open = self.open.write();

        for position in open.values_mut() {
            if let Some(price) = price_of(&position.token) {
                if price > 0.0 {
                    position.current_price = price;
                }
            }
            position.unrealized_pnl_sol =
                position.market_value_sol() - position.remaining_cost_sol();

            if let Some(trigger) = evaluate_position(position) {
                triggers.push(trigger);
            }
        }
        triggers
    }

    /// Aggregate unrealized P&L across open positions.
    pub fn total_unrealized_sol(&self) -> f64 {
        self.open.read().values().map(|p| p.unrealized_pnl_sol).sum()
    }

    // -------------------------------------------------------------------------
    // Sell application (called by the executor on confirmed fills)
    // -------------------------------------------------------------------------

    /// Apply a confirmed sell of `sold_amount` base units for
    /// `proceeds_sol`. Returns the updated position snapshot, or None for an
    /// unknown id.
    ///
    /// The caller passes the order id for the audit trail. Closure happens
    /// automatically when nothing remains; stop-loss exits close as
    /// Liquidated.
    pub fn apply_sell(
        &self,
        position_id: &str,
        order_id: &str,
        sold_amount: u64,
        sell_price: f64,
        proceeds_sol: f64,
        reason: ExitReason,
    ) -> Option<Position> {
        let mut open = self.open.write();
        let position = open.get_mut(position_id)?;

        let sold = sold_amount.min(position.current_amount);
        let released_cost = if position.initial_amount > 0 {
            position.cost_basis_sol * sold as f64 / position.initial_amount as f64
        } else {
            0.0
        };

        position.current_amount -= sold;
        position.realized_pnl_sol += proceeds_sol - released_cost;
        position.exit_order_ids.push(order_id.to_string());
        if sell_price > 0.0 {
            position.current_price = sell_price;
        }

        // First-ladder break-even move.
        if reason == ExitReason::TakeProfit
            && position.take_profit_levels.iter().filter(|l| l.triggered).count() == 1
        {
            let breakeven = position.entry_price;
            if position.stop_loss_price < breakeven {
                debug!(id = %position.id, stop = breakeven, "stop moved to break-even");
                position.stop_loss_price = breakeven;
            }
        }

        // Trailing stop ratchets upward after every sell.
        let trail = sell_price * (1.0 - self.params.trailing_stop_pct / 100.0);
        if trail > position.stop_loss_price {
            debug!(id = %position.id, stop = trail, "trailing stop raised");
            position.stop_loss_price = trail;
        }

        if position.current_amount == 0 {
            position.status = if reason == ExitReason::StopLoss {
                PositionStatus::Liquidated
            } else {
                PositionStatus::Closed
            };
            position.exit_reason = Some(reason);
            position.closed_at = Some(self.clock.now_ms());
            position.unrealized_pnl_sol = 0.0;
            position.total_pnl_sol = Some(position.realized_pnl_sol);

            let closed = position.clone();
            info!(
                id = %closed.id,
                token = %closed.token,
                reason = %reason,
                total_pnl = closed.realized_pnl_sol,
                "position closed"
            );
            open.remove(position_id);
            self.closed.write().push(closed.clone());
            return Some(closed);
        }

        debug!(
            id = %position.id,
            sold,
            remaining = position.current_amount,
            realized = position.realized_pnl_sol,
            "partial sell applied"
        );
        Some(position.clone())
    }

    /// Mark a position closing (an exit order is in flight).
    pub fn mark_closing(&self, position_id: &str) {
        if let Some(p) = self.open.write().get_mut(position_id) {
            if p.status == PositionStatus::Open {
                p.status = PositionStatus::Closing;
            }
        }
    }

    /// Revert a Closing mark after a failed exit so the next tick retries.
    pub fn mark_open(&self, position_id: &str) {
        if let Some(p) = self.open.write().get_mut(position_id) {
            if p.status == PositionStatus::Closing {
                warn!(id = %position_id, "exit failed — position back to Open");
                p.status = PositionStatus::Open;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.open.read().get(position_id).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let mut v: Vec<Position> = self.open.read().values().cloned().collect();
        v.sort_by_key(|p| p.entry_time);
        v
    }

    pub fn open_for_token(&self, token: &TokenId) -> Vec<Position> {
        self.open
            .read()
            .values()
            .filter(|p| p.token == *token)
            .cloned()
            .collect()
    }

    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    pub fn open_len(&self) -> usize {
        self.open.read().len()
    }

    /// Restore a persisted open position on startup.
    pub fn restore(&self, position: Position) {
        self.open.write().insert(position.id.clone(), position);
    }
}

/// At most one trigger per tick, take-profit before stop-loss.
fn evaluate_position(position: &mut Position) -> Option<PositionTrigger> {
    if position.status != PositionStatus::Open || position.current_amount == 0 {
        return None;
    }
    let price = position.current_price;

    // --- Take-profit ladder ---------------------------------------------
    let total_levels = position.take_profit_levels.len();
    let next = position
        .take_profit_levels
        .iter()
        .position(|l| !l.triggered);
    if let Some(idx) = next {
        let level = &position.take_profit_levels[idx];
        if price >= position.entry_price * level.multiplier {
            let is_final = idx + 1 == total_levels;
            let sell_amount = if is_final {
                position.current_amount
            } else {
                let planned =
                    (position.initial_amount as f64 * level.sell_percent / 100.0).round() as u64;
                planned.min(position.current_amount)
            };
            position.take_profit_levels[idx].triggered = true;
            info!(
                id = %position.id,
                level = idx,
                price,
                sell_amount,
                "take-profit level triggered"
            );
            return Some(PositionTrigger {
                position_id: position.id.clone(),
                token: position.token,
                reason: ExitReason::TakeProfit,
                sell_amount,
                level: Some(idx),
            });
        }
    }

    // --- Stop loss --------------------------------------------------------
    if price <= position.stop_loss_price {
        info!(
            id = %position.id,
            price,
            stop = position.stop_loss_price,
            "stop loss triggered"
        );
        return Some(PositionTrigger {
            position_id: position.id.clone(),
            token: position.token,
            reason: ExitReason::StopLoss,
            sell_amount: position.current_amount,
            level: None,
        });
    }

    None
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("open", &self.open.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}
