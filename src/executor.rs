// =============================================================================
// Executor — quote, risk-check, submit, confirm, retry with fee escalation
// =============================================================================
//
// Buy pipeline:
//   validate signal -> size via risk manager -> wallet round-robin ->
//   [quote -> impact check -> build -> submit -> confirm] with up to
//   max_retries attempts, multiplying the priority fee by the escalation
//   factor (capped) and sleeping retry_delay * attempt between attempts.
//
// Sell pipeline mirrors the buy side. Migration and emergency exits start
// at the maximum priority fee, halve the retry delay and use the maximum
// slippage; stop-loss exits also run at maximum slippage.
//
// Paper mode uses the paper quote provider: fills are simulated from the
// bonding curve and every bundle lands instantly, but position and ledger
// bookkeeping is identical to live.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::MomentumMetrics;
use crate::clock::SharedClock;
use crate::config::ExecutorParams;
use crate::error::{BotError, Result, TransactionError};
use crate::kill_switch::KillSwitch;
use crate::positions::{Position, PositionManager, PositionTrigger};
use crate::quote::{BundleStatus, QuoteProvider, SwapQuote};
use crate::risk::RiskManager;
use crate::types::{
    lamports_to_sol, sol_to_lamports, ExitReason, OrderStatus, Side, TimestampMs, TokenId, WalletId,
};

/// Milliseconds between confirmation polls.
const CONFIRM_POLL_MS: u64 = 2_000;

/// An order moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub token: TokenId,
    pub side: Side,
    /// Lamports in for buys, token base units in for sells.
    pub amount_in: u64,
    pub slippage_bps: u32,
    pub priority_fee: u64,
    pub status: OrderStatus,
    pub wallet: WalletId,
    pub created_at: TimestampMs,
    pub submitted_at: Option<TimestampMs>,
    pub confirmed_at: Option<TimestampMs>,
    pub expected_out: Option<u64>,
    pub actual_out: Option<u64>,
    pub retries: u32,
    pub position_id: Option<String>,
    pub exit_reason: Option<ExitReason>,
}

impl Order {
    fn transition(&mut self, next: OrderStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal order transition {} -> {next}",
            self.status
        );
        self.status = next;
    }
}

/// Events emitted toward persistence and the dashboard.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    OrderFilled(Order),
    OrderFailed(Order),
    PositionOpened(Position),
    PositionUpdated(Position),
    PositionClosed(Position),
}

/// The buy/sell execution engine.
pub struct Executor {
    clock: SharedClock,
    params: ExecutorParams,
    max_slippage_bps: u32,
    provider: QuoteProvider,
    risk: Arc<RiskManager>,
    positions: Arc<PositionManager>,
    kill_switch: Arc<KillSwitch>,
    wallets: Vec<WalletId>,
    next_wallet: AtomicUsize,
    sol_mint: TokenId,
    events: mpsc::UnboundedSender<ExecEvent>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: SharedClock,
        params: ExecutorParams,
        max_slippage_bps: u32,
        provider: QuoteProvider,
        risk: Arc<RiskManager>,
        positions: Arc<PositionManager>,
        kill_switch: Arc<KillSwitch>,
        wallets: Vec<WalletId>,
    ) -> (Self, mpsc::UnboundedReceiver<ExecEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let executor = Self {
            clock,
            params,
            max_slippage_bps,
            provider,
            risk,
            positions,
            kill_switch,
            wallets: if wallets.is_empty() {
                vec![TokenId([0xAA; 32])] // paper wallet
            } else {
                wallets
            },
            next_wallet: AtomicUsize::new(0),
            sol_mint: TokenId([0; 32]),
            events,
        };
        (executor, rx)
    }

    fn pick_wallet(&self) -> WalletId {
        let idx = self.next_wallet.fetch_add(1, Ordering::Relaxed);
        self.wallets[idx % self.wallets.len()]
    }

    fn emit(&self, event: ExecEvent) {
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Buy pipeline
    // -------------------------------------------------------------------------

    /// Execute an entry for a momentum signal. `size_sol` is the sizing
    /// hint derived from the signal; the risk manager may shrink it.
    pub async fn execute_buy(&self, signal: &MomentumMetrics, size_sol: f64) -> Result<Order> {
        if !signal.should_enter {
            return Err(BotError::Risk("signal does not request entry".into()));
        }

        let check = self.risk.check_buy(size_sol);
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "risk check failed".into());
            return Err(BotError::Risk(reason));
        }
        let final_size_sol = check.adjusted_size_sol.unwrap_or(size_sol);
        let amount_in = sol_to_lamports(final_size_sol);

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            token: signal.token,
            side: Side::Buy,
            amount_in,
            slippage_bps: self.max_slippage_bps.min(500),
            priority_fee: self.params.base_priority_fee,
            status: OrderStatus::Pending,
            wallet: self.pick_wallet(),
            created_at: self.clock.now_ms(),
            submitted_at: None,
            confirmed_at: None,
            expected_out: None,
            actual_out: None,
            retries: 0,
            position_id: None,
            exit_reason: None,
        };

        info!(
            order = %order.id,
            token = %order.token,
            size_sol = final_size_sol,
            score = format!("{:.1}", signal.score),
            "buy pipeline started"
        );

        match self
            .run_attempts(&mut order, self.sol_mint, signal.token, amount_in, false)
            .await
        {
            Ok(quote) => {
                let tokens_out = quote.out_amount;
                order.actual_out = Some(tokens_out);

                let entry_price = final_size_sol / (tokens_out as f64 / 1_000_000.0);
                let position_id = self.positions.open_position(
                    signal.token,
                    entry_price,
                    tokens_out,
                    final_size_sol,
                );
                order.position_id = Some(position_id.clone());
                self.risk.record_buy(final_size_sol);

                self.emit(ExecEvent::OrderFilled(order.clone()));
                if let Some(position) = self.positions.get(&position_id) {
                    self.emit(ExecEvent::PositionOpened(position));
                }
                Ok(order)
            }
            Err(e) => {
                warn!(order = %order.id, error = %e, "buy pipeline failed");
                self.emit(ExecEvent::OrderFailed(order.clone()));
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sell pipeline
    // -------------------------------------------------------------------------

    /// Execute an exit trigger produced by the position monitor or the
    /// aggregator (migration / emergency).
    pub async fn execute_sell(&self, trigger: &PositionTrigger) -> Result<Order> {
        let urgent = trigger.reason.is_urgent() || trigger.reason == ExitReason::Shutdown;

        // Ordinary exits consult the kill switch; urgent and shutdown exits
        // must still be able to flatten positions after it fires.
        if !urgent {
            self.risk.check_sell().map_err(BotError::Risk)?;
        }

        let position = self
            .positions
            .get(&trigger.position_id)
            .ok_or_else(|| BotError::Risk(format!("unknown position {}", trigger.position_id)))?;
        // Stop-loss and urgent exits accept maximum slippage.
        let slippage_bps = if urgent || trigger.reason == ExitReason::StopLoss {
            self.max_slippage_bps
        } else {
            self.max_slippage_bps.min(500)
        };

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            token: trigger.token,
            side: Side::Sell,
            amount_in: trigger.sell_amount,
            slippage_bps,
            priority_fee: if urgent {
                self.params.max_priority_fee
            } else {
                self.params.base_priority_fee
            },
            status: OrderStatus::Pending,
            wallet: self.pick_wallet(),
            created_at: self.clock.now_ms(),
            submitted_at: None,
            confirmed_at: None,
            expected_out: None,
            actual_out: None,
            retries: 0,
            position_id: Some(trigger.position_id.clone()),
            exit_reason: Some(trigger.reason),
        };

        info!(
            order = %order.id,
            position = %trigger.position_id,
            reason = %trigger.reason,
            amount = trigger.sell_amount,
            urgent,
            "sell pipeline started"
        );
        self.positions.mark_closing(&trigger.position_id);

        match self
            .run_attempts(
                &mut order,
                trigger.token,
                self.sol_mint,
                trigger.sell_amount,
                urgent,
            )
            .await
        {
            Ok(quote) => {
                let proceeds_sol = lamports_to_sol(quote.out_amount);
                order.actual_out = Some(quote.out_amount);
                let sell_price =
                    proceeds_sol / (trigger.sell_amount as f64 / 1_000_000.0);

                let released_cost = if position.initial_amount > 0 {
                    position.cost_basis_sol * trigger.sell_amount.min(position.current_amount) as f64
                        / position.initial_amount as f64
                } else {
                    0.0
                };

                self.positions.mark_open(&trigger.position_id);
                let updated = self.positions.apply_sell(
                    &trigger.position_id,
                    &order.id,
                    trigger.sell_amount,
                    sell_price,
                    proceeds_sol,
                    trigger.reason,
                );

                if let Some(position) = updated {
                    let closed = position.status.is_closed();
                    self.risk.record_sell(
                        released_cost,
                        proceeds_sol,
                        closed,
                        position.total_pnl_sol,
                    );
                    self.emit(ExecEvent::OrderFilled(order.clone()));
                    if closed {
                        self.emit(ExecEvent::PositionClosed(position));
                    } else {
                        self.emit(ExecEvent::PositionUpdated(position));
                    }
                }
                Ok(order)
            }
            Err(e) => {
                warn!(order = %order.id, error = %e, "sell pipeline failed");
                self.positions.mark_open(&trigger.position_id);
                self.emit(ExecEvent::OrderFailed(order.clone()));
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Shared attempt loop
    // -------------------------------------------------------------------------

    async fn run_attempts(
        &self,
        order: &mut Order,
        input: TokenId,
        output: TokenId,
        amount: u64,
        urgent: bool,
    ) -> Result<SwapQuote> {
        let mut last_error: Option<BotError> = None;

        for attempt in 1..=self.params.max_retries {
            if self.kill_switch.is_active() && order.side == Side::Buy {
                order.status = OrderStatus::Cancelled;
                return Err(BotError::KillSwitch("activated mid-pipeline".into()));
            }

            match self.attempt_once(order, input, output, amount).await {
                Ok(quote) => {
                    order.transition(OrderStatus::Confirmed);
                    order.confirmed_at = Some(self.clock.now_ms());
                    order.expected_out = Some(quote.out_amount);
                    return Ok(quote);
                }
                Err(e) if e.is_retryable() && attempt < self.params.max_retries => {
                    order.retries = attempt;
                    order.status = OrderStatus::Pending;
                    // Fee escalation, capped.
                    order.priority_fee = ((order.priority_fee as f64
                        * self.params.fee_escalation_factor)
                        as u64)
                        .min(self.params.max_priority_fee);

                    let base_delay = if urgent {
                        self.params.retry_delay_ms / 2
                    } else {
                        self.params.retry_delay_ms
                    };
                    let delay = base_delay * attempt as u64;
                    warn!(
                        order = %order.id,
                        attempt,
                        delay_ms = delay,
                        priority_fee = order.priority_fee,
                        error = %e,
                        "attempt failed — retrying with escalated fee"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    order.status = OrderStatus::Failed;
                    return Err(e);
                }
            }
        }

        order.status = OrderStatus::Failed;
        Err(last_error
            .unwrap_or_else(|| BotError::Transaction(TransactionError::SimulationFailed("exhausted".into()))))
    }

    async fn attempt_once(
        &self,
        order: &mut Order,
        input: TokenId,
        output: TokenId,
        amount: u64,
    ) -> Result<SwapQuote> {
        let quote = self
            .provider
            .get_quote(input, output, amount, order.slippage_bps)
            .await?;

        // Extreme price impact aborts the pipeline outright.
        if quote.price_impact_pct > self.params.max_price_impact_pct {
            return Err(BotError::Slippage {
                actual_pct: quote.price_impact_pct,
                limit_pct: self.params.max_price_impact_pct,
            });
        }

        let tx = self
            .provider
            .build_swap_tx(&quote, &order.wallet, order.priority_fee)
            .await?;

        let bundle_id = self.provider.submit_bundle(std::slice::from_ref(&tx)).await?;
        if order.status == OrderStatus::Pending {
            order.transition(OrderStatus::Submitted);
        }
        order.submitted_at = Some(self.clock.now_ms());

        self.await_confirmation(&bundle_id).await?;
        Ok(quote)
    }

    /// Poll until the bundle lands, fails, or the confirmation timeout
    /// elapses.
    async fn await_confirmation(&self, bundle_id: &str) -> Result<()> {
        let timeout_ms = self.params.confirmation_timeout_secs * 1_000;
        let mut waited: u64 = 0;

        loop {
            match self.provider.bundle_status(bundle_id).await? {
                BundleStatus::Landed { slot } => {
                    info!(bundle = %bundle_id, slot, "bundle landed");
                    return Ok(());
                }
                BundleStatus::Failed | BundleStatus::Invalid => {
                    return Err(BotError::Transaction(TransactionError::BundleRejected(
                        bundle_id.to_string(),
                    )));
                }
                BundleStatus::Pending => {
                    if waited >= timeout_ms {
                        return Err(BotError::Transaction(
                            TransactionError::ConfirmationTimeout(timeout_ms),
                        ));
                    }
                    tokio::time::sleep(tokio::time::Duration::from_millis(CONFIRM_POLL_MS)).await;
                    waited += CONFIRM_POLL_MS;
                }
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("paper", &self.provider.is_paper())
            .field("wallets", &self.wallets.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ScoreBreakdown;
    use crate::analyzers::LiquidityAnalyzer;
    use crate::clock::{Clock, SimClock};
    use crate::config::{PositionParams, RiskLimits};
    use crate::events::BondingProgress;
    use crate::quote::PaperQuoteProvider;
    use crate::types::{SignalType, LAMPORTS_PER_SOL};

    struct Rig {
        clock: Arc<SimClock>,
        liquidity: Arc<LiquidityAnalyzer>,
        risk: Arc<RiskManager>,
        positions: Arc<PositionManager>,
        kill: Arc<KillSwitch>,
        executor: Executor,
        events: mpsc::UnboundedReceiver<ExecEvent>,
    }

    fn rig() -> Rig {
        let clock = SimClock::new(1_700_000_000_000);
        let liquidity = Arc::new(LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5));
        let kill = Arc::new(KillSwitch::new(clock.clone()));
        let risk = Arc::new(RiskManager::new(
            clock.clone(),
            RiskLimits::default(),
            kill.clone(),
            10.0,
        ));
        let positions = Arc::new(PositionManager::new(
            clock.clone(),
            PositionParams::default(),
        ));
        let mut params = ExecutorParams::default();
        params.retry_delay_ms = 1;
        let provider = QuoteProvider::Paper(PaperQuoteProvider::new(clock.clone(), liquidity.clone()));
        let (executor, events) = Executor::new(
            clock.clone(),
            params,
            500,
            provider,
            risk.clone(),
            positions.clone(),
            kill.clone(),
            Vec::new(),
        );
        Rig {
            clock,
            liquidity,
            risk,
            positions,
            kill,
            executor,
            events,
        }
    }

    fn seed_curve(rig: &Rig, mint: TokenId) {
        rig.liquidity.on_progress(&BondingProgress {
            mint,
            curve: TokenId([0xCC; 32]),
            progress_pct: 0.0,
            virtual_sol: 30 * LAMPORTS_PER_SOL,
            virtual_tokens: 1_000_000 * 1_000_000,
            real_sol: 65 * LAMPORTS_PER_SOL,
            real_tokens: 1_000_000 * 1_000_000,
            total_supply: 1_000_000 * 1_000_000,
            in_entry_zone: true,
            signature: String::new(),
            timestamp: rig.clock.now_ms(),
            slot: 0,
        });
        rig.liquidity.update(&mint).unwrap();
    }

    fn entry_signal(mint: TokenId) -> MomentumMetrics {
        MomentumMetrics {
            token: mint,
            calculated_at: 0,
            score: 85.0,
            raw_score: 85.0,
            signal: SignalType::StrongBuy,
            breakdown: ScoreBreakdown {
                volume: 80.0,
                holders: 80.0,
                liquidity: 90.0,
                safety: 90.0,
            },
            in_entry_zone: true,
            should_enter: true,
            should_exit: false,
            reasons: Vec::new(),
            decay_applied: false,
            data_completeness: 1.0,
        }
    }

    #[tokio::test]
    async fn paper_buy_opens_position_and_debits_ledger() {
        let mut rig = rig();
        let mint = TokenId([1; 32]);
        seed_curve(&rig, mint);

        let order = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(order.position_id.is_some());

        assert_eq!(rig.positions.open_len(), 1);
        let snap = rig.risk.snapshot();
        assert_eq!(snap.open_positions, 1);
        assert!((snap.open_exposure_sol - 0.5).abs() < 1e-9);
        assert!((snap.current_capital_sol - 9.5).abs() < 1e-9);

        // OrderFilled then PositionOpened.
        assert!(matches!(rig.events.recv().await.unwrap(), ExecEvent::OrderFilled(_)));
        assert!(matches!(rig.events.recv().await.unwrap(), ExecEvent::PositionOpened(_)));
    }

    #[tokio::test]
    async fn sell_closes_position_and_credits_ledger() {
        let mut rig = rig();
        let mint = TokenId([1; 32]);
        seed_curve(&rig, mint);

        let order = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap();
        let position_id = order.position_id.unwrap();
        let position = rig.positions.get(&position_id).unwrap();

        let trigger = PositionTrigger {
            position_id: position_id.clone(),
            token: mint,
            reason: ExitReason::Signal,
            sell_amount: position.current_amount,
            level: None,
        };
        let sell = rig.executor.execute_sell(&trigger).await.unwrap();
        assert_eq!(sell.status, OrderStatus::Confirmed);
        assert_eq!(rig.positions.open_len(), 0);

        let snap = rig.risk.snapshot();
        assert_eq!(snap.open_positions, 0);
        assert!(snap.open_exposure_sol.abs() < 1e-9);
        // Round trip through the spread costs a little; capital is back
        // near the start and the ledger still balances.
        assert!((rig.risk.total_capital_sol() - snap.current_capital_sol).abs() < 1e-9);
    }

    #[tokio::test]
    async fn migration_exit_uses_max_fee_and_slippage() {
        let mut rig = rig();
        let mint = TokenId([1; 32]);
        seed_curve(&rig, mint);

        let order = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap();
        let position_id = order.position_id.unwrap();
        let position = rig.positions.get(&position_id).unwrap();

        let trigger = PositionTrigger {
            position_id,
            token: mint,
            reason: ExitReason::Migration,
            sell_amount: position.current_amount,
            level: None,
        };
        let sell = rig.executor.execute_sell(&trigger).await.unwrap();
        assert_eq!(sell.priority_fee, ExecutorParams::default().max_priority_fee);
        assert_eq!(sell.slippage_bps, 500);
        assert_eq!(sell.exit_reason, Some(ExitReason::Migration));
    }

    #[tokio::test]
    async fn buy_without_curve_state_fails_after_retries() {
        let mut rig = rig();
        let mint = TokenId([2; 32]); // never seeded

        let err = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap_err();
        assert!(matches!(err, BotError::Network(_)));
        // No position, no ledger movement, one OrderFailed event.
        assert_eq!(rig.positions.open_len(), 0);
        assert_eq!(rig.risk.snapshot().open_positions, 0);
        assert!(matches!(rig.events.recv().await.unwrap(), ExecEvent::OrderFailed(_)));
    }

    #[tokio::test]
    async fn kill_switch_blocks_buys_but_not_sells() {
        let mut rig = rig();
        let mint = TokenId([1; 32]);
        seed_curve(&rig, mint);

        let order = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap();
        let position_id = order.position_id.unwrap();

        rig.kill.activate(crate::types::KillReason::Manual, "test halt");
        let err = rig.executor.execute_buy(&entry_signal(mint), 0.5).await.unwrap_err();
        assert!(matches!(err, BotError::Risk(_)));

        // Ordinary exits are gated by the switch...
        let position = rig.positions.get(&position_id).unwrap();
        let ordinary = PositionTrigger {
            position_id: position_id.clone(),
            token: mint,
            reason: ExitReason::Signal,
            sell_amount: position.current_amount,
            level: None,
        };
        assert!(rig.executor.execute_sell(&ordinary).await.is_err());

        // ...but emergency exits still flatten the book.
        let emergency = PositionTrigger {
            position_id,
            token: mint,
            reason: ExitReason::Emergency,
            sell_amount: position.current_amount,
            level: None,
        };
        assert!(rig.executor.execute_sell(&emergency).await.is_ok());
        assert_eq!(rig.positions.open_len(), 0);
    }
}
