// =============================================================================
// Shared types used across the Nova trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Monotonic milliseconds from the UNIX epoch.
pub type TimestampMs = i64;

/// Amount of base-unit currency (1 SOL = 1_000_000_000 lamports).
pub type Lamports = u64;

/// Lamports per whole SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert a lamport amount to SOL for display and ratio math.
pub fn lamports_to_sol(lamports: Lamports) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convert a SOL amount to lamports (saturating at zero for negatives).
pub fn sol_to_lamports(sol: f64) -> Lamports {
    if sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as Lamports
}

// ---------------------------------------------------------------------------
// Token identifier
// ---------------------------------------------------------------------------

/// Opaque 32-byte token identifier. Used as the primary key for every
/// per-token structure in the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub [u8; 32]);

impl TokenId {
    /// Parse from a 64-char hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Full 64-char lowercase hex rendering (used for persistence keys).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines and the dashboard.
    pub fn short(&self) -> String {
        format!("{}..", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl std::fmt::Debug for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenId({})", self.short())
    }
}

impl Serialize for TokenId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid 32-byte hex token id"))
    }
}

/// Opaque wallet identifier (same shape as a token id).
pub type WalletId = TokenId;

// ---------------------------------------------------------------------------
// Trade side
// ---------------------------------------------------------------------------

/// Direction of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Trading signal emitted by the momentum aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    DoNotTrade,
}

impl SignalType {
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::StrongBuy | Self::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Self::StrongSell | Self::Sell)
    }
}

impl Default for SignalType {
    fn default() -> Self {
        Self::Hold
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "STRONG_BUY"),
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Sell => write!(f, "SELL"),
            Self::StrongSell => write!(f, "STRONG_SELL"),
            Self::DoNotTrade => write!(f, "DO_NOT_TRADE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

/// Status of an order. Transitions are strictly forward
/// (Pending -> Submitted -> Confirmed); Failed, Cancelled and Expired are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Submitted) => true,
            (Self::Pending, Self::Failed | Self::Cancelled | Self::Expired) => true,
            (Self::Submitted, Self::Confirmed) => true,
            (Self::Submitted, Self::Failed | Self::Cancelled | Self::Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Submitted => write!(f, "Submitted"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Position lifecycle
// ---------------------------------------------------------------------------

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Open,
    Closing,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Liquidated)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Liquidated => write!(f, "Liquidated"),
        }
    }
}

/// Why a position was (or is being) exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Migration,
    Emergency,
    Signal,
    Manual,
    Shutdown,
}

impl ExitReason {
    /// Urgent exits start at the maximum priority fee and halve retry delay.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Migration | Self::Emergency)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::Migration => write!(f, "migration"),
            Self::Emergency => write!(f, "emergency"),
            Self::Signal => write!(f, "signal"),
            Self::Manual => write!(f, "manual"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine modes
// ---------------------------------------------------------------------------

/// Whether fills are simulated locally or submitted to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// What tripped the kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillReason {
    Manual,
    DailyLoss,
    MaxDrawdown,
    ErrorThreshold,
    RpcFailure,
    SystemError,
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::DailyLoss => write!(f, "daily_loss"),
            Self::MaxDrawdown => write!(f, "max_drawdown"),
            Self::ErrorThreshold => write!(f, "error_threshold"),
            Self::RpcFailure => write!(f, "rpc_failure"),
            Self::SystemError => write!(f, "system_error"),
        }
    }
}
