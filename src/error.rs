// =============================================================================
// Error taxonomy for the Nova trading engine
// =============================================================================
//
// Errors are tagged by kind so callers can match on recoverability:
//   - Config             fatal at startup only
//   - Network            recoverable with backoff; repeated failures degrade
//                        health and eventually trip the kill switch
//   - Transaction        recoverable inside the executor's retry loop
//   - Wallet             non-recoverable for the originating order
//   - Slippage           non-recoverable for the attempt
//   - Safety             non-recoverable for the token
//   - Risk / KillSwitch  non-recoverable globally
//   - Store              connection errors retried, query errors bubble up
//   - RateLimit          recoverable with wait-until-reset
// =============================================================================

use thiserror::Error;

/// Central error type for the engine.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("slippage {actual_pct:.2}% exceeds limit {limit_pct:.2}%")]
    Slippage { actual_pct: f64, limit_pct: f64 },

    #[error("safety check failed for {token}: {reason}")]
    Safety { token: String, reason: String },

    #[error("risk check rejected: {0}")]
    Risk(String),

    #[error("kill switch active: {0}")]
    KillSwitch(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("rate limited, resets in {reset_in_ms} ms")]
    RateLimit { reset_in_ms: u64 },
}

/// Failures inside the build/submit/confirm pipeline. All of these are
/// retried with fee escalation before the order is marked Failed.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("quote expired before submission")]
    QuoteStale,

    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    #[error("confirmation timed out after {0} ms")]
    ConfirmationTimeout(u64),

    #[error("blockhash expired")]
    BlockhashExpired,

    #[error("bundle rejected: {0}")]
    BundleRejected(String),
}

impl BotError {
    /// Whether the executor may retry the same order after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Transaction(_) | Self::RateLimit { .. }
        )
    }

    /// Whether this error should halt the whole engine rather than a single
    /// order.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::KillSwitch(_))
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
