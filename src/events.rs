// =============================================================================
// Venue events — the typed stream consumed by the analyzer pipeline
// =============================================================================
//
// The upstream subscription yields a lazy sequence of these events, finite
// (backtest replay) or unbounded (live). Events for a single token arrive
// in order; the engine never re-reads or rewinds the stream.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Lamports, Side, TimestampMs, TokenId, WalletId};

/// A new token appeared on the launch venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLaunched {
    pub mint: TokenId,
    pub curve: TokenId,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub creator: WalletId,
    pub signature: String,
    pub timestamp: TimestampMs,
    pub slot: u64,
}

/// Bonding-curve reserve update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondingProgress {
    pub mint: TokenId,
    pub curve: TokenId,
    pub progress_pct: f64,
    pub virtual_sol: Lamports,
    pub virtual_tokens: u64,
    pub real_sol: Lamports,
    pub real_tokens: u64,
    pub total_supply: u64,
    pub in_entry_zone: bool,
    pub signature: String,
    pub timestamp: TimestampMs,
    pub slot: u64,
}

/// A swap against the bonding curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTrade {
    pub mint: TokenId,
    pub curve: TokenId,
    pub side: Side,
    pub trader: WalletId,
    pub sol_amount: Lamports,
    pub token_amount: u64,
    pub signature: String,
    pub timestamp: TimestampMs,
    pub slot: u64,
}

/// The token graduated: liquidity moved to a standard AMM pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMigration {
    pub mint: TokenId,
    pub curve: TokenId,
    pub pool: TokenId,
    pub final_progress_pct: f64,
    pub signature: String,
    pub timestamp: TimestampMs,
    pub slot: u64,
}

/// Every on-venue event the analyzers consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VenueEvent {
    TokenLaunched(TokenLaunched),
    BondingProgress(BondingProgress),
    TokenTrade(TokenTrade),
    TokenMigration(TokenMigration),
}

impl VenueEvent {
    pub fn mint(&self) -> TokenId {
        match self {
            Self::TokenLaunched(e) => e.mint,
            Self::BondingProgress(e) => e.mint,
            Self::TokenTrade(e) => e.mint,
            Self::TokenMigration(e) => e.mint,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            Self::TokenLaunched(e) => e.timestamp,
            Self::BondingProgress(e) => e.timestamp,
            Self::TokenTrade(e) => e.timestamp,
            Self::TokenMigration(e) => e.timestamp,
        }
    }

    /// Launches and migrations must never be dropped; trades and progress
    /// updates may be shed under backpressure.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::TokenLaunched(_) | Self::TokenMigration(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenLaunched(_) => "token_launched",
            Self::BondingProgress(_) => "bonding_progress",
            Self::TokenTrade(_) => "token_trade",
            Self::TokenMigration(_) => "token_migration",
        }
    }
}

/// Stream-level events, including subscription lifecycle.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Venue(VenueEvent),
    Connected { attempt: u32 },
    Disconnected { reason: String, will_reconnect: bool },
    Error { message: String },
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn trade() -> VenueEvent {
        VenueEvent::TokenTrade(TokenTrade {
            mint: TokenId([1; 32]),
            curve: TokenId([2; 32]),
            side: Side::Buy,
            trader: TokenId([3; 32]),
            sol_amount: 100_000_000,
            token_amount: 5_000_000,
            signature: "sig".into(),
            timestamp: 1_700_000_000_000,
            slot: 42,
        })
    }

    #[test]
    fn criticality_split() {
        assert!(!trade().is_critical());
        let launch = VenueEvent::TokenLaunched(TokenLaunched {
            mint: TokenId([1; 32]),
            curve: TokenId([2; 32]),
            name: Some("Nova".into()),
            symbol: Some("NOVA".into()),
            uri: None,
            creator: TokenId([9; 32]),
            signature: "sig".into(),
            timestamp: 0,
            slot: 1,
        });
        assert!(launch.is_critical());
    }

    #[test]
    fn serde_tagging_roundtrip() {
        let ev = trade();
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"token_trade\""));
        let back: VenueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mint(), ev.mint());
        assert_eq!(back.timestamp(), ev.timestamp());
    }

    #[test]
    fn accessors_cover_all_variants() {
        let ev = trade();
        assert_eq!(ev.kind(), "token_trade");
        assert_eq!(ev.mint(), TokenId([1; 32]));
        assert_eq!(ev.timestamp(), 1_700_000_000_000);
    }
}
