// =============================================================================
// Token Tracker — registry of tokens the engine is watching
// =============================================================================
//
// A token becomes tracked on TokenLaunched and is removed five minutes
// after migration or after two hours without any event. Once the migration
// flag is set it never clears; analyzers consult it so no token re-enters
// BUY territory after graduating.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{TimestampMs, TokenId, WalletId};

/// How long a migrated token lingers before removal.
const MIGRATION_LINGER_MS: i64 = 5 * 60 * 1_000;
/// Inactivity bound after which a token is dropped.
const INACTIVITY_EXPIRY_MS: i64 = 2 * 60 * 60 * 1_000;

/// Per-token bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedToken {
    pub creator: WalletId,
    pub launched_at: TimestampMs,
    pub last_update: TimestampMs,
    pub migrated: bool,
    pub migrated_at: Option<TimestampMs>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// Thread-safe tracked-token registry.
pub struct TokenTracker {
    tokens: RwLock<HashMap<TokenId, TrackedToken>>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new launch. Re-launching an already tracked token only
    /// refreshes its activity timestamp.
    pub fn on_launch(
        &self,
        mint: TokenId,
        creator: WalletId,
        name: Option<String>,
        symbol: Option<String>,
        t: TimestampMs,
    ) {
        let mut tokens = self.tokens.write();
        tokens
            .entry(mint)
            .and_modify(|tt| tt.last_update = t)
            .or_insert_with(|| {
                debug!(token = %mint, "tracking new launch");
                TrackedToken {
                    creator,
                    launched_at: t,
                    last_update: t,
                    migrated: false,
                    migrated_at: None,
                    name,
                    symbol,
                }
            });
    }

    /// Refresh the activity timestamp for any event touching `mint`.
    pub fn touch(&self, mint: &TokenId, t: TimestampMs) {
        if let Some(tt) = self.tokens.write().get_mut(mint) {
            if t > tt.last_update {
                tt.last_update = t;
            }
        }
    }

    /// Latch the migration flag. The flag never clears.
    pub fn on_migration(&self, mint: &TokenId, t: TimestampMs) {
        if let Some(tt) = self.tokens.write().get_mut(mint) {
            if !tt.migrated {
                info!(token = %mint, "token migrated — buy side closed");
                tt.migrated = true;
                tt.migrated_at = Some(t);
            }
            tt.last_update = tt.last_update.max(t);
        }
    }

    pub fn is_tracked(&self, mint: &TokenId) -> bool {
        self.tokens.read().contains_key(mint)
    }

    pub fn is_migrated(&self, mint: &TokenId) -> bool {
        self.tokens.read().get(mint).map(|t| t.migrated).unwrap_or(false)
    }

    pub fn get(&self, mint: &TokenId) -> Option<TrackedToken> {
        self.tokens.read().get(mint).cloned()
    }

    /// All currently tracked token ids, sorted so iteration order (and
    /// therefore replay output) never depends on hash order.
    pub fn tracked_ids(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self.tokens.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Tracked, non-migrated ids (the aggregator's working set), sorted.
    pub fn active_ids(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self
            .tokens
            .read()
            .iter()
            .filter(|(_, tt)| !tt.migrated)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    /// Remove expired tokens and return their ids so analyzers can clean up
    /// in lockstep.
    pub fn expire(&self, now: TimestampMs) -> Vec<TokenId> {
        let mut tokens = self.tokens.write();
        let expired: Vec<TokenId> = tokens
            .iter()
            .filter(|(_, tt)| {
                let migrated_out = tt
                    .migrated_at
                    .map(|mt| now - mt >= MIGRATION_LINGER_MS)
                    .unwrap_or(false);
                let inactive = now - tt.last_update >= INACTIVITY_EXPIRY_MS;
                migrated_out || inactive
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            tokens.remove(id);
            debug!(token = %id, "token expired from tracker");
        }
        expired
    }
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenTracker")
            .field("tracked", &self.len())
            .finish()
    }
}
