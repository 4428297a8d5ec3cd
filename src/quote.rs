// =============================================================================
// Quote Provider — swap quotes, transaction building and bundle submission
// =============================================================================
//
// Two implementations behind one enum:
//   - Http: the real quote/submit endpoints via reqwest, with a 10 s quote
//     TTL cache and header-driven rate limiting (remaining/reset).
//   - Paper: fills simulated from the liquidity analyzer's bonding-curve
//     state; nothing leaves the process and every bundle lands instantly.
//
// Wallet cryptography and transaction encoding live behind the HTTP
// endpoints; this client only moves opaque bytes.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyzers::LiquidityAnalyzer;
use crate::clock::SharedClock;
use crate::error::{BotError, Result, TransactionError};
use crate::types::{Lamports, TimestampMs, TokenId, WalletId, LAMPORTS_PER_SOL};

/// Quote cache TTL in milliseconds.
const QUOTE_CACHE_TTL_MS: i64 = 10_000;

/// A priced swap route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: TokenId,
    pub output_mint: TokenId,
    pub in_amount: u64,
    pub out_amount: u64,
    pub min_out_amount: u64,
    pub price_impact_pct: f64,
    pub route: String,
    pub expires_at: TimestampMs,
    /// Provider-specific payload passed back verbatim on build.
    pub raw: serde_json::Value,
}

/// Built transaction bytes, opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTx(pub String);

/// Bundle confirmation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Invalid,
    Pending,
    Landed { slot: u64 },
    Failed,
}

#[derive(Clone)]
struct CachedQuote {
    fetched_at: TimestampMs,
    quote: SwapQuote,
}

/// Live HTTP provider with caching and rate-limit respect.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    clock: SharedClock,
    quote_url: String,
    bundle_url: String,
    cache: RwLock<HashMap<(TokenId, TokenId, u64, u32), CachedQuote>>,
    /// (remaining, reset_at_ms) advertised by the provider.
    rate_limit: RwLock<(u32, TimestampMs)>,
}

impl HttpQuoteProvider {
    pub fn new(
        clock: SharedClock,
        quote_url: String,
        bundle_url: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::Network(e.to_string()))?;
        Ok(Self {
            client,
            clock,
            quote_url,
            bundle_url,
            cache: RwLock::new(HashMap::new()),
            rate_limit: RwLock::new((u32::MAX, 0)),
        })
    }

    fn check_rate_limit(&self) -> Result<()> {
        let (remaining, reset_at) = *self.rate_limit.read();
        if remaining == 0 {
            let now = self.clock.now_ms();
            if now < reset_at {
                return Err(BotError::RateLimit {
                    reset_in_ms: (reset_at - now) as u64,
                });
            }
        }
        Ok(())
    }

    fn note_headers(&self, headers: &reqwest::header::HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
        };
        if let Some(remaining) = parse("x-ratelimit-remaining") {
            let reset_at = parse("x-ratelimit-reset")
                .map(|s| (s * 1_000) as i64)
                .unwrap_or_else(|| self.clock.now_ms() + 1_000);
            *self.rate_limit.write() = (remaining as u32, reset_at);
            if remaining == 0 {
                warn!(reset_at, "quote provider rate limit exhausted");
            }
        }
    }

    async fn fetch_quote(
        &self,
        input: TokenId,
        output: TokenId,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<SwapQuote> {
        self.check_rate_limit()?;
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.quote_url,
            input.to_hex(),
            output.to_hex(),
            amount,
            slippage_bps
        );
        let response = self.client.get(&url).send().await?;
        self.note_headers(response.headers());
        if !response.status().is_success() {
            return Err(BotError::Network(format!(
                "quote endpoint returned {}",
                response.status()
            )));
        }
        let raw: serde_json::Value = response.json().await?;

        let out_amount = raw["outAmount"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| raw["outAmount"].as_u64())
            .ok_or_else(|| BotError::Network("quote missing outAmount".into()))?;
        let min_out = raw["otherAmountThreshold"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| raw["otherAmountThreshold"].as_u64())
            .unwrap_or(out_amount);
        let price_impact = raw["priceImpactPct"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| raw["priceImpactPct"].as_f64())
            .unwrap_or(0.0)
            * 100.0;

        Ok(SwapQuote {
            input_mint: input,
            output_mint: output,
            in_amount: amount,
            out_amount,
            min_out_amount: min_out,
            price_impact_pct: price_impact,
            route: raw["routePlan"].to_string(),
            expires_at: self.clock.now_ms() + QUOTE_CACHE_TTL_MS,
            raw,
        })
    }
}

/// Venue swap fee simulated on paper fills, percent of output.
const PAPER_VENUE_FEE_PCT: f64 = 1.0;

/// Paper provider: quotes from the constant-product state, instant lands.
pub struct PaperQuoteProvider {
    clock: SharedClock,
    liquidity: Arc<LiquidityAnalyzer>,
    /// The venue's base currency pseudo-mint.
    sol_mint: TokenId,
}

impl PaperQuoteProvider {
    pub fn new(clock: SharedClock, liquidity: Arc<LiquidityAnalyzer>) -> Self {
        Self {
            clock,
            liquidity,
            sol_mint: TokenId([0; 32]),
        }
    }

    fn simulate_quote(
        &self,
        input: TokenId,
        output: TokenId,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<SwapQuote> {
        let buying = input == self.sol_mint;
        let token = if buying { output } else { input };

        let metrics = self
            .liquidity
            .latest_metrics(&token)
            .ok_or_else(|| BotError::Network(format!("no curve state for {token}")))?;
        if metrics.price_sol <= 0.0 {
            return Err(BotError::Network(format!("no price for {token}")));
        }

        let slip = self
            .liquidity
            .slippage_for_size(
                &token,
                if buying {
                    amount
                } else {
                    // Approximate the sell's SOL notional for impact sizing.
                    (amount as f64 / 1_000_000.0 * metrics.price_sol * LAMPORTS_PER_SOL as f64)
                        as Lamports
                },
            )
            .unwrap_or(0.0);

        // Slippage and the venue fee both degrade the received amount.
        let haircut = (1.0 - slip / 100.0) * (1.0 - PAPER_VENUE_FEE_PCT / 100.0);
        let out_amount = if buying {
            let sol = amount as f64 / LAMPORTS_PER_SOL as f64;
            let tokens = sol / metrics.price_sol * haircut;
            (tokens * 1_000_000.0) as u64
        } else {
            let tokens = amount as f64 / 1_000_000.0;
            let sol = tokens * metrics.price_sol * haircut;
            (sol * LAMPORTS_PER_SOL as f64) as u64
        };
        let min_out = out_amount - (out_amount as u128 * slippage_bps as u128 / 10_000) as u64;

        Ok(SwapQuote {
            input_mint: input,
            output_mint: output,
            in_amount: amount,
            out_amount,
            min_out_amount: min_out,
            price_impact_pct: slip,
            route: "paper".to_string(),
            expires_at: self.clock.now_ms() + QUOTE_CACHE_TTL_MS,
            raw: serde_json::json!({ "paper": true }),
        })
    }
}

/// The capability handed to the executor.
pub enum QuoteProvider {
    Http(HttpQuoteProvider),
    Paper(PaperQuoteProvider),
}

impl QuoteProvider {
    pub fn is_paper(&self) -> bool {
        matches!(self, Self::Paper(_))
    }

    /// Fetch (or reuse) a quote for swapping `amount` of `input` into
    /// `output`.
    pub async fn get_quote(
        &self,
        input: TokenId,
        output: TokenId,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<SwapQuote> {
        match self {
            Self::Paper(p) => p.simulate_quote(input, output, amount, slippage_bps),
            Self::Http(h) => {
                let key = (input, output, amount, slippage_bps);
                let now = h.clock.now_ms();
                if let Some(cached) = h.cache.read().get(&key) {
                    if now - cached.fetched_at < QUOTE_CACHE_TTL_MS {
                        debug!(input = %input, output = %output, "quote cache hit");
                        return Ok(cached.quote.clone());
                    }
                }
                let quote = h.fetch_quote(input, output, amount, slippage_bps).await?;
                h.cache.write().insert(
                    key,
                    CachedQuote {
                        fetched_at: now,
                        quote: quote.clone(),
                    },
                );
                Ok(quote)
            }
        }
    }

    /// Build the wire transaction for a quote.
    pub async fn build_swap_tx(
        &self,
        quote: &SwapQuote,
        wallet: &WalletId,
        priority_fee: u64,
    ) -> Result<WireTx> {
        match self {
            Self::Paper(_) => Ok(WireTx("paper-tx".to_string())),
            Self::Http(h) => {
                if h.clock.now_ms() > quote.expires_at {
                    return Err(BotError::Transaction(TransactionError::QuoteStale));
                }
                h.check_rate_limit()?;
                let body = serde_json::json!({
                    "quoteResponse": quote.raw,
                    "userPublicKey": wallet.to_hex(),
                    "prioritizationFeeLamports": priority_fee,
                });
                let response = h
                    .client
                    .post(format!("{}/swap", h.quote_url))
                    .json(&body)
                    .send()
                    .await?;
                h.note_headers(response.headers());
                let value: serde_json::Value = response.json().await?;
                let tx = value["swapTransaction"]
                    .as_str()
                    .ok_or_else(|| {
                        BotError::Transaction(TransactionError::SimulationFailed(
                            "missing swapTransaction".into(),
                        ))
                    })?
                    .to_string();
                Ok(WireTx(tx))
            }
        }
    }

    /// Submit transactions as a bundle; returns the bundle id.
    pub async fn submit_bundle(&self, txs: &[WireTx]) -> Result<String> {
        match self {
            Self::Paper(p) => Ok(format!("paper-bundle-{}", p.clock.now_ms())),
            Self::Http(h) => {
                h.check_rate_limit()?;
                let encoded: Vec<&str> = txs.iter().map(|t| t.0.as_str()).collect();
                let response = h
                    .client
                    .post(format!("{}/bundles", h.bundle_url))
                    .json(&serde_json::json!({ "transactions": encoded }))
                    .send()
                    .await?;
                h.note_headers(response.headers());
                let value: serde_json::Value = response.json().await?;
                value["bundleId"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        BotError::Transaction(TransactionError::BundleRejected(
                            "missing bundleId".into(),
                        ))
                    })
            }
        }
    }

    /// Poll a bundle's confirmation state.
    pub async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus> {
        match self {
            Self::Paper(_) => Ok(BundleStatus::Landed { slot: 0 }),
            Self::Http(h) => {
                let response = h
                    .client
                    .get(format!("{}/bundles/{bundle_id}", h.bundle_url))
                    .send()
                    .await?;
                h.note_headers(response.headers());
                let value: serde_json::Value = response.json().await?;
                let status = match value["status"].as_str().unwrap_or("") {
                    "Landed" => BundleStatus::Landed {
                        slot: value["slot"].as_u64().unwrap_or(0),
                    },
                    "Pending" => BundleStatus::Pending,
                    "Failed" => BundleStatus::Failed,
                    _ => BundleStatus::Invalid,
                };
                Ok(status)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::events::BondingProgress;

    fn paper_rig() -> (QuoteProvider, Arc<LiquidityAnalyzer>, Arc<SimClock>) {
        let clock = SimClock::new(0);
        let liquidity = Arc::new(LiquidityAnalyzer::new(clock.clone(), 85.0, 5.0, 0.5));
        let provider = QuoteProvider::Paper(PaperQuoteProvider::new(clock.clone(), liquidity.clone()));
        (provider, liquidity, clock)
    }

    fn seed_curve(liquidity: &LiquidityAnalyzer, mint: TokenId, clock: &SimClock) {
        liquidity.on_progress(&BondingProgress {
            mint,
            curve: TokenId([0xCC; 32]),
            progress_pct: 0.0,
            virtual_sol: 30 * LAMPORTS_PER_SOL,
            virtual_tokens: 1_000_000 * 1_000_000,
            real_sol: 50 * LAMPORTS_PER_SOL,
            real_tokens: 1_000_000 * 1_000_000,
            total_supply: 1_000_000 * 1_000_000,
            in_entry_zone: true,
            signature: String::new(),
            timestamp: 1_000,
            slot: 0,
        });
        clock.set(2_000);
        liquidity.update(&mint).unwrap();
    }

    #[tokio::test]
    async fn paper_buy_quote_prices_from_curve() {
        let (provider, liquidity, clock) = paper_rig();
        let mint = TokenId([1; 32]);
        seed_curve(&liquidity, mint, &clock);

        let sol_mint = TokenId([0; 32]);
        let quote = provider
            .get_quote(sol_mint, mint, LAMPORTS_PER_SOL, 500)
            .await
            .unwrap();

        // 1 SOL at 3e-5 SOL/token with ~3.83 % slippage: ~32k tokens.
        let tokens_out = quote.out_amount as f64 / 1_000_000.0;
        assert!(tokens_out > 30_000.0 && tokens_out < 33_334.0, "out {tokens_out}");
        assert!(quote.min_out_amount < quote.out_amount);
        assert!((quote.price_impact_pct - 3.8333).abs() < 0.01);
    }

    #[tokio::test]
    async fn paper_bundles_land_instantly() {
        let (provider, liquidity, clock) = paper_rig();
        let mint = TokenId([1; 32]);
        seed_curve(&liquidity, mint, &clock);

        let tx = provider
            .build_swap_tx(
                &provider
                    .get_quote(TokenId([0; 32]), mint, LAMPORTS_PER_SOL, 100)
                    .await
                    .unwrap(),
                &TokenId([7; 32]),
                100_000,
            )
            .await
            .unwrap();
        let bundle = provider.submit_bundle(&[tx]).await.unwrap();
        assert_eq!(
            provider.bundle_status(&bundle).await.unwrap(),
            BundleStatus::Landed { slot: 0 }
        );
    }

    #[tokio::test]
    async fn paper_quote_for_unknown_token_fails() {
        let (provider, _liquidity, _clock) = paper_rig();
        let err = provider
            .get_quote(TokenId([0; 32]), TokenId([9; 32]), LAMPORTS_PER_SOL, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Network(_)));
    }

    #[test]
    fn rate_limit_error_carries_reset() {
        let clock = SimClock::new(10_000);
        let provider = HttpQuoteProvider::new(
            clock.clone(),
            "http://localhost".into(),
            "http://localhost".into(),
            30,
        )
        .unwrap();
        *provider.rate_limit.write() = (0, 15_000);
        let err = provider.check_rate_limit().unwrap_err();
        match err {
            BotError::RateLimit { reset_in_ms } => assert_eq!(reset_in_ms, 5_000),
            other => panic!("unexpected {other:?}"),
        }
    }
}
