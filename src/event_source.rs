// =============================================================================
// Event Source — WebSocket subscription to the launch venue
// =============================================================================
//
// Connects to the upstream stream, parses venue events, and fans them into
// an mpsc channel. On disconnect it reconnects with exponential backoff up
// to 10 attempts, emitting lifecycle events so health monitoring can react.
//
// Delivery discipline: launches and migrations are critical and block until
// the channel accepts them; trades and progress updates are shed (with a
// warning) when the queue is full.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::events::{StreamEvent, VenueEvent};

/// Maximum reconnect attempts before the source gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Base backoff delay, doubled per attempt and capped.
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Counters exposed to the health monitor.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub events_received: AtomicU64,
    pub events_dropped: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Run the event subscription until the stream ends, the channel closes, or
/// reconnection is exhausted. Spawned once by the orchestrator.
pub async fn run_event_stream(
    url: String,
    tx: mpsc::Sender<StreamEvent>,
    stats: Arc<StreamStats>,
) -> Result<()> {
    let mut attempt: u32 = 0;

    loop {
        match connect_and_pump(&url, &tx, &stats, attempt).await {
            Ok(()) => {
                // Clean end of stream (finite source) — report and stop.
                let _ = tx
                    .send(StreamEvent::Disconnected {
                        reason: "stream ended".into(),
                        will_reconnect: false,
                    })
                    .await;
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                stats.reconnects.fetch_add(1, Ordering::Relaxed);
                let will_reconnect = attempt < MAX_RECONNECT_ATTEMPTS;

                if tx
                    .send(StreamEvent::Disconnected {
                        reason: e.to_string(),
                        will_reconnect,
                    })
                    .await
                    .is_err()
                {
                    return Ok(()); // receiver gone, engine is shutting down
                }

                if !will_reconnect {
                    error!(attempts = attempt, error = %e, "event stream exhausted reconnect budget");
                    anyhow::bail!("event stream failed after {attempt} attempts: {e}");
                }

                let delay = backoff_delay_ms(attempt);
                warn!(
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "event stream disconnected — reconnecting"
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }
        }
    }
}

/// Exponential backoff with a hard cap.
fn backoff_delay_ms(attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(16);
    (BACKOFF_BASE_MS.saturating_mul(1u64 << exp)).min(BACKOFF_CAP_MS)
}

async fn connect_and_pump(
    url: &str,
    tx: &mpsc::Sender<StreamEvent>,
    stats: &Arc<StreamStats>,
    attempt: u32,
) -> Result<()> {
    info!(url = %url, attempt, "connecting to event stream");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to event stream")?;

    info!(url = %url, "event stream connected");
    let _ = tx.send(StreamEvent::Connected { attempt }).await;

    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match serde_json::from_str::<VenueEvent>(&text) {
                        Ok(event) => {
                            stats.events_received.fetch_add(1, Ordering::Relaxed);
                            deliver(tx, stats, event).await?;
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse venue event");
                            let _ = tx
                                .send(StreamEvent::Error {
                                    message: format!("parse error: {e}"),
                                })
                                .await;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "event stream read error");
                return Err(e.into());
            }
            None => {
                warn!("event stream ended");
                return Ok(());
            }
        }
    }
}

/// Critical events block until accepted; non-critical are shed on overflow.
async fn deliver(
    tx: &mpsc::Sender<StreamEvent>,
    stats: &Arc<StreamStats>,
    event: VenueEvent,
) -> Result<()> {
    if event.is_critical() {
        tx.send(StreamEvent::Venue(event))
            .await
            .map_err(|_| anyhow::anyhow!("event channel closed"))?;
        return Ok(());
    }

    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(StreamEvent::Venue(event)) {
        let dropped = stats.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped % 100 == 1 {
            warn!(total_dropped = dropped, "event queue full — shedding non-critical events");
        }
    }
    Ok(())
}
