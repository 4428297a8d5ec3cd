// =============================================================================
// Data Store — SQLite persistence for signals, trades, positions and state
// =============================================================================
//
// Tables:
//   signals        emitted trading signals (batch-buffered, 50 per flush)
//   trades         confirmed orders
//   positions      open + closed positions (upserted on every change)
//   tokens         tracked-token registry
//   token_metrics  momentum time series
//   bot_state      single-row JSON blob (id = 1) for restart recovery
//
// The connection lives behind a Mutex; all writes are prepared statements,
// batches run inside one transaction.
// =============================================================================

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator::MomentumMetrics;
use crate::executor::Order;
use crate::kill_switch::KillSwitchState;
use crate::positions::Position;
use crate::risk::RiskSnapshot;
use crate::tracker::TrackedToken;
use crate::types::{SignalType, TimestampMs, TokenId};

/// Signals are flushed once this many are buffered.
const SIGNAL_BATCH_SIZE: usize = 50;

/// Persisted signal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: String,
    pub token: TokenId,
    pub signal: SignalType,
    pub score: f64,
    /// JSON of the per-channel breakdown.
    pub breakdown: String,
    pub created_at: TimestampMs,
    pub executed: bool,
    pub executed_at: Option<TimestampMs>,
    /// "success" | "failed" | "skipped".
    pub result: Option<String>,
}

impl SignalRecord {
    pub fn from_metrics(m: &MomentumMetrics) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token: m.token,
            signal: m.signal,
            score: m.score,
            breakdown: serde_json::to_string(&m.breakdown).unwrap_or_default(),
            created_at: m.calculated_at,
            executed: false,
            executed_at: None,
            result: None,
        }
    }
}

/// Engine state persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub open_positions: Vec<Position>,
    pub risk: RiskSnapshot,
    pub kill_switch: KillSwitchState,
    pub saved_at: TimestampMs,
}

/// The SQLite-backed store.
pub struct Store {
    conn: Mutex<Connection>,
    signal_buffer: Mutex<Vec<SignalRecord>>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signals (
                 id          TEXT PRIMARY KEY,
                 token       TEXT NOT NULL,
                 signal      TEXT NOT NULL,
                 score       REAL NOT NULL,
                 breakdown   TEXT NOT NULL,
                 created_at  INTEGER NOT NULL,
                 executed    INTEGER NOT NULL DEFAULT 0,
                 executed_at INTEGER,
                 result      TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_signals_token ON signals(token, created_at);

             CREATE TABLE IF NOT EXISTS trades (
                 id           TEXT PRIMARY KEY,
                 token        TEXT NOT NULL,
                 side         TEXT NOT NULL,
                 amount_in    INTEGER NOT NULL,
                 actual_out   INTEGER,
                 priority_fee INTEGER NOT NULL,
                 status       TEXT NOT NULL,
                 position_id  TEXT,
                 exit_reason  TEXT,
                 created_at   INTEGER NOT NULL,
                 confirmed_at INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_trades_token ON trades(token, created_at);

             CREATE TABLE IF NOT EXISTS positions (
                 id         TEXT PRIMARY KEY,
                 token      TEXT NOT NULL,
                 status     TEXT NOT NULL,
                 body       TEXT NOT NULL,
                 updated_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS tokens (
                 mint        TEXT PRIMARY KEY,
                 creator     TEXT NOT NULL,
                 launched_at INTEGER NOT NULL,
                 migrated    INTEGER NOT NULL DEFAULT 0,
                 last_update INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS token_metrics (
                 token      TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 score      REAL NOT NULL,
                 signal     TEXT NOT NULL,
                 body       TEXT NOT NULL,
                 PRIMARY KEY (token, created_at)
             );

             CREATE TABLE IF NOT EXISTS bot_state (
                 id         INTEGER PRIMARY KEY CHECK (id = 1),
                 state      TEXT NOT NULL,
                 updated_at INTEGER NOT NULL
             );",
        )?;
        info!(path = %path.as_ref().display(), "data store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            signal_buffer: Mutex::new(Vec::with_capacity(SIGNAL_BATCH_SIZE)),
        })
    }

    // -------------------------------------------------------------------------
    // Signals (buffered)
    // -------------------------------------------------------------------------

    /// Buffer a signal; flushes automatically at the batch size.
    pub fn record_signal(&self, record: SignalRecord) -> rusqlite::Result<()> {
        let ready = {
            let mut buffer = self.signal_buffer.lock();
            buffer.push(record);
            buffer.len() >= SIGNAL_BATCH_SIZE
        };
        if ready {
            self.flush_signals()?;
        }
        Ok(())
    }

    /// Write all buffered signals in one transaction.
    pub fn flush_signals(&self) -> rusqlite::Result<()> {
        let batch: Vec<SignalRecord> = {
            let mut buffer = self.signal_buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO signals
                 (id, token, signal, score, breakdown, created_at, executed, executed_at, result)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in &batch {
                stmt.execute(params![
                    s.id,
                    s.token.to_hex(),
                    s.signal.to_string(),
                    s.score,
                    s.breakdown,
                    s.created_at,
                    s.executed as i64,
                    s.executed_at,
                    s.result,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = batch.len(), "signal batch flushed");
        Ok(())
    }

    /// Mark a persisted signal as acted upon.
    pub fn mark_signal_executed(
        &self,
        signal_id: &str,
        executed_at: TimestampMs,
        result: &str,
    ) -> rusqlite::Result<()> {
        // The record may still be in the buffer.
        {
            let mut buffer = self.signal_buffer.lock();
            if let Some(s) = buffer.iter_mut().find(|s| s.id == signal_id) {
                s.executed = true;
                s.executed_at = Some(executed_at);
                s.result = Some(result.to_string());
                return Ok(());
            }
        }
        self.conn.lock().execute(
            "UPDATE signals SET executed = 1, executed_at = ?2, result = ?3 WHERE id = ?1",
            params![signal_id, executed_at, result],
        )?;
        Ok(())
    }

    pub fn signal_count(&self) -> rusqlite::Result<i64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM signals", [], |r| r.get(0))?;
        Ok(n + self.signal_buffer.lock().len() as i64)
    }

    // -------------------------------------------------------------------------
    // Trades / positions / tokens / metrics
    // -------------------------------------------------------------------------

    pub fn insert_trade(&self, order: &Order) -> rusqlite::Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO trades
             (id, token, side, amount_in, actual_out, priority_fee, status,
              position_id, exit_reason, created_at, confirmed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                order.id,
                order.token.to_hex(),
                order.side.to_string(),
                order.amount_in as i64,
                order.actual_out.map(|v| v as i64),
                order.priority_fee as i64,
                order.status.to_string(),
                order.position_id,
                order.exit_reason.map(|r| r.to_string()),
                order.created_at,
                order.confirmed_at,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_position(&self, position: &Position, now: TimestampMs) -> rusqlite::Result<()> {
        let body = serde_json::to_string(position).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO positions (id, token, status, body, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                position.id,
                position.token.to_hex(),
                position.status.to_string(),
                body,
                now
            ],
        )?;
        Ok(())
    }

    pub fn upsert_token(&self, mint: &TokenId, token: &TrackedToken) -> rusqlite::Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO tokens (mint, creator, launched_at, migrated, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mint.to_hex(),
                token.creator.to_hex(),
                token.launched_at,
                token.migrated as i64,
                token.last_update
            ],
        )?;
        Ok(())
    }

    pub fn insert_token_metric(&self, m: &MomentumMetrics) -> rusqlite::Result<()> {
        let body = serde_json::to_string(m).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO token_metrics (token, created_at, score, signal, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![m.token.to_hex(), m.calculated_at, m.score, m.signal.to_string(), body],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bot state blob
    // -------------------------------------------------------------------------

    pub fn save_state(&self, state: &PersistedState) -> rusqlite::Result<()> {
        let json = serde_json::to_string(state).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO bot_state (id, state, updated_at) VALUES (1, ?1, ?2)",
            params![json, state.saved_at],
        )?;
        debug!("bot state persisted");
        Ok(())
    }

    pub fn load_state(&self) -> rusqlite::Result<Option<PersistedState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT state FROM bot_state WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            match serde_json::from_str(&json) {
                Ok(state) => return Ok(Some(state)),
                Err(e) => {
                    tracing::warn!(error = %e, "persisted state unreadable — ignoring");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("buffered_signals", &self.signal_buffer.lock().len())
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
    use crate::risk::DailyPnL;

    fn store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // Leak the tempdir so the file outlives the test body.
        std::mem::forget(dir);
        Store::open(path).unwrap()
    }

    fn metrics(token_byte: u8, score: f64) -> MomentumMetrics {
        MomentumMetrics {
            token: TokenId([token_byte; 32]),
            calculated_at: 1_000,
            score,
            raw_score: score,
            signal: SignalType::Buy,
            breakdown: ScoreBreakdown {
                volume: 60.0,
                holders: 55.0,
                liquidity: 70.0,
                safety: 80.0,
            },
            in_entry_zone: true,
            should_enter: false,
            should_exit: false,
            reasons: Vec::new(),
            decay_applied: false,
            data_completeness: 1.0,
        }
    }

    #[test]
    fn signal_batching_defers_until_threshold() {
        let store = store();
        for i in 0..SIGNAL_BATCH_SIZE - 1 {
            store
                .record_signal(SignalRecord::from_metrics(&metrics((i % 200) as u8, 50.0)))
                .unwrap();
        }
        // Nothing on disk yet, but counts include the buffer.
        let on_disk: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM signals", [], |r| r.get(0))
            .unwrap();
        assert_eq!(on_disk, 0);
        assert_eq!(store.signal_count().unwrap(), (SIGNAL_BATCH_SIZE - 1) as i64);

        // The 50th record triggers the flush.
        store
            .record_signal(SignalRecord::from_metrics(&metrics(99, 50.0)))
            .unwrap();
        let on_disk: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM signals", [], |r| r.get(0))
            .unwrap();
        assert_eq!(on_disk, SIGNAL_BATCH_SIZE as i64);
    }

    #[test]
    fn mark_executed_reaches_buffered_and_flushed_records() {
        let store = store();
        let record = SignalRecord::from_metrics(&metrics(1, 70.0));
        let id = record.id.clone();
        store.record_signal(record).unwrap();

        // Still buffered.
        store.mark_signal_executed(&id, 2_000, "success").unwrap();
        store.flush_signals().unwrap();

        let result: String = store
            .conn
            .lock()
            .query_row("SELECT result FROM signals WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(result, "success");
    }

    #[test]
    fn state_blob_roundtrip() {
        let store = store();
        let state = PersistedState {
            open_positions: Vec::new(),
            risk: RiskSnapshot {
                starting_capital_sol: 10.0,
                current_capital_sol: 9.5,
                open_exposure_sol: 0.5,
                open_positions: 1,
                daily: DailyPnL {
                    date: "2026-08-01".into(),
                    starting_capital_sol: 10.0,
                    realized_sol: -0.5,
                    unrealized_sol: 0.1,
                    trade_count: 3,
                    wins: 1,
                    losses: 2,
                    limit_hit: false,
                    trading_paused: false,
                },
            },
            kill_switch: KillSwitchState {
                active: false,
                reason: None,
                triggered_by: None,
                triggered_at: None,
            },
            saved_at: 123_456,
        };
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.saved_at, 123_456);
        assert_eq!(loaded.risk.daily.trade_count, 3);
        assert!((loaded.risk.current_capital_sol - 9.5).abs() < 1e-12);

        // Single-row table: a second save overwrites.
        let mut state2 = state;
        state2.saved_at = 999;
        store.save_state(&state2).unwrap();
        assert_eq!(store.load_state().unwrap().unwrap().saved_at, 999);
    }

    #[test]
    fn empty_state_loads_none() {
        let store = store();
        assert!(store.load_state().unwrap().is_none());
    }
}
