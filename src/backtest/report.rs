// =============================================================================
// Backtest Reports — summary text plus trades / daily P&L / equity CSVs
// =============================================================================
//
// All CSV builders are pure functions over the result so the replay
// determinism property (byte-identical trade CSVs) is directly testable.
// Timestamps are ISO-8601 UTC.
// =============================================================================

use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::types::{Side, TimestampMs};

use super::engine::BacktestResult;

fn iso(ts: TimestampMs) -> String {
    Utc.timestamp_millis_opt(ts)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn date_of(ts: TimestampMs) -> String {
    Utc.timestamp_millis_opt(ts)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `trades.csv` — one row per confirmed fill.
pub fn trades_csv(result: &BacktestResult) -> String {
    let mut out = String::from("timestamp,token,side,sol_amount,token_amount,price_sol,reason,order_id\n");
    for t in &result.trades {
        out.push_str(&format!(
            "{},{},{},{:.9},{},{:.12},{},{}\n",
            iso(t.timestamp),
            t.token.to_hex(),
            t.side,
            t.sol_amount,
            t.token_amount,
            t.price_sol,
            t.reason.map(|r| r.to_string()).unwrap_or_default(),
            t.order_id,
        ));
    }
    out
}

/// `daily_pnl.csv` — realized P&L and trade counts per UTC day.
pub fn daily_pnl_csv(result: &BacktestResult) -> String {
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Day {
        realized: f64,
        closes: u32,
        wins: u32,
        losses: u32,
        trades: u32,
    }

    let mut days: BTreeMap<String, Day> = BTreeMap::new();
    for trade in &result.trades {
        days.entry(date_of(trade.timestamp)).or_default().trades += 1;
    }
    for position in &result.closed_positions {
        let Some(closed_at) = position.closed_at else {
            continue;
        };
        let day = days.entry(date_of(closed_at)).or_default();
        let pnl = position.total_pnl_sol.unwrap_or(0.0);
        day.realized += pnl;
        day.closes += 1;
        if pnl >= 0.0 {
            day.wins += 1;
        } else {
            day.losses += 1;
        }
    }

    let mut out = String::from("date,realized_sol,closed_positions,wins,losses,fills\n");
    for (date, day) in days {
        out.push_str(&format!(
            "{},{:.9},{},{},{},{}\n",
            date, day.realized, day.closes, day.wins, day.losses, day.trades
        ));
    }
    out
}

/// `equity.csv` — the mark-to-market equity curve.
pub fn equity_csv(result: &BacktestResult) -> String {
    let mut out = String::from("timestamp,equity_sol\n");
    for (ts, equity) in &result.equity_curve {
        out.push_str(&format!("{},{:.9}\n", iso(*ts), equity));
    }
    out
}

/// `summary.txt` — headline numbers in a readable block.
pub fn summary_text(result: &BacktestResult) -> String {
    let m = &result.metrics;
    let buys = result.trades.iter().filter(|t| t.side == Side::Buy).count();
    let sells = result.trades.len() - buys;

    let mut out = String::new();
    out.push_str("==============================================================\n");
    out.push_str("  NOVA BACKTEST SUMMARY\n");
    out.push_str("==============================================================\n\n");
    out.push_str(&format!("  starting capital : {:>12.4} SOL\n", m.starting_capital_sol));
    out.push_str(&format!("  final capital    : {:>12.4} SOL\n", m.final_capital_sol));
    out.push_str(&format!("  total return     : {:>11.2} %\n", m.total_return_pct));
    out.push_str(&format!("  max drawdown     : {:>11.2} %\n\n", m.max_drawdown_pct));
    out.push_str(&format!("  fills            : {:>6} ({buys} buys / {sells} sells)\n", m.trades));
    out.push_str(&format!("  closed positions : {:>6}\n", m.wins + m.losses));
    out.push_str(&format!("  wins / losses    : {:>6} / {}\n", m.wins, m.losses));
    out.push_str(&format!("  win rate         : {:>11.2} %\n", m.win_rate));
    if m.profit_factor.is_finite() {
        out.push_str(&format!("  profit factor    : {:>11.2}\n", m.profit_factor));
    } else {
        out.push_str("  profit factor    :          inf\n");
    }
    out
}

/// Write all four report files into `dir` (created if missing).
pub fn write_reports(dir: impl AsRef<Path>, result: &BacktestResult) -> std::io::Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("summary.txt"), summary_text(result))?;
    std::fs::write(dir.join("trades.csv"), trades_csv(result))?;
    std::fs::write(dir.join("daily_pnl.csv"), daily_pnl_csv(result))?;
    std::fs::write(dir.join("equity.csv"), equity_csv(result))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::engine::{PerformanceMetrics, TradeFill};
    use crate::types::{ExitReason, TokenId};

    fn result_fixture() -> BacktestResult {
        BacktestResult {
            trades: vec![
                TradeFill {
                    timestamp: 1_700_000_000_000,
                    token: TokenId([1; 32]),
                    side: Side::Buy,
                    sol_amount: 0.5,
                    token_amount: 10_000_000,
                    price_sol: 0.00000005,
                    reason: None,
                    order_id: "order-1".into(),
                },
                TradeFill {
                    timestamp: 1_700_000_600_000,
                    token: TokenId([1; 32]),
                    side: Side::Sell,
                    sol_amount: 0.8,
                    token_amount: 10_000_000,
                    price_sol: 0.00000008,
                    reason: Some(ExitReason::TakeProfit),
                    order_id: "order-2".into(),
                },
            ],
            closed_positions: Vec::new(),
            equity_curve: vec![(1_700_000_000_000, 10.0), (1_700_000_600_000, 10.3)],
            metrics: PerformanceMetrics {
                starting_capital_sol: 10.0,
                final_capital_sol: 10.3,
                total_return_pct: 3.0,
                trades: 2,
                wins: 1,
                losses: 0,
                win_rate: 100.0,
                profit_factor: f64::INFINITY,
                max_drawdown_pct: 0.0,
            },
        }
    }

    #[test]
    fn trades_csv_has_fixed_columns_and_iso_times() {
        let csv = trades_csv(&result_fixture());
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,token,side,sol_amount,token_amount,price_sol,reason,order_id"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2023-11-14T22:13:20+00:00,"));
        assert!(row.contains(",BUY,"));
        let sell_row = lines.next().unwrap();
        assert!(sell_row.contains(",take_profit,order-2"));
    }

    #[test]
    fn csv_builders_are_deterministic() {
        let r = result_fixture();
        assert_eq!(trades_csv(&r), trades_csv(&r));
        assert_eq!(equity_csv(&r), equity_csv(&r));
        assert_eq!(daily_pnl_csv(&r), daily_pnl_csv(&r));
    }

    #[test]
    fn summary_mentions_headline_numbers() {
        let text = summary_text(&result_fixture());
        assert!(text.contains("total return"));
        assert!(text.contains("3.00"));
        assert!(text.contains("1 buys / 1 sells"));
        assert!(text.contains("inf"));
    }

    #[test]
    fn reports_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_reports(dir.path(), &result_fixture()).unwrap();
        for file in ["summary.txt", "trades.csv", "daily_pnl.csv", "equity.csv"] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }
    }
}
