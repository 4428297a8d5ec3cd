// =============================================================================
// Terminal Dashboard — line-oriented ANSI status view
// =============================================================================
//
// Redrawn every 5 seconds (configurable): status header, today's
// performance, open positions (up to 5), top momentum tokens (up to 5),
// per-service health, and a paper/live footer. Rendering is a pure
// string-builder so tests can assert on the output; the loop only clears
// the screen and prints.
// =============================================================================

use std::io::Write as _;
use std::sync::Arc;

use crossterm::{cursor, execute, terminal};

use crate::app_state::{AppState, EngineStatus};
use crate::health::HealthStatus;
use crate::positions::Position;
use crate::rankings::RankEntry;
use crate::risk::RiskSnapshot;
use crate::types::TradingMode;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

/// Everything the renderer needs, captured in one consistent snapshot.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub status: EngineStatus,
    pub mode: TradingMode,
    pub uptime_secs: i64,
    pub tracked_tokens: usize,
    pub signals_emitted: u64,
    pub orders_failed: u64,
    pub risk: RiskSnapshot,
    pub open_positions: Vec<Position>,
    pub top_tokens: Vec<RankEntry>,
    pub services: Vec<crate::health::ServiceHealth>,
}

impl DashboardSnapshot {
    pub fn capture(state: &AppState) -> Self {
        Self {
            status: state.status(),
            mode: state.config.trading_mode,
            uptime_secs: state.uptime_secs(),
            tracked_tokens: state.tracker.len(),
            signals_emitted: state
                .signals_emitted
                .load(std::sync::atomic::Ordering::Relaxed),
            orders_failed: state
                .orders_failed
                .load(std::sync::atomic::Ordering::Relaxed),
            risk: state.risk.snapshot(),
            open_positions: state.positions.open_positions(),
            top_tokens: state.rankings.top(5),
            services: state.health.snapshot(),
        }
    }
}

fn pnl_color(v: f64) -> &'static str {
    if v >= 0.0 {
        GREEN
    } else {
        RED
    }
}

/// Render the snapshot as ANSI-coloured lines.
pub fn render(snap: &DashboardSnapshot) -> String {
    let mut out = String::with_capacity(2_048);

    // ── Header ──────────────────────────────────────────────────────────
    out.push_str(&format!(
        "{BOLD}{CYAN}╔══════════════════════════════════════════════════════════════╗{RESET}\n"
    ));
    out.push_str(&format!(
        "{BOLD}{CYAN}║  NOVA LAUNCH NEXUS  {RESET}  status: {BOLD}{}{RESET}   uptime: {}   tracked: {}\n",
        snap.status,
        format_uptime(snap.uptime_secs),
        snap.tracked_tokens
    ));
    out.push_str(&format!(
        "{BOLD}{CYAN}╚══════════════════════════════════════════════════════════════╝{RESET}\n"
    ));

    // ── Today ───────────────────────────────────────────────────────────
    let d = &snap.risk.daily;
    out.push_str(&format!("\n{BOLD}── Today ({}) ──{RESET}\n", d.date));
    out.push_str(&format!(
        "  signals: {}   trades: {}   wins/losses: {}{}/{}{}   failed orders: {}\n",
        snap.signals_emitted, d.trade_count, GREEN, d.wins, d.losses, RESET, snap.orders_failed
    ));
    out.push_str(&format!(
        "  realized: {}{:+.4} SOL{RESET}   unrealized: {}{:+.4} SOL{RESET}   capital: {:.4} SOL\n",
        pnl_color(d.realized_sol),
        d.realized_sol,
        pnl_color(d.unrealized_sol),
        d.unrealized_sol,
        snap.risk.current_capital_sol
    ));
    if d.limit_hit {
        out.push_str(&format!("  {RED}{BOLD}DAILY LOSS LIMIT HIT — trading paused{RESET}\n"));
    }

    // ── Open positions ──────────────────────────────────────────────────
    out.push_str(&format!(
        "\n{BOLD}── Open positions ({}) ──{RESET}\n",
        snap.open_positions.len()
    ));
    if snap.open_positions.is_empty() {
        out.push_str(&format!("  {DIM}none{RESET}\n"));
    }
    for p in snap.open_positions.iter().take(5) {
        out.push_str(&format!(
            "  {}  {}  entry {:.3e}  now {:.3e}  pnl {}{:+.4} SOL{RESET}  stop {:.3e}\n",
            p.token,
            p.status,
            p.entry_price,
            p.current_price,
            pnl_color(p.unrealized_pnl_sol),
            p.unrealized_pnl_sol,
            p.stop_loss_price
        ));
    }

    // ── Top momentum ────────────────────────────────────────────────────
    out.push_str(&format!("\n{BOLD}── Top momentum ──{RESET}\n"));
    if snap.top_tokens.is_empty() {
        out.push_str(&format!("  {DIM}no tracked tokens yet{RESET}\n"));
    }
    for entry in snap.top_tokens.iter().take(5) {
        let arrow = match entry.rank_change {
            n if n > 0 => format!("{GREEN}▲{n}{RESET}"),
            n if n < 0 => format!("{RED}▼{}{RESET}", -n),
            _ => format!("{DIM}·{RESET}"),
        };
        out.push_str(&format!(
            "  #{:<2} {}  score {:>5.1}  {}  {}\n",
            entry.rank, entry.token, entry.score, entry.signal, arrow
        ));
    }

    // ── Health ──────────────────────────────────────────────────────────
    out.push_str(&format!("\n{BOLD}── Services ──{RESET}\n"));
    for s in &snap.services {
        let color = match s.status {
            HealthStatus::Healthy => GREEN,
            HealthStatus::Degraded => YELLOW,
            HealthStatus::Critical => RED,
        };
        out.push_str(&format!("  {:<16} {color}{}{RESET}\n", s.name, s.status));
    }

    // ── Footer ──────────────────────────────────────────────────────────
    let mode = match snap.mode {
        TradingMode::Paper => format!("{YELLOW}{BOLD}PAPER TRADING{RESET}"),
        TradingMode::Live => format!("{RED}{BOLD}LIVE — REAL FUNDS{RESET}"),
    };
    out.push_str(&format!("\n{DIM}mode:{RESET} {mode}\n"));

    out
}

fn format_uptime(secs: i64) -> String {
    let h = secs / 3_600;
    let m = (secs % 3_600) / 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Run the dashboard refresh loop until the process exits.
pub async fn run_dashboard(state: Arc<AppState>, refresh_secs: u64) {
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs.max(1)));
    loop {
        ticker.tick().await;
        let snap = DashboardSnapshot::capture(&state);
        let rendered = render(&snap);

        let mut stdout = std::io::stdout();
        let _ = execute!(
            stdout,
            terminal::Clear(terminal::ClearType::All),
            cursor::MoveTo(0, 0)
        );
        let _ = stdout.write_all(rendered.as_bytes());
        let _ = stdout.flush();

        if snap.status == EngineStatus::Stopped {
            return;
        }
    }
}
