//! Accountant: cycle reports and portfolio summaries.
//!
//! Turns the risk manager's state and the position book into the
//! read-only records the loop logs and publishes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

use crate::engine::lifecycle::PositionBook;
use crate::types::{PortfolioState, PositionState};

// ---------------------------------------------------------------------------
// Portfolio summary
// ---------------------------------------------------------------------------

/// Snapshot of the account at the end of a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub cycle: u64,
    pub balance: Decimal,
    pub committed: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    /// Fraction below peak equity.
    pub drawdown: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub open_positions: usize,
    pub closing_positions: usize,
    pub unrealized_pnl: Decimal,
    pub halted: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// What one scan cycle did.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CycleActivity {
    pub daily_reset: bool,
    pub markets_scanned: usize,
    pub candidates: usize,
    pub estimates: usize,
    pub unavailable: usize,
    pub edges_found: usize,
    pub opened: usize,
    pub open_failures: usize,
    pub exits: usize,
    /// Exits that sold part of a position; the rest stays CLOSING.
    pub partial_exits: usize,
    pub close_failures: usize,
    pub balance_synced: bool,
    pub settlements: usize,
    pub arbitrage_flags: usize,
    pub realized_pnl: Decimal,
    /// Set when the market snapshot could not be fetched.
    pub snapshot_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub activity: CycleActivity,
    pub summary: PortfolioSummary,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Summarise the portfolio and the positions still held.
    pub fn summarize(
        cycle: u64,
        state: &PortfolioState,
        book: &PositionBook,
        now: DateTime<Utc>,
    ) -> PortfolioSummary {
        let (open, closing) = book.active().fold((0, 0), |(o, c), p| match p.state {
            PositionState::Open => (o + 1, c),
            PositionState::Closing => (o, c + 1),
            PositionState::Closed => (o, c),
        });

        PortfolioSummary {
            cycle,
            balance: state.balance,
            committed: state.committed,
            equity: state.equity(),
            peak_equity: state.peak_equity,
            drawdown: state.drawdown(),
            daily_pnl: state.daily_pnl,
            daily_pnl_pct: state.daily_pnl_pct(),
            open_positions: open,
            closing_positions: closing,
            unrealized_pnl: book.unrealized_pnl(),
            halted: state.halted,
            timestamp: now,
        }
    }

    /// Build and log the end-of-cycle report.
    pub fn reconcile(
        cycle: u64,
        activity: CycleActivity,
        state: &PortfolioState,
        book: &PositionBook,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let summary = Self::summarize(cycle, state, book, now);

        info!(
            cycle,
            scanned = activity.markets_scanned,
            estimates = activity.estimates,
            edges = activity.edges_found,
            opened = activity.opened,
            exits = activity.exits,
            partial_exits = activity.partial_exits,
            settlements = activity.settlements,
            balance = %format!("${:.2}", summary.balance),
            equity = %format!("${:.2}", summary.equity),
            daily_pnl = %format!("${:.2} ({:.2}%)", summary.daily_pnl, summary.daily_pnl_pct * dec!(100)),
            drawdown = %format!("{:.2}%", summary.drawdown * dec!(100)),
            unrealized = %format!("${:.2}", summary.unrealized_pnl),
            positions = summary.open_positions + summary.closing_positions,
            halted = summary.halted,
            "Cycle complete"
        );

        CycleReport {
            cycle_number: cycle,
            activity,
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
