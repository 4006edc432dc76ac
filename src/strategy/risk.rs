//! Risk manager.
//!
//! Sole owner of [`PortfolioState`]. Approves entries against the
//! per-trade budget, the position cap and the daily drawdown halt, sizes
//! positions in whole contracts, decides exits, and books fills and
//! closes.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::{debug, error, info, warn};

use super::edge::Edge;
use crate::types::{
    ExitReason, LifecycleError, MarketStatus, PortfolioState, Position, PositionState,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub initial_balance: Decimal,
    /// Maximum cost of one entry as a fraction of free balance.
    pub risk_per_trade_pct: Decimal,
    /// Daily loss (fraction of the day's starting balance) that halts trading.
    pub max_daily_drawdown_pct: Decimal,
    /// Cap on positions that are OPEN or CLOSING.
    pub max_open_positions: usize,
    /// Reversed edge magnitude that forces an exit.
    pub stop_loss_deviation: Decimal,
    /// No entries while balance is below this fraction of the initial balance.
    pub min_balance_fraction: Decimal,
    /// Trading-day length; periods are aligned to UTC midnight.
    pub reset_period: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            risk_per_trade_pct: dec!(0.01),
            max_daily_drawdown_pct: dec!(0.05),
            max_open_positions: 5,
            stop_loss_deviation: dec!(0.05),
            min_balance_fraction: dec!(0.5),
            reset_period: Duration::hours(24),
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why an entry was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    Halted,
    PositionCap { open: usize, max: usize },
    ZeroSize,
    ExceedsBudget { cost: Decimal, budget: Decimal },
    BalanceFloor { balance: Decimal, floor: Decimal },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Halted => write!(f, "trading halted for the day"),
            RejectionReason::PositionCap { open, max } => {
                write!(f, "position cap reached ({open}/{max})")
            }
            RejectionReason::ZeroSize => write!(f, "size is zero"),
            RejectionReason::ExceedsBudget { cost, budget } => {
                write!(f, "cost ${cost:.2} exceeds per-trade budget ${budget:.2}")
            }
            RejectionReason::BalanceFloor { balance, floor } => {
                write!(f, "balance ${balance:.2} below floor ${floor:.2}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Risk manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    config: RiskConfig,
    state: PortfolioState,
}

impl RiskManager {
    /// Start a fresh portfolio; the first trading day begins at the
    /// period boundary containing `now`.
    pub fn new(config: RiskConfig, now: DateTime<Utc>) -> Self {
        let start = period_start(now, config.reset_period);
        let state = PortfolioState::new(config.initial_balance, start);
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    /// Copy of the portfolio for readers outside the loop.
    pub fn snapshot(&self) -> PortfolioState {
        self.state.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    /// Maximum cost of one entry at the current balance.
    pub fn trade_budget(&self) -> Decimal {
        self.state.balance * self.config.risk_per_trade_pct
    }

    /// Check an entry of `size` contracts at `price` against every rule.
    pub fn check_open(&self, size: u64, price: Decimal) -> Result<(), RejectionReason> {
        if self.state.halted {
            return Err(RejectionReason::Halted);
        }
        if self.state.open_positions >= self.config.max_open_positions {
            return Err(RejectionReason::PositionCap {
                open: self.state.open_positions,
                max: self.config.max_open_positions,
            });
        }
        if size == 0 {
            return Err(RejectionReason::ZeroSize);
        }
        let floor = self.config.initial_balance * self.config.min_balance_fraction;
        if self.state.balance < floor {
            return Err(RejectionReason::BalanceFloor {
                balance: self.state.balance,
                floor,
            });
        }
        let cost = Decimal::from(size) * price;
        let budget = self.trade_budget();
        if cost > budget {
            return Err(RejectionReason::ExceedsBudget { cost, budget });
        }
        Ok(())
    }

    pub fn can_open(&self, size: u64, price: Decimal) -> bool {
        self.check_open(size, price).is_ok()
    }

    /// Whole contracts affordable within the per-trade budget at the
    /// edge's entry price. Zero means skip.
    pub fn size_for(&self, edge: &Edge, balance: Decimal) -> u64 {
        let price = edge.entry_price;
        if price <= Decimal::ZERO || balance <= Decimal::ZERO {
            return 0;
        }
        let budget = balance * self.config.risk_per_trade_pct;
        let mut contracts = (budget / price).floor();
        // Division rounds at 28 digits; step down until the cost fits exactly.
        while contracts > Decimal::ZERO && contracts * price > budget {
            contracts -= Decimal::ONE;
        }
        let size = contracts.to_u64().unwrap_or(0);

        debug!(
            market_id = %edge.market_id,
            budget = %format!("${:.2}", budget),
            price = %format!("{:.0}¢", price * dec!(100)),
            size,
            "Position sized"
        );
        size
    }

    /// Exit when the market settled, or when the current edge points
    /// against the held side by at least the stop-loss deviation.
    pub fn should_exit(
        &self,
        position: &Position,
        current_edge: Option<&Edge>,
        market_status: MarketStatus,
    ) -> bool {
        if matches!(market_status, MarketStatus::Settled { .. }) {
            return true;
        }
        match current_edge {
            Some(edge) => {
                edge.is_against(position.side) && edge.magnitude >= self.config.stop_loss_deviation
            }
            None => false,
        }
    }

    /// Raise the halt once the day's loss reaches the drawdown limit.
    /// Returns the halt flag.
    pub fn check_daily_halt(&mut self) -> bool {
        if self.state.halted {
            return true;
        }
        let limit = -self.config.max_daily_drawdown_pct * self.state.starting_daily_balance;
        if self.state.daily_pnl <= limit {
            self.state.halted = true;
            error!(
                daily_pnl = %format!("${:.2}", self.state.daily_pnl),
                limit = %format!("${:.2}", limit),
                starting_balance = %format!("${:.2}", self.state.starting_daily_balance),
                "Daily drawdown limit hit, trading halted until reset"
            );
        }
        self.state.halted
    }

    /// Start a new trading day if `now` is past the current period.
    /// Fires at most once per period. Returns true if a reset happened.
    pub fn maybe_daily_reset(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.state.last_reset + self.config.reset_period {
            return false;
        }
        let was_halted = self.state.halted;
        let previous_pnl = self.state.daily_pnl;

        self.state.last_reset = period_start(now, self.config.reset_period);
        self.state.daily_pnl = Decimal::ZERO;
        self.state.starting_daily_balance = self.state.equity();
        self.state.halted = false;

        info!(
            previous_pnl = %format!("${:.2}", previous_pnl),
            starting_balance = %format!("${:.2}", self.state.starting_daily_balance),
            cleared_halt = was_halted,
            "Daily reset"
        );
        true
    }

    /// Book a confirmed entry fill.
    pub fn record_fill(&mut self, position: &Position) {
        let cost = position.cost_basis();
        self.state.balance -= cost;
        self.state.committed += cost;
        self.state.open_positions += 1;

        info!(
            position = %position,
            cost = %format!("${:.2}", cost),
            balance = %format!("${:.2}", self.state.balance),
            "Fill recorded"
        );
    }

    /// Close a CLOSING position at `exit_price` and book the proceeds.
    ///
    /// The position moves to CLOSED and the portfolio is updated together;
    /// on error neither is touched. Returns the realized P&L.
    pub fn record_close(
        &mut self,
        position: &mut Position,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LifecycleError> {
        position.transition(PositionState::Closed)?;

        let cost = position.cost_basis();
        let proceeds = Decimal::from(position.size) * exit_price;
        let pnl = proceeds - cost;

        position.exit_price = Some(exit_price);
        position.exit_reason = Some(reason);
        position.exit_time = Some(now);
        position.realized_pnl = Some(position.realized_pnl.unwrap_or(Decimal::ZERO) + pnl);
        position.mark_price = Some(exit_price);

        self.state.balance += proceeds;
        self.state.committed -= cost;
        self.state.daily_pnl += pnl;
        self.state.open_positions = self.state.open_positions.saturating_sub(1);
        self.state.peak_equity = self.state.peak_equity.max(self.state.equity());

        info!(
            market_id = %position.market_id,
            side = %position.side,
            size = position.size,
            entry = %format!("{:.0}¢", position.entry_price * dec!(100)),
            exit = %format!("{:.0}¢", exit_price * dec!(100)),
            pnl = %format!("${:.2}", pnl),
            reason = %reason,
            "Position closed"
        );

        self.check_daily_halt();
        Ok(pnl)
    }

    /// Book `sold` contracts of a CLOSING position sold at `exit_price`.
    ///
    /// The position shrinks to the unsold remainder and stays CLOSING.
    /// `sold` must leave at least one contract; a full exit goes through
    /// [`record_close`](Self::record_close). Returns the realized P&L of
    /// the sold part.
    pub fn record_partial_close(
        &mut self,
        position: &mut Position,
        sold: u64,
        exit_price: Decimal,
    ) -> Result<Decimal, LifecycleError> {
        if position.state != PositionState::Closing || sold == 0 || sold >= position.size {
            return Err(LifecycleError::InvalidPartialExit {
                id: position.id,
                sold,
                size: position.size,
            });
        }

        let cost = Decimal::from(sold) * position.entry_price;
        let proceeds = Decimal::from(sold) * exit_price;
        let pnl = proceeds - cost;

        position.size -= sold;
        position.realized_pnl = Some(position.realized_pnl.unwrap_or(Decimal::ZERO) + pnl);

        self.state.balance += proceeds;
        self.state.committed -= cost;
        self.state.daily_pnl += pnl;
        self.state.peak_equity = self.state.peak_equity.max(self.state.equity());

        info!(
            market_id = %position.market_id,
            side = %position.side,
            sold,
            remaining = position.size,
            exit = %format!("{:.0}¢", exit_price * dec!(100)),
            pnl = %format!("${:.2}", pnl),
            "Position partially closed"
        );

        self.check_daily_halt();
        Ok(pnl)
    }

    /// Replace the booked free cash with the venue's figure.
    ///
    /// P&L is only ever booked from fills and closes, so a mismatch here
    /// is logged as drift and does not touch `daily_pnl`.
    pub fn sync_balance(&mut self, venue_balance: Decimal) {
        let drift = venue_balance - self.state.balance;
        if drift.abs() >= dec!(0.01) {
            warn!(
                booked = %format!("${:.2}", self.state.balance),
                venue = %format!("${:.2}", venue_balance),
                drift = %format!("${:+.2}", drift),
                "Balance differs from venue, using venue figure"
            );
        }
        self.state.balance = venue_balance;
        self.state.peak_equity = self.state.peak_equity.max(self.state.equity());
    }
}

/// Start of the reset period containing `now`, counting whole periods
/// from the Unix epoch (a UTC midnight).
fn period_start(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let len = period.num_seconds().max(1);
    let secs = now.timestamp();
    let start = secs - secs.rem_euclid(len);
    DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
