//! Shared types for the AUGUR engine.
//!
//! These types form the data model used across all modules. Venue,
//! provider, strategy and engine modules depend on them without
//! depending on each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A binary-outcome market as seen in one venue fetch.
///
/// Immutable per fetch; the scan loop refreshes it every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub category: MarketCategory,
    /// Quoted price to buy YES (0.0–1.0)
    pub price_yes: Decimal,
    /// Quoted price to buy NO (0.0–1.0)
    pub price_no: Decimal,
    /// Traded volume in contracts
    pub volume: Decimal,
    /// Resting liquidity in USD equivalent
    pub liquidity: Decimal,
    pub status: MarketStatus,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (YES: {:.0}¢ | NO: {:.0}¢ | vol: {:.0} | {})",
            self.id,
            self.question,
            self.price_yes * dec!(100),
            self.price_no * dec!(100),
            self.volume,
            self.category,
        )
    }
}

impl Market {
    /// Quoted price for buying the given side.
    pub fn price_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.price_yes,
            Side::No => self.price_no,
        }
    }

    /// Price at which a held `side` can be sold now: the side's bid,
    /// derived from the opposite side's quoted price.
    pub fn bid_for(&self, side: Side) -> Decimal {
        (Decimal::ONE - self.price_for(side.opposite())).max(Decimal::ZERO)
    }

    /// Whether the market still accepts orders.
    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    /// Settlement outcome, if the venue has resolved the market.
    pub fn settlement(&self) -> Option<Side> {
        match self.status {
            MarketStatus::Settled { outcome } => Some(outcome),
            _ => None,
        }
    }

    /// Helper to build a test/sample market with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Market {
            id: "PRES-2028-DEM".to_string(),
            question: "Will the Democratic candidate win the 2028 presidential election?"
                .to_string(),
            category: MarketCategory::Politics,
            price_yes: dec!(0.45),
            price_no: dec!(0.56),
            volume: dec!(25000),
            liquidity: dec!(12000),
            status: MarketStatus::Open,
        }
    }
}

/// Venue lifecycle status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MarketStatus {
    Open,
    /// Trading halted, outcome not yet determined.
    Closed,
    /// Final, authoritative resolution.
    Settled { outcome: Side },
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::Closed => write!(f, "closed"),
            MarketStatus::Settled { outcome } => write!(f, "settled {outcome}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Lowercase wire form used by the venue API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Market category, used to route markets to a fair-value provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    Politics,
    Economics,
    Sports,
    Other,
}

/// Title keywords per category, checked in order.
const CATEGORY_KEYWORDS: &[(MarketCategory, &[&str])] = &[
    (
        MarketCategory::Politics,
        &["politics", "election", "president", "senate", "congress"],
    ),
    (
        MarketCategory::Economics,
        &["cpi", "inflation", "gdp", "jobs", "unemployment", "fed"],
    ),
    (
        MarketCategory::Sports,
        &["nfl", "nba", "mlb", "f1", "racing", "soccer"],
    ),
];

impl MarketCategory {
    /// All known categories (useful for iteration).
    pub const ALL: &'static [MarketCategory] = &[
        MarketCategory::Politics,
        MarketCategory::Economics,
        MarketCategory::Sports,
        MarketCategory::Other,
    ];

    /// Infer a category from a market title by keyword.
    pub fn from_title(title: &str) -> Self {
        let lower = title.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
            .map(|(category, _)| *category)
            .unwrap_or(MarketCategory::Other)
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCategory::Politics => write!(f, "Politics"),
            MarketCategory::Economics => write!(f, "Economics"),
            MarketCategory::Sports => write!(f, "Sports"),
            MarketCategory::Other => write!(f, "Other"),
        }
    }
}

/// Attempt to parse a string into a MarketCategory (case-insensitive).
impl std::str::FromStr for MarketCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "politics" | "political" => Ok(MarketCategory::Politics),
            "economics" | "economic" | "econ" => Ok(MarketCategory::Economics),
            "sports" | "sport" => Ok(MarketCategory::Sports),
            "other" => Ok(MarketCategory::Other),
            _ => Err(anyhow::anyhow!("Unknown market category: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fair value
// ---------------------------------------------------------------------------

/// A provider's probability estimate for the YES outcome of a market.
///
/// Ephemeral: recomputed every cycle, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairValueEstimate {
    pub market_id: String,
    /// Probability of YES, clamped to [0, 1].
    pub probability: Decimal,
    /// Provider tag, e.g. "polling" or "arbitrage".
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl FairValueEstimate {
    pub fn new(market_id: impl Into<String>, probability: Decimal, source: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            probability: probability.clamp(Decimal::ZERO, Decimal::ONE),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for FairValueEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} P={:.1}% [{}]",
            self.market_id,
            self.probability * dec!(100),
            self.source,
        )
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Lifecycle state of a position. Only moves forward:
/// `Open → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    Closing,
    Closed,
}

impl PositionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: PositionState) -> bool {
        matches!(
            (self, next),
            (PositionState::Open, PositionState::Closing)
                | (PositionState::Closing, PositionState::Closed)
        )
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::Open => write!(f, "OPEN"),
            PositionState::Closing => write!(f, "CLOSING"),
            PositionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Edge reversed against the position by at least the stop-loss deviation.
    EdgeReversal,
    /// The venue settled the market.
    Settlement,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::EdgeReversal => write!(f, "edge reversal"),
            ExitReason::Settlement => write!(f, "settlement"),
        }
    }
}

/// A position held by the account.
///
/// Owned by the lifecycle controller from fill to close; mutated only
/// through [`Position::transition`] and the risk manager's
/// fill/close bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub market_id: String,
    pub side: Side,
    /// Fill price of the entry order for `side`.
    pub entry_price: Decimal,
    /// Whole contracts.
    pub size: u64,
    pub entry_time: DateTime<Utc>,
    /// YES probability at entry.
    pub entry_fair_value: Decimal,
    pub state: PositionState,
    /// Bid for `side` (what the position could be sold at), refreshed
    /// every cycle.
    pub mark_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    /// Realized so far, partial exits included.
    pub realized_pnl: Option<Decimal>,
    /// Consecutive failed close attempts while CLOSING.
    pub close_failures: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = self.realized_pnl.unwrap_or(Decimal::ZERO) + self.unrealized_pnl();
        write!(
            f,
            "{} {} {} x{} @ {:.0}¢ [{}] pnl=${:.2}",
            self.market_id,
            self.side,
            &self.id.to_string()[..8],
            self.size,
            self.entry_price * dec!(100),
            self.state,
            pnl,
        )
    }
}

impl Position {
    /// Create a newly filled position in the OPEN state.
    pub fn open(
        market_id: impl Into<String>,
        side: Side,
        size: u64,
        entry_price: Decimal,
        entry_fair_value: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id: market_id.into(),
            side,
            entry_price,
            size,
            entry_time: Utc::now(),
            entry_fair_value,
            state: PositionState::Open,
            mark_price: Some(entry_price),
            exit_reason: None,
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            close_failures: 0,
        }
    }

    /// Capital committed at entry: `size * entry_price`.
    pub fn cost_basis(&self) -> Decimal {
        Decimal::from(self.size) * self.entry_price
    }

    /// P&L if the position were closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        Decimal::from(self.size) * (price - self.entry_price)
    }

    /// Mark-to-market P&L; zero once closed or before the first mark.
    pub fn unrealized_pnl(&self) -> Decimal {
        match (self.state, self.mark_price) {
            (PositionState::Closed, _) | (_, None) => Decimal::ZERO,
            (_, Some(mark)) => self.pnl_at(mark),
        }
    }

    /// Value of one contract of `side` once the market settled on `outcome`.
    pub fn settlement_value(&self, outcome: Side) -> Decimal {
        if outcome == self.side {
            Decimal::ONE
        } else {
            Decimal::ZERO
        }
    }

    /// Whether the position still carries exposure (OPEN or CLOSING).
    pub fn is_active(&self) -> bool {
        self.state != PositionState::Closed
    }

    /// Move to `next`, rejecting any transition other than
    /// `Open → Closing` or `Closing → Closed`.
    pub fn transition(&mut self, next: PositionState) -> Result<(), LifecycleError> {
        if self.state == PositionState::Closed {
            return Err(LifecycleError::AlreadyClosed(self.id));
        }
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// Account-level state owned by the risk manager.
///
/// `balance` is free cash; `committed` is the cost basis of every
/// position that is OPEN or CLOSING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub starting_daily_balance: Decimal,
    pub balance: Decimal,
    pub committed: Decimal,
    pub daily_pnl: Decimal,
    /// Positions not yet CLOSED.
    pub open_positions: usize,
    pub halted: bool,
    pub last_reset: DateTime<Utc>,
    pub peak_equity: Decimal,
}

impl fmt::Display for PortfolioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | balance=${:.2} | equity=${:.2} | daily=${:.2} ({:.2}%) | positions={}",
            if self.halted { "HALTED" } else { "ACTIVE" },
            self.balance,
            self.equity(),
            self.daily_pnl,
            self.daily_pnl_pct() * dec!(100),
            self.open_positions,
        )
    }
}

impl PortfolioState {
    /// Fresh state for a new trading day starting at `last_reset`.
    pub fn new(initial_balance: Decimal, last_reset: DateTime<Utc>) -> Self {
        Self {
            starting_daily_balance: initial_balance,
            balance: initial_balance,
            committed: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            open_positions: 0,
            halted: false,
            last_reset,
            peak_equity: initial_balance,
        }
    }

    /// Cash plus capital committed to positions at cost.
    pub fn equity(&self) -> Decimal {
        self.balance + self.committed
    }

    /// Daily P&L as a fraction of the starting daily balance.
    pub fn daily_pnl_pct(&self) -> Decimal {
        if self.starting_daily_balance <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.daily_pnl / self.starting_daily_balance
        }
    }

    /// Drawdown from peak equity as a fraction (0.0 = at peak).
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            Decimal::ONE - self.equity() / self.peak_equity
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Rejected position state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Position {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: PositionState,
        to: PositionState,
    },

    #[error("Position {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("No active position for market {0}")]
    UnknownMarket(String),

    #[error("Market {0} already has an active position")]
    DuplicateMarket(String),

    #[error("Position {id} cannot partially exit {sold} of {size} contracts")]
    InvalidPartialExit { id: Uuid, sold: u64, size: u64 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
