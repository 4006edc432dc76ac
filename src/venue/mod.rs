//! Venue integration.
//!
//! The engine sees the venue through two narrow traits: [`MarketData`]
//! for quotes and status, [`Execution`] for entry and exit orders.
//! Implementations:
//! - [`kalshi::KalshiClient`]: rate-limited REST client for the demo and
//!   production APIs
//! - [`paper::PaperExecution`]: local fills at the limit price

pub mod kalshi;
pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::types::{Market, Side};

/// Venue call failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VenueError {
    #[error("Venue call timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Market not found: {0}")]
    NotFound(String),

    #[error("Unexpected venue response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VenueError::Timeout
        } else if e.is_decode() {
            VenueError::Decode(e.to_string())
        } else {
            VenueError::Transport(e.to_string())
        }
    }
}

/// Confirmed entry fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillResult {
    pub order_id: String,
    pub fill_price: Decimal,
    /// Contracts actually filled; may be below the requested size.
    pub filled_size: u64,
}

/// Confirmed exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseResult {
    pub order_id: String,
    pub exit_price: Decimal,
    /// Contracts actually sold. Below the position size the rest is
    /// still held and the exit is retried.
    pub filled_size: u64,
}

/// Read access to markets.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// All markets currently open for trading.
    async fn list_open_markets(&self) -> Result<Vec<Market>, VenueError>;

    /// One market by id, in whatever status the venue reports.
    async fn get_market(&self, market_id: &str) -> Result<Market, VenueError>;
}

/// Order placement.
#[async_trait]
pub trait Execution: Send + Sync {
    /// Buy `size` contracts of `side`, paying at most `price_limit` each.
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<FillResult, VenueError>;

    /// Sell a held position, accepting no less than `price_limit` each.
    async fn close_position(
        &self,
        market_id: &str,
        position_id: Uuid,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<CloseResult, VenueError>;

    /// Free cash held at the venue. `None` when orders never reach an
    /// account, as in paper trading.
    async fn fetch_balance(&self) -> Result<Option<Decimal>, VenueError> {
        Ok(None)
    }

    /// Whether orders stay local.
    fn is_paper(&self) -> bool;
}
