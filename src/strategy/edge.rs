//! Mispricing detection.
//!
//! Compares fair-value estimates to the price each side actually trades
//! at and classifies each market as actionable or not, with side and
//! magnitude.
//!
//! A YES edge is measured against the YES ask. A NO edge is measured
//! against the YES bid (`1 - price_no`), the YES probability implied by
//! paying the NO ask. Inside the spread there is no edge.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::types::{FairValueEstimate, Market, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Edge detection configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Minimum |fair - implied| for an edge to be actionable (inclusive).
    pub deviation_threshold: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: dec!(0.05),
        }
    }
}

// ---------------------------------------------------------------------------
// Edge detection
// ---------------------------------------------------------------------------

/// Fair value versus market price for one market, valid for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub market_id: String,
    pub fair_value: Decimal,
    /// YES probability implied by the quote of `side`.
    pub implied_price: Decimal,
    /// fair_value - implied_price; positive means YES is underpriced.
    /// Zero when fair value sits inside the spread.
    pub deviation: Decimal,
    pub side: Side,
    /// |deviation|
    pub magnitude: Decimal,
    pub actionable: bool,
    /// Quoted price of `side`, the limit for an entry order.
    pub entry_price: Decimal,
}

impl Edge {
    /// Whether this edge points against a position held on `side`.
    pub fn is_against(&self, side: Side) -> bool {
        match side {
            Side::Yes => self.deviation < Decimal::ZERO,
            Side::No => self.deviation > Decimal::ZERO,
        }
    }
}

pub struct EdgeDetector {
    config: EdgeConfig,
}

impl EdgeDetector {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Compare an estimate to the quote of the side it favours.
    ///
    /// A zero deviation is never actionable; its side defaults to YES.
    pub fn detect(&self, market: &Market, estimate: &FairValueEstimate) -> Edge {
        let fair_value = estimate.probability;
        let yes_ask = market.price_yes;
        let yes_bid = market.bid_for(Side::Yes);
        let yes_gap = fair_value - yes_ask;
        let no_gap = yes_bid - fair_value;

        // Crossed quotes can favour both sides; take the larger gap.
        let (side, implied, deviation) = if yes_gap > Decimal::ZERO && yes_gap >= no_gap {
            (Side::Yes, yes_ask, yes_gap)
        } else if no_gap > Decimal::ZERO {
            (Side::No, yes_bid, -no_gap)
        } else {
            (Side::Yes, yes_ask, Decimal::ZERO)
        };
        let magnitude = deviation.abs();

        let actionable = !deviation.is_zero() && magnitude >= self.config.deviation_threshold;

        debug!(
            market_id = %market.id,
            source = %estimate.source,
            fair_value = %format!("{:.1}%", fair_value * dec!(100)),
            implied = %format!("{:.1}%", implied * dec!(100)),
            deviation = %format!("{:+.1}%", deviation * dec!(100)),
            side = %side,
            actionable,
            "Edge evaluated"
        );

        Edge {
            market_id: market.id.clone(),
            fair_value,
            implied_price: implied,
            deviation,
            side,
            magnitude,
            actionable,
            entry_price: market.price_for(side),
        }
    }

    /// Keep actionable edges, best first.
    pub fn rank_actionable(&self, edges: Vec<Edge>) -> Vec<Edge> {
        let mut actionable: Vec<Edge> = edges.into_iter().filter(|e| e.actionable).collect();
        actionable.sort_by(|a, b| b.magnitude.cmp(&a.magnitude));
        actionable
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
