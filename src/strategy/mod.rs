//! Strategy layer: edge detection, sizing, and risk approval.

pub mod edge;
pub mod risk;

use tracing::{debug, info};

use edge::Edge;
use risk::{RejectionReason, RiskManager};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Outcome of evaluating one actionable edge for entry, including the
/// opportunities that were passed on and why.
#[derive(Debug, Clone)]
pub enum EntryDecision {
    /// Approved for an order of `size` contracts at `edge.entry_price`.
    Selected { edge: Edge, size: u64 },
    /// Budget buys less than one contract.
    SizeZero { edge: Edge },
    /// Blocked by the risk manager.
    RiskRejected { edge: Edge, reason: RejectionReason },
}

impl EntryDecision {
    pub fn market_id(&self) -> &str {
        match self {
            EntryDecision::Selected { edge, .. }
            | EntryDecision::SizeZero { edge }
            | EntryDecision::RiskRejected { edge, .. } => &edge.market_id,
        }
    }
}

/// Size an edge at the current balance and run it past the risk manager.
///
/// Called once per ranked edge, after the previous entry has been booked,
/// so every approval sees the up-to-date portfolio.
pub fn evaluate_entry(edge: Edge, risk: &RiskManager) -> EntryDecision {
    let balance = risk.state().balance;
    let size = risk.size_for(&edge, balance);
    if size == 0 {
        debug!(market_id = %edge.market_id, "Budget too small for one contract");
        return EntryDecision::SizeZero { edge };
    }

    match risk.check_open(size, edge.entry_price) {
        Ok(()) => {
            info!(
                market_id = %edge.market_id,
                side = %edge.side,
                size,
                deviation = %format!("{:+.1}%", edge.deviation * rust_decimal_macros::dec!(100)),
                "Entry approved"
            );
            EntryDecision::Selected { edge, size }
        }
        Err(reason) => {
            debug!(market_id = %edge.market_id, reason = %reason, "Entry rejected by risk manager");
            EntryDecision::RiskRejected { edge, reason }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
