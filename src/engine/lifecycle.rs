//! Position lifecycle controller.
//!
//! Tracks at most one active position per market through
//! `OPEN → CLOSING → CLOSED`. Fills and closes are booked through the
//! [`RiskManager`], which is lent in for each transition so the
//! portfolio and the position change together.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::strategy::risk::RiskManager;
use crate::types::{ExitReason, LifecycleError, Position, PositionState, Side};
use crate::venue::{FillResult, VenueError};

/// Close failures from which each further failure is logged at error level.
const CLOSE_FAILURE_ALERT: u32 = 3;

/// Active positions by market id, plus the closed history.
#[derive(Debug, Default)]
pub struct PositionBook {
    active: HashMap<String, Position>,
    closed: Vec<Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_position(&self, market_id: &str) -> bool {
        self.active.contains_key(market_id)
    }

    pub fn get(&self, market_id: &str) -> Option<&Position> {
        self.active.get(market_id)
    }

    /// OPEN and CLOSING positions.
    pub fn active(&self) -> impl Iterator<Item = &Position> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Market ids of active positions, sorted for a stable visiting order.
    pub fn active_market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn closed(&self) -> &[Position] {
        &self.closed
    }

    /// Sum of mark-to-market P&L over active positions.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.active.values().map(|p| p.unrealized_pnl()).sum()
    }

    /// Create an OPEN position from a confirmed fill and book it.
    pub fn open_from_fill(
        &mut self,
        risk: &mut RiskManager,
        market_id: &str,
        side: Side,
        fill: &FillResult,
        entry_fair_value: Decimal,
    ) -> Result<&Position, LifecycleError> {
        if self.active.contains_key(market_id) {
            return Err(LifecycleError::DuplicateMarket(market_id.to_string()));
        }
        let position = Position::open(
            market_id,
            side,
            fill.filled_size,
            fill.fill_price,
            entry_fair_value,
        );
        risk.record_fill(&position);

        info!(
            market_id,
            side = %side,
            size = fill.filled_size,
            price = %format!("{:.0}¢", fill.fill_price * dec!(100)),
            fair_value = %format!("{:.1}%", entry_fair_value * dec!(100)),
            order_id = %fill.order_id,
            "Position opened"
        );

        Ok(&*self.active.entry(market_id.to_string()).or_insert(position))
    }

    /// Refresh the mark price of an active position.
    pub fn mark(&mut self, market_id: &str, price: Decimal) {
        if let Some(p) = self.active.get_mut(market_id) {
            p.mark_price = Some(price);
        }
    }

    /// Move an OPEN position to CLOSING. A position already CLOSING is
    /// left as is.
    pub fn begin_close(&mut self, market_id: &str, reason: ExitReason) -> Result<&Position, LifecycleError> {
        let position = self
            .active
            .get_mut(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?;

        if position.state == PositionState::Open {
            position.transition(PositionState::Closing)?;
            position.exit_reason = Some(reason);
            info!(
                market_id,
                position_id = %position.id,
                reason = %reason,
                "Position closing"
            );
        }
        Ok(&*position)
    }

    /// Book a confirmed exit and retire the position.
    pub fn confirm_close(
        &mut self,
        risk: &mut RiskManager,
        market_id: &str,
        exit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LifecycleError> {
        let reason = self
            .active
            .get(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?
            .exit_reason
            .unwrap_or(ExitReason::EdgeReversal);
        self.finish(risk, market_id, exit_price, reason, now)
    }

    /// Book the sold part of an exit. The position keeps its CLOSING
    /// state at the remaining size and is retried next cycle.
    pub fn partial_close(
        &mut self,
        risk: &mut RiskManager,
        market_id: &str,
        sold: u64,
        exit_price: Decimal,
    ) -> Result<Decimal, LifecycleError> {
        let position = self
            .active
            .get_mut(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?;
        risk.record_partial_close(position, sold, exit_price)
    }

    /// Count a failed exit attempt. The position stays CLOSING and is
    /// retried next cycle. Returns the consecutive failure count.
    pub fn close_failed(&mut self, market_id: &str, err: &VenueError) -> Result<u32, LifecycleError> {
        let position = self
            .active
            .get_mut(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?;
        position.close_failures += 1;
        let failures = position.close_failures;

        if failures >= CLOSE_FAILURE_ALERT {
            error!(
                market_id,
                position_id = %position.id,
                failures,
                error = %err,
                "Exit order keeps failing, operator review needed"
            );
        } else {
            warn!(
                market_id,
                position_id = %position.id,
                failures,
                error = %err,
                "Exit order failed, will retry next cycle"
            );
        }
        Ok(failures)
    }

    /// Close a position at its settlement value, overriding any exit in
    /// flight. An OPEN position passes through CLOSING.
    pub fn settle(
        &mut self,
        risk: &mut RiskManager,
        market_id: &str,
        outcome: Side,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LifecycleError> {
        let position = self
            .active
            .get_mut(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?;
        if position.state == PositionState::Open {
            position.transition(PositionState::Closing)?;
        }
        let value = position.settlement_value(outcome);

        info!(
            market_id,
            position_id = %position.id,
            outcome = %outcome,
            held = %position.side,
            "Market settled"
        );
        self.finish(risk, market_id, value, ExitReason::Settlement, now)
    }

    fn finish(
        &mut self,
        risk: &mut RiskManager,
        market_id: &str,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LifecycleError> {
        let position = self
            .active
            .get_mut(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.to_string()))?;
        let pnl = risk.record_close(position, exit_price, reason, now)?;
        if let Some(done) = self.active.remove(market_id) {
            self.closed.push(done);
        }
        Ok(pnl)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
