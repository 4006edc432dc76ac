//! Paper execution.
//!
//! Fills every order locally at its limit price. Used in the sandbox
//! when `venue.paper_trading` is set, so the engine can run against real
//! quotes without sending orders.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

use super::{CloseResult, Execution, FillResult, VenueError};
use crate::types::Side;

#[derive(Debug, Default)]
pub struct PaperExecution {
    orders: AtomicU64,
}

impl PaperExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders filled so far.
    pub fn order_count(&self) -> u64 {
        self.orders.load(Ordering::Relaxed)
    }

    fn next_order_id(&self) -> String {
        let n = self.orders.fetch_add(1, Ordering::Relaxed) + 1;
        format!("paper-{n}-{}", &Uuid::new_v4().simple().to_string()[..8])
    }
}

fn check_price(price: Decimal) -> Result<(), VenueError> {
    if price < Decimal::ZERO || price > Decimal::ONE {
        return Err(VenueError::Rejected(format!("price {price} outside [0, 1]")));
    }
    Ok(())
}

#[async_trait]
impl Execution for PaperExecution {
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<FillResult, VenueError> {
        if size == 0 {
            return Err(VenueError::Rejected("size is zero".to_string()));
        }
        check_price(price_limit)?;
        let order_id = self.next_order_id();

        info!(
            market_id,
            side = %side,
            size,
            price = %format!("{:.0}¢", price_limit * dec!(100)),
            order_id = %order_id,
            "[PAPER] Order filled"
        );

        Ok(FillResult {
            order_id,
            fill_price: price_limit,
            filled_size: size,
        })
    }

    async fn close_position(
        &self,
        market_id: &str,
        position_id: Uuid,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<CloseResult, VenueError> {
        check_price(price_limit)?;
        let order_id = self.next_order_id();

        info!(
            market_id,
            position_id = %position_id,
            side = %side,
            size,
            price = %format!("{:.0}¢", price_limit * dec!(100)),
            order_id = %order_id,
            "[PAPER] Position closed"
        );

        Ok(CloseResult {
            order_id,
            exit_price: price_limit,
            filled_size: size,
        })
    }

    fn is_paper(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fills_at_limit() {
        let paper = PaperExecution::new();
        let fill = paper.place_order("m1", Side::Yes, 222, dec!(0.45)).await.unwrap();
        assert_eq!(fill.fill_price, dec!(0.45));
        assert_eq!(fill.filled_size, 222);
        assert!(fill.order_id.starts_with("paper-1-"));

        let close = paper
            .close_position("m1", Uuid::new_v4(), Side::Yes, 222, dec!(0.50))
            .await
            .unwrap();
        assert_eq!(close.exit_price, dec!(0.50));
        assert_eq!(close.filled_size, 222);
        assert_eq!(paper.order_count(), 2);
        assert_eq!(paper.fetch_balance().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_bad_orders() {
        let paper = PaperExecution::new();
        assert!(paper.place_order("m1", Side::No, 0, dec!(0.5)).await.is_err());
        assert!(paper.place_order("m1", Side::No, 1, dec!(1.5)).await.is_err());
        assert!(paper.is_paper());
    }
}
