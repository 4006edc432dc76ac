//! Mock venue for integration testing.
//!
//! Provides deterministic `MarketData` and `Execution` implementations
//! backed by in-memory markets, plus a fair-value provider whose
//! estimates are set from test code. No external dependencies.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use augur::providers::{FairValueProvider, ProviderError};
use augur::types::{FairValueEstimate, Market, MarketCategory, MarketStatus, Side};
use augur::venue::{CloseResult, Execution, FillResult, MarketData, VenueError};

/// Build an open politics market.
pub fn make_market(id: &str, price_yes: Decimal, price_no: Decimal) -> Market {
    Market {
        id: id.to_string(),
        question: format!("Will {id} resolve YES?"),
        category: MarketCategory::Politics,
        price_yes,
        price_no,
        volume: Decimal::from(10_000),
        liquidity: Decimal::from(5_000),
        status: MarketStatus::Open,
    }
}

/// An order the venue accepted.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub market_id: String,
    pub side: Side,
    pub size: u64,
    pub price: Decimal,
    pub closing: bool,
}

/// A controllable in-memory venue.
///
/// Markets are kept in id order so snapshots are stable across cycles.
#[derive(Default)]
pub struct MockVenue {
    markets: Mutex<BTreeMap<String, Market>>,
    orders: Mutex<Vec<OrderRecord>>,
    next_order: AtomicU64,
    fail_snapshot: AtomicBool,
    fail_orders: AtomicBool,
    fail_closes: AtomicBool,
    /// Delay applied to every entry order.
    order_delay: Mutex<Option<Duration>>,
    /// Delay applied to every exit order.
    close_delay: Mutex<Option<Duration>>,
    /// Most contracts an exit order sells; the rest is cancelled.
    close_fill_limit: Mutex<Option<u64>>,
    /// Free cash reported by the account; `None` behaves like paper.
    balance: Mutex<Option<Decimal>>,
    fail_balance: AtomicBool,
}

impl MockVenue {
    pub fn with_markets(markets: Vec<Market>) -> Self {
        let venue = Self::default();
        {
            let mut map = venue.markets.lock().unwrap();
            for m in markets {
                map.insert(m.id.clone(), m);
            }
        }
        venue
    }

    pub fn add_market(&self, market: Market) {
        self.markets.lock().unwrap().insert(market.id.clone(), market);
    }

    pub fn set_prices(&self, market_id: &str, price_yes: Decimal, price_no: Decimal) {
        let mut map = self.markets.lock().unwrap();
        let m = map.get_mut(market_id).expect("unknown market");
        m.price_yes = price_yes;
        m.price_no = price_no;
    }

    pub fn settle(&self, market_id: &str, outcome: Side) {
        let mut map = self.markets.lock().unwrap();
        let m = map.get_mut(market_id).expect("unknown market");
        m.status = MarketStatus::Settled { outcome };
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_orders(&self, delay: Duration) {
        *self.order_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_closes(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }

    pub fn limit_close_fills(&self, limit: Option<u64>) {
        *self.close_fill_limit.lock().unwrap() = limit;
    }

    pub fn set_balance(&self, balance: Option<Decimal>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.orders.lock().unwrap().clone()
    }

    fn record(&self, order: OrderRecord) -> String {
        self.orders.lock().unwrap().push(order);
        format!("mock-{}", self.next_order.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl MarketData for MockVenue {
    async fn list_open_markets(&self) -> Result<Vec<Market>, VenueError> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(VenueError::Transport("connection reset".to_string()));
        }
        Ok(self
            .markets
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.is_open())
            .cloned()
            .collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Market, VenueError> {
        self.markets
            .lock()
            .unwrap()
            .get(market_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(market_id.to_string()))
    }
}

#[async_trait]
impl Execution for MockVenue {
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<FillResult, VenueError> {
        let delay = *self.order_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(VenueError::Rejected("insufficient liquidity".to_string()));
        }
        let order_id = self.record(OrderRecord {
            market_id: market_id.to_string(),
            side,
            size,
            price: price_limit,
            closing: false,
        });
        Ok(FillResult {
            order_id,
            fill_price: price_limit,
            filled_size: size,
        })
    }

    async fn close_position(
        &self,
        market_id: &str,
        _position_id: Uuid,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<CloseResult, VenueError> {
        let delay = *self.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(VenueError::Transport("exchange unavailable".to_string()));
        }
        let limit = *self.close_fill_limit.lock().unwrap();
        let filled = limit.map_or(size, |l| l.min(size));
        let order_id = self.record(OrderRecord {
            market_id: market_id.to_string(),
            side,
            size,
            price: price_limit,
            closing: true,
        });
        Ok(CloseResult {
            order_id,
            exit_price: price_limit,
            filled_size: filled,
        })
    }

    async fn fetch_balance(&self) -> Result<Option<Decimal>, VenueError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(VenueError::Transport("balance unavailable".to_string()));
        }
        Ok(*self.balance.lock().unwrap())
    }

    fn is_paper(&self) -> bool {
        true
    }
}

/// Fair values set per market from test code. Markets without a value
/// have no estimate.
#[derive(Default)]
pub struct ScriptedProvider {
    values: Mutex<HashMap<String, Decimal>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedProvider {
    pub fn set(&self, market_id: &str, probability: Decimal) {
        self.values
            .lock()
            .unwrap()
            .insert(market_id.to_string(), probability);
    }

    /// Delay every estimate by `delay`.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl FairValueProvider for ScriptedProvider {
    async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let value = self.values.lock().unwrap().get(&market.id).copied();
        value
            .map(|p| FairValueEstimate::new(&market.id, p, self.source()))
            .ok_or_else(|| ProviderError::Unavailable(format!("no data for {}", market.id)))
    }

    fn source(&self) -> &'static str {
        "scripted"
    }
}
