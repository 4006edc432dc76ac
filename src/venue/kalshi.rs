//! Kalshi REST client.
//!
//! Demo:       https://demo-api.kalshi.co/trade-api/v2
//! Production: https://trading-api.kalshi.com/trade-api/v2
//! Auth: `Authorization: Bearer {key}`.
//!
//! Every request waits on a token-bucket limiter first. Orders are
//! immediate-or-cancel: whatever does not fill at once is cancelled by the
//! venue, so nothing is left resting that the engine does not track.
//!
//! Prices on the wire are integer cents. The YES price the engine quotes
//! is the YES ask; the NO price is `100 - yes_bid`.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CloseResult, Execution, FillResult, MarketData, VenueError};
use crate::config::Environment;
use crate::types::{Market, MarketCategory, MarketStatus, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const DEMO_URL: &str = "https://demo-api.kalshi.co/trade-api/v2";
const PROD_URL: &str = "https://trading-api.kalshi.com/trade-api/v2";

const TIME_IN_FORCE: &str = "immediate_or_cancel";

pub fn base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Sandbox => DEMO_URL,
        Environment::Live => PROD_URL,
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: KalshiMarket,
}

#[derive(Debug, Clone, Deserialize)]
struct KalshiMarket {
    ticker: String,
    title: String,
    #[serde(default)]
    yes_ask: Option<i64>,
    #[serde(default)]
    yes_bid: Option<i64>,
    #[serde(default)]
    volume: Option<i64>,
    /// Cents.
    #[serde(default)]
    liquidity: Option<i64>,
    /// "active", "open", "closed", "settled", "finalized", ...
    #[serde(default)]
    status: String,
    /// "yes" / "no" once determined, otherwise empty.
    #[serde(default)]
    result: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Cents available to trade.
    balance: i64,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    ticker: &'a str,
    action: &'static str,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
    client_order_id: String,
    time_in_force: &'static str,
}

impl<'a> OrderRequest<'a> {
    /// Immediate-or-cancel limit order.
    fn ioc(ticker: &'a str, action: &'static str, side: Side, count: u64, price: Decimal) -> Self {
        let cents = to_cents(price);
        let (yes_price, no_price) = match side {
            Side::Yes => (Some(cents), None),
            Side::No => (None, Some(cents)),
        };
        Self {
            ticker,
            action,
            side: side.as_str(),
            order_type: "limit",
            count,
            yes_price,
            no_price,
            client_order_id: Uuid::new_v4().to_string(),
            time_in_force: TIME_IN_FORCE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: OrderDetails,
}

#[derive(Debug, Deserialize)]
struct OrderDetails {
    order_id: String,
    /// "resting", "canceled", "executed", "pending"
    status: String,
    #[serde(default)]
    taker_fill_count: Option<i64>,
    #[serde(default)]
    maker_fill_count: Option<i64>,
    /// Cents, total across filled contracts.
    #[serde(default)]
    taker_fill_cost: Option<i64>,
    #[serde(default)]
    maker_fill_cost: Option<i64>,
}

impl OrderDetails {
    fn filled_count(&self) -> u64 {
        let n = self.taker_fill_count.unwrap_or(0) + self.maker_fill_count.unwrap_or(0);
        u64::try_from(n).unwrap_or(0)
    }

    /// Average fill price, falling back to the limit when the venue
    /// reports no cost.
    fn average_price(&self, limit: Decimal) -> Decimal {
        let cost = self.taker_fill_cost.unwrap_or(0) + self.maker_fill_cost.unwrap_or(0);
        let count = self.filled_count();
        if cost <= 0 || count == 0 {
            limit
        } else {
            from_cents(cost) / Decimal::from(count)
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    market_limit: u32,
    limiter: DefaultDirectRateLimiter,
}

impl KalshiClient {
    /// Build a client for `environment`. Every request is bounded by
    /// `timeout` and throttled to `requests_per_sec`; the key is optional
    /// for read-only use.
    pub fn new(
        environment: Environment,
        api_key: Option<SecretString>,
        timeout: Duration,
        market_limit: u32,
        requests_per_sec: u32,
    ) -> Result<Self, VenueError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AUGUR/0.1.0")
            .build()
            .map_err(|e| VenueError::Transport(format!("Failed to build HTTP client: {e}")))?;

        let rate = NonZeroU32::new(requests_per_sec).unwrap_or(NonZeroU32::MIN);
        info!(
            environment = %environment,
            url = base_url(environment),
            requests_per_sec = rate.get(),
            "Venue client ready"
        );

        Ok(Self {
            http,
            base_url: base_url(environment).to_string(),
            api_key,
            market_limit,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    /// Wait for a request slot.
    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    async fn check(resp: Response, what: &str) -> Result<Response, VenueError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => VenueError::NotFound(what.to_string()),
            s if s.is_client_error() => VenueError::Rejected(format!("{s}: {body}")),
            s => VenueError::Transport(format!("{s}: {body}")),
        })
    }

    async fn submit(&self, order: &OrderRequest<'_>) -> Result<OrderDetails, VenueError> {
        let url = format!("{}/portfolio/orders", self.base_url);
        debug!(ticker = order.ticker, action = order.action, count = order.count, "Submitting order");

        self.throttle().await;
        let resp = self.authorized(self.http.post(&url)).json(order).send().await?;
        let resp = Self::check(resp, order.ticker).await?;
        let parsed: OrderResponse = resp.json().await?;
        Ok(parsed.order)
    }
}

#[async_trait]
impl MarketData for KalshiClient {
    async fn list_open_markets(&self) -> Result<Vec<Market>, VenueError> {
        let url = format!("{}/markets?status=open&limit={}", self.base_url, self.market_limit);
        self.throttle().await;
        let resp = self.authorized(self.http.get(&url)).send().await?;
        let resp = Self::check(resp, "markets").await?;
        let parsed: MarketsResponse = resp.json().await?;

        let markets: Vec<Market> = parsed
            .markets
            .into_iter()
            .filter_map(|m| match to_market(m) {
                Ok(market) => Some(market),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable market");
                    None
                }
            })
            .filter(|m| m.is_open())
            .collect();

        debug!(count = markets.len(), "Fetched open markets");
        Ok(markets)
    }

    async fn get_market(&self, market_id: &str) -> Result<Market, VenueError> {
        let url = format!("{}/markets/{}", self.base_url, urlencoding::encode(market_id));
        self.throttle().await;
        let resp = self.authorized(self.http.get(&url)).send().await?;
        let resp = Self::check(resp, market_id).await?;
        let parsed: MarketResponse = resp.json().await?;
        to_market(parsed.market)
    }
}

#[async_trait]
impl Execution for KalshiClient {
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        size: u64,
        price_limit: Decimal,
    ) -> Result<FillResult, VenueError> {
        let order = OrderRequest::ioc(market_id, "buy", side, size, price_limit);
        let details = self.submit(&order).await?;
        let filled = details.filled_count();
        if filled == 0 {
            return Err(VenueError::Rejected(format!(
                "order {} {} with no fill",
                details.order_id, details.status
            )));
        }
        Ok(FillResult {
            fill_price: details.average_price(price_limit),
            order_id: details.order_id,
            filled_size: filled.min(size),
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
        let order = OrderRequest::ioc(market_id, "sell", side, size, price_limit);
        let details = self.submit(&order).await?;
        let filled = details.filled_count();
        if filled == 0 {
            return Err(VenueError::Rejected(format!(
                "exit for position {position_id} {} with no fill",
                details.status
            )));
        }
        if filled < size {
            warn!(
                market_id,
                position_id = %position_id,
                filled,
                size,
                "Exit partially filled, remainder cancelled"
            );
        }
        Ok(CloseResult {
            exit_price: details.average_price(price_limit),
            order_id: details.order_id,
            filled_size: filled.min(size),
        })
    }

    async fn fetch_balance(&self) -> Result<Option<Decimal>, VenueError> {
        if self.api_key.is_none() {
            return Err(VenueError::Rejected("no API key for balance".to_string()));
        }
        let url = format!("{}/portfolio/balance", self.base_url);
        self.throttle().await;
        let resp = self.authorized(self.http.get(&url)).send().await?;
        let resp = Self::check(resp, "balance").await?;
        let parsed: BalanceResponse = resp.json().await?;
        Ok(Some(from_cents(parsed.balance)))
    }

    fn is_paper(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn from_cents(cents: i64) -> Decimal {
    Decimal::from(cents) / dec!(100)
}

fn to_cents(price: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (price * dec!(100)).round().to_i64().unwrap_or(0)
}

fn to_market(m: KalshiMarket) -> Result<Market, VenueError> {
    let status = match m.status.as_str() {
        "active" | "open" | "initialized" => MarketStatus::Open,
        "closed" | "determined" => MarketStatus::Closed,
        "settled" | "finalized" => match m.result.as_str() {
            "yes" => MarketStatus::Settled { outcome: Side::Yes },
            "no" => MarketStatus::Settled { outcome: Side::No },
            other => {
                return Err(VenueError::Decode(format!(
                    "{} settled with unknown result {other:?}",
                    m.ticker
                )))
            }
        },
        other => {
            return Err(VenueError::Decode(format!(
                "{} has unknown status {other:?}",
                m.ticker
            )))
        }
    };

    let yes_ask = m.yes_ask.unwrap_or(50).clamp(0, 100);
    let yes_bid = m.yes_bid.unwrap_or(50).clamp(0, 100);

    Ok(Market {
        category: MarketCategory::from_title(&m.title),
        id: m.ticker,
        question: m.title,
        price_yes: from_cents(yes_ask),
        price_no: from_cents(100 - yes_bid),
        volume: Decimal::from(m.volume.unwrap_or(0)),
        liquidity: from_cents(m.liquidity.unwrap_or(0)),
        status,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
