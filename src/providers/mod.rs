//! Fair-value providers.
//!
//! Every strategy implements [`FairValueProvider`]; [`ProviderRouter`]
//! picks one per market:
//! 1. a market named in an implication link goes to the arbitrage provider
//! 2. otherwise the market's category decides (politics → polling,
//!    economics → news consensus)
//! 3. anything else has no provider and is skipped
//!
//! A provider never falls back to the market's own price. No data means
//! [`ProviderError::Unavailable`].

pub mod arbitrage;
pub mod consensus;
pub mod polling;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::feeds::FeedError;
use crate::types::{FairValueEstimate, Market, MarketCategory};
use arbitrage::ArbitrageProvider;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("No estimate: {0}")]
    Unavailable(String),

    #[error("Estimate timed out")]
    Timeout,
}

impl From<FeedError> for ProviderError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Timeout => ProviderError::Timeout,
            FeedError::Unavailable(reason) => ProviderError::Unavailable(reason),
        }
    }
}

/// A strategy that estimates the YES probability of a market.
#[async_trait]
pub trait FairValueProvider: Send + Sync {
    async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError>;

    /// Source tag stamped on every estimate.
    fn source(&self) -> &'static str;
}

/// Chooses the provider for each market.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    arbitrage: Option<Arc<ArbitrageProvider>>,
    by_category: HashMap<MarketCategory, Arc<dyn FairValueProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(
        mut self,
        category: MarketCategory,
        provider: Arc<dyn FairValueProvider>,
    ) -> Self {
        self.by_category.insert(category, provider);
        self
    }

    pub fn with_arbitrage(mut self, provider: Arc<ArbitrageProvider>) -> Self {
        self.arbitrage = Some(provider);
        self
    }

    pub fn arbitrage(&self) -> Option<&ArbitrageProvider> {
        self.arbitrage.as_deref()
    }

    /// Provider responsible for `market`, if any.
    pub fn route(&self, market: &Market) -> Option<Arc<dyn FairValueProvider>> {
        if let Some(arb) = &self.arbitrage {
            if arb.covers(&market.id) {
                return Some(arb.clone() as Arc<dyn FairValueProvider>);
            }
        }
        self.by_category.get(&market.category).cloned()
    }

    /// Estimate through the routed provider.
    pub async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError> {
        match self.route(market) {
            Some(provider) => provider.estimate(market).await,
            None => Err(ProviderError::Unavailable(format!(
                "no provider for {} markets",
                market.category
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
