//! Cross-market arbitrage provider.
//!
//! A declared link `implies → implied` states that YES on `implies`
//! guarantees YES on `implied` (e.g. "wins the primary" → "is the
//! nominee"), so `P(implies) ≤ P(implied)` must hold. When the quotes
//! break that order, the implying market's fair value is capped at the
//! implied market's price and the implied market's fair value is raised
//! to the implying market's price. Consistent pairs produce no estimate.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{FairValueProvider, ProviderError};
use crate::config::LinkConfig;
use crate::types::{FairValueEstimate, Market};
use crate::venue::{MarketData, VenueError};

/// A linked pair whose quotes violate the implication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inconsistency {
    pub implies: String,
    pub implied: String,
    pub implies_price: Decimal,
    pub implied_price: Decimal,
}

impl Inconsistency {
    /// How far the implying market trades above the implied one.
    pub fn gap(&self) -> Decimal {
        self.implies_price - self.implied_price
    }
}

pub struct ArbitrageProvider {
    links: Vec<LinkConfig>,
    quotes: Arc<dyn MarketData>,
}

impl ArbitrageProvider {
    pub fn new(links: Vec<LinkConfig>, quotes: Arc<dyn MarketData>) -> Self {
        Self { links, quotes }
    }

    pub fn links(&self) -> &[LinkConfig] {
        &self.links
    }

    /// Whether `market_id` appears on either side of any link.
    pub fn covers(&self, market_id: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.implies == market_id || l.implied == market_id)
    }

    /// Every link whose two markets are both in `markets` and priced
    /// inconsistently.
    pub fn detect_inconsistencies(&self, markets: &[Market]) -> Vec<Inconsistency> {
        let by_id: HashMap<&str, &Market> = markets.iter().map(|m| (m.id.as_str(), m)).collect();

        self.links
            .iter()
            .filter_map(|link| {
                let a = by_id.get(link.implies.as_str())?;
                let b = by_id.get(link.implied.as_str())?;
                (a.price_yes > b.price_yes).then(|| Inconsistency {
                    implies: a.id.clone(),
                    implied: b.id.clone(),
                    implies_price: a.price_yes,
                    implied_price: b.price_yes,
                })
            })
            .collect()
    }

    async fn partner_price(&self, market_id: &str) -> Result<Decimal, ProviderError> {
        match self.quotes.get_market(market_id).await {
            Ok(m) => Ok(m.price_yes),
            Err(VenueError::Timeout) => Err(ProviderError::Timeout),
            Err(e) => Err(ProviderError::Unavailable(format!(
                "no quote for linked market {market_id}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl FairValueProvider for ArbitrageProvider {
    async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError> {
        let price = market.price_yes;
        // Fair value must lie within [lower, upper].
        let mut upper: Option<Decimal> = None;
        let mut lower: Option<Decimal> = None;

        for link in &self.links {
            if link.implies == market.id {
                let p = self.partner_price(&link.implied).await?;
                upper = Some(upper.map_or(p, |u| u.min(p)));
            } else if link.implied == market.id {
                let p = self.partner_price(&link.implies).await?;
                lower = Some(lower.map_or(p, |l| l.max(p)));
            }
        }

        let fair = match (upper, lower) {
            (Some(u), _) if price > u => u,
            (_, Some(l)) if price < l => l,
            (None, None) => {
                return Err(ProviderError::Unavailable(format!("{} has no links", market.id)))
            }
            _ => {
                debug!(market_id = %market.id, "Linked prices consistent");
                return Err(ProviderError::Unavailable(format!(
                    "{} priced consistently with its links",
                    market.id
                )));
            }
        };

        info!(
            market_id = %market.id,
            price = %format!("{:.0}¢", price * dec!(100)),
            fair_value = %format!("{:.0}¢", fair * dec!(100)),
            "Arbitrage bound violated"
        );

        Ok(FairValueEstimate::new(&market.id, fair, self.source()))
    }

    fn source(&self) -> &'static str {
        "arbitrage"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
