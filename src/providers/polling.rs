//! Polling-aggregate provider for politics markets.
//!
//! Pulls the subject (candidate or party) out of the question, fetches
//! its polls, and averages them: plain mean, or weighted by sample size.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

use super::{FairValueProvider, ProviderError};
use crate::feeds::{DataFeed, Observation};
use crate::types::{FairValueEstimate, Market};

/// Subjects we know how to look up, checked in order.
const CANDIDATES: &[&str] = &["trump", "biden", "harris", "desantis", "haley"];
const PARTIES: &[&str] = &["republican", "democrat", "gop"];

pub struct PollingProvider {
    feed: Arc<dyn DataFeed>,
    weighted: bool,
}

impl PollingProvider {
    pub fn new(feed: Arc<dyn DataFeed>, weighted: bool) -> Self {
        Self { feed, weighted }
    }
}

/// Candidate or party named in a question, lowercase.
pub fn extract_subject(question: &str) -> Option<&'static str> {
    let lower = question.to_lowercase();
    CANDIDATES
        .iter()
        .chain(PARTIES.iter())
        .find(|name| lower.contains(*name))
        .copied()
}

/// Mean of the numeric readings; `None` if there are none.
pub fn aggregate(observations: &[Observation], weighted: bool) -> Option<Decimal> {
    let readings: Vec<(Decimal, Decimal)> = observations
        .iter()
        .filter_map(|o| o.value.map(|v| (v, o.weight)))
        .collect();
    if readings.is_empty() {
        return None;
    }

    if weighted {
        let total: Decimal = readings.iter().map(|(_, w)| *w).filter(|w| *w > Decimal::ZERO).sum();
        if total > Decimal::ZERO {
            let sum: Decimal = readings
                .iter()
                .filter(|(_, w)| *w > Decimal::ZERO)
                .map(|(v, w)| *v * *w)
                .sum();
            return Some(sum / total);
        }
    }

    let sum: Decimal = readings.iter().map(|(v, _)| *v).sum();
    Some(sum / Decimal::from(readings.len()))
}

#[async_trait]
impl FairValueProvider for PollingProvider {
    async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError> {
        let subject = extract_subject(&market.question).ok_or_else(|| {
            ProviderError::Unavailable(format!("no candidate or party in {:?}", market.question))
        })?;

        let series = self.feed.fetch(subject).await?;
        let fair = aggregate(&series.observations, self.weighted)
            .ok_or_else(|| ProviderError::Unavailable(format!("no poll readings for {subject}")))?;

        debug!(
            market_id = %market.id,
            subject,
            polls = series.observations.len(),
            fair_value = %format!("{:.1}%", fair * dec!(100)),
            "Polling estimate"
        );

        Ok(FairValueEstimate::new(&market.id, fair, self.source()))
    }

    fn source(&self) -> &'static str {
        "polling"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
