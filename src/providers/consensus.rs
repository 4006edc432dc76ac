//! News-consensus provider for economics markets.
//!
//! Identifies the indicator a question is about, fetches recent news on
//! it, and scores the top articles by directional keywords. The share of
//! positive hits is the probability that the indicator comes in high.
//! Questions phrased the other way ("below", "under", ...) get the
//! complement.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

use super::{FairValueProvider, ProviderError};
use crate::feeds::{DataFeed, Observation};
use crate::types::{FairValueEstimate, Market};

/// Articles scored per estimate.
const TOP_ARTICLES: usize = 5;

const INDICATORS: &[(&str, &[&str])] = &[
    ("cpi", &["cpi", "inflation", "consumer price"]),
    ("jobs", &["jobs", "unemployment", "nonfarm", "payroll"]),
    ("gdp", &["gdp", "growth", "recession"]),
    ("fed", &["fed", "federal reserve", "rate", "fomc"]),
];

const POSITIVE: &[&str] = &["beat", "exceed", "strong", "growth", "up"];
const NEGATIVE: &[&str] = &["miss", "weak", "decline", "down", "below"];

/// Question words that make YES the "low" outcome.
const DOWNSIDE: &[&str] = &["below", "under", "less than", "lower", "decrease", "fall", "cut"];

pub struct ConsensusProvider {
    feed: Arc<dyn DataFeed>,
}

impl ConsensusProvider {
    pub fn new(feed: Arc<dyn DataFeed>) -> Self {
        Self { feed }
    }
}

/// Indicator key (`cpi`, `jobs`, `gdp`, `fed`) a question refers to.
pub fn extract_indicator(question: &str) -> Option<&'static str> {
    let lower = question.to_lowercase();
    INDICATORS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(key, _)| *key)
}

/// Whole-word match; keywords longer than three letters also match
/// inflected forms ("exceeds", "declined").
fn mentions(words: &[&str], keyword: &str) -> bool {
    words
        .iter()
        .any(|w| *w == keyword || (keyword.len() > 3 && w.starts_with(keyword)))
}

/// Positive and negative keyword hits across the top articles. Each
/// keyword counts at most once per article.
pub fn keyword_counts(articles: &[Observation]) -> (u32, u32) {
    let mut positive = 0;
    let mut negative = 0;
    for article in articles.iter().take(TOP_ARTICLES) {
        let text = article.text.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        positive += POSITIVE.iter().filter(|kw| mentions(&words, kw)).count() as u32;
        negative += NEGATIVE.iter().filter(|kw| mentions(&words, kw)).count() as u32;
    }
    (positive, negative)
}

fn is_downside(question: &str) -> bool {
    let lower = question.to_lowercase();
    DOWNSIDE.iter().any(|w| lower.contains(w))
}

#[async_trait]
impl FairValueProvider for ConsensusProvider {
    async fn estimate(&self, market: &Market) -> Result<FairValueEstimate, ProviderError> {
        let indicator = extract_indicator(&market.question).ok_or_else(|| {
            ProviderError::Unavailable(format!("no indicator in {:?}", market.question))
        })?;

        let series = self.feed.fetch(indicator).await?;
        let (positive, negative) = keyword_counts(&series.observations);
        if positive + negative == 0 {
            return Err(ProviderError::Unavailable(format!(
                "no directional news for {indicator}"
            )));
        }

        let upside = Decimal::from(positive) / Decimal::from(positive + negative);
        let fair = if is_downside(&market.question) {
            Decimal::ONE - upside
        } else {
            upside
        };

        debug!(
            market_id = %market.id,
            indicator,
            positive,
            negative,
            fair_value = %format!("{:.1}%", fair * dec!(100)),
            "Consensus estimate"
        );

        Ok(FairValueEstimate::new(&market.id, fair, self.source()))
    }

    fn source(&self) -> &'static str {
        "consensus"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
