//! External data feeds.
//!
//! Defines the `DataFeed` trait that fair-value providers read from, and
//! provides implementations for:
//! - `polls::HttpPollFeed`: JSON poll aggregator
//! - `news::NewsApiFeed`: NewsAPI `everything` search
//! - `CachedFeed`: per-query TTL cache over any feed

pub mod news;
pub mod polls;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Feed failures. Providers turn any of these into "no estimate".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    #[error("Feed call timed out")]
    Timeout,
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeedError::Timeout
        } else {
            FeedError::Unavailable(e.to_string())
        }
    }
}

/// One data point: a poll reading or a news article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Headline, pollster name, or other free text.
    pub text: String,
    /// Numeric reading (poll share 0.0–1.0), if any.
    pub value: Option<Decimal>,
    /// Relative weight, e.g. poll sample size. 1 when unknown.
    pub weight: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: None,
            weight: Decimal::ONE,
            timestamp: None,
        }
    }

    pub fn reading(text: impl Into<String>, value: Decimal, weight: Decimal) -> Self {
        Self {
            text: text.into(),
            value: Some(value),
            weight,
            timestamp: None,
        }
    }
}

/// Result of one feed query, newest first when the source orders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub query: String,
    pub observations: Vec<Observation>,
    pub fetched_at: DateTime<Utc>,
}

impl RawSeries {
    pub fn new(query: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            query: query.into(),
            observations,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// A source of external data keyed by a free-text query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataFeed: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<RawSeries, FeedError>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    series: RawSeries,
    inserted_at: DateTime<Utc>,
}

/// Per-query TTL cache in front of another feed. Only successful
/// fetches are cached.
pub struct CachedFeed<F> {
    inner: F,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<F: DataFeed> CachedFeed<F> {
    pub fn new(inner: F, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, query: &str) -> Option<RawSeries> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| now - entry.inserted_at < self.ttl);
        entries.get(query).map(|entry| entry.series.clone())
    }

    fn store(&self, query: &str, series: &RawSeries) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            query.to_string(),
            CacheEntry {
                series: series.clone(),
                inserted_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl<F: DataFeed> DataFeed for CachedFeed<F> {
    async fn fetch(&self, query: &str) -> Result<RawSeries, FeedError> {
        if let Some(series) = self.lookup(query) {
            debug!(feed = self.inner.name(), query, "Cache hit");
            return Ok(series);
        }
        let series = self.inner.fetch(query).await?;
        self.store(query, &series);
        Ok(series)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
