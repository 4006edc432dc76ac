//! Poll aggregator feed.
//!
//! GET `<url>?subject=<candidate or party>` returning
//! `{"polls": [{"pollster": "...", "value": 0.48, "sample_size": 1200, "date": "..."}]}`.
//! `value` is the subject's share as a probability (0.0–1.0).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{DataFeed, FeedError, Observation, RawSeries};

#[derive(Debug, Deserialize)]
struct PollsResponse {
    #[serde(default)]
    polls: Vec<PollPoint>,
}

#[derive(Debug, Deserialize)]
struct PollPoint {
    #[serde(default)]
    pollster: String,
    value: Decimal,
    #[serde(default)]
    sample_size: Option<u32>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

pub struct HttpPollFeed {
    http: Client,
    url: String,
}

impl HttpPollFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AUGUR/0.1.0")
            .build()
            .map_err(|e| FeedError::Unavailable(format!("Failed to build poll HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

fn to_series(subject: &str, resp: PollsResponse) -> RawSeries {
    let observations = resp
        .polls
        .into_iter()
        .filter(|p| p.value >= Decimal::ZERO && p.value <= Decimal::ONE)
        .map(|p| Observation {
            text: p.pollster,
            value: Some(p.value),
            weight: p.sample_size.map(Decimal::from).unwrap_or(Decimal::ONE),
            timestamp: p.date,
        })
        .collect();
    RawSeries::new(subject, observations)
}

#[async_trait]
impl DataFeed for HttpPollFeed {
    async fn fetch(&self, query: &str) -> Result<RawSeries, FeedError> {
        let url = format!("{}?subject={}", self.url, urlencoding::encode(query));
        debug!(url = %url, "Fetching polls");

        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(FeedError::Unavailable(format!("poll feed returned {}", resp.status())));
        }
        let parsed: PollsResponse = resp.json().await?;
        let series = to_series(query, parsed);
        if series.is_empty() {
            return Err(FeedError::Unavailable(format!("no polls for {query}")));
        }
        Ok(series)
    }

    fn name(&self) -> &str {
        "polls"
    }
}
