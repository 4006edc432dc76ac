//! NewsAPI feed.
//!
//! API: `https://newsapi.org/v2/everything`
//! Auth: API key via `apiKey` query param. Free tier: 100 req/day.
//!
//! Each article becomes one text observation (title + description),
//! newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DataFeed, FeedError, Observation, RawSeries};

const NEWS_API_URL: &str = "https://newsapi.org/v2/everything";
const PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
}

pub struct NewsApiFeed {
    http: Client,
    api_key: SecretString,
}

impl NewsApiFeed {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AUGUR/0.1.0")
            .build()
            .map_err(|e| FeedError::Unavailable(format!("Failed to build news HTTP client: {e}")))?;
        Ok(Self { http, api_key })
    }
}

fn to_series(query: &str, resp: NewsApiResponse) -> Result<RawSeries, FeedError> {
    if resp.status != "ok" {
        return Err(FeedError::Unavailable(
            resp.message.unwrap_or_else(|| format!("NewsAPI status {:?}", resp.status)),
        ));
    }
    let observations = resp
        .articles
        .into_iter()
        .filter_map(|a| {
            let text = [a.title.as_deref(), a.description.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            let mut obs = Observation::text(text);
            obs.timestamp = a.published_at;
            Some(obs)
        })
        .collect();
    Ok(RawSeries::new(query, observations))
}

#[async_trait]
impl DataFeed for NewsApiFeed {
    async fn fetch(&self, query: &str) -> Result<RawSeries, FeedError> {
        let page_size = PAGE_SIZE.to_string();
        let params = [
            ("q", query),
            ("apiKey", self.api_key.expose_secret().as_str()),
            ("pageSize", page_size.as_str()),
            ("language", "en"),
            ("sortBy", "publishedAt"),
        ];
        debug!(query, "Fetching news");

        let resp = self.http.get(NEWS_API_URL).query(&params).send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "NewsAPI request failed");
            return Err(FeedError::Unavailable(format!("NewsAPI returned {}", resp.status())));
        }
        let parsed: NewsApiResponse = resp.json().await?;
        let series = to_series(query, parsed)?;
        if series.is_empty() {
            return Err(FeedError::Unavailable(format!("no articles for {query}")));
        }
        Ok(series)
    }

    fn name(&self) -> &str {
        "news"
    }
}
