//! reqwest-backed implementation of the fetch collaborator.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CACHE_CONTROL, DATE, EXPIRES};

use super::{FeedFetcher, FetchFailure, FetchedPage, PageSignals, RECOMMENDED_POLL_INTERVAL_HEADER};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches origin pages over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        HttpFetcher {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchFailure::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| FetchFailure::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let signals = extract_signals(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_vec();

        Ok(FetchedPage {
            status,
            signals,
            body,
        })
    }
}

fn extract_signals(headers: &HeaderMap) -> PageSignals {
    PageSignals {
        expires: header_date(headers, EXPIRES.as_str()),
        date: header_date(headers, DATE.as_str()),
        max_age_seconds: headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age),
        recommended_poll_interval: headers
            .get(RECOMMENDED_POLL_INTERVAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok()),
    }
}

fn header_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    let raw = headers.get(name)?.to_str().ok()?;
    // HTTP dates are RFC 7231 IMF-fixdate, which RFC 2822 parsing accepts.
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.parse().ok())
}
