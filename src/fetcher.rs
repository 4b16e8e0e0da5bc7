use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::{Duration, Instant};
use url::{form_urlencoded, Url};

use crate::config::HttpConfig;
use crate::utils::error::{AppError, FetchError};

/// Outcome of one successful GET. Any HTTP status counts as success here;
/// callers decide what to do with non-2xx pages.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub url: String,
    pub status_code: u16,
    pub body: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue a single GET bounded by `timeout`. Never retries.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResult, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResult, FetchError> {
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::debug!(url, timeout_ms = timeout.as_millis() as u64, "Fetching page");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, timeout, e))?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_error(url, timeout, e))?;

        let duration = start.elapsed();
        tracing::debug!(url, status_code, bytes = body.len(), "Fetched page");

        Ok(FetchResult {
            url: url.to_string(),
            status_code,
            body,
            started_at,
            ended_at: Utc::now(),
            duration,
        })
    }
}

fn classify_error(url: &str, timeout: Duration, err: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if err.is_timeout() {
        FetchError::Timeout {
            url,
            timeout_secs: timeout.as_secs(),
        }
    } else if err.is_connect() {
        FetchError::ConnectionFailure {
            url,
            message: err.to_string(),
        }
    } else if err.is_redirect()
        || err.is_decode()
        || err.is_body()
        || err.is_builder()
        || err.is_status()
        || err.is_request()
    {
        FetchError::ProtocolError {
            url,
            message: err.to_string(),
        }
    } else {
        FetchError::Unknown {
            url,
            message: err.to_string(),
        }
    }
}

/// Append the search term to a scraper's `url` rule.
///
/// Bases ending in `=`, `?` or `&` take the term as a form-encoded query
/// value; anything else gets it as an extra path segment.
pub fn build_search_url(base: &str, search_terms: &str) -> Result<Url, url::ParseError> {
    let terms = search_terms.trim();

    if base.ends_with('=') || base.ends_with('?') || base.ends_with('&') {
        let encoded: String = form_urlencoded::byte_serialize(terms.as_bytes()).collect();
        return Url::parse(&format!("{base}{encoded}"));
    }

    let mut url = Url::parse(base)?;
    if !terms.is_empty() {
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(terms);
        }
    }
    Ok(url)
}
