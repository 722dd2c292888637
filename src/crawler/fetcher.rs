//! Page fetching
//!
//! This module defines the [`PageFetcher`] capability the engine consumes and
//! its plain-HTTP implementation, including:
//! - Building HTTP clients with proper user agent strings
//! - robots.txt enforcement
//! - Redirect handling
//! - Classification of every failure as transient, permanent or policy-blocked

use crate::config::UserAgentConfig;
use crate::crawler::parser::{parse_html, PageLink};
use crate::crawler::retry::Retryable;
use crate::robots::{fetch_robots, ParsedRobots, RobotsCache};
use crate::url::origin_of;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A fetched page as the engine sees it
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code of the final response
    pub status: u16,

    /// Final URL after redirects
    pub final_url: Url,

    /// Visible page text
    pub text: String,

    /// Every outbound link observed on the page
    pub links: Vec<PageLink>,
}

/// Failure classes of a fetch attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeout, 5xx, connection reset: worth retrying
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// 404, DNS failure, robots.txt disallow: never retried
    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },

    /// Rate limited, by the politeness gate or by the site; not an error
    #[error("fetch of {url} deferred by politeness policy")]
    PolicyBlocked {
        url: String,
        retry_after: Option<Duration>,
    },
}

impl FetchError {
    pub fn transient(url: &Url, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: &Url, reason: impl Into<String>) -> Self {
        Self::Permanent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn policy_blocked(url: &Url, retry_after: Option<Duration>) -> Self {
        Self::PolicyBlocked {
            url: url.to_string(),
            retry_after,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    pub fn is_policy_blocked(&self) -> bool {
        matches!(self, Self::PolicyBlocked { .. })
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }
}

/// Retrieves page text and outbound links
///
/// Implementations must classify every failure into a [`FetchError`] class;
/// the engine never sees transport errors directly.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches an HTML page
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;

    /// Fetches a raw document such as a sitemap
    async fn fetch_document(&self, url: &Url) -> Result<String, FetchError>;

    /// Crawl delay the site asks for, if known
    fn crawl_delay(&self, _url: &Url) -> Option<Duration> {
        None
    }
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed up to 10 hops; plain HTTP is allowed because many
/// company sites still redirect from it.
///
/// # Example
///
/// ```no_run
/// use career_frontier::config::UserAgentConfig;
/// use career_frontier::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "CareerFrontier".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://crawler.example/about".to_string(),
///     contact_email: "crawler@crawler.example".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageFetcher`] over plain HTTP
pub struct HttpPageFetcher {
    client: Client,
    robots: RobotsCache,
    /// robots.txt product token
    agent: String,
}

impl HttpPageFetcher {
    pub fn new(config: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, timeout)?,
            robots: RobotsCache::new(),
            agent: config.crawler_name.clone(),
        })
    }

    /// Gets robots.txt for the URL's origin, fetching it if needed
    async fn robots_for(&self, url: &Url) -> ParsedRobots {
        let origin = origin_of(url);
        if let Some(robots) = self.robots.get(&origin) {
            return robots;
        }

        tracing::debug!(origin = %origin, "fetching robots.txt");
        let robots = fetch_robots(&self.client, &origin).await;
        self.robots.insert(&origin, robots.clone());
        robots
    }

    /// Sends a GET after the robots.txt check and classifies the outcome
    async fn get(&self, url: &Url) -> Result<Response, FetchError> {
        if !self.robots_for(url).await.allows(url, &self.agent) {
            return Err(FetchError::permanent(url, "disallowed by robots.txt"));
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        classify_status(url, response.status(), response.headers())?;
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self.get(url).await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        // A missing header is given the benefit of the doubt
        if !content_type.is_empty()
            && !content_type.contains("text/html")
            && !content_type.contains("application/xhtml")
        {
            return Err(FetchError::permanent(
                url,
                format!("unsupported content type {}", content_type),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(url, format!("body read failed: {}", e)))?;

        let parsed = parse_html(&body, &final_url);

        tracing::debug!(
            url = %url,
            final_url = %final_url,
            status,
            links = parsed.links.len(),
            "fetched page"
        );

        Ok(FetchedPage {
            status,
            final_url,
            text: parsed.text,
            links: parsed.links,
        })
    }

    async fn fetch_document(&self, url: &Url) -> Result<String, FetchError> {
        let response = self.get(url).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::transient(url, format!("body read failed: {}", e)))
    }

    fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.robots
            .get(&origin_of(url))
            .and_then(|robots| robots.crawl_delay(&self.agent))
    }
}

/// Maps an HTTP status to a failure class
///
/// | Status | Class |
/// |--------|-------|
/// | 2xx | success |
/// | 429 | PolicyBlocked (honours `Retry-After`) |
/// | 408, 5xx | Transient |
/// | 404, 410, other 4xx | Permanent |
pub fn classify_status(
    url: &Url,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::policy_blocked(url, parse_retry_after(headers)));
    }

    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return Err(FetchError::transient(url, format!("HTTP {}", status.as_u16())));
    }

    Err(FetchError::permanent(url, format!("HTTP {}", status.as_u16())))
}

/// Parses a `Retry-After` header given in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classifies a transport-level error
fn classify_request_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::transient(url, "request timeout");
    }

    if error.is_redirect() {
        return FetchError::permanent(url, "too many redirects");
    }

    // hyper reports resolution failures as connect errors; only the source
    // chain tells them apart from refused connections
    let mut source = error.source();
    while let Some(cause) = source {
        let message = cause.to_string().to_ascii_lowercase();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return FetchError::permanent(url, format!("DNS resolution failed: {}", cause));
        }
        source = cause.source();
    }

    if error.is_connect() {
        return FetchError::transient(url, format!("connection failed: {}", error));
    }

    FetchError::transient(url, error.to_string())
}
