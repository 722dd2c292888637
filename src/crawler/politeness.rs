//! Per-domain politeness
//!
//! This module handles:
//! - Single-flight per domain (at most one fetch in flight per host)
//! - The minimum delay between requests to the same host, raised by robots.txt
//!   `Crawl-delay`
//! - Cool-downs imposed by sites answering HTTP 429
//!
//! A fetch that cannot get its turn within the wait budget is policy-blocked
//! and deferred by the caller instead of stalling a worker.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::{FetchError, FetchedPage, PageFetcher};
use crate::crawler::retry::{retry, RetryPolicy};
use crate::state::DomainState;
use crate::url::extract_domain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

/// How often a waiter re-checks a domain whose token is taken
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cool-down after a 429 without a usable `Retry-After`
const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

type DomainTable = Arc<Mutex<HashMap<String, DomainState>>>;

/// Grants single-flight tokens per domain
#[derive(Debug, Clone)]
pub struct PolitenessGate {
    domains: DomainTable,
    min_interval: Duration,
    max_wait: Duration,
}

/// The single-flight token of a domain; released on drop
#[derive(Debug)]
pub struct DomainPermit {
    domains: DomainTable,
    domain: String,
}

impl Drop for DomainPermit {
    fn drop(&mut self) {
        let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = domains.get_mut(&self.domain) {
            state.release();
        }
    }
}

impl PolitenessGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum time between request starts on one domain
    /// * `max_wait` - Longest a caller waits for its turn before being policy-blocked
    pub fn new(min_interval: Duration, max_wait: Duration) -> Self {
        Self {
            domains: Arc::new(Mutex::new(HashMap::new())),
            min_interval,
            max_wait,
        }
    }

    /// A waiter may sit out one full fetch of another worker plus the longest crawl delay
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.minimum_request_interval),
            Duration::from_secs(config.fetch_timeout) + Duration::from_secs(60),
        )
    }

    /// Waits for the domain's turn and takes its token
    ///
    /// `crawl_delay` raises the minimum interval for this domain when larger.
    /// Returns `PolicyBlocked` if the domain is cooling down, or if the turn
    /// does not come within the wait budget.
    pub async fn acquire(
        &self,
        url: &Url,
        crawl_delay: Option<Duration>,
    ) -> Result<DomainPermit, FetchError> {
        let domain = extract_domain(url).unwrap_or_else(|| url.to_string());
        let delay = crawl_delay.map_or(self.min_interval, |d| d.max(self.min_interval));
        let started = Instant::now();

        loop {
            let wait = {
                let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
                let state = domains.entry(domain.clone()).or_default();
                let now = Instant::now();

                if let Some(remaining) = state.blocked_for(now) {
                    tracing::debug!(domain = %domain, remaining_ms = remaining.as_millis() as u64, "domain cooling down");
                    return Err(FetchError::policy_blocked(url, Some(remaining)));
                }

                if state.can_request(delay, now) {
                    state.record_request(now);
                    return Ok(DomainPermit {
                        domains: Arc::clone(&self.domains),
                        domain,
                    });
                }

                if state.in_flight {
                    POLL_INTERVAL
                } else {
                    state
                        .time_until_next_request(delay, now)
                        .unwrap_or(POLL_INTERVAL)
                }
            };

            if started.elapsed() + wait > self.max_wait {
                tracing::debug!(domain = %domain, "politeness wait budget exhausted");
                return Err(FetchError::policy_blocked(url, Some(wait)));
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Puts a domain into a cool-down
    pub fn block_for(&self, domain: &str, duration: Duration) {
        let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        domains
            .entry(domain.to_string())
            .or_default()
            .block_for(duration, Instant::now());
    }

    /// Snapshot of a domain's state
    pub fn domain_state(&self, domain: &str) -> Option<DomainState> {
        let domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        domains.get(domain).cloned()
    }
}

/// A [`PageFetcher`] behind the politeness gate, with retries
///
/// Every attempt takes the domain token; transient failures are retried with
/// backoff, and a site's 429 puts its domain into a cool-down.
pub struct PoliteFetcher {
    fetcher: Arc<dyn PageFetcher>,
    gate: PolitenessGate,
    retry: RetryPolicy,
}

impl PoliteFetcher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, gate: PolitenessGate, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            gate,
            retry,
        }
    }

    pub fn gate(&self) -> &PolitenessGate {
        &self.gate
    }

    pub async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        retry(&self.retry, url.as_str(), move |attempt| async move {
            let _permit = self.gate.acquire(url, self.fetcher.crawl_delay(url)).await?;
            tracing::trace!(url = %url, attempt, "fetching page");
            let result = self.fetcher.fetch(url).await;
            self.note_rate_limit(url, &result);
            result
        })
        .await
    }

    pub async fn fetch_document(&self, url: &Url) -> Result<String, FetchError> {
        retry(&self.retry, url.as_str(), move |attempt| async move {
            let _permit = self.gate.acquire(url, self.fetcher.crawl_delay(url)).await?;
            tracing::trace!(url = %url, attempt, "fetching document");
            let result = self.fetcher.fetch_document(url).await;
            self.note_rate_limit(url, &result);
            result
        })
        .await
    }

    fn note_rate_limit<T>(&self, url: &Url, result: &Result<T, FetchError>) {
        if let Err(FetchError::PolicyBlocked { retry_after, .. }) = result {
            if let Some(domain) = extract_domain(url) {
                let cooldown = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN);
                tracing::info!(domain = %domain, cooldown_secs = cooldown.as_secs(), "rate limited by site");
                self.gate.block_for(&domain, cooldown);
            }
        }
    }
}
