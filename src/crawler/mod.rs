//! Crawling: fetching, politeness and the two drivers of the frontier
//!
//! - `fetcher`: the PageFetcher capability and its HTTP implementation
//! - `parser`: HTML text and link extraction
//! - `politeness`: single-flight per domain, minimum interval, cool-downs
//! - `retry`: bounded exponential backoff with jitter
//! - `coordinator`: crawl cycles over all companies
//! - `revalidation`: periodic re-checks of known targets

mod coordinator;
mod fetcher;
mod parser;
mod politeness;
mod retry;
mod revalidation;
mod shared;

pub use coordinator::{CompanyReport, CrawlOrchestrator, CycleReport};
pub use fetcher::{
    build_http_client, classify_status, FetchError, FetchedPage, HttpPageFetcher, PageFetcher,
};
pub use parser::{parse_html, PageLink, ParsedPage};
pub use politeness::{DomainPermit, PoliteFetcher, PolitenessGate};
pub use retry::{retry, RetryPolicy, Retryable};
pub use revalidation::{RevalidationReport, RevalidationScheduler};
pub use shared::{Commit, SharedStore};
