//! Depth-0 probing
//!
//! Locates a company's career root using cheap heuristics only, escalating in
//! cost order:
//! 1. Direct probing of well-known paths
//! 2. Homepage link-text matching
//! 3. Sitemap scanning (one level of sitemap index)
//!
//! The chain stops at the first accepted URL. The site root itself is never
//! accepted as a career root.

mod direct;
mod homepage;
pub mod keywords;
mod sitemap;

pub use keywords::{path_has_keyword, text_has_keyword};
pub use sitemap::{parse_sitemap, SitemapContent};

use crate::config::ProbeConfig;
use crate::crawler::{FetchError, PoliteFetcher};
use crate::url::normalize_url;
use std::fmt;
use url::Url;

/// The strategies of the chain, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    DirectPath,
    HomepageLinks,
    Sitemap,
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeStrategy::DirectPath => "direct_path",
            ProbeStrategy::HomepageLinks => "homepage_links",
            ProbeStrategy::Sitemap => "sitemap",
        };
        write!(f, "{}", name)
    }
}

/// Result of probing one company root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A career root was located (normalized)
    Found { url: Url, strategy: ProbeStrategy },

    /// Every strategy ran to completion without a match
    NotFound,

    /// Nothing matched, but a transient failure kept some candidate unchecked
    Inconclusive(FetchError),

    /// The politeness gate or the site deferred the probe
    Deferred(FetchError),
}

/// What a single strategy observed
///
/// `Err` from a strategy is reserved for policy blocks, which abort the chain.
#[derive(Debug, Default)]
pub(crate) struct StrategyAttempt {
    pub found: Option<Url>,
    pub transient: Option<FetchError>,
}

impl StrategyAttempt {
    pub fn found(url: Url) -> Self {
        Self {
            found: Some(url),
            transient: None,
        }
    }

    /// Absorbs a failed fetch; policy blocks are handed back to abort the chain
    pub fn absorb(&mut self, error: FetchError) -> Result<(), FetchError> {
        match error {
            FetchError::PolicyBlocked { .. } => Err(error),
            FetchError::Transient { .. } => {
                self.transient = Some(error);
                Ok(())
            }
            FetchError::Permanent { .. } => Ok(()),
        }
    }
}

/// Normalizes a candidate and rejects the site root
pub(crate) fn accept_candidate(raw: &str, root: &Url) -> Option<Url> {
    let url = normalize_url(raw, Some(root)).ok()?;
    let is_root = url.host_str() == root.host_str() && url.path() == "/" && url.query().is_none();
    if is_root {
        None
    } else {
        Some(url)
    }
}

/// Ordered probing heuristics for depth-0 entries
#[derive(Debug, Clone)]
pub struct ProbeStrategyChain {
    config: ProbeConfig,
}

impl ProbeStrategyChain {
    pub fn new(config: ProbeConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        Self {
            config: ProbeConfig {
                link_keywords: lower(&config.link_keywords),
                path_keywords: lower(&config.path_keywords),
                page_keywords: lower(&config.page_keywords),
                ..config
            },
        }
    }

    /// Runs the chain against a company root URL
    pub async fn probe(&self, fetcher: &PoliteFetcher, root: &Url) -> ProbeOutcome {
        let mut transient = None;

        for strategy in [
            ProbeStrategy::DirectPath,
            ProbeStrategy::HomepageLinks,
            ProbeStrategy::Sitemap,
        ] {
            let attempt = match strategy {
                ProbeStrategy::DirectPath => direct::probe(fetcher, root, &self.config).await,
                ProbeStrategy::HomepageLinks => homepage::probe(fetcher, root, &self.config).await,
                ProbeStrategy::Sitemap => sitemap::probe(fetcher, root, &self.config).await,
            };

            let attempt = match attempt {
                Ok(attempt) => attempt,
                Err(blocked) => {
                    tracing::debug!(root = %root, strategy = %strategy, "probe deferred");
                    return ProbeOutcome::Deferred(blocked);
                }
            };

            if let Some(url) = attempt.found {
                tracing::info!(root = %root, url = %url, strategy = %strategy, "career root found");
                return ProbeOutcome::Found { url, strategy };
            }

            tracing::debug!(root = %root, strategy = %strategy, "no match");
            if attempt.transient.is_some() {
                transient = attempt.transient;
            }
        }

        match transient {
            Some(error) => ProbeOutcome::Inconclusive(error),
            None => ProbeOutcome::NotFound,
        }
    }
}
