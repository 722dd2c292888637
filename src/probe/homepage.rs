//! Homepage link-text matching
//!
//! Scans the homepage's links in three tiers: anchor text equal to a keyword,
//! anchor text containing a keyword, and finally a career segment in the link
//! path. Within a tier the first link in document order wins.

use crate::config::ProbeConfig;
use crate::crawler::{FetchError, PageLink, PoliteFetcher};
use crate::probe::{accept_candidate, path_has_keyword, StrategyAttempt};
use url::Url;

pub(crate) async fn probe(
    fetcher: &PoliteFetcher,
    root: &Url,
    config: &ProbeConfig,
) -> Result<StrategyAttempt, FetchError> {
    let mut attempt = StrategyAttempt::default();

    let page = match fetcher.fetch_page(root).await {
        Ok(page) => page,
        Err(error) => {
            tracing::debug!(url = %root, error = %error, "homepage unavailable");
            attempt.absorb(error)?;
            return Ok(attempt);
        }
    };

    if let Some(url) = best_link(&page.links, root, config) {
        return Ok(StrategyAttempt::found(url));
    }

    Ok(attempt)
}

/// Picks the best career link of a page
pub(crate) fn best_link(links: &[PageLink], root: &Url, config: &ProbeConfig) -> Option<Url> {
    let candidates: Vec<(String, Url)> = links
        .iter()
        .filter_map(|link| {
            accept_candidate(&link.url, root).map(|url| (link.text.trim().to_lowercase(), url))
        })
        .collect();

    let exact = candidates
        .iter()
        .find(|(text, _)| config.link_keywords.iter().any(|k| k == text));

    let substring = || {
        candidates.iter().find(|(text, _)| {
            config
                .link_keywords
                .iter()
                .any(|k| text.contains(k.as_str()))
        })
    };

    let by_path = || {
        candidates
            .iter()
            .find(|(_, url)| path_has_keyword(url, &config.path_keywords))
    };

    exact
        .or_else(substring)
        .or_else(by_path)
        .map(|(_, url)| url.clone())
}
