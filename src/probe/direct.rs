//! Direct path probing
//!
//! Tries the well-known career paths against the site root and accepts the
//! first page that loads and mentions a job keyword.

use crate::config::ProbeConfig;
use crate::crawler::{FetchError, PoliteFetcher};
use crate::probe::{accept_candidate, text_has_keyword, StrategyAttempt};
use url::Url;

pub(crate) async fn probe(
    fetcher: &PoliteFetcher,
    root: &Url,
    config: &ProbeConfig,
) -> Result<StrategyAttempt, FetchError> {
    let mut attempt = StrategyAttempt::default();

    for path in &config.paths {
        let Ok(candidate) = root.join(path) else {
            continue;
        };

        match fetcher.fetch_page(&candidate).await {
            Ok(page) => {
                if !text_has_keyword(&page.text, &config.page_keywords) {
                    tracing::trace!(url = %candidate, "no job keyword on page");
                    continue;
                }
                // Unknown paths often redirect to the homepage
                match accept_candidate(page.final_url.as_str(), root) {
                    Some(url) => return Ok(StrategyAttempt::found(url)),
                    None => tracing::trace!(url = %candidate, "redirected to site root"),
                }
            }
            Err(error) => {
                tracing::trace!(url = %candidate, error = %error, "probe path failed");
                attempt.absorb(error)?;
            }
        }
    }

    Ok(attempt)
}
