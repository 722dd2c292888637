//! Sitemap scanning
//!
//! Fetches `/sitemap.xml`, follows a sitemap index exactly one level deep and
//! accepts the first listed URL with a career path segment.

use crate::config::ProbeConfig;
use crate::crawler::{FetchError, PoliteFetcher};
use crate::probe::{accept_candidate, path_has_keyword, StrategyAttempt};
use quick_xml::events::Event;
use quick_xml::Reader;
use url::Url;

/// Parsed content of a sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapContent {
    /// `<urlset>`: page URLs
    Urls(Vec<String>),
    /// `<sitemapindex>`: child sitemap URLs
    Index(Vec<String>),
}

/// Parses a sitemap or sitemap index
///
/// Only `<loc>` values are kept, in document order.
pub fn parse_sitemap(xml: &str) -> Result<SitemapContent, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut locations = Vec::new();
    let mut is_index = false;
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Text(e)) if in_loc => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                let text = text.trim();
                if !text.is_empty() {
                    locations.push(text.to_string());
                }
            }
            Ok(Event::CData(e)) if in_loc => {
                let text = String::from_utf8_lossy(&e).trim().to_string();
                if !text.is_empty() {
                    locations.push(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    if is_index {
        Ok(SitemapContent::Index(locations))
    } else {
        Ok(SitemapContent::Urls(locations))
    }
}

pub(crate) async fn probe(
    fetcher: &PoliteFetcher,
    root: &Url,
    config: &ProbeConfig,
) -> Result<StrategyAttempt, FetchError> {
    let mut attempt = StrategyAttempt::default();

    let Ok(sitemap_url) = root.join("/sitemap.xml") else {
        return Ok(attempt);
    };

    let children = match fetch_sitemap(fetcher, &sitemap_url, &mut attempt).await? {
        Some(SitemapContent::Urls(urls)) => {
            if let Some(url) = first_career_url(&urls, root, config) {
                return Ok(StrategyAttempt::found(url));
            }
            return Ok(attempt);
        }
        Some(SitemapContent::Index(children)) => children,
        None => return Ok(attempt),
    };

    for child in children.iter().take(config.max_child_sitemaps) {
        if child.ends_with(".gz") {
            tracing::debug!(sitemap = %child, "skipping compressed sitemap");
            continue;
        }
        let Ok(child_url) = Url::parse(child) else {
            continue;
        };

        match fetch_sitemap(fetcher, &child_url, &mut attempt).await? {
            Some(SitemapContent::Urls(urls)) => {
                if let Some(url) = first_career_url(&urls, root, config) {
                    return Ok(StrategyAttempt::found(url));
                }
            }
            // One level of indirection only
            Some(SitemapContent::Index(_)) => {
                tracing::debug!(sitemap = %child_url, "ignoring nested sitemap index");
            }
            None => {}
        }
    }

    Ok(attempt)
}

/// Fetches and parses one sitemap; `None` when it is missing or unreadable
async fn fetch_sitemap(
    fetcher: &PoliteFetcher,
    url: &Url,
    attempt: &mut StrategyAttempt,
) -> Result<Option<SitemapContent>, FetchError> {
    match fetcher.fetch_document(url).await {
        Ok(xml) => match parse_sitemap(&xml) {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                tracing::debug!(sitemap = %url, error = %e, "unparsable sitemap");
                Ok(None)
            }
        },
        Err(error) => {
            tracing::debug!(sitemap = %url, error = %error, "sitemap unavailable");
            attempt.absorb(error)?;
            Ok(None)
        }
    }
}

fn first_career_url(urls: &[String], root: &Url, config: &ProbeConfig) -> Option<Url> {
    urls.iter()
        .filter_map(|raw| accept_candidate(raw, root))
        .find(|url| path_has_keyword(url, &config.path_keywords))
}
