//! HTML parser for extracting page text and outbound links
//!
//! This module handles parsing HTML content to extract:
//! - Visible page text (for keyword checks and the classifier)
//! - Outbound links with their anchor text

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

/// An outbound link observed on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    /// Absolute URL (resolved, not yet normalized)
    pub url: String,

    /// Anchor text, falling back to `aria-label` and then `title`
    pub text: String,
}

impl PageLink {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
        }
    }
}

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Visible text, whitespace-collapsed
    pub text: String,

    /// Outbound links in document order, one per distinct URL
    pub links: Vec<PageLink>,
}

/// Elements whose text is never visible
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Parses HTML content and extracts its visible text and links
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
///
/// # Example
///
/// ```
/// use career_frontier::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><body><a href="/careers">Careers</a></body></html>"#;
/// let base_url = Url::parse("https://acme.example/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.text, "Careers");
/// assert_eq!(parsed.links[0].url, "https://acme.example/careers");
/// assert_eq!(parsed.links[0].text, "Careers");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        text: extract_text(&document),
        links: extract_links(&document, base_url),
    }
}

/// Collects the visible text of the document
fn extract_text(document: &Html) -> String {
    let mut parts = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |element| HIDDEN_ELEMENTS.contains(&element.name()))
        });

        if !hidden {
            parts.push(&**text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<PageLink> {
    let mut links: Vec<PageLink> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let Ok(a_selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&a_selector) {
        // Skip if it has the download attribute
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url))
        else {
            continue;
        };

        let text = link_text(&element);

        match index.get(&url) {
            // A repeated link keeps the first non-empty label
            Some(&position) => {
                let existing = &mut links[position];
                if existing.text.is_empty() {
                    existing.text = text;
                }
            }
            None => {
                index.insert(url.clone(), links.len());
                links.push(PageLink { url, text });
            }
        }
    }

    links
}

/// Anchor text of a link, or its accessible label when the anchor has no text
fn link_text(element: &ElementRef) -> String {
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return text;
    }

    ["aria-label", "title"]
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(collapse_whitespace)
        .find(|label| !label.is_empty())
        .unwrap_or_default()
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    // Skip empty hrefs
    if href.is_empty() {
        return None;
    }

    // Skip special schemes
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    // Skip fragment-only links (same page anchors)
    if href.starts_with('#') {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
