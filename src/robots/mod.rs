//! Robots.txt handling module
//!
//! This module fetches, parses and caches robots.txt files. A disallowed URL
//! is a permanent fetch failure for the frontier.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use reqwest::Client;

/// Fetches and parses robots.txt for an origin
///
/// Never fails: a missing file (4xx) allows everything, and so does an
/// unreachable or erroring server, with a warning.
///
/// # Arguments
///
/// * `client` - The HTTP client (carries the crawler's user agent)
/// * `origin` - `scheme://host[:port]` of the site
pub async fn fetch_robots(client: &Client, origin: &str) -> ParsedRobots {
    let robots_url = format!("{}/robots.txt", origin);

    let response = match client.get(&robots_url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %robots_url, error = %e, "robots.txt unreachable, allowing all");
            return ParsedRobots::allow_all();
        }
    };

    let status = response.status();
    if status.is_success() {
        match response.text().await {
            Ok(body) => ParsedRobots::from_content(&body),
            Err(e) => {
                tracing::warn!(url = %robots_url, error = %e, "robots.txt unreadable, allowing all");
                ParsedRobots::allow_all()
            }
        }
    } else if status.is_client_error() {
        tracing::debug!(url = %robots_url, status = status.as_u16(), "no robots.txt");
        ParsedRobots::allow_all()
    } else {
        tracing::warn!(url = %robots_url, status = status.as_u16(), "robots.txt errored, allowing all");
        ParsedRobots::allow_all()
    }
}
