//! Robots.txt parser implementation
//!
//! Matching is delegated to the robotstxt crate; `Crawl-delay`, which that
//! crate does not expose, is parsed here.

use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Longest crawl delay honoured; larger values are clamped
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Parsed robots.txt data for one origin
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    /// Raw robots.txt body; `None` allows everything
    content: Option<String>,
}

impl ParsedRobots {
    /// Creates a ParsedRobots from a robots.txt body
    pub fn from_content(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
        }
    }

    /// Creates a permissive ParsedRobots, used when no robots.txt applies
    pub fn allow_all() -> Self {
        Self { content: None }
    }

    /// Checks whether `agent` may fetch `url`
    ///
    /// `agent` is the product token of the user agent (e.g. `CareerFrontier`),
    /// which is what robots.txt groups are matched against.
    pub fn allows(&self, url: &Url, agent: &str) -> bool {
        match &self.content {
            Some(content) if !content.trim().is_empty() => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, agent, url.as_str())
            }
            _ => true,
        }
    }

    /// Returns the `Crawl-delay` that applies to `agent`
    ///
    /// A group naming the agent wins over the `*` group. Consecutive
    /// `User-agent` lines form one group.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let content = self.content.as_deref()?;
        let agent = agent.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                if !in_agent_lines {
                    group.clear();
                }
                group.push(value.to_lowercase());
                in_agent_lines = true;
                continue;
            }
            in_agent_lines = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(seconds) = value.parse::<f64>() else {
                continue;
            };
            if !seconds.is_finite() || seconds < 0.0 {
                continue;
            }
            let delay = Duration::from_secs_f64(seconds).min(MAX_CRAWL_DELAY);

            if group.iter().any(|ua| ua == &agent) {
                specific = Some(delay);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard = Some(delay);
            }
        }

        specific.or(wildcard)
    }
}
