use crate::probe::keywords;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub policy: PolicyConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default, rename = "company")]
    pub companies: Vec<CompanyEntry>,
}

/// Crawl loop, politeness and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Size of the worker pool (companies processed concurrently)
    pub workers: u32,

    /// Maximum work items processed per company per cycle
    #[serde(rename = "crawl-budget")]
    pub crawl_budget: u32,

    /// Deepest depth at which new entries are still inserted
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Minimum time between requests to the same domain (milliseconds)
    #[serde(rename = "minimum-request-interval")]
    pub minimum_request_interval: u64,

    /// Deadline of a single page fetch (seconds)
    #[serde(rename = "fetch-timeout")]
    pub fetch_timeout: u64,

    /// Deadline of a single classifier call (seconds)
    #[serde(rename = "classify-timeout")]
    pub classify_timeout: u64,

    /// Attempts per operation before a transient failure is recorded
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// First backoff delay (milliseconds)
    #[serde(rename = "backoff-base")]
    pub backoff_base: u64,

    /// Upper bound of a backoff delay (milliseconds)
    #[serde(rename = "backoff-max")]
    pub backoff_max: u64,

    /// How long a failed or deferred item waits before it is due again (seconds)
    #[serde(rename = "requeue-delay")]
    pub requeue_delay: u64,

    /// Age after which `NoCareerPageFound` roots may be re-triggered (hours)
    #[serde(default, rename = "probe-cooldown")]
    pub probe_cooldown: Option<u64>,
}

impl CrawlerConfig {
    /// `probe-cooldown` as a duration
    pub fn probe_cooldown_window(&self) -> Option<chrono::Duration> {
        self.probe_cooldown.map(window)
    }
}

/// Acceptance and staleness policy; deliberately without defaults
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Confidence (0-100) at or above which a target is confirmed
    #[serde(rename = "acceptance-confidence")]
    pub acceptance_confidence: u8,

    /// Age of `last_checked_at` after which a confirmed target is revalidated (hours)
    #[serde(rename = "staleness-window")]
    pub staleness_window: u64,

    /// Same as `staleness-window`, for provisional targets (hours)
    #[serde(rename = "provisional-staleness-window")]
    pub provisional_staleness_window: u64,
}

impl PolicyConfig {
    /// `staleness-window` as a duration
    pub fn confirmed_window(&self) -> chrono::Duration {
        window(self.staleness_window)
    }

    /// `provisional-staleness-window` as a duration
    pub fn provisional_window(&self) -> chrono::Duration {
        window(self.provisional_staleness_window)
    }
}

/// Longest accepted hour-valued window, ten years
pub const MAX_WINDOW_HOURS: u64 = 24 * 365 * 10;

/// Hours as a duration, clamped to [`MAX_WINDOW_HOURS`]
fn window(hours: u64) -> chrono::Duration {
    chrono::Duration::seconds(hours.min(MAX_WINDOW_HOURS) as i64 * 3600)
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler; also the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Renders `Name/Version (+url; email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Which classifier judges depth >= 1 pages
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClassifierConfig {
    /// Rule-based keyword classifier
    #[default]
    Keyword,

    /// OpenAI-compatible chat-completion endpoint
    Chat {
        endpoint: String,
        model: String,

        /// Name of the environment variable holding the API key
        #[serde(rename = "api-key-env")]
        api_key_env: String,

        /// Page text beyond this many characters is not sent
        #[serde(default = "default_max_text_chars", rename = "max-text-chars")]
        max_text_chars: usize,

        /// At most this many links are listed in the prompt
        #[serde(default = "default_max_prompt_links", rename = "max-prompt-links")]
        max_prompt_links: usize,
    },
}

fn default_max_text_chars() -> usize {
    6000
}

fn default_max_prompt_links() -> usize {
    15
}

/// Keyword tables of the probe chain
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Path suffixes tried in order by direct probing
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,

    /// Anchor-text keywords for homepage matching
    #[serde(default = "default_link_keywords", rename = "link-keywords")]
    pub link_keywords: Vec<String>,

    /// Path segments that mark a career URL
    #[serde(default = "default_path_keywords", rename = "path-keywords")]
    pub path_keywords: Vec<String>,

    /// Page-text keywords a probed page must contain
    #[serde(default = "default_page_keywords", rename = "page-keywords")]
    pub page_keywords: Vec<String>,

    /// Child sitemaps followed from a sitemap index
    #[serde(default = "default_max_child_sitemaps", rename = "max-child-sitemaps")]
    pub max_child_sitemaps: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            link_keywords: default_link_keywords(),
            path_keywords: default_path_keywords(),
            page_keywords: default_page_keywords(),
            max_child_sitemaps: default_max_child_sitemaps(),
        }
    }
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_paths() -> Vec<String> {
    to_owned_list(keywords::PROBE_PATHS)
}

fn default_link_keywords() -> Vec<String> {
    to_owned_list(keywords::LINK_KEYWORDS)
}

fn default_path_keywords() -> Vec<String> {
    to_owned_list(keywords::PATH_KEYWORDS)
}

fn default_page_keywords() -> Vec<String> {
    to_owned_list(keywords::PAGE_KEYWORDS)
}

fn default_max_child_sitemaps() -> usize {
    10
}

/// A company root, as administered in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyEntry {
    pub name: String,

    /// Root URL of the company website
    pub url: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
