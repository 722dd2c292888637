use url::Url;

/// Extracts the lowercase host of a URL
///
/// The host is the politeness key: all fetches to the same host share one
/// single-flight token regardless of port or scheme.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use career_frontier::url::extract_domain;
///
/// let url = Url::parse("https://Jobs.Acme.example/open").unwrap();
/// assert_eq!(extract_domain(&url), Some("jobs.acme.example".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns `scheme://host[:port]`, the scope a robots.txt file applies to
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
