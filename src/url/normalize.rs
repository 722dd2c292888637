use crate::UrlError;
use url::Url;

/// Query parameters that only carry campaign tracking noise
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "mc_eid", "mc_cid"];

/// Canonicalizes a URL so that identical destinations collapse to one frontier entry
///
/// # Normalization Steps
///
/// 1. Resolve `raw` against `base` when it is a relative reference
/// 2. Reject anything that is not http or https
/// 3. Lowercase scheme and host, drop default ports (done by the parser)
/// 4. Collapse empty and dot path segments, drop the trailing slash except for root `/`
/// 5. Drop the fragment
/// 6. Drop tracking query parameters and sort the remaining ones
///
/// The function is pure: the same input always yields the same output.
///
/// # Examples
///
/// ```
/// use career_frontier::url::normalize_url;
/// use url::Url;
///
/// let base = Url::parse("https://acme.example/about/").unwrap();
/// let url = normalize_url("../Careers/#open", Some(&base)).unwrap();
/// assert_eq!(url.as_str(), "https://acme.example/Careers");
///
/// let url = normalize_url("HTTPS://ACME.example:443/jobs/", None).unwrap();
/// assert_eq!(url.as_str(), "https://acme.example/jobs");
/// ```
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
    let raw = raw.trim();

    let mut url = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    // Userinfo never identifies a different destination
    let _ = url.set_username("");
    let _ = url.set_password(None);

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Collapses empty and dot segments and strips the trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
