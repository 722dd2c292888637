//! Default keyword tables (English and Italian)
//!
//! Every table can be overridden from the `[probe]` configuration section.

use url::Url;

/// Path suffixes tried by direct probing, in order
pub const PROBE_PATHS: &[&str] = &[
    "/careers",
    "/jobs",
    "/en/careers",
    "/join-us",
    "/work-with-us",
    "/about/careers",
    "/company/careers",
    "/join",
    "/opportunities",
    "/company/jobs",
    "/lavora-con-noi",
    "/about/jobs",
    "/about-us/careers",
    "/about-us/jobs",
    "/it/careers",
    "/it/jobs",
    "/it/carriere",
    "/opportunita",
    "/carriere",
    "/en/company/careers",
    "/en/company/jobs",
    "/en/about/careers",
];

/// Anchor-text keywords of career links
pub const LINK_KEYWORDS: &[&str] = &[
    "careers",
    "career",
    "jobs",
    "job openings",
    "open positions",
    "opportunities",
    "employment",
    "vacancies",
    "hiring",
    "work with us",
    "work for us",
    "join us",
    "join our team",
    "lavora con noi",
    "carriere",
    "opportunità",
    "posizioni aperte",
    "unisciti a noi",
];

/// Path segments that mark a career URL
pub const PATH_KEYWORDS: &[&str] = &[
    "career",
    "careers",
    "jobs",
    "job",
    "join-us",
    "carriere",
    "lavora-con-noi",
    "opportunities",
    "vacancies",
];

/// Substrings of job-related page text
pub const PAGE_KEYWORDS: &[&str] = &[
    "career",
    "job",
    "position",
    "opening",
    "vacanc",
    "apply",
    "hiring",
    "lavora",
    "carriere",
    "posizioni",
];

/// Whether any path segment of `url` equals one of `keywords`
///
/// Comparison is case-insensitive; `keywords` are expected in lower case.
pub fn path_has_keyword(url: &Url, keywords: &[String]) -> bool {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_lowercase())
                .any(|segment| keywords.iter().any(|k| *k == segment))
        })
        .unwrap_or(false)
}

/// Whether `text` contains any of `keywords`, ignoring case
pub fn text_has_keyword(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords.iter().any(|k| text.contains(&k.to_lowercase()))
}
