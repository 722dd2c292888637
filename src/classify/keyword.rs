use crate::classify::{ClassificationResult, Classifier, ClassifierError};
use crate::config::ProbeConfig;
use crate::crawler::PageLink;
use crate::probe::path_has_keyword;
use async_trait::async_trait;
use url::Url;

/// Distinct page keywords needed to call a page a target
const TARGET_THRESHOLD: usize = 2;

/// Highest confidence this classifier ever reports
const MAX_CONFIDENCE: usize = 70;

/// Rule-based classifier over the keyword tables
///
/// A page with at least two distinct job keywords is a target, with
/// confidence `30 + 10` per extra keyword, capped at 70. Rules alone never
/// reach the confidence a language model can, so with a typical acceptance
/// threshold its targets stay provisional.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    page_keywords: Vec<String>,
    link_keywords: Vec<String>,
    path_keywords: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(
        page_keywords: Vec<String>,
        link_keywords: Vec<String>,
        path_keywords: Vec<String>,
    ) -> Self {
        let lower = |keywords: Vec<String>| -> Vec<String> {
            keywords.into_iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            page_keywords: lower(page_keywords),
            link_keywords: lower(link_keywords),
            path_keywords: lower(path_keywords),
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(
            config.page_keywords.clone(),
            config.link_keywords.clone(),
            config.path_keywords.clone(),
        )
    }

    fn matched_keywords(&self, text: &str) -> Vec<&str> {
        let text = text.to_lowercase();
        self.page_keywords
            .iter()
            .filter(|keyword| text.contains(keyword.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn is_career_link(&self, link: &PageLink) -> bool {
        let text = link.text.to_lowercase();
        if self.link_keywords.iter().any(|k| text.contains(k.as_str())) {
            return true;
        }

        Url::parse(&link.url)
            .map(|url| path_has_keyword(&url, &self.path_keywords))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        _url: &Url,
        text: &str,
        links: &[PageLink],
    ) -> Result<ClassificationResult, ClassifierError> {
        let matched = self.matched_keywords(text);
        let count = matched.len();
        let is_target = count >= TARGET_THRESHOLD;

        let confidence = if is_target {
            (30 + 10 * (count - TARGET_THRESHOLD)).min(MAX_CONFIDENCE)
        } else {
            10 * count
        };

        let suggested_links = links
            .iter()
            .filter(|link| self.is_career_link(link))
            .map(|link| link.url.clone())
            .collect();

        Ok(ClassificationResult {
            is_target,
            confidence: confidence as u8,
            reasoning: format!("{} distinct job keywords: {}", count, matched.join(", ")),
            suggested_links,
        })
    }
}
