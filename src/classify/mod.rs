//! Page classification
//!
//! The [`Classifier`] is an external judgment: given page text, URL and the
//! links observed on the page, it says whether the page lists job postings
//! and which links are worth following. Its output is never trusted as is;
//! the [`ClassificationGate`] validates it against what was actually fetched.

mod chat;
mod gate;
mod keyword;

pub use chat::ChatClassifier;
pub use gate::{ClassificationGate, Verdict};
pub use keyword::KeywordClassifier;

use crate::config::{ClassifierConfig, ProbeConfig};
use crate::crawler::{PageLink, Retryable};
use crate::FrontierError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A classifier's judgment of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Whether the page lists job postings
    pub is_target: bool,

    /// 0-100
    pub confidence: u8,

    /// Free text, for diagnostics only
    pub reasoning: String,

    /// Links worth following, as returned by the classifier
    pub suggested_links: Vec<String>,
}

/// Classifier failures; all of them are worth another attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),

    #[error("classifier request failed: {0}")]
    Request(String),
}

impl Retryable for ClassifierError {
    fn is_transient(&self) -> bool {
        // Classification is retried, never silently downgraded to "not a target"
        true
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        url: &Url,
        text: &str,
        links: &[PageLink],
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// Builds the classifier selected by the configuration
pub fn build_classifier(
    config: &ClassifierConfig,
    probe: &ProbeConfig,
    timeout: Duration,
) -> Result<Arc<dyn Classifier>, FrontierError> {
    match config {
        ClassifierConfig::Keyword => Ok(Arc::new(KeywordClassifier::from_config(probe))),
        ClassifierConfig::Chat { .. } => Ok(Arc::new(ChatClassifier::from_config(config, timeout)?)),
    }
}
