//! Classification gate
//!
//! Runs the classifier on a fetched page and turns its answer into frontier
//! mutations. Suggested links are only ever taken from the set of links the
//! page actually contains; anything else the classifier returns is dropped.

use crate::classify::{ClassificationResult, Classifier, ClassifierError};
use crate::config::{CrawlerConfig, PolicyConfig};
use crate::crawler::{retry, FetchedPage, RetryPolicy};
use crate::state::FrontierState;
use crate::storage::{FrontierEntry, FrontierStore, NewEntry, StorageResult};
use crate::url::normalize_url;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// What a classification means for the classified entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Target at or above the acceptance threshold
    Confirmed,
    /// Target below the acceptance threshold
    Provisional,
    /// Not a target; its children stay queued
    SeedExplored,
    /// Not a target and no outbound links at all
    DeadEnd,
}

impl Verdict {
    pub fn state(&self) -> FrontierState {
        match self {
            Verdict::Confirmed => FrontierState::TargetConfirmed,
            Verdict::Provisional => FrontierState::TargetProvisional,
            Verdict::SeedExplored => FrontierState::SeedExplored,
            Verdict::DeadEnd => FrontierState::DeadEnd,
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, Verdict::Confirmed | Verdict::Provisional)
    }
}

pub struct ClassificationGate {
    classifier: Arc<dyn Classifier>,
    acceptance_confidence: u8,
    max_depth: u32,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ClassificationGate {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        acceptance_confidence: u8,
        max_depth: u32,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            acceptance_confidence,
            max_depth,
            retry,
            timeout,
        }
    }

    pub fn from_config(
        classifier: Arc<dyn Classifier>,
        policy: &PolicyConfig,
        crawler: &CrawlerConfig,
    ) -> Self {
        Self::new(
            classifier,
            policy.acceptance_confidence,
            crawler.max_depth,
            RetryPolicy::from_config(crawler),
            Duration::from_secs(crawler.classify_timeout),
        )
    }

    pub fn acceptance_confidence(&self) -> u8 {
        self.acceptance_confidence
    }

    /// Classifies a fetched page, with a deadline per attempt and retries
    pub async fn classify(&self, page: &FetchedPage) -> Result<ClassificationResult, ClassifierError> {
        let url = &page.final_url;
        let classifier = &self.classifier;
        let timeout = self.timeout;

        let result = retry(&self.retry, url.as_str(), move |_| async move {
            match tokio::time::timeout(timeout, classifier.classify(url, &page.text, &page.links))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ClassifierError::Timeout(timeout)),
            }
        })
        .await?;

        Ok(ClassificationResult {
            confidence: result.confidence.min(100),
            ..result
        })
    }

    /// Keeps the suggestions that are present among the page's links
    ///
    /// Both sides are normalized against the page's final URL before they are
    /// compared. Order follows the suggestions, without duplicates.
    pub fn validate_suggestions(result: &ClassificationResult, page: &FetchedPage) -> Vec<Url> {
        let observed: HashSet<Url> = page
            .links
            .iter()
            .filter_map(|link| normalize_url(&link.url, Some(&page.final_url)).ok())
            .collect();

        let mut seen = HashSet::new();
        let mut kept = Vec::new();

        for suggestion in &result.suggested_links {
            let Ok(url) = normalize_url(suggestion, Some(&page.final_url)) else {
                tracing::debug!(suggestion = %suggestion, "dropping malformed suggestion");
                continue;
            };

            if !observed.contains(&url) {
                tracing::debug!(
                    page = %page.final_url,
                    suggestion = %url,
                    "dropping suggestion not observed on page"
                );
                continue;
            }

            if seen.insert(url.clone()) {
                kept.push(url);
            }
        }

        kept
    }

    /// Maps a classification to a verdict
    ///
    /// `has_links` tells whether the page had any outbound link at all.
    pub fn verdict(&self, result: &ClassificationResult, has_links: bool) -> Verdict {
        match (result.is_target, has_links) {
            (true, _) if result.confidence >= self.acceptance_confidence => Verdict::Confirmed,
            (true, _) => Verdict::Provisional,
            (false, false) => Verdict::DeadEnd,
            (false, true) => Verdict::SeedExplored,
        }
    }

    /// Inserts validated children of `parent` if absent
    ///
    /// Children deeper than the depth limit are not inserted. Returns the
    /// number of entries actually created.
    pub fn record_children<S: FrontierStore + ?Sized>(
        &self,
        store: &mut S,
        parent: &FrontierEntry,
        children: &[Url],
    ) -> StorageResult<usize> {
        if parent.depth + 1 > self.max_depth {
            if !children.is_empty() {
                tracing::debug!(
                    entry_id = parent.entry_id,
                    depth = parent.depth,
                    skipped = children.len(),
                    "depth limit reached, children not recorded"
                );
            }
            return Ok(0);
        }

        let mut inserted = 0;
        for child in children {
            if child.as_str() == parent.url {
                continue;
            }

            let outcome =
                store.upsert_entry(&NewEntry::child(parent.company_id, child.as_str(), parent.entry_id))?;
            if outcome.is_inserted() {
                tracing::debug!(
                    company_id = parent.company_id,
                    entry_id = outcome.entry_id(),
                    url = %child,
                    depth = parent.depth + 1,
                    "discovered child"
                );
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    /// Inserts the address `entry`'s page redirected to as its child, if absent
    ///
    /// The destination is the same page under another address, so the depth
    /// limit does not apply. Returns whether an entry was created.
    pub fn record_redirect<S: FrontierStore + ?Sized>(
        &self,
        store: &mut S,
        entry: &FrontierEntry,
        destination: &Url,
    ) -> StorageResult<bool> {
        let outcome =
            store.upsert_entry(&NewEntry::child(entry.company_id, destination.as_str(), entry.entry_id))?;
        tracing::debug!(
            entry_id = entry.entry_id,
            destination = %destination,
            destination_id = outcome.entry_id(),
            depth = entry.depth + 1,
            "recorded redirect"
        );
        Ok(outcome.is_inserted())
    }
}
