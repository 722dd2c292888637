//! Revalidation of known targets
//!
//! A pass re-fetches and re-classifies every target whose last check is older
//! than its staleness window. Targets are never deleted: a page that stopped
//! listing jobs is revoked, a page that is gone is marked broken and the
//! company's root probe is re-armed so the next crawl cycle looks for a new
//! career root.

use crate::classify::ClassificationGate;
use crate::config::{CrawlerConfig, PolicyConfig};
use crate::crawler::shared::{redirect_target, requeue_at, Commit, SharedStore};
use crate::crawler::{FetchError, PoliteFetcher};
use crate::state::FrontierState;
use crate::storage::{FrontierEntry, FrontierStore, StorageError, TransitionFields};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Totals of a revalidation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevalidationReport {
    pub checked: usize,
    pub confirmed: usize,
    pub provisional: usize,
    pub revoked: usize,
    pub broken: usize,
    pub failures: usize,
    pub deferred: usize,
    pub children: usize,
    pub roots_rearmed: usize,
    pub cancelled: bool,
}

pub struct RevalidationScheduler<S> {
    store: SharedStore<S>,
    fetcher: Arc<PoliteFetcher>,
    gate: Arc<ClassificationGate>,
    staleness_window: chrono::Duration,
    provisional_staleness_window: chrono::Duration,
    requeue_delay: Duration,
    batch_limit: usize,
    cancel: CancellationToken,
}

impl<S: FrontierStore> RevalidationScheduler<S> {
    pub fn new(
        store: SharedStore<S>,
        fetcher: Arc<PoliteFetcher>,
        gate: Arc<ClassificationGate>,
        policy: &PolicyConfig,
        crawler: &CrawlerConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            gate,
            staleness_window: policy.confirmed_window(),
            provisional_staleness_window: policy.provisional_window(),
            requeue_delay: Duration::from_secs(crawler.requeue_delay),
            batch_limit: (crawler.crawl_budget as usize).saturating_mul(crawler.workers as usize).max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_pass(&self) -> Result<RevalidationReport> {
        self.run_pass_at(Utc::now()).await
    }

    /// Runs a pass as if the current time were `now`
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<RevalidationReport> {
        let due = self.store.lock()?.list_due_revalidation(
            now - self.staleness_window,
            now - self.provisional_staleness_window,
            self.batch_limit,
        )?;
        tracing::info!(due = due.len(), "starting revalidation pass");

        let mut report = RevalidationReport::default();
        for entry in due {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.revalidate(&entry, now, &mut report).await?;
            report.checked += 1;
        }

        tracing::info!(
            checked = report.checked,
            confirmed = report.confirmed,
            provisional = report.provisional,
            revoked = report.revoked,
            broken = report.broken,
            failures = report.failures,
            roots_rearmed = report.roots_rearmed,
            cancelled = report.cancelled,
            "revalidation pass finished"
        );

        Ok(report)
    }

    async fn revalidate(
        &self,
        entry: &FrontierEntry,
        now: DateTime<Utc>,
        report: &mut RevalidationReport,
    ) -> Result<()> {
        let url = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(entry_id = entry.entry_id, url = %entry.url, error = %e, "unparsable target URL");
                return Ok(());
            }
        };

        let page = match self.fetcher.fetch_page(&url).await {
            Ok(page) => page,
            Err(error @ FetchError::Permanent { .. }) => return self.mark_broken(entry, &error, now, report),
            Err(error @ FetchError::Transient { .. }) => {
                tracing::warn!(entry_id = entry.entry_id, url = %url, error = %error, "revalidation fetch failed");
                let retry_at = requeue_at(self.requeue_delay, entry.attempts, now);
                self.store
                    .record_failure(entry, entry.state, &error.to_string(), retry_at)?;
                report.failures += 1;
                return Ok(());
            }
            Err(error @ FetchError::PolicyBlocked { .. }) => {
                // Stays due; the next pass picks it up
                tracing::debug!(entry_id = entry.entry_id, url = %url, error = %error, "revalidation deferred");
                report.deferred += 1;
                return Ok(());
            }
        };

        // A target that now redirects elsewhere has been superseded
        if let Some(destination) = redirect_target(&page, entry) {
            return self.supersede(entry, &destination, now, report);
        }

        let result = match self.gate.classify(&page).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(entry_id = entry.entry_id, url = %url, error = %error, "revalidation classification failed");
                let retry_at = requeue_at(self.requeue_delay, entry.attempts, now);
                self.store.record_failure(
                    entry,
                    entry.state,
                    &format!("classifier: {}", error),
                    retry_at,
                )?;
                report.failures += 1;
                return Ok(());
            }
        };

        // Sites restructure, so children found on a known target still count
        let children = ClassificationGate::validate_suggestions(&result, &page);
        report.children += {
            let mut store = self.store.lock()?;
            self.gate.record_children(&mut *store, entry, &children)?
        };

        let fields = TransitionFields::checked(now).with_confidence(result.confidence);
        let to = if result.is_target {
            self.gate.verdict(&result, true).state()
        } else {
            FrontierState::TargetRevoked
        };
        let fields = if to == FrontierState::TargetRevoked {
            fields.with_error("no longer a job listing")
        } else {
            fields
        };

        let commit = self.store.commit(entry, entry.state, to, &fields)?;
        if commit == Commit::Applied {
            match to {
                FrontierState::TargetConfirmed => report.confirmed += 1,
                FrontierState::TargetProvisional => report.provisional += 1,
                _ => report.revoked += 1,
            }
        }

        if entry.state != to {
            tracing::info!(
                entry_id = entry.entry_id,
                url = %url,
                from = %entry.state,
                to = %to,
                confidence = result.confidence,
                "target re-graded"
            );
        } else {
            tracing::debug!(entry_id = entry.entry_id, url = %url, state = %to, "target still valid");
        }

        Ok(())
    }

    fn supersede(
        &self,
        entry: &FrontierEntry,
        final_url: &Url,
        now: DateTime<Utc>,
        report: &mut RevalidationReport,
    ) -> Result<()> {
        let inserted = {
            let mut store = self.store.lock()?;
            self.gate.record_redirect(&mut *store, entry, final_url)?
        };
        if inserted {
            report.children += 1;
        }

        let fields = TransitionFields::checked(now).with_error(format!("superseded by {}", final_url));
        let commit = self
            .store
            .commit(entry, entry.state, FrontierState::TargetRevoked, &fields)?;
        if commit == Commit::Applied {
            report.revoked += 1;
            tracing::info!(entry_id = entry.entry_id, url = %entry.url, superseded_by = %final_url, "target superseded");
        }
        Ok(())
    }

    fn mark_broken(
        &self,
        entry: &FrontierEntry,
        error: &FetchError,
        now: DateTime<Utc>,
        report: &mut RevalidationReport,
    ) -> Result<()> {
        let fields = TransitionFields::checked(now).with_error(error.to_string());
        let commit = self
            .store
            .commit(entry, entry.state, FrontierState::TargetBroken, &fields)?;
        if commit != Commit::Applied {
            return Ok(());
        }
        report.broken += 1;
        tracing::warn!(entry_id = entry.entry_id, url = %entry.url, error = %error, "target broken");

        let root = self.store.lock()?.root_entry(entry.company_id)?;
        let Some(root) = root else {
            tracing::warn!(company_id = entry.company_id, "company has no root entry to re-arm");
            return Ok(());
        };

        if !root.state.can_retrigger(root.depth) {
            tracing::debug!(company_id = entry.company_id, state = %root.state, "root probe already pending");
            return Ok(());
        }

        let rearmed = self.store.lock()?.retrigger(root.entry_id, root.state);
        match rearmed {
            Ok(()) => {
                report.roots_rearmed += 1;
                tracing::info!(company_id = entry.company_id, entry_id = root.entry_id, "root probe re-armed");
                Ok(())
            }
            Err(StorageError::Conflict { actual, .. }) => {
                tracing::debug!(company_id = entry.company_id, actual = %actual, "root changed concurrently, not re-armed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
