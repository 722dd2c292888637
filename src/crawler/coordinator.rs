//! Crawl orchestration
//!
//! One crawl cycle walks every crawl-enabled company on a fixed-size worker
//! pool. A company is handled by a single task at a time, which pulls its due
//! entries in insertion order and dispatches them by depth:
//! - depth 0 goes through the probe strategy chain
//! - deeper entries are fetched and passed through the classification gate;
//!   an entry that redirects is not classified, its destination is queued
//!   as its child instead
//!
//! A company's turn ends when it has no due work left or its crawl budget for
//! the cycle is spent. Cancellation is checked between work items only.

use crate::classify::ClassificationGate;
use crate::config::CrawlerConfig;
use crate::crawler::shared::{later, redirect_target, requeue_at, Commit, SharedStore};
use crate::crawler::{FetchError, PoliteFetcher};
use crate::probe::{ProbeOutcome, ProbeStrategyChain};
use crate::state::FrontierState;
use crate::storage::{CompanyRoot, FrontierEntry, FrontierStore, NewEntry, TransitionFields, UpsertOutcome};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What one company's turn in a cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyReport {
    pub company_id: i64,
    pub name: String,
    /// Work items handled, whatever their outcome
    pub processed: usize,
    /// Career roots located by the probe chain
    pub roots_found: usize,
    /// Entries classified as confirmed or provisional targets
    pub targets: usize,
    /// New entries created
    pub children: usize,
    /// Transient failures recorded
    pub failures: usize,
    /// Items pushed back by politeness or rate limiting
    pub deferred: usize,
    /// Entries that failed permanently
    pub invalid: usize,
    pub cancelled: bool,
}

impl CompanyReport {
    fn new(company: &CompanyRoot) -> Self {
        Self {
            company_id: company.company_id,
            name: company.name.clone(),
            ..Self::default()
        }
    }
}

/// Totals of a crawl cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub companies: Vec<CompanyReport>,
    pub processed: usize,
    pub roots_found: usize,
    pub targets: usize,
    pub children: usize,
    pub failures: usize,
    pub deferred: usize,
    pub invalid: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl CycleReport {
    fn add(&mut self, company: CompanyReport) {
        self.processed += company.processed;
        self.roots_found += company.roots_found;
        self.targets += company.targets;
        self.children += company.children;
        self.failures += company.failures;
        self.deferred += company.deferred;
        self.invalid += company.invalid;
        self.cancelled |= company.cancelled;
        self.companies.push(company);
    }
}

/// State shared by all company tasks of the orchestrator
struct Worker<S> {
    store: SharedStore<S>,
    fetcher: Arc<PoliteFetcher>,
    probes: ProbeStrategyChain,
    gate: Arc<ClassificationGate>,
    budget: usize,
    requeue_delay: Duration,
}

/// Top-level driver of crawl cycles
pub struct CrawlOrchestrator<S> {
    worker: Arc<Worker<S>>,
    workers: usize,
    cancel: CancellationToken,
}

impl<S> CrawlOrchestrator<S>
where
    S: FrontierStore + Send + 'static,
{
    pub fn new(
        store: SharedStore<S>,
        fetcher: Arc<PoliteFetcher>,
        probes: ProbeStrategyChain,
        gate: Arc<ClassificationGate>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                fetcher,
                probes,
                gate,
                budget: config.crawl_budget.max(1) as usize,
                requeue_delay: Duration::from_secs(config.requeue_delay),
            }),
            workers: config.workers.max(1) as usize,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the orchestrator at the next work item boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one crawl cycle over all crawl-enabled companies
    ///
    /// Only store failures are fatal. They stop the remaining company tasks at
    /// their next checkpoint and the first one is returned.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let companies = self.worker.store.lock()?.list_company_roots(true)?;
        tracing::info!(companies = companies.len(), workers = self.workers, "starting crawl cycle");

        let cycle = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for company in companies {
            let seeded = self.worker.store.lock()?.ensure_root_entry(&company)?;
            if let UpsertOutcome::Inserted(entry_id) = seeded {
                tracing::info!(company_id = company.company_id, entry_id, url = %company.root_url, "seeded root entry");
            }

            let permit = tokio::select! {
                biased;
                _ = cycle.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = Arc::clone(&self.worker);
            let token = cycle.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.run_company(company, token).await
            });
        }

        let mut report = CycleReport::default();
        let mut fatal = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(company)) => report.add(company),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "company task failed, stopping cycle");
                    cycle.cancel();
                    fatal.get_or_insert(e);
                }
                Err(e) => tracing::error!(error = %e, "company task panicked"),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        report.cancelled |= self.cancel.is_cancelled();
        report.elapsed = started.elapsed();
        tracing::info!(
            companies = report.companies.len(),
            processed = report.processed,
            roots_found = report.roots_found,
            targets = report.targets,
            children = report.children,
            failures = report.failures,
            deferred = report.deferred,
            invalid = report.invalid,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "crawl cycle finished"
        );

        Ok(report)
    }
}

impl<S: FrontierStore> Worker<S> {
    async fn run_company(&self, company: CompanyRoot, cancel: CancellationToken) -> Result<CompanyReport> {
        let mut report = CompanyReport::new(&company);

        'cycle: while report.processed < self.budget {
            let remaining = self.budget - report.processed;
            let batch = self
                .store
                .lock()?
                .get_due_work(company.company_id, remaining, Utc::now())?;
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'cycle;
                }

                if entry.depth == 0 {
                    self.probe_root(&entry, &mut report).await?;
                } else {
                    self.classify_entry(&entry, &mut report).await?;
                }
                report.processed += 1;
            }
        }

        if report.processed >= self.budget {
            tracing::debug!(company_id = company.company_id, budget = self.budget, "crawl budget spent");
        }

        tracing::info!(
            company_id = report.company_id,
            company = %report.name,
            processed = report.processed,
            roots_found = report.roots_found,
            targets = report.targets,
            children = report.children,
            failures = report.failures,
            deferred = report.deferred,
            "company cycle finished"
        );

        Ok(report)
    }

    /// Parses a stored URL; an unparsable one makes a discovered entry invalid
    fn entry_url(&self, entry: &FrontierEntry, report: &mut CompanyReport) -> Result<Option<Url>> {
        match Url::parse(&entry.url) {
            Ok(url) => Ok(Some(url)),
            Err(e) => {
                tracing::warn!(entry_id = entry.entry_id, url = %entry.url, error = %e, "unparsable stored URL");
                if entry.state == FrontierState::Discovered {
                    let fields = TransitionFields::checked(Utc::now()).with_error(format!("malformed URL: {}", e));
                    self.store
                        .commit(entry, entry.state, FrontierState::Invalid, &fields)?;
                    report.invalid += 1;
                }
                Ok(None)
            }
        }
    }

    async fn probe_root(&self, entry: &FrontierEntry, report: &mut CompanyReport) -> Result<()> {
        let Some(root) = self.entry_url(entry, report)? else {
            return Ok(());
        };

        // A PROBING root left behind by an interrupted run resumes as is
        if entry.state == FrontierState::Discovered {
            let claimed = self
                .store
                .claim(entry, FrontierState::Discovered, FrontierState::Probing)?;
            if let Commit::Skipped(actual) = claimed {
                tracing::debug!(entry_id = entry.entry_id, state = %actual, "root probe claimed elsewhere");
                return Ok(());
            }
        }

        let outcome = self.probes.probe(&self.fetcher, &root).await;
        let now = Utc::now();

        match outcome {
            ProbeOutcome::Found { url, strategy } => {
                let inserted = self
                    .store
                    .lock()?
                    .upsert_entry(&NewEntry::child(entry.company_id, url.as_str(), entry.entry_id))?;
                if inserted.is_inserted() {
                    report.children += 1;
                }
                report.roots_found += 1;
                tracing::info!(
                    company_id = entry.company_id,
                    entry_id = inserted.entry_id(),
                    url = %url,
                    strategy = %strategy,
                    "queued career root"
                );

                self.store.commit(
                    entry,
                    FrontierState::Probing,
                    FrontierState::SeedExplored,
                    &TransitionFields::checked(now),
                )?;
            }
            ProbeOutcome::NotFound => {
                tracing::info!(company_id = entry.company_id, root = %root, "no career page found");
                self.store.commit(
                    entry,
                    FrontierState::Probing,
                    FrontierState::NoCareerPageFound,
                    &TransitionFields::checked(now).with_error("no career page found"),
                )?;
            }
            ProbeOutcome::Inconclusive(error) => {
                tracing::warn!(company_id = entry.company_id, root = %root, error = %error, "probe inconclusive, requeued");
                let retry_at = requeue_at(self.requeue_delay, entry.attempts, now);
                self.store
                    .record_failure(entry, FrontierState::Probing, &error.to_string(), retry_at)?;
                report.failures += 1;
            }
            ProbeOutcome::Deferred(error) => {
                self.defer(entry, FrontierState::Probing, &error, report)?;
            }
        }

        Ok(())
    }

    async fn classify_entry(&self, entry: &FrontierEntry, report: &mut CompanyReport) -> Result<()> {
        let Some(url) = self.entry_url(entry, report)? else {
            return Ok(());
        };

        let page = match self.fetcher.fetch_page(&url).await {
            Ok(page) => page,
            Err(error) => {
                let now = Utc::now();
                match error {
                    FetchError::Permanent { .. } => {
                        tracing::info!(entry_id = entry.entry_id, url = %url, error = %error, "entry invalid");
                        let fields = TransitionFields::checked(now).with_error(error.to_string());
                        self.store
                            .commit(entry, entry.state, FrontierState::Invalid, &fields)?;
                        report.invalid += 1;
                    }
                    FetchError::Transient { .. } => {
                        tracing::warn!(entry_id = entry.entry_id, url = %url, error = %error, attempts = entry.attempts + 1, "fetch failed, requeued");
                        let retry_at = requeue_at(self.requeue_delay, entry.attempts, now);
                        self.store
                            .record_failure(entry, entry.state, &error.to_string(), retry_at)?;
                        report.failures += 1;
                    }
                    FetchError::PolicyBlocked { .. } => {
                        self.defer(entry, entry.state, &error, report)?;
                    }
                }
                return Ok(());
            }
        };

        // A verdict belongs to the address the page is served from
        if let Some(destination) = redirect_target(&page, entry) {
            return self.follow_redirect(entry, &destination, report);
        }

        let result = match self.gate.classify(&page).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(entry_id = entry.entry_id, url = %url, error = %error, "classification failed, requeued");
                let retry_at = requeue_at(self.requeue_delay, entry.attempts, Utc::now());
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

        let children = ClassificationGate::validate_suggestions(&result, &page);
        let inserted = {
            let mut store = self.store.lock()?;
            self.gate.record_children(&mut *store, entry, &children)?
        };
        report.children += inserted;

        let verdict = self.gate.verdict(&result, !page.links.is_empty());
        let fields = TransitionFields::checked(Utc::now()).with_confidence(result.confidence);
        let commit = self
            .store
            .commit(entry, entry.state, verdict.state(), &fields)?;

        if commit == Commit::Applied && verdict.is_target() {
            report.targets += 1;
        }
        tracing::info!(
            company_id = entry.company_id,
            entry_id = entry.entry_id,
            url = %url,
            depth = entry.depth,
            state = %verdict.state(),
            confidence = result.confidence,
            children = inserted,
            reasoning = %result.reasoning,
            "entry classified"
        );

        Ok(())
    }

    /// Queues the redirect destination and retires the redirecting entry as a seed
    fn follow_redirect(
        &self,
        entry: &FrontierEntry,
        destination: &Url,
        report: &mut CompanyReport,
    ) -> Result<()> {
        let inserted = {
            let mut store = self.store.lock()?;
            self.gate.record_redirect(&mut *store, entry, destination)?
        };
        if inserted {
            report.children += 1;
        }

        self.store.commit(
            entry,
            entry.state,
            FrontierState::SeedExplored,
            &TransitionFields::checked(Utc::now()),
        )?;
        tracing::info!(
            company_id = entry.company_id,
            entry_id = entry.entry_id,
            url = %entry.url,
            destination = %destination,
            "entry redirects, destination queued"
        );
        Ok(())
    }

    fn defer(
        &self,
        entry: &FrontierEntry,
        expected: FrontierState,
        error: &FetchError,
        report: &mut CompanyReport,
    ) -> Result<()> {
        let delay = match error {
            FetchError::PolicyBlocked {
                retry_after: Some(retry_after),
                ..
            } => *retry_after,
            _ => self.requeue_delay,
        };
        tracing::debug!(entry_id = entry.entry_id, url = %entry.url, delay_s = delay.as_secs(), "deferred");
        self.store.defer(entry, expected, later(Utc::now(), delay))?;
        report.deferred += 1;
        Ok(())
    }
}
