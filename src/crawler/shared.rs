//! Frontier store shared between workers
//!
//! The store is the only mutable state workers share. Each access is a short
//! synchronous critical section; the lock is never held across an `.await`.

use crate::crawler::FetchedPage;
use crate::state::FrontierState;
use crate::storage::{FrontierEntry, FrontierStore, StorageError, TransitionFields};
use crate::url::normalize_url;
use crate::FrontierError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

/// Outcome of committing a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The entry is now in the requested state
    Applied,
    /// Someone else moved the entry somewhere the transition no longer applies
    Skipped(FrontierState),
}

/// A [`FrontierStore`] behind a mutex, with conflict resolution
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FrontierStore> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Locks the store
    ///
    /// Bind results before matching on them: a guard kept alive by a `match`
    /// scrutinee deadlocks the next `lock` in the same arm.
    pub fn lock(&self) -> Result<MutexGuard<'_, S>, FrontierError> {
        self.inner.lock().map_err(|_| FrontierError::StorePoisoned)
    }

    /// Transitions `entry` from `from` to `to`
    ///
    /// On a conflict the current state is re-read: if it already is `to` the
    /// commit has converged; if the state machine allows `actual -> to` the
    /// transition is retried once from there; otherwise it is skipped.
    pub fn commit(
        &self,
        entry: &FrontierEntry,
        from: FrontierState,
        to: FrontierState,
        fields: &TransitionFields,
    ) -> Result<Commit, FrontierError> {
        let result = self.lock()?.transition(entry.entry_id, from, to, fields);

        let actual = match result {
            Ok(()) => {
                tracing::debug!(entry_id = entry.entry_id, url = %entry.url, from = %from, to = %to, "transition");
                return Ok(Commit::Applied);
            }
            Err(StorageError::Conflict { actual, .. }) => actual,
            Err(e) => return Err(e.into()),
        };

        if actual == to {
            tracing::debug!(entry_id = entry.entry_id, state = %to, "concurrent transition converged");
            return Ok(Commit::Applied);
        }

        if !actual.can_transition_to(to) {
            tracing::warn!(
                entry_id = entry.entry_id,
                expected = %from,
                actual = %actual,
                to = %to,
                "entry changed concurrently, transition skipped"
            );
            return Ok(Commit::Skipped(actual));
        }

        let retried = self.lock()?.transition(entry.entry_id, actual, to, fields);
        match retried {
            Ok(()) => {
                tracing::debug!(entry_id = entry.entry_id, from = %actual, to = %to, "transition re-applied");
                Ok(Commit::Applied)
            }
            Err(StorageError::Conflict { actual, .. }) => {
                tracing::warn!(entry_id = entry.entry_id, actual = %actual, "entry still contended, transition skipped");
                Ok(Commit::Skipped(actual))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Takes an entry for exclusive work by moving it `from -> to`
    ///
    /// Unlike [`commit`](Self::commit) nothing converges here: an entry that is
    /// already in `to` is held by another worker.
    pub fn claim(
        &self,
        entry: &FrontierEntry,
        from: FrontierState,
        to: FrontierState,
    ) -> Result<Commit, FrontierError> {
        let result = self
            .lock()?
            .transition(entry.entry_id, from, to, &TransitionFields::default());
        match result {
            Ok(()) => Ok(Commit::Applied),
            Err(StorageError::Conflict { actual, .. }) => {
                tracing::debug!(entry_id = entry.entry_id, actual = %actual, "entry claimed elsewhere");
                Ok(Commit::Skipped(actual))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records a transient failure; the entry keeps its state
    pub fn record_failure(
        &self,
        entry: &FrontierEntry,
        expected: FrontierState,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<(), FrontierError> {
        let result = self
            .lock()?
            .record_failure(entry.entry_id, expected, error, retry_at);
        skip_conflict(entry, result)
    }

    /// Defers an entry without recording an error
    pub fn defer(
        &self,
        entry: &FrontierEntry,
        expected: FrontierState,
        until: DateTime<Utc>,
    ) -> Result<(), FrontierError> {
        let result = self.lock()?.defer(entry.entry_id, expected, until);
        skip_conflict(entry, result)
    }
}

/// The normalized address `page` was served from, when it is not `entry`'s own
pub(crate) fn redirect_target(page: &FetchedPage, entry: &FrontierEntry) -> Option<Url> {
    normalize_url(page.final_url.as_str(), None)
        .ok()
        .filter(|url| url.as_str() != entry.url)
}

/// When an entry that failed `attempts` times before becomes due again
///
/// The delay doubles with every recorded attempt, up to 32 times the base.
pub(crate) fn requeue_at(base: Duration, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = base.saturating_mul(1u32 << attempts.min(5));
    later(now, delay)
}

/// `now + delay`, saturating at one week for out-of-range delays
pub(crate) fn later(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay)
        .unwrap_or_else(|_| chrono::Duration::weeks(1))
        .min(chrono::Duration::weeks(1));
    now + delay
}

/// An entry that moved on no longer needs its failure recorded
fn skip_conflict(entry: &FrontierEntry, result: Result<(), StorageError>) -> Result<(), FrontierError> {
    match result {
        Ok(()) => Ok(()),
        Err(StorageError::Conflict { actual, .. }) => {
            tracing::debug!(entry_id = entry.entry_id, actual = %actual, "entry moved on, nothing recorded");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
