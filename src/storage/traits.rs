//! Storage traits and error types
//!
//! This module defines the trait interface for frontier storage backends and
//! associated error types.

use crate::state::FrontierState;
use crate::storage::{CompanyRoot, FrontierEntry, NewEntry, TransitionFields, UpsertOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Company not found: {0}")]
    CompanyNotFound(i64),

    #[error("Store conflict on entry {entry_id}: expected {expected}, found {actual}")]
    Conflict {
        entry_id: i64,
        expected: FrontierState,
        actual: FrontierState,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: FrontierState,
        to: FrontierState,
    },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier storage backends
///
/// Every mutation of an entry's state is a compare-and-set keyed by
/// `(entry_id, expected_state)`: it fails with [`StorageError::Conflict`] when
/// the persisted state differs, and never overwrites blindly.
pub trait FrontierStore {
    // ===== Company Roots =====

    /// Inserts a company root, or updates name and flag of the one with the same root URL
    ///
    /// Used by external administration only; the engine never calls it.
    fn upsert_company_root(
        &mut self,
        name: &str,
        root_url: &str,
        crawl_enabled: bool,
    ) -> StorageResult<i64>;

    /// Gets a company root by ID
    fn get_company_root(&self, company_id: i64) -> StorageResult<CompanyRoot>;

    /// Lists company roots in ID order
    fn list_company_roots(&self, enabled_only: bool) -> StorageResult<Vec<CompanyRoot>>;

    // ===== Entries =====

    /// Creates the depth-0 entry for the company's root URL if it is missing
    fn ensure_root_entry(&mut self, company: &CompanyRoot) -> StorageResult<UpsertOutcome>;

    /// Atomic insert-if-absent on `(company_id, url)`
    ///
    /// A new entry starts in `Discovered` with `depth = parent.depth + 1`, or
    /// depth 0 without a parent. An existing entry is left untouched.
    fn upsert_entry(&mut self, entry: &NewEntry) -> StorageResult<UpsertOutcome>;

    /// Gets an entry by ID
    fn get_entry(&self, entry_id: i64) -> StorageResult<FrontierEntry>;

    /// Finds the entry of a company for a normalized URL
    fn find_entry(&self, company_id: i64, url: &str) -> StorageResult<Option<FrontierEntry>>;

    /// Gets the depth-0 entry of a company
    fn root_entry(&self, company_id: i64) -> StorageResult<Option<FrontierEntry>>;

    /// Lists all entries of a company in insertion order
    fn list_entries(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>>;

    // ===== Work Selection =====

    /// Gets up to `limit` due entries of a company, in insertion (FIFO) order
    ///
    /// Due means `Discovered` (or a depth-0 `Probing` left behind by an
    /// interrupted run) with no retry scheduled after `now`.
    fn get_due_work(
        &self,
        company_id: i64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<FrontierEntry>>;

    // ===== Transitions =====

    /// Moves an entry from `from` to `to`, writing `fields`
    ///
    /// Fails with `InvalidTransition` if the state machine forbids the move and
    /// with `Conflict` if the persisted state is not `from`.
    fn transition(
        &mut self,
        entry_id: i64,
        from: FrontierState,
        to: FrontierState,
        fields: &TransitionFields,
    ) -> StorageResult<()>;

    /// Records a failed attempt without changing the state
    ///
    /// Sets `last_error`, increments `attempts` and schedules the next attempt.
    fn record_failure(
        &mut self,
        entry_id: i64,
        expected: FrontierState,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Defers an entry to a later schedule slot without recording an error
    fn defer(
        &mut self,
        entry_id: i64,
        expected: FrontierState,
        until: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Explicit external re-trigger: moves an entry back to `Discovered`
    ///
    /// Only terminal entries, or a depth-0 `SeedExplored` entry, can be re-armed.
    fn retrigger(&mut self, entry_id: i64, from: FrontierState) -> StorageResult<()>;

    // ===== Targets =====

    /// Lists a company's `TargetConfirmed` entries (the downstream contract surface)
    fn list_confirmed_targets(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>>;

    /// Lists a company's confirmed and provisional targets
    fn list_targets(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>>;

    /// Lists targets due for revalidation
    ///
    /// Confirmed targets checked before `confirmed_before` and provisional
    /// targets checked before `provisional_before`, oldest first.
    fn list_due_revalidation(
        &self,
        confirmed_before: DateTime<Utc>,
        provisional_before: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<FrontierEntry>>;

    /// Lists depth-0 `NoCareerPageFound` entries last checked before `before`
    fn list_stale_probes(&self, before: DateTime<Utc>) -> StorageResult<Vec<FrontierEntry>>;

    // ===== Statistics =====

    /// Counts entries per state, for one company or all of them
    fn count_by_state(
        &self,
        company_id: Option<i64>,
    ) -> StorageResult<HashMap<FrontierState, u64>>;
}
