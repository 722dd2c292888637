//! Storage module for the URL frontier
//!
//! This module owns every piece of durable state the engine has:
//! - Company roots (administered externally, read by the engine)
//! - Frontier entries, unique per `(company_id, url)`
//! - State transitions guarded by optimistic concurrency
//!
//! Workers share the store and nothing else, so a restarted process resumes
//! purely by re-reading due work.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{FrontierStore, StorageError, StorageResult};

use crate::state::FrontierState;
use crate::FrontierError;

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Opens (or creates) the frontier database at `path`
pub fn open_storage(path: &Path) -> Result<SqliteStorage, FrontierError> {
    SqliteStorage::new(path)
}

/// Formats a timestamp the way it is stored
///
/// Fixed precision and a `Z` suffix keep stored timestamps comparable as text.
pub fn db_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A company whose website is crawled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRoot {
    pub company_id: i64,
    pub name: String,
    pub root_domain: String,
    pub root_url: String,
    pub crawl_enabled: bool,
}

/// A URL known to the frontier of one company
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub entry_id: i64,
    pub company_id: i64,
    pub url: String,
    pub parent_id: Option<i64>,
    pub parent_url: Option<String>,
    pub depth: u32,
    pub state: FrontierState,
    pub confidence: Option<u8>,
    pub discovered_at: String,
    pub last_checked_at: Option<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: Option<String>,
}

/// An entry to insert if absent
///
/// Depth and parent URL are derived by the store from `parent_id`; an entry
/// without a parent is the company's depth-0 root probe.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub company_id: i64,
    pub url: String,
    pub parent_id: Option<i64>,
}

impl NewEntry {
    pub fn root(company_id: i64, url: impl Into<String>) -> Self {
        Self {
            company_id,
            url: url.into(),
            parent_id: None,
        }
    }

    pub fn child(company_id: i64, url: impl Into<String>, parent_id: i64) -> Self {
        Self {
            company_id,
            url: url.into(),
            parent_id: Some(parent_id),
        }
    }
}

/// Outcome of an insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new entry was created in `Discovered`
    Inserted(i64),
    /// An entry for the same `(company_id, url)` already existed and was left untouched
    Existing(i64),
}

impl UpsertOutcome {
    pub fn entry_id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Fields written together with a state transition
///
/// A transition always clears the attempt counter and the retry schedule.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    /// Classifier confidence; `None` clears it
    pub confidence: Option<u8>,
    /// Error to record; `None` clears it
    pub last_error: Option<String>,
    /// When the entry was checked; `None` leaves `last_checked_at` untouched
    pub checked_at: Option<DateTime<Utc>>,
}

impl TransitionFields {
    pub fn checked(now: DateTime<Utc>) -> Self {
        Self {
            checked_at: Some(now),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}
