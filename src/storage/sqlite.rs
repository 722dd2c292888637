//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the FrontierStore trait.

use crate::state::FrontierState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StorageError, StorageResult};
use crate::storage::{
    db_timestamp, CompanyRoot, FrontierEntry, NewEntry, TransitionFields, UpsertOutcome,
};
use crate::url::{extract_domain, normalize_url};
use crate::FrontierError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENTRY_COLUMNS: &str = "entry_id, company_id, url, parent_id, parent_url, depth, state, \
     confidence, discovered_at, last_checked_at, last_error, attempts, next_attempt_at";

const COMPANY_COLUMNS: &str = "company_id, name, root_domain, root_url, crawl_enabled";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// Several processes may open the same file; writers wait on each other
    /// through the busy timeout instead of failing.
    pub fn new(path: &Path) -> Result<Self, FrontierError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> Result<Self, FrontierError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_entries<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> StorageResult<Vec<FrontierEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Explains why a guarded update touched no row
    fn conflict_or_missing(&self, entry_id: i64, expected: FrontierState) -> StorageError {
        match self.get_entry(entry_id) {
            Ok(entry) => StorageError::Conflict {
                entry_id,
                expected,
                actual: entry.state,
            },
            Err(e) => e,
        }
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<FrontierEntry> {
    let state: String = row.get(6)?;
    let state = FrontierState::from_db_string(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown frontier state '{}'", state).into(),
        )
    })?;

    Ok(FrontierEntry {
        entry_id: row.get(0)?,
        company_id: row.get(1)?,
        url: row.get(2)?,
        parent_id: row.get(3)?,
        parent_url: row.get(4)?,
        depth: row.get(5)?,
        state,
        confidence: row.get(7)?,
        discovered_at: row.get(8)?,
        last_checked_at: row.get(9)?,
        last_error: row.get(10)?,
        attempts: row.get(11)?,
        next_attempt_at: row.get(12)?,
    })
}

fn row_to_company(row: &Row<'_>) -> rusqlite::Result<CompanyRoot> {
    Ok(CompanyRoot {
        company_id: row.get(0)?,
        name: row.get(1)?,
        root_domain: row.get(2)?,
        root_url: row.get(3)?,
        crawl_enabled: row.get(4)?,
    })
}

impl FrontierStore for SqliteStorage {
    // ===== Company Roots =====

    fn upsert_company_root(
        &mut self,
        name: &str,
        root_url: &str,
        crawl_enabled: bool,
    ) -> StorageResult<i64> {
        let url = normalize_url(root_url, None)
            .map_err(|e| StorageError::InvalidEntry(format!("company root {}: {}", root_url, e)))?;
        let domain = extract_domain(&url)
            .ok_or_else(|| StorageError::InvalidEntry(format!("no host in {}", url)))?;

        self.conn.execute(
            "INSERT INTO company_root (name, root_domain, root_url, crawl_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(root_url) DO UPDATE SET
                 name = excluded.name,
                 crawl_enabled = excluded.crawl_enabled",
            params![
                name,
                domain,
                url.as_str(),
                crawl_enabled,
                db_timestamp(Utc::now())
            ],
        )?;

        let company_id = self.conn.query_row(
            "SELECT company_id FROM company_root WHERE root_url = ?1",
            params![url.as_str()],
            |row| row.get(0),
        )?;

        Ok(company_id)
    }

    fn get_company_root(&self, company_id: i64) -> StorageResult<CompanyRoot> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM company_root WHERE company_id = ?1",
                    COMPANY_COLUMNS
                ),
                params![company_id],
                row_to_company,
            )
            .optional()?
            .ok_or(StorageError::CompanyNotFound(company_id))
    }

    fn list_company_roots(&self, enabled_only: bool) -> StorageResult<Vec<CompanyRoot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM company_root WHERE (?1 = 0 OR crawl_enabled = 1) ORDER BY company_id",
            COMPANY_COLUMNS
        ))?;

        let companies = stmt
            .query_map(params![enabled_only], row_to_company)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(companies)
    }

    // ===== Entries =====

    fn ensure_root_entry(&mut self, company: &CompanyRoot) -> StorageResult<UpsertOutcome> {
        self.upsert_entry(&NewEntry::root(company.company_id, &company.root_url))
    }

    fn upsert_entry(&mut self, entry: &NewEntry) -> StorageResult<UpsertOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (depth, parent_url) = match entry.parent_id {
            Some(parent_id) => {
                let parent: Option<(i64, u32, String)> = tx
                    .query_row(
                        "SELECT company_id, depth, url FROM frontier_entry WHERE entry_id = ?1",
                        params![parent_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let (parent_company, parent_depth, parent_url) =
                    parent.ok_or(StorageError::EntryNotFound(parent_id))?;

                if parent_company != entry.company_id {
                    return Err(StorageError::InvalidEntry(format!(
                        "parent {} belongs to company {}, not {}",
                        parent_id, parent_company, entry.company_id
                    )));
                }

                (parent_depth + 1, Some(parent_url))
            }
            None => {
                let root_url: Option<String> = tx
                    .query_row(
                        "SELECT root_url FROM company_root WHERE company_id = ?1",
                        params![entry.company_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let root_url = root_url.ok_or(StorageError::CompanyNotFound(entry.company_id))?;
                if root_url != entry.url {
                    return Err(StorageError::InvalidEntry(format!(
                        "{} has no parent but is not the root of company {}",
                        entry.url, entry.company_id
                    )));
                }

                (0, None)
            }
        };

        let inserted = tx.execute(
            "INSERT INTO frontier_entry
                 (company_id, url, parent_id, parent_url, depth, state, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(company_id, url) DO NOTHING",
            params![
                entry.company_id,
                entry.url,
                entry.parent_id,
                parent_url,
                depth,
                FrontierState::Discovered.to_db_string(),
                db_timestamp(Utc::now())
            ],
        )?;

        let outcome = if inserted == 1 {
            UpsertOutcome::Inserted(tx.last_insert_rowid())
        } else {
            let existing = tx.query_row(
                "SELECT entry_id FROM frontier_entry WHERE company_id = ?1 AND url = ?2",
                params![entry.company_id, entry.url],
                |row| row.get(0),
            )?;
            UpsertOutcome::Existing(existing)
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_entry(&self, entry_id: i64) -> StorageResult<FrontierEntry> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM frontier_entry WHERE entry_id = ?1",
                    ENTRY_COLUMNS
                ),
                params![entry_id],
                row_to_entry,
            )
            .optional()?
            .ok_or(StorageError::EntryNotFound(entry_id))
    }

    fn find_entry(&self, company_id: i64, url: &str) -> StorageResult<Option<FrontierEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM frontier_entry WHERE company_id = ?1 AND url = ?2",
                    ENTRY_COLUMNS
                ),
                params![company_id, url],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn root_entry(&self, company_id: i64) -> StorageResult<Option<FrontierEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM frontier_entry WHERE company_id = ?1 AND depth = 0",
                    ENTRY_COLUMNS
                ),
                params![company_id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_entries(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry WHERE company_id = ?1 ORDER BY entry_id",
                ENTRY_COLUMNS
            ),
            params![company_id],
        )
    }

    // ===== Work Selection =====

    fn get_due_work(
        &self,
        company_id: i64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry
                 WHERE company_id = ?1
                   AND (state = ?2 OR (state = ?3 AND depth = 0))
                   AND (next_attempt_at IS NULL OR next_attempt_at <= ?4)
                 ORDER BY entry_id ASC
                 LIMIT ?5",
                ENTRY_COLUMNS
            ),
            params![
                company_id,
                FrontierState::Discovered.to_db_string(),
                FrontierState::Probing.to_db_string(),
                db_timestamp(now),
                limit as i64
            ],
        )
    }

    // ===== Transitions =====

    fn transition(
        &mut self,
        entry_id: i64,
        from: FrontierState,
        to: FrontierState,
        fields: &TransitionFields,
    ) -> StorageResult<()> {
        if !from.can_transition_to(to) {
            return Err(StorageError::InvalidTransition { from, to });
        }

        let changed = self.conn.execute(
            "UPDATE frontier_entry SET
                 state = ?1,
                 confidence = ?2,
                 last_error = ?3,
                 last_checked_at = COALESCE(?4, last_checked_at),
                 attempts = 0,
                 next_attempt_at = NULL
             WHERE entry_id = ?5 AND state = ?6",
            params![
                to.to_db_string(),
                fields.confidence.map(|c| c.min(100)),
                fields.last_error,
                fields.checked_at.map(db_timestamp),
                entry_id,
                from.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(self.conflict_or_missing(entry_id, from));
        }
        Ok(())
    }

    fn record_failure(
        &mut self,
        entry_id: i64,
        expected: FrontierState,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE frontier_entry SET
                 last_error = ?1,
                 attempts = attempts + 1,
                 next_attempt_at = ?2
             WHERE entry_id = ?3 AND state = ?4",
            params![
                error,
                db_timestamp(retry_at),
                entry_id,
                expected.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(self.conflict_or_missing(entry_id, expected));
        }
        Ok(())
    }

    fn defer(
        &mut self,
        entry_id: i64,
        expected: FrontierState,
        until: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE frontier_entry SET next_attempt_at = ?1 WHERE entry_id = ?2 AND state = ?3",
            params![db_timestamp(until), entry_id, expected.to_db_string()],
        )?;

        if changed == 0 {
            return Err(self.conflict_or_missing(entry_id, expected));
        }
        Ok(())
    }

    fn retrigger(&mut self, entry_id: i64, from: FrontierState) -> StorageResult<()> {
        let entry = self.get_entry(entry_id)?;
        if entry.state != from {
            return Err(StorageError::Conflict {
                entry_id,
                expected: from,
                actual: entry.state,
            });
        }
        if !from.can_retrigger(entry.depth) {
            return Err(StorageError::InvalidTransition {
                from,
                to: FrontierState::Discovered,
            });
        }

        let changed = self.conn.execute(
            "UPDATE frontier_entry SET
                 state = ?1,
                 confidence = NULL,
                 last_error = NULL,
                 attempts = 0,
                 next_attempt_at = NULL
             WHERE entry_id = ?2 AND state = ?3",
            params![
                FrontierState::Discovered.to_db_string(),
                entry_id,
                from.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(self.conflict_or_missing(entry_id, from));
        }
        Ok(())
    }

    // ===== Targets =====

    fn list_confirmed_targets(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry WHERE company_id = ?1 AND state = ?2 ORDER BY entry_id",
                ENTRY_COLUMNS
            ),
            params![company_id, FrontierState::TargetConfirmed.to_db_string()],
        )
    }

    fn list_targets(&self, company_id: i64) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry
                 WHERE company_id = ?1 AND state IN (?2, ?3)
                 ORDER BY entry_id",
                ENTRY_COLUMNS
            ),
            params![
                company_id,
                FrontierState::TargetConfirmed.to_db_string(),
                FrontierState::TargetProvisional.to_db_string()
            ],
        )
    }

    fn list_due_revalidation(
        &self,
        confirmed_before: DateTime<Utc>,
        provisional_before: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry
                 WHERE ((state = ?1 AND COALESCE(last_checked_at, discovered_at) < ?2)
                     OR (state = ?3 AND COALESCE(last_checked_at, discovered_at) < ?4))
                   AND company_id IN (SELECT company_id FROM company_root WHERE crawl_enabled = 1)
                 ORDER BY COALESCE(last_checked_at, discovered_at) ASC, entry_id ASC
                 LIMIT ?5",
                ENTRY_COLUMNS
            ),
            params![
                FrontierState::TargetConfirmed.to_db_string(),
                db_timestamp(confirmed_before),
                FrontierState::TargetProvisional.to_db_string(),
                db_timestamp(provisional_before),
                limit as i64
            ],
        )
    }

    fn list_stale_probes(&self, before: DateTime<Utc>) -> StorageResult<Vec<FrontierEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM frontier_entry
                 WHERE depth = 0 AND state = ?1
                   AND COALESCE(last_checked_at, discovered_at) < ?2
                 ORDER BY entry_id",
                ENTRY_COLUMNS
            ),
            params![
                FrontierState::NoCareerPageFound.to_db_string(),
                db_timestamp(before)
            ],
        )
    }

    // ===== Statistics =====

    fn count_by_state(
        &self,
        company_id: Option<i64>,
    ) -> StorageResult<HashMap<FrontierState, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT state, COUNT(*) FROM frontier_entry
             WHERE (?1 IS NULL OR company_id = ?1)
             GROUP BY state",
        )?;

        let rows = stmt
            .query_map(params![company_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            let state = FrontierState::from_db_string(&state)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown state '{}'", state)))?;
            counts.insert(state, count as u64);
        }
        Ok(counts)
    }
}
