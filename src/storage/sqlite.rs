//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! One connection is shared behind a mutex; claims run inside
//! `BEGIN IMMEDIATE` transactions so they also exclude other processes
//! working on the same database file.

use crate::state::UrlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    ProgressStats, SessionRecord, SessionStatus, SessionTotals, StatusUpdate, UrlRecord,
};
use crate::url::url_hash;
use crate::HarvestError;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const RECORD_COLUMNS: &str = "url_hash, url, source, status, attempts, last_attempt, \
     error_message, content_hash, file_path, created_at, updated_at";

/// How long a writer waits for another connection's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    /// Forces a record's status, bypassing lifecycle checks (for testing)
    #[cfg(test)]
    pub(crate) fn force_status(&self, url_hash: &str, status: UrlStatus) -> StorageResult<()> {
        self.lock()?.execute(
            "UPDATE url_status SET status = ?1 WHERE url_hash = ?2",
            params![status.to_db_string(), url_hash],
        )?;
        Ok(())
    }
}

/// Fixed-width UTC timestamp; lexical order equals chronological order
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_status(value: String, column: usize) -> rusqlite::Result<UrlStatus> {
    UrlStatus::from_db_string(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            format!("unknown url status '{}'", value).into(),
        )
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        url_hash: row.get(0)?,
        url: row.get(1)?,
        source: row.get(2)?,
        status: parse_status(row.get(3)?, 3)?,
        attempts: row.get(4)?,
        last_attempt: row.get(5)?,
        error_message: row.get(6)?,
        content_hash: row.get(7)?,
        file_path: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: SessionStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(SessionStatus::Interrupted),
        totals: SessionTotals {
            processed: row.get::<_, i64>(5)?.max(0) as u64,
            saved: row.get::<_, i64>(6)?.max(0) as u64,
            duplicates: row.get::<_, i64>(7)?.max(0) as u64,
            failed: row.get::<_, i64>(8)?.max(0) as u64,
        },
    })
}

impl Storage for SqliteStorage {
    // ===== URL Lifecycle =====

    fn add_urls(&self, urls: &[String], source: &str) -> StorageResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_timestamp();
        let mut added = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO url_status (url_hash, url, source, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            )?;

            for url in urls {
                let url = url.trim();
                if url.is_empty() {
                    continue;
                }
                added += stmt.execute(params![
                    url_hash(url),
                    url,
                    source,
                    UrlStatus::Pending.to_db_string(),
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(added)
    }

    fn claim_batch(&self, limit: usize, max_attempts: u32) -> StorageResult<Vec<UrlRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp();

        let mut records = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM url_status
                 WHERE status = ?1 OR (status = ?2 AND attempts < ?3)
                 ORDER BY attempts ASC, created_at ASC, rowid ASC
                 LIMIT ?4",
                RECORD_COLUMNS
            ))?;

            let rows = stmt.query_map(
                params![
                    UrlStatus::Pending.to_db_string(),
                    UrlStatus::Failed.to_db_string(),
                    max_attempts,
                    limit as i64
                ],
                row_to_record,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        {
            let mut stmt = tx.prepare(
                "UPDATE url_status SET status = ?1, last_attempt = ?2, updated_at = ?2
                 WHERE url_hash = ?3",
            )?;
            for record in &mut records {
                stmt.execute(params![
                    UrlStatus::Processing.to_db_string(),
                    now,
                    record.url_hash
                ])?;
                record.status = UrlStatus::Processing;
                record.last_attempt = Some(now.clone());
                record.updated_at = now.clone();
            }
        }

        tx.commit()?;
        Ok(records)
    }

    fn update_status(&self, url_hash: &str, update: &StatusUpdate) -> StorageResult<()> {
        if !update.status.is_valid_outcome() {
            return Err(StorageError::InvalidTransition {
                from: UrlStatus::Processing,
                to: update.status,
            });
        }

        let completed = update.status == UrlStatus::Completed;
        if completed && (update.content_hash.is_none() || update.file_path.is_none()) {
            return Err(StorageError::ConstraintViolation(format!(
                "completed record {} needs content_hash and file_path",
                url_hash
            )));
        }

        let conn = self.lock()?;
        let now = now_timestamp();

        let changed = if completed {
            conn.execute(
                "UPDATE url_status
                 SET status = ?1, attempts = attempts + 1, error_message = NULL,
                     content_hash = ?2, file_path = ?3, updated_at = ?4
                 WHERE url_hash = ?5 AND status = ?6",
                params![
                    update.status.to_db_string(),
                    update.content_hash,
                    update.file_path,
                    now,
                    url_hash,
                    UrlStatus::Processing.to_db_string()
                ],
            )?
        } else {
            conn.execute(
                "UPDATE url_status
                 SET status = ?1, attempts = attempts + 1, error_message = ?2, updated_at = ?3
                 WHERE url_hash = ?4 AND status = ?5",
                params![
                    update.status.to_db_string(),
                    update.error_message,
                    now,
                    url_hash,
                    UrlStatus::Processing.to_db_string()
                ],
            )?
        };

        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM url_status WHERE url_hash = ?1",
                params![url_hash],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => Err(StorageError::UrlNotFound(url_hash.to_string())),
            Some(status) => Err(StorageError::InvalidTransition {
                from: UrlStatus::from_db_string(&status).unwrap_or(UrlStatus::Pending),
                to: update.status,
            }),
        }
    }

    fn reset_stuck_processing(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let reset = conn.execute(
            "UPDATE url_status SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                UrlStatus::Pending.to_db_string(),
                now_timestamp(),
                UrlStatus::Processing.to_db_string()
            ],
        )?;
        Ok(reset)
    }

    fn progress_stats(&self) -> StorageResult<ProgressStats> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT source, status, COUNT(*) FROM url_status GROUP BY source, status")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = ProgressStats::default();
        for row in rows {
            let (source, status, count) = row?;
            match UrlStatus::from_db_string(&status) {
                Some(status) => {
                    let count = count.max(0) as u64;
                    stats.overall.add(status, count);
                    stats.by_source.entry(source).or_default().add(status, count);
                }
                None => tracing::warn!("Ignoring {} records with unknown status '{}'", count, status),
            }
        }

        Ok(stats)
    }

    fn get_record(&self, url_hash: &str) -> StorageResult<Option<UrlRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM url_status WHERE url_hash = ?1", RECORD_COLUMNS),
                params![url_hash],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    // ===== Session Management =====

    fn create_session(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                now_timestamp(),
                config_hash,
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_session(
        &self,
        session_id: i64,
        status: SessionStatus,
        totals: &SessionTotals,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions
             SET status = ?1, finished_at = ?2, processed = ?3, saved = ?4, duplicates = ?5, failed = ?6
             WHERE id = ?7",
            params![
                status.to_db_string(),
                now_timestamp(),
                totals.processed as i64,
                totals.saved as i64,
                totals.duplicates as i64,
                totals.failed as i64,
                session_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn latest_session(&self) -> StorageResult<Option<SessionRecord>> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status, processed, saved, duplicates, failed
                 FROM sessions ORDER BY id DESC LIMIT 1",
                [],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    fn mark_interrupted_sessions(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let marked = conn.execute(
            "UPDATE sessions SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![
                SessionStatus::Interrupted.to_db_string(),
                now_timestamp(),
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(marked)
    }
}
