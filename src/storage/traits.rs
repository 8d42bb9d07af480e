//! Storage traits and error types
//!
//! This module defines the trait interface for the URL state store and
//! associated error types.

use crate::state::UrlStatus;
use crate::storage::{ProgressStats, SessionRecord, SessionStatus, SessionTotals, StatusUpdate, UrlRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Every variant is fatal to the operation that produced it; the store rolls
/// back and leaves no record half-updated.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("URL not found: {0}")]
    UrlNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UrlStatus, to: UrlStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for URL state store implementations
///
/// The store exclusively owns the URL lifecycle. Implementations must be
/// safe to share between the scheduling loop and worker tasks, and must make
/// `claim_batch` linearizable: two concurrent claims never return the same
/// record, even across processes sharing one database.
pub trait Storage: Send + Sync {
    // ===== URL Lifecycle =====

    /// Inserts URLs for a source with status `pending`
    ///
    /// URLs whose hash already exists are ignored, so adding the same set
    /// twice returns the set size and then 0.
    ///
    /// # Returns
    ///
    /// The number of records actually created
    fn add_urls(&self, urls: &[String], source: &str) -> StorageResult<usize>;

    /// Atomically claims up to `limit` records for processing
    ///
    /// Eligible records are `pending`, or `failed` with fewer than
    /// `max_attempts` attempts; least-tried and oldest come first. Claimed
    /// records are moved to `processing` and stamped with `last_attempt` in
    /// the same transaction that selected them.
    fn claim_batch(&self, limit: usize, max_attempts: u32) -> StorageResult<Vec<UrlRecord>>;

    /// Finishes a `processing` record with a new status
    ///
    /// Increments `attempts`. Returns `InvalidTransition` without modifying
    /// anything when the record is not `processing` or the target is not a
    /// valid outcome, and `UrlNotFound` for an unknown hash.
    fn update_status(&self, url_hash: &str, update: &StatusUpdate) -> StorageResult<()>;

    /// Returns every `processing` record to `pending`, attempts unchanged
    ///
    /// Called once at startup, before any claim.
    fn reset_stuck_processing(&self) -> StorageResult<usize>;

    /// Counts records by status, overall and per source
    fn progress_stats(&self) -> StorageResult<ProgressStats>;

    /// Gets a record by URL hash
    fn get_record(&self, url_hash: &str) -> StorageResult<Option<UrlRecord>>;

    // ===== Session Management =====

    /// Creates a new running session
    ///
    /// # Returns
    ///
    /// The ID of the newly created session
    fn create_session(&self, config_hash: &str) -> StorageResult<i64>;

    /// Marks a session finished with its totals
    fn finish_session(
        &self,
        session_id: i64,
        status: SessionStatus,
        totals: &SessionTotals,
    ) -> StorageResult<()>;

    /// Gets the most recent session
    fn latest_session(&self) -> StorageResult<Option<SessionRecord>>;

    /// Marks sessions left `running` by a crashed process as `interrupted`
    fn mark_interrupted_sessions(&self) -> StorageResult<usize>;
}
