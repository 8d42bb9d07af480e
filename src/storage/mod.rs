//! Storage module for the URL state store
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - The URL lifecycle (add, claim, finish, crash recovery)
//! - Progress statistics
//! - Session tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::UrlStatus;
use crate::HarvestError;
use std::collections::BTreeMap;
use std::path::Path;

/// Initializes or opens the state store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Represents a URL in the state store
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub url_hash: String,
    pub url: String,
    pub source: String,
    pub status: UrlStatus,
    pub attempts: u32,
    pub last_attempt: Option<String>,
    pub error_message: Option<String>,
    pub content_hash: Option<String>,
    pub file_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The outcome written back for a `processing` record
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: UrlStatus,
    pub error_message: Option<String>,
    pub content_hash: Option<String>,
    pub file_path: Option<String>,
}

impl StatusUpdate {
    /// A successful save (or a duplicate of an already saved document)
    pub fn completed(content_hash: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            status: UrlStatus::Completed,
            error_message: None,
            content_hash: Some(content_hash.into()),
            file_path: Some(file_path.into()),
        }
    }

    /// A failure with the status chosen by classification
    pub fn failure(status: UrlStatus, error_message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(error_message.into()),
            content_hash: None,
            file_path: None,
        }
    }
}

/// Record counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub failed_permanent: u64,
    pub blocked: u64,
}

impl StatusCounts {
    /// Returns the count for a status
    pub fn get(&self, status: UrlStatus) -> u64 {
        match status {
            UrlStatus::Pending => self.pending,
            UrlStatus::Processing => self.processing,
            UrlStatus::Completed => self.completed,
            UrlStatus::Failed => self.failed,
            UrlStatus::FailedPermanent => self.failed_permanent,
            UrlStatus::Blocked => self.blocked,
        }
    }

    /// Adds `count` records of `status`
    pub fn add(&mut self, status: UrlStatus, count: u64) {
        let slot = match status {
            UrlStatus::Pending => &mut self.pending,
            UrlStatus::Processing => &mut self.processing,
            UrlStatus::Completed => &mut self.completed,
            UrlStatus::Failed => &mut self.failed,
            UrlStatus::FailedPermanent => &mut self.failed_permanent,
            UrlStatus::Blocked => &mut self.blocked,
        };
        *slot += count;
    }

    /// Total number of records
    pub fn total(&self) -> u64 {
        UrlStatus::all_statuses().iter().map(|s| self.get(*s)).sum()
    }

    /// Percentage of records that reached `completed`
    pub fn completion_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64 * 100.0
        }
    }
}

/// Aggregate progress of the state store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressStats {
    pub overall: StatusCounts,
    pub by_source: BTreeMap<String, StatusCounts>,
}

/// Represents a harvest session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: SessionStatus,
    pub totals: SessionTotals,
}

/// Per-session outcome counters persisted with the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub processed: u64,
    pub saved: u64,
    pub duplicates: u64,
    pub failed: u64,
}

/// Status of a harvest session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_roundtrip() {
        for status in &[
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Interrupted,
            SessionStatus::Failed,
        ] {
            assert_eq!(
                SessionStatus::from_db_string(status.to_db_string()),
                Some(*status)
            );
        }
        assert_eq!(SessionStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(UrlStatus::Completed, 3);
        counts.add(UrlStatus::Pending, 1);
        counts.add(UrlStatus::Completed, 1);

        assert_eq!(counts.get(UrlStatus::Completed), 4);
        assert_eq!(counts.total(), 5);
        assert!((counts.completion_percentage() - 80.0).abs() < f64::EPSILON);
        assert_eq!(StatusCounts::default().completion_percentage(), 0.0);
    }

    #[test]
    fn test_status_update_constructors() {
        let done = StatusUpdate::completed("abcd", "/corpus/a.txt");
        assert_eq!(done.status, UrlStatus::Completed);
        assert!(done.error_message.is_none());

        let failed = StatusUpdate::failure(UrlStatus::Failed, "timeout");
        assert_eq!(failed.error_message.as_deref(), Some("timeout"));
        assert!(failed.content_hash.is_none());
    }
}
