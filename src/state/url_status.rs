/// URL lifecycle definitions
///
/// This module defines every status a discovered URL can be in and which
/// transitions between them are legal.
use std::fmt;

/// Represents the current status of a URL in the state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    // ===== Active States =====
    /// Discovered and waiting to be claimed
    Pending,

    /// Claimed by a session and being worked on
    Processing,

    // ===== Retryable State =====
    /// Failed with a retryable error; reclaimable while attempts remain
    Failed,

    // ===== Terminal States =====
    /// Fetched, extracted and saved (or recognised as a duplicate)
    Completed,

    /// Failed with an error that will not change on retry
    FailedPermanent,

    /// Disallowed by robots.txt
    Blocked,
}

impl UrlStatus {
    /// Returns true if no further transitions are possible
    ///
    /// `failed` is not terminal: the record becomes claimable again until it
    /// runs out of attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedPermanent | Self::Blocked)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::FailedPermanent | Self::Blocked)
    }

    /// Returns true if a record in `processing` may be finished with this status
    pub fn is_valid_outcome(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::FailedPermanent | Self::Blocked
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::FailedPermanent => "failed_permanent",
            Self::Blocked => "blocked",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "failed_permanent" => Some(Self::FailedPermanent),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all_statuses() -> [Self; 6] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::FailedPermanent,
            Self::Blocked,
        ]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_db_string())
    }
}
