//! Error types for mentat-engine
//!
//! The variants mirror the failure modes callers need to tell apart: which
//! ones are worth retrying, which ones need a human, and which ones must
//! point the user at a backup.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sync engine
#[derive(Error, Debug)]
pub enum Error {
    /// Another live process holds the sync lock
    #[error("Sync lock held by process {holder} (waited {}s)", waited.as_secs())]
    LockTimeout {
        /// Pid recorded in the lock (0 when unreadable)
        holder: u32,
        /// How long we waited before giving up
        waited: Duration,
    },

    /// Repository is missing, not a work tree, or failed integrity checks
    #[error("Repository corrupted at {}: {reason}", path.display())]
    RepositoryCorrupted {
        /// Repository checkout
        path: PathBuf,
        /// What the check found
        reason: String,
    },

    /// Remote could not be reached
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// A network operation exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    NetworkTimeout {
        /// The git operation, e.g. `fetch`
        operation: String,
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// Remote rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Push failed after every retry; the local commit is kept
    #[error("Push failed after {attempts} attempts: {last_error}")]
    PushFailed {
        /// Attempts made, including the first
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Rebase was aborted because conflicts remained
    #[error("Manual conflict resolution required for: {}", files.join(", "))]
    ManualResolutionRequired {
        /// Repository-relative paths still unmerged
        files: Vec<String>,
    },

    /// Force reset refused because the invocation looks automated
    #[error("Security violation: {reason}")]
    SecurityViolation {
        /// Which automation signal was detected
        reason: String,
    },

    /// Link whose target no longer exists
    #[error("Broken symlink: {}", link.display())]
    BrokenSymlink {
        /// The dangling link
        link: PathBuf,
    },

    /// Destructive operation failed after its backup was written
    #[error("Reset failed ({source}); state was backed up to {}", backup.display())]
    ResetFailed {
        /// Snapshot taken before the reset started
        backup: PathBuf,
        /// What went wrong during the reset
        #[source]
        source: Box<Error>,
    },

    /// The user declined a confirmation
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Underlying git command or libgit2 failure
    #[error("Git error: {0}")]
    Git(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the shared core types
    #[error(transparent)]
    Core(#[from] mentat_core::Error),
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Git(err.message().to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => Error::Io(io),
            None => Error::Io(std::io::Error::other("filesystem loop while walking")),
        }
    }
}

impl Error {
    /// Whether the same operation may succeed if simply tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. }
                | Error::NetworkTimeout { .. }
                | Error::NetworkUnreachable(_)
                | Error::PushFailed { .. }
        )
    }

    /// Whether the failure is a connectivity problem rather than local state
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::NetworkTimeout { .. }
                | Error::NetworkUnreachable(_)
                | Error::AuthenticationFailed(_)
        )
    }

    /// Backup directory the user can recover from, if this error carries one
    pub fn backup_location(&self) -> Option<&PathBuf> {
        match self {
            Error::ResetFailed { backup, .. } => Some(backup),
            _ => None,
        }
    }
}
