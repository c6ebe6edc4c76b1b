//! Error types for CLI commands
//!
//! Commands return [`CommandError`]; `main` turns whatever reaches it into a
//! miette report and an exit status via [`exit_code`].

use thiserror::Error;

/// Exit status for failures worth retrying later (`EX_TEMPFAIL`)
pub const EXIT_RETRYABLE: i32 = 75;
/// Exit status for a refused destructive operation (`EX_NOPERM`)
pub const EXIT_SECURITY: i32 = 77;
/// Exit status for every other failure
pub const EXIT_FAILURE: i32 = 1;

/// Errors that can occur during command execution
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// Engine operation failed
    #[error(transparent)]
    Engine(#[from] mentat_engine::Error),

    /// Configuration or path resolution error
    #[error("Configuration error: {0}")]
    Config(#[from] mentat_core::Error),

    /// A full sync finished with failed steps
    #[error("Sync finished with {failed} failed step(s); see sync.log")]
    SyncIncomplete {
        /// Number of steps that failed
        failed: usize,
    },

    /// Health evaluation came back critical
    #[error("Health is critical (score {score}/100)")]
    Unhealthy {
        /// Overall score
        score: u8,
    },

    /// Managed links whose targets are gone
    #[error("{count} broken symlink(s) remain")]
    BrokenLinks {
        /// Number of broken links
        count: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for command operations
pub type Result<T> = std::result::Result<T, CommandError>;

impl CommandError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Engine(err) => engine_exit_code(err),
            _ => EXIT_FAILURE,
        }
    }
}

fn engine_exit_code(err: &mentat_engine::Error) -> i32 {
    match err {
        mentat_engine::Error::SecurityViolation { .. } => EXIT_SECURITY,
        err if err.is_retryable() => EXIT_RETRYABLE,
        _ => EXIT_FAILURE,
    }
}

/// Exit status for an error that reached `main`
///
/// `#[error(transparent)]` hides the wrapped engine error from the source
/// chain, so both layers are checked explicitly.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(command) = cause.downcast_ref::<CommandError>() {
            return command.exit_code();
        }
        if let Some(engine) = cause.downcast_ref::<mentat_engine::Error>() {
            return engine_exit_code(engine);
        }
    }
    EXIT_FAILURE
}
