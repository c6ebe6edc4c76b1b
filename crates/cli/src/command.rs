//! Command trait for mentat CLI
//!
//! Every sub-command implements [`Command`], which gives them one shape:
//! parsed arguments in, a [`RuntimeContext`] to work against, a
//! [`CommandError`](crate::error::CommandError) out.

use crate::common::RuntimeContext;
use crate::error::Result;

/// Trait for all mentat commands
///
/// # Example
///
/// ```rust,ignore
/// use crate::command::Command;
/// use crate::common::RuntimeContext;
/// use crate::error::Result;
/// use clap::Args;
///
/// #[derive(Debug, Args)]
/// pub struct DetectCommand;
///
/// impl Command for DetectCommand {
///     type Output = ();
///
///     fn execute(&self, context: &RuntimeContext) -> Result<()> {
///         let ws = context.workspace();
///         // ...
///         Ok(())
///     }
/// }
/// ```
pub trait Command {
    /// The type returned by this command
    type Output;

    /// Execute the command with the given runtime context
    ///
    /// # Errors
    ///
    /// Returns a `CommandError` if the command fails. Engine errors are
    /// passed through unchanged so `main` can map them to exit codes.
    fn execute(&self, context: &RuntimeContext) -> Result<Self::Output>;
}
