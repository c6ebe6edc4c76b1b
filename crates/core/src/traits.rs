//! Capability traits for host-environment access
//!
//! The sync engine never talks to the terminal, the process table or the
//! environment directly. It goes through these traits, so decision logic
//! (stale-lock detection, automation refusal, interactive conflict
//! resolution) can be exercised with scripted doubles.
//!
//! Real implementations live in `mentat_engine::system` and the CLI's
//! terminal prompt.

use crate::Result;
use std::path::Path;

/// Process liveness interface
///
/// Isolates "is this process alive" because the mechanism differs by host
/// (signal 0 on Unix, process handles elsewhere).
pub trait ProcessProbe {
    /// Whether a process with this id currently exists
    fn is_alive(&self, pid: u32) -> bool;

    /// Id of the calling process
    fn current_pid(&self) -> u32;
}

impl<T: ProcessProbe + ?Sized> ProcessProbe for &T {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }

    fn current_pid(&self) -> u32 {
        (**self).current_pid()
    }
}

/// Facts about how the current process was launched
///
/// Used by the force-reset gate to decide whether a human is at the
/// keyboard. Every method is best-effort: `None`/`false` means "could not
/// establish", never "definitely not".
///
/// # Examples
///
/// ```ignore
/// fn launched_by_ci(ctx: &dyn InvocationContext) -> bool {
///     ctx.env_var("CI").is_some()
/// }
/// ```
pub trait InvocationContext {
    /// Whether standard input is attached to a terminal
    fn stdin_is_terminal(&self) -> bool;

    /// Whether standard output is attached to a terminal
    fn stdout_is_terminal(&self) -> bool;

    /// Executable name of the parent process, if it can be determined
    fn parent_process_name(&self) -> Option<String>;

    /// Value of an environment variable
    fn env_var(&self, key: &str) -> Option<String>;
}

/// Blocking interactive prompt
///
/// Every interaction with the user goes through this trait so that the
/// conflict resolver and the force-reset confirmation can be driven by a
/// scripted double in tests.
///
/// # Examples
///
/// ```ignore
/// fn ask(prompt: &dyn UserPrompt) -> Result<bool> {
///     let choice = prompt.select("Keep which version?", &["local", "remote"])?;
///     Ok(choice == 0)
/// }
/// ```
pub trait UserPrompt {
    /// Present a menu and return the index of the chosen item
    fn select(&self, prompt: &str, items: &[&str]) -> Result<usize>;

    /// Ask a yes/no question
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Read one line of free text
    fn input(&self, prompt: &str) -> Result<String>;

    /// Open a file in the user's editor and block until it closes
    fn edit_file(&self, path: &Path) -> Result<()>;

    /// Display informational text (diffs, warnings)
    fn show(&self, text: &str);
}
