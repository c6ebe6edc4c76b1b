//! Post-reset hooks
//!
//! Commands from `hooks.post_reset` (and the optional package reinstall
//! command) run through `sh -c` inside the repository. A failing hook is
//! reported, never fatal: the reset it follows has already happened.

use std::path::Path;
use std::time::Duration;

/// Hooks get this long before they are killed
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// What happened to one hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    /// Shell command as configured
    pub command: String,
    /// Whether it exited zero within the timeout
    pub success: bool,
    /// Combined stdout and stderr, or the failure reason
    pub output: String,
}

/// Run `command` via `sh -c` in `working_dir`
#[tracing::instrument(fields(working_dir = %working_dir.display()))]
pub fn run_hook(command: &str, working_dir: &Path, timeout: Duration) -> HookOutcome {
    let outcome = |success: bool, output: String| HookOutcome {
        command: command.to_string(),
        success,
        output,
    };

    let handle = match duct::cmd!("sh", "-c", command)
        .dir(working_dir)
        .env("MENTAT_REPO", working_dir)
        .stdin_null()
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .start()
    {
        Ok(handle) => handle,
        Err(e) => return outcome(false, format!("failed to start: {e}")),
    };

    match handle.wait_timeout(timeout) {
        Ok(Some(output)) => {
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if output.status.success() {
                tracing::debug!("Hook succeeded");
                outcome(true, text)
            } else {
                tracing::warn!(status = ?output.status.code(), "Hook failed");
                outcome(false, text)
            }
        }
        Ok(None) => {
            let _ = handle.kill();
            tracing::warn!("Hook timed out");
            outcome(false, format!("timed out after {}s", timeout.as_secs()))
        }
        Err(e) => outcome(false, e.to_string()),
    }
}

/// Run every command in order; later hooks run even if earlier ones fail
pub fn run_hooks<S: AsRef<str>>(commands: &[S], working_dir: &Path) -> Vec<HookOutcome> {
    commands
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| !c.trim().is_empty())
        .map(|c| run_hook(c, working_dir, HOOK_TIMEOUT))
        .collect()
}
