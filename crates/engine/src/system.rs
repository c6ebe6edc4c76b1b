//! Host implementations of the core capability traits
//!
//! Plus a couple of filesystem helpers shared by the backup code paths.

use crate::error::Result;
use mentat_core::{InvocationContext, ProcessProbe};
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use walkdir::WalkDir;

/// Process liveness through the host process table
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcessProbe;

impl ProcessProbe for HostProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        use rustix::process::{Pid, test_kill_process};

        let Some(pid) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
            return false;
        };
        match test_kill_process(pid) {
            Ok(()) => true,
            // Exists, but owned by someone else
            Err(e) => e == rustix::io::Errno::PERM,
        }
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // Without a liveness check, never treat a lock as stale
        true
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// Invocation facts read from the real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct HostInvocation;

impl InvocationContext for HostInvocation {
    fn stdin_is_terminal(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn stdout_is_terminal(&self) -> bool {
        std::io::stdout().is_terminal()
    }

    fn parent_process_name(&self) -> Option<String> {
        let ppid = parent_pid()?;

        // Linux exposes the command name directly
        if let Ok(comm) = fs::read_to_string(format!("/proc/{ppid}/comm")) {
            let name = comm.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }

        let output = duct::cmd!("ps", "-o", "comm=", "-p", ppid.to_string())
            .stdout_capture()
            .stderr_null()
            .unchecked()
            .run()
            .ok()?;
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let name = name.rsplit('/').next().unwrap_or(&name).to_string();
        (!name.is_empty()).then_some(name)
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    rustix::process::getppid().and_then(|pid| u32::try_from(pid.as_raw_nonzero().get()).ok())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

/// Recursively copy a directory, preserving symlinks as symlinks
///
/// Returns the number of entries copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
        copied += 1;
    }

    Ok(copied)
}

/// Create a symbolic link at `link` pointing to `target`
pub fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(windows)]
    {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        }
    }
}

/// Remove whatever is at `path` without following symlinks
pub fn remove_any(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
