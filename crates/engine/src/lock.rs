//! Sync lock
//!
//! One sync cycle per machine at a time. The lock is a directory created
//! atomically with `mkdir`; it holds a `pid` file naming the owner. A lock
//! whose owner is gone is stale and reclaimed without waiting out the
//! timeout.

use crate::error::{Error, Result};
use mentat_core::ProcessProbe;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

const PID_FILE: &str = "pid";

/// How long a lock directory may exist without a pid file before it is
/// considered abandoned (the owner died between `mkdir` and writing it)
const DEFAULT_PIDLESS_GRACE: Duration = Duration::from_secs(5);

/// Acquires and inspects the sync lock
#[derive(Debug, Clone)]
pub struct LockManager<P> {
    lock_dir: PathBuf,
    probe: P,
    poll_interval: Duration,
    pidless_grace: Duration,
}

impl<P: ProcessProbe> LockManager<P> {
    /// Lock at `lock_dir`, checking holders with `probe`
    pub fn new(lock_dir: impl Into<PathBuf>, probe: P) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            probe,
            poll_interval: Duration::from_secs(1),
            pidless_grace: DEFAULT_PIDLESS_GRACE,
        }
    }

    /// Override the polling cadence (tests)
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long a pid-less lock directory is left alone
    #[must_use]
    pub fn with_pidless_grace(mut self, grace: Duration) -> Self {
        self.pidless_grace = grace;
        self
    }

    /// Where the lock lives
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Acquire the lock, waiting up to `timeout` for a live holder
    ///
    /// # Errors
    ///
    /// `LockTimeout` if a live process still holds the lock after `timeout`.
    #[tracing::instrument(skip(self), fields(lock = %self.lock_dir.display()))]
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        if let Some(parent) = self.lock_dir.parent() {
            mentat_config::dirs::ensure_private_dir(parent)?;
        }

        let started = Instant::now();
        let pid = self.probe.current_pid();

        loop {
            match self.try_create(pid) {
                Ok(guard) => {
                    debug!(pid, "Sync lock acquired");
                    return Ok(guard);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let holder = self.holder();
            if self.is_stale(holder) {
                info!(holder = ?holder, "Reclaiming stale sync lock");
                self.reclaim(holder)?;
                continue;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::LockTimeout {
                    holder: holder.unwrap_or_default(),
                    waited,
                });
            }
            thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Pid recorded in the lock, if the lock exists and is readable
    pub fn holder(&self) -> Option<u32> {
        read_pid(&self.lock_dir)
    }

    /// Whether a lock exists that no live process owns
    pub fn has_stale_lock(&self) -> bool {
        self.lock_dir.exists() && self.is_stale(self.holder())
    }

    /// Remove the lock if it is stale; returns whether anything was removed
    pub fn clear_stale(&self) -> Result<bool> {
        if !self.has_stale_lock() {
            return Ok(false);
        }
        self.reclaim(self.holder())?;
        Ok(true)
    }

    fn try_create(&self, pid: u32) -> io::Result<LockGuard> {
        fs::create_dir(&self.lock_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.lock_dir, fs::Permissions::from_mode(0o700))?;
        }

        if let Err(e) = fs::write(self.lock_dir.join(PID_FILE), pid.to_string()) {
            let _ = fs::remove_dir_all(&self.lock_dir);
            return Err(e);
        }

        Ok(LockGuard {
            lock_dir: self.lock_dir.clone(),
            released: false,
        })
    }

    fn is_stale(&self, holder: Option<u32>) -> bool {
        match holder {
            Some(pid) => !self.probe.is_alive(pid),
            None => fs::metadata(&self.lock_dir)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age >= self.pidless_grace),
        }
    }

    /// Move the stale lock aside before deleting it, so two reclaimers
    /// cannot both delete and one of them wipe a freshly created lock
    fn reclaim(&self, expected_holder: Option<u32>) -> Result<()> {
        let tombstone = self.lock_dir.with_extension(format!(
            "stale-{}-{}",
            self.probe.current_pid(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        match fs::rename(&self.lock_dir, &tombstone) {
            Ok(()) => {}
            // Someone else reclaimed it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if read_pid(&tombstone) != expected_holder {
            // Raced with a new owner; hand their lock back
            warn!("Sync lock changed hands during reclaim");
            if fs::rename(&tombstone, &self.lock_dir).is_ok() {
                return Ok(());
            }
        }

        fs::remove_dir_all(&tombstone)?;
        Ok(())
    }
}

fn read_pid(lock_dir: &Path) -> Option<u32> {
    fs::read_to_string(lock_dir.join(PID_FILE))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Held sync lock; released on drop
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock_dir: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Lock directory this guard owns
    pub fn path(&self) -> &Path {
        &self.lock_dir
    }

    /// Release explicitly, surfacing removal errors
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_dir_all(&self.lock_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_dir_all(&self.lock_dir)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(error = %e, "Failed to release sync lock");
            }
        }
    }
}

/// Remove the lock if (and only if) `pid` owns it
pub fn release_if_owned(lock_dir: &Path, pid: u32) -> bool {
    read_pid(lock_dir) == Some(pid) && fs::remove_dir_all(lock_dir).is_ok()
}

/// Release the lock held by this process when a terminating signal
/// arrives, then exit with `128 + signal`
///
/// Drop-based release does not run on SIGINT/SIGTERM/SIGHUP, so this
/// covers the remaining exit path. Install once per process.
#[cfg(unix)]
pub fn install_signal_cleanup(lock_dir: PathBuf) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let pid = std::process::id();

    thread::Builder::new()
        .name("signal-cleanup".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                if release_if_owned(&lock_dir, pid) {
                    warn!(signal, "Interrupted; sync lock released");
                }
                std::process::exit(128 + signal);
            }
        })?;
    Ok(())
}

/// No-op where termination signals are not available
#[cfg(not(unix))]
pub fn install_signal_cleanup(_lock_dir: PathBuf) -> Result<()> {
    Ok(())
}
