//! Timestamped backup directories
//!
//! Every backup lives in its own `backups/<YYYYmmdd-HHMMSS>-<kind>/`
//! directory. Directories are created with `create_dir`, so an existing
//! backup is never reused or overwritten; a numeric suffix disambiguates
//! two backups in the same second.

use crate::error::Result;
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const STAMP_LEN: usize = 15;
const MAX_SAME_SECOND: u32 = 1000;

/// What produced a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// Conflicted file versions saved before resolving
    Conflict,
    /// Full snapshot taken before a force reset
    ForcePull,
    /// Files moved aside to make room for a link
    Symlinks,
}

impl BackupKind {
    fn suffix(self) -> &'static str {
        match self {
            BackupKind::Conflict => "conflict",
            BackupKind::ForcePull => "force-pull",
            BackupKind::Symlinks => "symlinks",
        }
    }
}

/// Create a fresh, uniquely named backup directory
pub fn create_backup_dir(backups_root: &Path, kind: BackupKind) -> Result<PathBuf> {
    fs::create_dir_all(backups_root)?;
    let base = format!("{}-{}", Local::now().format(STAMP_FORMAT), kind.suffix());

    for attempt in 0..MAX_SAME_SECOND {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let dir = backups_root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("too many backups named {base}"),
    )
    .into())
}

/// When a backup directory was created, from its name
pub fn backup_time(dir: &Path) -> Option<NaiveDateTime> {
    let name = dir.file_name()?.to_str()?;
    let stamp = name.get(..STAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}

/// Delete backups older than `retention`; returns how many were removed
///
/// Directories whose names do not carry a timestamp are left alone.
pub fn prune_backups(backups_root: &Path, retention: Duration) -> Result<usize> {
    let entries = match fs::read_dir(backups_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let retention = chrono::Duration::from_std(retention)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    let cutoff = Local::now().naive_local() - retention;
    let mut removed = 0;

    for entry in entries {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if backup_time(&path).is_some_and(|created| created < cutoff) {
            tracing::debug!(backup = %path.display(), "Pruning expired backup");
            fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Move a path into a backup location, copying when a rename cannot cross
/// filesystems
pub fn move_into(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    let meta = fs::symlink_metadata(src)?;
    if meta.is_dir() {
        crate::system::copy_tree(src, dest)?;
    } else if meta.file_type().is_symlink() {
        crate::system::symlink(&fs::read_link(src)?, dest)?;
    } else {
        fs::copy(src, dest)?;
    }
    crate::system::remove_any(src)?;
    Ok(())
}
