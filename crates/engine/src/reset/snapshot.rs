//! Pre-reset snapshots and restore
//!
//! Layout of a snapshot directory:
//!
//! ```text
//! <timestamp>-force-pull/
//!   repository/             full copy of the checkout, .git included
//!   symlinks/<rel>.target   where each managed link pointed
//!   symlinks/<rel>.backup   what the link resolved to, when readable
//!   manifest.json
//! ```

use crate::backup::{self, BackupKind};
use crate::error::{Error, Result};
use crate::state::LinkManifest;
use crate::system;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name of the manifest inside a snapshot
pub const MANIFEST_FILE: &str = "manifest.json";
const REPOSITORY_DIR: &str = "repository";
const SYMLINKS_DIR: &str = "symlinks";
const TARGET_SUFFIX: &str = ".target";
const CONTENT_SUFFIX: &str = ".backup";

/// Describes what a snapshot holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// RFC 3339 creation time
    pub created: String,
    /// HEAD when the snapshot was taken
    pub head: Option<String>,
    /// Branch being synced
    pub branch: String,
    /// Checkout the snapshot was taken of
    pub repository: PathBuf,
    /// Directory the links live in
    pub target_root: PathBuf,
    /// Links recorded
    pub links: usize,
}

impl SnapshotManifest {
    /// Read the manifest of a snapshot directory
    pub fn load(snapshot: &Path) -> Result<Self> {
        let path = snapshot.join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("{} is not a force-pull backup: {e}", snapshot.display()),
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Relative location for a link inside `symlinks/`
fn link_key(link: &Path, target_root: &Path) -> PathBuf {
    match link.strip_prefix(target_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => link.components().skip(1).collect(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy the repository and record every managed link into `dir`
pub fn take(
    dir: &Path,
    repo: &Path,
    target_root: &Path,
    head: Option<String>,
    branch: &str,
    links: &LinkManifest,
) -> Result<SnapshotManifest> {
    let copied = system::copy_tree(repo, &dir.join(REPOSITORY_DIR))?;
    debug!(files = copied, "Repository copied");

    let symlinks_dir = dir.join(SYMLINKS_DIR);
    fs::create_dir_all(&symlinks_dir)?;
    let mut recorded = 0;

    for link in links.links.keys() {
        let Ok(target) = fs::read_link(link) else {
            continue;
        };
        let entry = symlinks_dir.join(link_key(link, target_root));
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            with_suffix(&entry, TARGET_SUFFIX),
            target.to_string_lossy().as_bytes(),
        )?;
        if let Ok(content) = fs::read(link) {
            fs::write(with_suffix(&entry, CONTENT_SUFFIX), content)?;
        }
        recorded += 1;
    }

    let manifest = SnapshotManifest {
        created: chrono::Utc::now().to_rfc3339(),
        head,
        branch: branch.to_string(),
        repository: repo.to_path_buf(),
        target_root: target_root.to_path_buf(),
        links: recorded,
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
    info!(backup = %dir.display(), links = recorded, "Snapshot written");
    Ok(manifest)
}

/// Link path -> recorded target for every `.target` file in a snapshot
pub fn recorded_links(dir: &Path, target_root: &Path) -> Result<LinkManifest> {
    let symlinks_dir = dir.join(SYMLINKS_DIR);
    let mut manifest = LinkManifest::default();
    if !symlinks_dir.is_dir() {
        return Ok(manifest);
    }

    for entry in WalkDir::new(&symlinks_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.to_str().and_then(|p| p.strip_suffix(TARGET_SUFFIX)) else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = Path::new(name)
            .strip_prefix(&symlinks_dir)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = fs::read_to_string(path)?;
        manifest
            .links
            .insert(target_root.join(rel), PathBuf::from(target.trim_end_matches('\n')));
    }
    Ok(manifest)
}

/// Replace the repository with the snapshot's copy
///
/// The copy is staged next to the repository first so a failed copy never
/// leaves the user without a checkout.
pub fn restore_repository(dir: &Path, repo: &Path) -> Result<()> {
    let source = dir.join(REPOSITORY_DIR);
    if !source.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} has no repository copy", dir.display()),
        )));
    }

    let staging = with_suffix(repo, ".restoring");
    if staging.exists() {
        system::remove_any(&staging)?;
    }
    system::copy_tree(&source, &staging)?;
    if fs::symlink_metadata(repo).is_ok() {
        system::remove_any(repo)?;
    }
    fs::rename(&staging, repo)?;
    Ok(())
}

/// Outcome of [`restore_links`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRestore {
    /// Links pointing at their recorded target afterwards
    pub restored: usize,
    /// Occupants moved aside to make room
    pub backed_up: Vec<PathBuf>,
    /// Set only when something had to be backed up
    pub backup_dir: Option<PathBuf>,
}

/// Point every recorded link back at its recorded target
///
/// Anything else occupying a link location is moved into a fresh
/// `-symlinks` backup under `backups_root` first.
pub fn restore_links(
    links: &LinkManifest,
    target_root: &Path,
    backups_root: &Path,
) -> Result<LinkRestore> {
    let mut outcome = LinkRestore::default();
    for (link, target) in &links.links {
        if fs::read_link(link).is_ok_and(|current| &current == target) {
            outcome.restored += 1;
            continue;
        }
        if fs::symlink_metadata(link).is_ok() {
            let backup_dir = match &outcome.backup_dir {
                Some(dir) => dir.clone(),
                None => {
                    let dir = backup::create_backup_dir(backups_root, BackupKind::Symlinks)?;
                    outcome.backup_dir = Some(dir.clone());
                    dir
                }
            };
            let dest = backup_dir.join(link_key(link, target_root));
            info!(link = %link.display(), backup = %dest.display(), "Backing up existing file");
            backup::move_into(link, &dest)?;
            outcome.backed_up.push(link.clone());
        }
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        system::symlink(target, link)?;
        outcome.restored += 1;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_and_restore_links() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let home = temp.path().join("home");
        fs::create_dir_all(repo.join("home/.config")).unwrap();
        fs::create_dir_all(home.join(".config")).unwrap();
        fs::write(repo.join("home/.bashrc"), "rc").unwrap();
        fs::write(repo.join("home/.config/app"), "app").unwrap();

        let mut links = LinkManifest::default();
        for rel in [".bashrc", ".config/app"] {
            let link = home.join(rel);
            let target = repo.join("home").join(rel);
            system::symlink(&target, &link).unwrap();
            links.links.insert(link, target);
        }

        let dir = temp.path().join("backup");
        fs::create_dir(&dir).unwrap();
        let manifest = take(&dir, &repo, &home, Some("abc".into()), "main", &links).unwrap();
        assert_eq!(manifest.links, 2);
        assert_eq!(
            fs::read_to_string(dir.join("symlinks/.config/app.target")).unwrap(),
            repo.join("home/.config/app").to_string_lossy()
        );
        assert_eq!(fs::read_to_string(dir.join("symlinks/.bashrc.backup")).unwrap(), "rc");
        assert_eq!(SnapshotManifest::load(&dir).unwrap(), manifest);

        let recorded = recorded_links(&dir, &home).unwrap();
        assert_eq!(recorded, links);

        // Break the links, then restore them
        fs::remove_file(home.join(".bashrc")).unwrap();
        fs::remove_file(home.join(".config/app")).unwrap();
        fs::write(home.join(".config/app"), "local edits").unwrap();
        let backups = temp.path().join("backups");
        let outcome = restore_links(&recorded, &home, &backups).unwrap();

        assert_eq!(outcome.restored, 2);
        assert_eq!(outcome.backed_up, vec![home.join(".config/app")]);
        assert_eq!(fs::read_link(home.join(".bashrc")).unwrap(), repo.join("home/.bashrc"));
        assert_eq!(fs::read_to_string(home.join(".config/app")).unwrap(), "app");

        let backup_dir = outcome.backup_dir.unwrap();
        assert!(backup_dir.starts_with(&backups));
        assert!(backup_dir.to_string_lossy().ends_with("-symlinks"));
        assert_eq!(
            fs::read_to_string(backup_dir.join(".config/app")).unwrap(),
            "local edits"
        );
    }

    #[test]
    fn test_restore_links_in_place_needs_no_backup() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        fs::create_dir_all(&home).unwrap();
        let target = temp.path().join("rc");
        fs::write(&target, "rc").unwrap();
        system::symlink(&target, &home.join(".bashrc")).unwrap();

        let mut links = LinkManifest::default();
        links.links.insert(home.join(".bashrc"), target);
        let backups = temp.path().join("backups");
        let outcome = restore_links(&links, &home, &backups).unwrap();

        assert_eq!(outcome.restored, 1);
        assert!(outcome.backed_up.is_empty());
        assert!(outcome.backup_dir.is_none());
        assert!(!backups.exists());
    }

    #[test]
    fn test_restore_repository_replaces_checkout() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("file"), "before").unwrap();

        let dir = temp.path().join("backup");
        fs::create_dir(&dir).unwrap();
        take(&dir, &repo, temp.path(), None, "main", &LinkManifest::default()).unwrap();

        fs::write(repo.join("file"), "after").unwrap();
        fs::write(repo.join("extra"), "new").unwrap();
        restore_repository(&dir, &repo).unwrap();

        assert_eq!(fs::read_to_string(repo.join("file")).unwrap(), "before");
        assert!(!repo.join("extra").exists());
        assert!(!temp.path().join("repo.restoring").exists());
    }

    #[test]
    fn test_load_rejects_non_snapshot() {
        let temp = TempDir::new().unwrap();
        assert!(SnapshotManifest::load(temp.path()).is_err());
    }
}
