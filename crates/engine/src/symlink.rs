//! Symlink manager
//!
//! Mirrors every file under the repository's linked subtree (`home/` by
//! default) into the home directory as a symlink. Whatever already occupies
//! a link location is moved into a timestamped backup first. Every link
//! created is recorded in the link manifest so later runs can find links
//! whose repository file has since disappeared.

use crate::backup::{self, BackupKind};
use crate::error::Result;
use crate::state::{Journal, LinkManifest, Level, StateStore};
use crate::system;
use mentat_config::IgnoreMatcher;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where links come from and go to
#[derive(Debug, Clone)]
pub struct SymlinkLayout {
    /// Repository root
    pub repo_root: PathBuf,
    /// Linked subtree inside the repository
    pub source_root: PathBuf,
    /// Directory the subtree is mirrored into (the home directory)
    pub target_root: PathBuf,
    /// Root for timestamped backups
    pub backups_root: PathBuf,
}

/// Outcome of [`SymlinkManager::setup`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Links made by this run
    pub created: Vec<PathBuf>,
    /// Links that were already correct
    pub unchanged: usize,
    /// Occupants moved aside before linking
    pub backed_up: Vec<PathBuf>,
    /// Set only when something had to be backed up
    pub backup_dir: Option<PathBuf>,
    /// Managed links removed because their repository file is gone
    pub pruned: Vec<PathBuf>,
}

impl SetupReport {
    /// Whether the run changed anything on disk
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.backed_up.is_empty() || !self.pruned.is_empty()
    }
}

/// Outcome of [`SymlinkManager::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Managed links checked
    pub total: usize,
    /// Links that resolved without help
    pub healthy: usize,
    /// Links recreated because they pointed at the wrong place
    pub repaired: Vec<PathBuf>,
    /// Links whose recorded target no longer exists
    pub broken: Vec<PathBuf>,
}

/// Read-only snapshot of managed links
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInventory {
    /// Managed links
    pub total: usize,
    /// Links whose target does not resolve
    pub broken: Vec<PathBuf>,
}

/// Builds, checks and repairs the link farm
pub struct SymlinkManager<'a> {
    layout: SymlinkLayout,
    ignores: IgnoreMatcher,
    state: &'a dyn StateStore,
}

enum LinkStatus {
    /// Symlink resolving to a file inside the repository
    Healthy,
    /// Symlink whose target does not resolve
    Dangling,
    /// Symlink resolving somewhere outside the repository
    Foreign,
    /// Something that is not a symlink
    Occupied,
    Missing,
}

impl<'a> SymlinkManager<'a> {
    /// Manager for `layout`, skipping files matched by `ignores`
    pub fn new(layout: SymlinkLayout, ignores: IgnoreMatcher, state: &'a dyn StateStore) -> Self {
        Self {
            layout,
            ignores,
            state,
        }
    }

    /// Where links come from and go to
    pub fn layout(&self) -> &SymlinkLayout {
        &self.layout
    }

    /// Link every non-ignored repository file into the target root
    ///
    /// Idempotent: a second run with nothing changed creates nothing and
    /// backs nothing up.
    #[tracing::instrument(skip(self), fields(source = %self.layout.source_root.display()))]
    pub fn setup(&self) -> Result<SetupReport> {
        let mut report = SetupReport::default();
        let mut manifest = self.state.load_link_manifest()?;

        for (rel, source) in self.desired_links()? {
            let link = self.layout.target_root.join(&rel);

            if is_link_to(&link, &source) {
                report.unchanged += 1;
                manifest.links.insert(link, source);
                continue;
            }

            if fs::symlink_metadata(&link).is_ok() {
                let backup_dir = match &report.backup_dir {
                    Some(dir) => dir.clone(),
                    None => {
                        let dir =
                            backup::create_backup_dir(&self.layout.backups_root, BackupKind::Symlinks)?;
                        report.backup_dir = Some(dir.clone());
                        dir
                    }
                };
                let dest = backup_dir.join(&rel);
                info!(link = %link.display(), backup = %dest.display(), "Backing up existing file");
                backup::move_into(&link, &dest)?;
                report.backed_up.push(link.clone());
            }

            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            system::symlink(&source, &link)?;
            debug!(link = %link.display(), "Linked");
            report.created.push(link.clone());
            manifest.links.insert(link, source);
        }

        report.pruned = self.prune_removed(&mut manifest);
        self.state.save_link_manifest(&manifest)?;

        if report.changed() {
            self.state.record(
                Journal::Sync,
                Level::Info,
                &format!(
                    "symlinks setup: {} created, {} unchanged, {} backed up, {} pruned",
                    report.created.len(),
                    report.unchanged,
                    report.backed_up.len(),
                    report.pruned.len()
                ),
            );
        }
        Ok(report)
    }

    /// Check every managed link and recreate the ones that can be
    #[tracing::instrument(skip(self))]
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut manifest = self.managed_links()?;
        let mut report = VerifyReport::default();
        let mut released = Vec::new();

        for (link, target) in &manifest.links {
            report.total += 1;
            match self.status(link) {
                LinkStatus::Healthy => report.healthy += 1,
                LinkStatus::Occupied => {
                    // The user replaced the link with a real file
                    debug!(link = %link.display(), "No longer managed");
                    released.push(link.clone());
                    report.total -= 1;
                }
                LinkStatus::Dangling | LinkStatus::Foreign | LinkStatus::Missing => {
                    if target.exists() {
                        system::remove_any(link)?;
                        if let Some(parent) = link.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        system::symlink(target, link)?;
                        info!(link = %link.display(), "Repaired symlink");
                        report.repaired.push(link.clone());
                    } else {
                        warn!(link = %link.display(), "Broken symlink");
                        report.broken.push(link.clone());
                    }
                }
            }
        }

        for link in released {
            manifest.links.remove(&link);
        }
        self.state.save_link_manifest(&manifest)?;

        if !report.repaired.is_empty() || !report.broken.is_empty() {
            self.state.record(
                Journal::Sync,
                if report.broken.is_empty() {
                    Level::Info
                } else {
                    Level::Warn
                },
                &format!(
                    "symlinks verify: {} total, {} repaired, {} broken",
                    report.total,
                    report.repaired.len(),
                    report.broken.len()
                ),
            );
        }
        Ok(report)
    }

    /// `verify` followed by `setup`
    pub fn repair(&self) -> Result<(VerifyReport, SetupReport)> {
        let verified = self.verify()?;
        let setup = self.setup()?;
        Ok((verified, setup))
    }

    /// Count managed links and the broken ones without touching anything
    pub fn inventory(&self) -> Result<LinkInventory> {
        let manifest = self.managed_links()?;
        let mut inventory = LinkInventory::default();

        for link in manifest.links.keys() {
            match self.status(link) {
                LinkStatus::Occupied => {}
                LinkStatus::Healthy => inventory.total += 1,
                _ => {
                    inventory.total += 1;
                    inventory.broken.push(link.clone());
                }
            }
        }
        Ok(inventory)
    }

    /// Manifest entries plus any link in the target root that already
    /// points at a repository file
    pub fn managed_links(&self) -> Result<LinkManifest> {
        let mut manifest = self.state.load_link_manifest()?;
        for (rel, source) in self.desired_links()? {
            let link = self.layout.target_root.join(rel);
            if is_link_to(&link, &source) {
                manifest.links.insert(link, source);
            }
        }
        Ok(manifest)
    }

    /// Remove every managed symlink and clear the manifest
    ///
    /// Only symlinks are removed; a real file at a managed path is left.
    pub fn remove_all(&self) -> Result<usize> {
        let manifest = self.managed_links()?;
        let mut removed = 0;

        for link in manifest.links.keys() {
            if fs::symlink_metadata(link).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(link)?;
                removed += 1;
            }
        }

        self.state.save_link_manifest(&LinkManifest::default())?;
        Ok(removed)
    }

    /// Relative path and absolute source of every file that should be linked
    fn desired_links(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let source_root = &self.layout.source_root;
        if !source_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut links = Vec::new();
        let walker = WalkDir::new(source_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .path()
                    .strip_prefix(source_root)
                    .map_or(true, |rel| !self.ignores.is_ignored(rel))
            });

        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source_root)
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .to_path_buf();
            links.push((rel, entry.path().to_path_buf()));
        }
        Ok(links)
    }

    /// Drop manifest links whose repository file no longer exists
    fn prune_removed(&self, manifest: &mut LinkManifest) -> Vec<PathBuf> {
        let gone: Vec<PathBuf> = manifest
            .links
            .iter()
            .filter(|(link, target)| {
                target.starts_with(&self.layout.source_root)
                    && fs::symlink_metadata(target).is_err()
                    && is_link_to(link, target)
            })
            .map(|(link, _)| link.clone())
            .collect();

        for link in &gone {
            if let Err(e) = fs::remove_file(link) {
                warn!(link = %link.display(), error = %e, "Failed to remove stale link");
            }
            manifest.links.remove(link);
        }
        gone
    }

    fn status(&self, link: &Path) -> LinkStatus {
        let Ok(meta) = fs::symlink_metadata(link) else {
            return LinkStatus::Missing;
        };
        if !meta.file_type().is_symlink() {
            return LinkStatus::Occupied;
        }
        let Ok(resolved) = fs::canonicalize(link) else {
            return LinkStatus::Dangling;
        };
        let repo = fs::canonicalize(&self.layout.repo_root)
            .unwrap_or_else(|_| self.layout.repo_root.clone());
        if resolved.starts_with(repo) {
            LinkStatus::Healthy
        } else {
            LinkStatus::Foreign
        }
    }
}

/// Whether `link` is a symlink whose literal target is `source`
fn is_link_to(link: &Path, source: &Path) -> bool {
    fs::read_link(link).is_ok_and(|target| target == source)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::state::MemoryStateStore;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        layout: SymlinkLayout,
        state: MemoryStateStore,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let repo = temp.path().join("dotfiles");
            let layout = SymlinkLayout {
                source_root: repo.join("home"),
                repo_root: repo,
                target_root: temp.path().join("home"),
                backups_root: temp.path().join("state/backups"),
            };
            fs::create_dir_all(layout.source_root.join(".config/git")).unwrap();
            fs::create_dir_all(&layout.target_root).unwrap();
            fs::write(layout.source_root.join(".bashrc"), "export A=1\n").unwrap();
            fs::write(layout.source_root.join(".config/git/config"), "[user]\n").unwrap();
            Self {
                _temp: temp,
                layout,
                state: MemoryStateStore::new(),
            }
        }

        fn manager(&self) -> SymlinkManager<'_> {
            SymlinkManager::new(
                self.layout.clone(),
                IgnoreMatcher::new(["*.md"]),
                &self.state,
            )
        }

        fn target(&self, rel: &str) -> PathBuf {
            self.layout.target_root.join(rel)
        }

        fn source(&self, rel: &str) -> PathBuf {
            self.layout.source_root.join(rel)
        }
    }

    #[test]
    fn test_setup_creates_links_and_is_idempotent() {
        let fx = Fixture::new();
        fs::write(fx.source("README.md"), "docs").unwrap();

        let first = fx.manager().setup().unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(first.backup_dir.is_none());
        assert_eq!(fs::read_link(fx.target(".bashrc")).unwrap(), fx.source(".bashrc"));
        assert_eq!(
            fs::read_link(fx.target(".config/git/config")).unwrap(),
            fx.source(".config/git/config")
        );
        assert!(fs::symlink_metadata(fx.target("README.md")).is_err());

        let second = fx.manager().setup().unwrap();
        assert!(!second.changed());
        assert_eq!(second.unchanged, 2);
        assert!(second.backup_dir.is_none());
        assert!(!fx.layout.backups_root.exists());
    }

    #[test]
    fn test_setup_backs_up_occupants() {
        let fx = Fixture::new();
        fs::write(fx.target(".bashrc"), "old local rc").unwrap();

        let report = fx.manager().setup().unwrap();

        let backup_dir = report.backup_dir.unwrap();
        assert_eq!(report.backed_up, vec![fx.target(".bashrc")]);
        assert_eq!(
            fs::read_to_string(backup_dir.join(".bashrc")).unwrap(),
            "old local rc"
        );
        assert_eq!(fs::read_link(fx.target(".bashrc")).unwrap(), fx.source(".bashrc"));
    }

    #[test]
    fn test_verify_repairs_recoverable_and_flags_broken() {
        let fx = Fixture::new();
        fx.manager().setup().unwrap();

        // Recoverable: link deleted, repository file still there
        fs::remove_file(fx.target(".bashrc")).unwrap();
        // Unrecoverable: repository file deleted
        fs::remove_file(fx.source(".config/git/config")).unwrap();

        let report = fx.manager().verify().unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.repaired, vec![fx.target(".bashrc")]);
        assert_eq!(report.broken, vec![fx.target(".config/git/config")]);
        assert!(fx.target(".bashrc").exists());
        assert!(fx.state.journal_contains(Journal::Sync, "1 broken"));

        let inventory = fx.manager().inventory().unwrap();
        assert_eq!(inventory.total, 2);
        assert_eq!(inventory.broken.len(), 1);
    }

    #[test]
    fn test_repair_prunes_links_to_removed_files() {
        let fx = Fixture::new();
        fx.manager().setup().unwrap();
        fs::remove_file(fx.source(".config/git/config")).unwrap();

        let (verified, setup) = fx.manager().repair().unwrap();
        assert_eq!(verified.broken.len(), 1);
        assert_eq!(setup.pruned, vec![fx.target(".config/git/config")]);
        assert!(fs::symlink_metadata(fx.target(".config/git/config")).is_err());

        let inventory = fx.manager().inventory().unwrap();
        assert_eq!(inventory.total, 1);
        assert!(inventory.broken.is_empty());
    }

    #[test]
    fn test_user_replaced_link_is_released() {
        let fx = Fixture::new();
        fx.manager().setup().unwrap();
        fs::remove_file(fx.target(".bashrc")).unwrap();
        fs::write(fx.target(".bashrc"), "mine now").unwrap();

        let report = fx.manager().verify().unwrap();
        assert_eq!(report.total, 1);
        assert!(report.broken.is_empty());
        assert_eq!(fs::read_to_string(fx.target(".bashrc")).unwrap(), "mine now");
    }

    #[test]
    fn test_remove_all_only_removes_links() {
        let fx = Fixture::new();
        fx.manager().setup().unwrap();

        let removed = fx.manager().remove_all().unwrap();
        assert_eq!(removed, 2);
        assert!(fs::symlink_metadata(fx.target(".bashrc")).is_err());
        assert!(fx.source(".bashrc").exists());
        assert!(fx.state.load_link_manifest().unwrap().links.is_empty());
    }
}
