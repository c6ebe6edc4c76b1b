//! Persistent engine state
//!
//! Journals, the advisory health status and the link manifest are reached
//! through the [`StateStore`] trait and never through ambient file access.
//! [`FileStateStore`] is the on-disk backend rooted at the state directory;
//! [`MemoryStateStore`] backs tests.

use crate::error::Result;
use crate::health::HealthStatus;
use mentat_config::StatePaths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Append-only operational journals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Journal {
    /// `sync.log`
    Sync,
    /// `health.log`
    Health,
    /// `conflicts.log`
    Conflicts,
    /// `force-pull.log`
    ForcePull,
}

impl Journal {
    /// File name inside the state directory
    pub const fn file_name(self) -> &'static str {
        match self {
            Journal::Sync => "sync.log",
            Journal::Health => "health.log",
            Journal::Conflicts => "conflicts.log",
            Journal::ForcePull => "force-pull.log",
        }
    }
}

/// Severity of a journal line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Normal progress
    Info,
    /// Degraded but continuing
    Warn,
    /// Failed
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

/// Every link the symlink manager created: link path -> repository target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkManifest {
    /// Link path to repository file
    pub links: BTreeMap<PathBuf, PathBuf>,
}

/// Storage for logs, health status and the link manifest
pub trait StateStore: Send + Sync {
    /// Append one raw line to a journal
    fn append(&self, journal: Journal, line: &str) -> Result<()>;

    /// All lines of a journal, oldest first
    fn read_journal(&self, journal: Journal) -> Result<Vec<String>>;

    /// Overwrite the advisory health status
    fn write_health_status(&self, status: &HealthStatus) -> Result<()>;

    /// Last written health status, if any
    fn read_health_status(&self) -> Result<Option<HealthStatus>>;

    /// Links recorded by the symlink manager
    fn load_link_manifest(&self) -> Result<LinkManifest>;

    /// Replace the recorded links
    fn save_link_manifest(&self, manifest: &LinkManifest) -> Result<()>;

    /// Append a timestamped `[time] [LEVEL] message` line
    ///
    /// Journal failures are reported through tracing and otherwise ignored;
    /// a full disk must not turn a successful sync into a failed one.
    fn record(&self, journal: Journal, level: Level, message: &str) {
        let line = format!("[{}] [{level}] {message}", timestamp());
        if let Err(e) = self.append(journal, &line) {
            tracing::warn!(journal = journal.file_name(), error = %e, "Failed to write journal");
        }
    }
}

/// Local wall-clock timestamp used in journal lines
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse the timestamp and message out of a journal line
pub fn parse_journal_line(line: &str) -> Option<(chrono::NaiveDateTime, Level, &str)> {
    let rest = line.strip_prefix('[')?;
    let (time, rest) = rest.split_once("] [")?;
    let (level, message) = rest.split_once("] ")?;
    let time = chrono::NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").ok()?;
    let level = match level {
        "INFO" => Level::Info,
        "WARN" => Level::Warn,
        "ERROR" => Level::Error,
        _ => return None,
    };
    Some((time, level, message))
}

/// State store backed by files in the state directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    paths: StatePaths,
}

impl FileStateStore {
    /// Open the store, creating the state directory with private permissions
    pub fn open(paths: StatePaths) -> Result<Self> {
        mentat_config::dirs::ensure_private_dir(paths.root())?;
        Ok(Self { paths })
    }

    /// Paths this store writes to
    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Write via a temporary file and rename, so readers never see half a file
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(self.paths.root())?;
        temp.write_all(content)?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn append(&self, journal: Journal, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.journal(journal.file_name()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_journal(&self, journal: Journal) -> Result<Vec<String>> {
        match fs::read_to_string(self.paths.journal(journal.file_name())) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_health_status(&self, status: &HealthStatus) -> Result<()> {
        let content = serde_json::to_vec_pretty(status)?;
        self.write_atomic(&self.paths.health_status(), &content)
    }

    fn read_health_status(&self) -> Result<Option<HealthStatus>> {
        match fs::read(self.paths.health_status()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_link_manifest(&self) -> Result<LinkManifest> {
        match fs::read(self.paths.link_manifest()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LinkManifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_link_manifest(&self, manifest: &LinkManifest) -> Result<()> {
        let content = serde_json::to_vec_pretty(manifest)?;
        self.write_atomic(&self.paths.link_manifest(), &content)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    journals: HashMap<Journal, Vec<String>>,
    health: Option<HealthStatus>,
    manifest: LinkManifest,
}

/// In-memory state store for tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any line of the journal contains `needle`
    pub fn journal_contains(&self, journal: Journal, needle: &str) -> bool {
        self.read_journal(journal)
            .is_ok_and(|lines| lines.iter().any(|line| line.contains(needle)))
    }
}

impl StateStore for MemoryStateStore {
    fn append(&self, journal: Journal, line: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .journals
            .entry(journal)
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read_journal(&self, journal: Journal) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.journals.get(&journal).cloned().unwrap_or_default())
    }

    fn write_health_status(&self, status: &HealthStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.health = Some(status.clone());
        Ok(())
    }

    fn read_health_status(&self) -> Result<Option<HealthStatus>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.health.clone())
    }

    fn load_link_manifest(&self) -> Result<LinkManifest> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.manifest.clone())
    }

    fn save_link_manifest(&self, manifest: &LinkManifest) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.manifest = manifest.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::health::{HealthState, SubScores};
    use tempfile::TempDir;

    fn sample_status() -> HealthStatus {
        HealthStatus {
            timestamp: "2024-05-01T10:00:00+00:00".to_string(),
            overall: 82,
            status: HealthState::Healthy,
            scores: SubScores {
                repository: 100,
                symlinks: 90,
                network: 50,
                disk: 100,
                sync: 70,
            },
        }
    }

    #[test]
    fn test_record_format_round_trips() {
        let store = MemoryStateStore::new();
        store.record(Journal::Sync, Level::Warn, "push failed: rejected");

        let lines = store.read_journal(Journal::Sync).unwrap();
        assert_eq!(lines.len(), 1);
        let (_, level, message) = parse_journal_line(&lines[0]).unwrap();
        assert_eq!(level, Level::Warn);
        assert_eq!(message, "push failed: rejected");
    }

    #[test]
    fn test_parse_rejects_foreign_lines() {
        assert!(parse_journal_line("plain text").is_none());
        assert!(parse_journal_line("[2024-01-01 00:00:00] [DEBUG] x").is_none());
    }

    #[test]
    fn test_file_store_journals_append() {
        let temp = TempDir::new().unwrap();
        let store = FileStateStore::open(StatePaths::new(temp.path().join("state"))).unwrap();

        assert!(store.read_journal(Journal::Health).unwrap().is_empty());
        store.append(Journal::Health, "one").unwrap();
        store.append(Journal::Health, "two").unwrap();

        assert_eq!(store.read_journal(Journal::Health).unwrap(), ["one", "two"]);
        assert!(temp.path().join("state/health.log").exists());
        assert!(store.read_journal(Journal::Sync).unwrap().is_empty());
    }

    #[test]
    fn test_file_store_health_status_shape() {
        let temp = TempDir::new().unwrap();
        let store = FileStateStore::open(StatePaths::new(temp.path())).unwrap();

        assert!(store.read_health_status().unwrap().is_none());
        store.write_health_status(&sample_status()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("health.status")).unwrap())
                .unwrap();
        assert_eq!(raw["overall"], 82);
        assert_eq!(raw["status"], "healthy");
        assert_eq!(raw["scores"]["network"], 50);
        assert!(raw.get("issues").is_none());

        assert_eq!(store.read_health_status().unwrap(), Some(sample_status()));
    }

    #[test]
    fn test_file_store_manifest() {
        let temp = TempDir::new().unwrap();
        let store = FileStateStore::open(StatePaths::new(temp.path())).unwrap();
        assert!(store.load_link_manifest().unwrap().links.is_empty());

        let mut manifest = LinkManifest::default();
        manifest
            .links
            .insert("/home/u/.bashrc".into(), "/home/u/dotfiles/home/.bashrc".into());
        store.save_link_manifest(&manifest).unwrap();

        assert_eq!(store.load_link_manifest().unwrap(), manifest);
    }
}
