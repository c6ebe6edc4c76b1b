//! Machine registry
//!
//! `<repo>/.machine-registry` lists every machine that has synced, one
//! `<machine-id>:<unix-timestamp>` line each. The file is tracked like any
//! other so every machine sees every other machine's last sync.

use crate::error::Result;
use mentat_config::dirs::MACHINE_ID_ENV;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name inside the repository root
pub const REGISTRY_FILE: &str = ".machine-registry";

const MAX_ID_LEN: usize = 64;
const FALLBACK_ID: &str = "unknown-host";

/// Reduce a host name to `[a-z0-9._-]`, at most 64 characters
pub fn sanitize_machine_id(raw: &str) -> String {
    let mut id = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '-'
        };
        if c == '-' && id.ends_with('-') {
            continue;
        }
        id.push(c);
    }

    let mut id = id.trim_matches('-').to_string();
    if id.len() > MAX_ID_LEN {
        id.truncate(MAX_ID_LEN);
        id = id.trim_end_matches('-').to_string();
    }
    if id.is_empty() {
        FALLBACK_ID.to_string()
    } else {
        id
    }
}

/// This machine's sanitized identifier
///
/// `MENTAT_MACHINE_ID` overrides the host name.
pub fn machine_id() -> String {
    if let Ok(id) = std::env::var(MACHINE_ID_ENV)
        && !id.trim().is_empty()
    {
        return sanitize_machine_id(&id);
    }
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_machine_id(&host)
}

/// Parsed registry: machine id -> last sync (unix seconds)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineRegistry {
    entries: BTreeMap<String, i64>,
}

impl MachineRegistry {
    /// Parse registry text, skipping blank and malformed lines
    pub fn parse(content: &str) -> Self {
        let mut registry = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = line
                .rsplit_once(':')
                .and_then(|(id, ts)| Some((id.trim(), ts.trim().parse::<i64>().ok()?)));
            match parsed {
                Some((id, ts)) if !id.is_empty() => registry.touch(id, ts),
                _ => debug!(line, "Skipping malformed registry line"),
            }
        }
        registry
    }

    /// Load `<repo>/.machine-registry`; a missing file is an empty registry
    pub fn load(repo: &Path) -> Result<Self> {
        match fs::read_to_string(Self::path(repo)) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Registry file inside a checkout
    pub fn path(repo: &Path) -> PathBuf {
        repo.join(REGISTRY_FILE)
    }

    /// Write the registry into `repo`
    pub fn save(&self, repo: &Path) -> Result<()> {
        fs::write(Self::path(repo), self.render())?;
        Ok(())
    }

    /// Lines sorted by machine id
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(id, ts)| format!("{id}:{ts}\n"))
            .collect()
    }

    /// Record a sync, keeping the later timestamp if one is already present
    pub fn touch(&mut self, id: &str, timestamp: i64) {
        let entry = self.entries.entry(id.to_string()).or_insert(timestamp);
        *entry = (*entry).max(timestamp);
    }

    /// Overwrite this machine's entry
    pub fn set(&mut self, id: &str, timestamp: i64) {
        self.entries.insert(id.to_string(), timestamp);
    }

    /// Last sync time of a machine, in Unix seconds
    pub fn last_seen(&self, id: &str) -> Option<i64> {
        self.entries.get(id).copied()
    }

    /// Number of machines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no machine is recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Machines and their last sync, sorted by id
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(id, ts)| (id.as_str(), *ts))
    }
}

/// Union of two registries keeping the newest timestamp per machine
pub fn merge_registries(a: &MachineRegistry, b: &MachineRegistry) -> MachineRegistry {
    let mut merged = a.clone();
    for (id, ts) in b.iter() {
        merged.touch(id, ts);
    }
    merged
}

/// Rewrite this machine's entry with the current time; returns the timestamp
pub fn record_presence(repo: &Path, id: &str) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let mut registry = MachineRegistry::load(repo)?;
    registry.set(id, now);
    registry.save(repo)?;
    Ok(now)
}
