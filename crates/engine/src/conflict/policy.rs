//! Strategy selection
//!
//! An ordered list of `(pattern, strategy)` rules with a fallback. The first
//! rule whose pattern matches the file's name wins.

use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How one conflicted file gets resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStrategy {
    /// Base plus local additions plus remote additions, de-duplicated
    Union,
    /// Local plus remote sections missing locally
    Section,
    /// Take the remote side wholesale
    PreferRemote,
    /// Take the local side wholesale
    PreferLocal,
    /// Ask the user
    Interactive,
}

impl MergeStrategy {
    /// Name used on the command line and in the journal
    pub const fn name(self) -> &'static str {
        match self {
            MergeStrategy::Union => "union",
            MergeStrategy::Section => "section",
            MergeStrategy::PreferRemote => "prefer-remote",
            MergeStrategy::PreferLocal => "prefer-local",
            MergeStrategy::Interactive => "interactive",
        }
    }

    /// Parse a strategy argument; `auto` means "use the policy table"
    pub fn parse_override(value: &str) -> Result<Option<Self>> {
        if value.eq_ignore_ascii_case("auto") {
            Ok(None)
        } else {
            value.parse().map(Some)
        }
    }

    /// Whether the strategy merges file contents line by line
    pub fn is_textual(self) -> bool {
        matches!(self, MergeStrategy::Union | MergeStrategy::Section)
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "union" => Ok(MergeStrategy::Union),
            "section" => Ok(MergeStrategy::Section),
            "prefer-remote" | "theirs" | "remote" => Ok(MergeStrategy::PreferRemote),
            "prefer-local" | "ours" | "local" => Ok(MergeStrategy::PreferLocal),
            "interactive" => Ok(MergeStrategy::Interactive),
            other => Err(Error::Core(mentat_core::Error::InvalidConfig(format!(
                "unknown merge strategy '{other}' (expected union, section, prefer-remote, prefer-local, interactive or auto)"
            )))),
        }
    }
}

/// File name predicate for a policy rule
#[derive(Debug, Clone)]
pub enum FilePattern {
    /// Exact file name
    Exact(String),
    /// Glob over the file name
    Glob(glob::Pattern),
    /// Every file
    Any,
}

impl FilePattern {
    /// Match one file name
    pub fn exact(name: &str) -> Self {
        FilePattern::Exact(name.to_string())
    }

    /// Match file names against a glob
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(FilePattern::Glob)
            .map_err(|e| {
                Error::Core(mentat_core::Error::InvalidConfig(format!(
                    "invalid pattern '{pattern}': {e}"
                )))
            })
    }

    /// Whether the file name of `path` matches
    pub fn matches(&self, path: &str) -> bool {
        let name = Path::new(path)
            .file_name()
            .map_or_else(|| path.into(), |n| n.to_string_lossy());
        match self {
            FilePattern::Exact(exact) => name == exact.as_str(),
            FilePattern::Glob(pattern) => pattern.matches(&name),
            FilePattern::Any => true,
        }
    }
}

/// Ordered rules with a fallback strategy
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<(FilePattern, MergeStrategy)>,
    fallback: MergeStrategy,
}

const UNION_FILES: &[&str] = &[
    ".bashrc",
    ".zshrc",
    ".bash_profile",
    ".profile",
    ".zprofile",
    ".aliases",
    ".bash_aliases",
    ".zshenv",
];
const SECTION_FILES: &[&str] = &[".gitconfig", ".tmux.conf", ".npmrc", ".editorconfig"];
const REMOTE_GLOBS: &[&str] = &["*.json", "*.lock", "*.yml", "*.yaml"];
const LOCAL_GLOBS: &[&str] = &["*.local", "*.private"];

impl PolicyTable {
    /// Empty table resolving everything with `fallback`
    pub fn new(fallback: MergeStrategy) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule; earlier rules win
    #[must_use]
    pub fn rule(mut self, pattern: FilePattern, strategy: MergeStrategy) -> Self {
        self.rules.push((pattern, strategy));
        self
    }

    /// Strategy of the first matching rule, else the fallback
    pub fn strategy_for(&self, path: &str) -> MergeStrategy {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map_or(self.fallback, |(_, strategy)| *strategy)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut table = PolicyTable::new(MergeStrategy::Interactive);
        for name in UNION_FILES {
            table = table.rule(FilePattern::exact(name), MergeStrategy::Union);
        }
        for name in SECTION_FILES {
            table = table.rule(FilePattern::exact(name), MergeStrategy::Section);
        }
        for (globs, strategy) in [
            (REMOTE_GLOBS, MergeStrategy::PreferRemote),
            (LOCAL_GLOBS, MergeStrategy::PreferLocal),
        ] {
            for glob in globs {
                // The built-in globs are valid patterns
                if let Ok(pattern) = FilePattern::glob(glob) {
                    table = table.rule(pattern, strategy);
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_default_table() {
        let table = PolicyTable::default();
        assert_eq!(table.strategy_for(".bashrc"), MergeStrategy::Union);
        assert_eq!(table.strategy_for("home/.zshrc"), MergeStrategy::Union);
        assert_eq!(table.strategy_for("home/.gitconfig"), MergeStrategy::Section);
        assert_eq!(
            table.strategy_for("home/.config/app/settings.json"),
            MergeStrategy::PreferRemote
        );
        assert_eq!(table.strategy_for("Cargo.lock"), MergeStrategy::PreferRemote);
        assert_eq!(table.strategy_for("home/.env.local"), MergeStrategy::PreferLocal);
        assert_eq!(table.strategy_for("home/.vimrc"), MergeStrategy::Interactive);
    }

    #[test]
    fn test_first_match_wins() {
        let table = PolicyTable::new(MergeStrategy::Interactive)
            .rule(FilePattern::exact("special.json"), MergeStrategy::PreferLocal)
            .rule(FilePattern::glob("*.json").unwrap(), MergeStrategy::PreferRemote);
        assert_eq!(table.strategy_for("special.json"), MergeStrategy::PreferLocal);
        assert_eq!(table.strategy_for("other.json"), MergeStrategy::PreferRemote);
        assert_eq!(
            PolicyTable::new(MergeStrategy::Union)
                .rule(FilePattern::Any, MergeStrategy::PreferRemote)
                .strategy_for("x"),
            MergeStrategy::PreferRemote
        );
    }

    #[test]
    fn test_strategy_names_and_aliases() {
        assert_eq!("theirs".parse::<MergeStrategy>().unwrap(), MergeStrategy::PreferRemote);
        assert_eq!("ours".parse::<MergeStrategy>().unwrap(), MergeStrategy::PreferLocal);
        assert_eq!("Union".parse::<MergeStrategy>().unwrap(), MergeStrategy::Union);
        assert!("magic".parse::<MergeStrategy>().is_err());

        assert_eq!(MergeStrategy::parse_override("auto").unwrap(), None);
        assert_eq!(
            MergeStrategy::parse_override("section").unwrap(),
            Some(MergeStrategy::Section)
        );
        for strategy in [
            MergeStrategy::Union,
            MergeStrategy::Section,
            MergeStrategy::PreferRemote,
            MergeStrategy::PreferLocal,
            MergeStrategy::Interactive,
        ] {
            assert_eq!(strategy.name().parse::<MergeStrategy>().unwrap(), strategy);
        }
    }
}
