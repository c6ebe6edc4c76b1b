//! Ignore matcher for the linked subtree
//!
//! Patterns are evaluated in order and the last match wins, so a later
//! `!pattern` re-includes something an earlier pattern excluded:
//!
//! ```json
//! { "global": [".config/*", "!.config/nvim/"], "darwin": [".Trash/"] }
//! ```

use crate::config::IgnoreSettings;
use mentat_core::platform::CURRENT_PLATFORM;
use std::path::Path;

/// Entries never linked regardless of configuration
const BUILTIN_IGNORES: &[&str] = &[".git", ".DS_Store", "*.swp", "*~"];

#[derive(Debug, Clone)]
enum Rule {
    /// Matching paths are ignored
    Ignore(String),
    /// Matching paths are re-included (`!` prefix)
    Keep(String),
}

/// Ignore matcher with negation support
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    rules: Vec<Rule>,
}

impl IgnoreMatcher {
    /// Build from raw patterns, after the built-in ones
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules = BUILTIN_IGNORES
            .iter()
            .map(|p| (*p).to_string())
            .chain(patterns.into_iter().map(Into::into))
            .map(|pattern| match pattern.strip_prefix('!') {
                Some(kept) => Rule::Keep(kept.to_string()),
                None => Rule::Ignore(pattern),
            })
            .collect();
        Self { rules }
    }

    /// Global patterns followed by the ones for the running platform
    pub fn from_settings(settings: &IgnoreSettings) -> Self {
        let platform = CURRENT_PLATFORM
            .select(&settings.darwin, &settings.linux, &settings.windows)
            .cloned()
            .unwrap_or_default();
        Self::new(settings.global.iter().cloned().chain(platform))
    }

    /// Whether a path relative to the linked subtree is ignored
    pub fn is_ignored(&self, rel_path: &Path) -> bool {
        let path = rel_path.to_string_lossy().replace('\\', "/");

        self.rules.iter().fold(false, |ignored, rule| match rule {
            Rule::Ignore(pattern) if matches(&path, pattern) => true,
            Rule::Keep(pattern) if matches(&path, pattern) => false,
            _ => ignored,
        })
    }
}

/// Match one pattern against a slash-separated relative path
///
/// - `dir/` matches everything below `dir`
/// - a bare name without wildcards matches any path component
/// - wildcard patterns are globbed against the full path and, when they
///   contain no `/`, against each component
fn matches(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }

    if let Some(dir) = pattern.strip_suffix('/') {
        return path == dir || path.starts_with(pattern);
    }

    let has_wildcard = pattern.contains(['*', '?', '[']);
    if !has_wildcard {
        return if pattern.contains('/') {
            path.starts_with(&format!("{pattern}/"))
        } else {
            path.split('/').any(|component| component == pattern)
        };
    }

    let Ok(glob) = glob::Pattern::new(pattern) else {
        tracing::warn!(pattern, "Invalid ignore pattern");
        return false;
    };

    if glob.matches(path) {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*")
        && path.starts_with(&format!("{prefix}/"))
    {
        return true;
    }
    !pattern.contains('/') && path.split('/').any(|component| glob.matches(component))
}
