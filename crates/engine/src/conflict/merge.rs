//! Line-oriented merges for text conflicts

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[[^\[\]]+\]\s*$").expect("valid regex"));

/// Whether content looks binary (contains a NUL byte)
pub fn is_binary(content: &[u8]) -> bool {
    content.contains(&0)
}

fn join(lines: &[&str], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    out
}

fn ends_with_newline(parts: &[&str]) -> bool {
    parts.iter().any(|p| p.ends_with('\n')) || parts.iter().all(|p| p.is_empty())
}

/// Base lines, then lines added locally, then lines added remotely
///
/// Deletions on either side are ignored: the union is for append-mostly
/// files such as shell rc files. An added line already present in the
/// result is not repeated.
pub fn line_union(base: &str, local: &str, remote: &str) -> String {
    let base_lines: Vec<&str> = base.lines().collect();
    let mut seen: HashSet<&str> = base_lines.iter().copied().collect();
    let mut merged = base_lines;

    for side in [local, remote] {
        for line in side.lines() {
            if seen.insert(line) {
                merged.push(line);
            }
        }
    }
    join(&merged, ends_with_newline(&[base, local, remote]))
}

struct Section<'a> {
    header: Option<&'a str>,
    lines: Vec<&'a str>,
}

impl Section<'_> {
    fn key(&self) -> Option<String> {
        self.header.map(normalize_header)
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split into a headerless preamble followed by `[header]` sections
fn sections(content: &str) -> Vec<Section<'_>> {
    let mut out = vec![Section {
        header: None,
        lines: Vec::new(),
    }];
    for line in content.lines() {
        if SECTION_HEADER.is_match(line) {
            out.push(Section {
                header: Some(line),
                lines: Vec::new(),
            });
        } else if let Some(current) = out.last_mut() {
            current.lines.push(line);
        }
    }
    out
}

/// Local content plus every remote section local does not have
///
/// A remote section counts as present when local has a section with the
/// same header (compared case- and whitespace-insensitively) or the same
/// header line verbatim. Returns `None` when neither side has section
/// headers; the caller falls back to [`line_union`].
pub fn section_aware(local: &str, remote: &str) -> Option<String> {
    let local_sections = sections(local);
    let remote_sections = sections(remote);
    if local_sections.len() == 1 && remote_sections.len() == 1 {
        return None;
    }

    let local_keys: HashSet<String> = local_sections.iter().filter_map(Section::key).collect();
    let local_headers: HashSet<&str> = local_sections
        .iter()
        .filter_map(|s| s.header.map(str::trim))
        .collect();

    let mut merged: Vec<&str> = local.lines().collect();
    for section in remote_sections.iter().skip(1) {
        let (Some(header), Some(key)) = (section.header, section.key()) else {
            continue;
        };
        if local_keys.contains(&key) || local_headers.contains(header.trim()) {
            continue;
        }
        if merged.last().is_some_and(|last| !last.trim().is_empty()) {
            merged.push("");
        }
        merged.push(header);
        let body_end = section
            .lines
            .iter()
            .rposition(|line| !line.trim().is_empty())
            .map_or(0, |i| i + 1);
        merged.extend(&section.lines[..body_end]);
    }
    Some(join(&merged, ends_with_newline(&[local, remote])))
}
