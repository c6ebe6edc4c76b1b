//! Conflict history analysis over `conflicts.log`

use crate::state::parse_journal_line;
use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::HashMap;

const RESOLVED_PREFIX: &str = "resolved file=";
const STRATEGY_FIELD: &str = " strategy=";

/// Aggregated resolutions inside a time window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictAnalysis {
    /// Days covered
    pub window_days: u32,
    /// Resolutions inside the window
    pub total: usize,
    /// Most conflicted first; ties by name
    pub by_file: Vec<(String, usize)>,
    /// Most used first
    pub by_strategy: Vec<(String, usize)>,
    /// Resolutions per hour of day (local time)
    pub by_hour: [usize; 24],
}

impl ConflictAnalysis {
    /// Hour with the most resolutions, if any
    pub fn busiest_hour(&self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        self.by_hour
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(hour, _)| hour)
    }
}

/// Split `resolved file=<path> strategy=<name>` into its fields
pub fn parse_resolution(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix(RESOLVED_PREFIX)?;
    let (file, strategy) = rest.rsplit_once(STRATEGY_FIELD)?;
    (!file.is_empty() && !strategy.is_empty()).then_some((file, strategy.trim()))
}

/// Aggregate journal lines newer than `now - window_days`
pub fn analyze<S: AsRef<str>>(lines: &[S], window_days: u32, now: NaiveDateTime) -> ConflictAnalysis {
    let cutoff = now - Duration::days(i64::from(window_days));
    let mut files: HashMap<&str, usize> = HashMap::new();
    let mut strategies: HashMap<&str, usize> = HashMap::new();
    let mut analysis = ConflictAnalysis {
        window_days,
        ..Default::default()
    };

    for line in lines {
        let Some((time, _, message)) = parse_journal_line(line.as_ref()) else {
            continue;
        };
        if time < cutoff {
            continue;
        }
        let Some((file, strategy)) = parse_resolution(message) else {
            continue;
        };
        analysis.total += 1;
        *files.entry(file).or_default() += 1;
        *strategies.entry(strategy).or_default() += 1;
        analysis.by_hour[time.hour() as usize] += 1;
    }

    analysis.by_file = ranked(files);
    analysis.by_strategy = ranked(strategies);
    analysis
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    fn at(stamp: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(
            parse_resolution("resolved file=home/.bashrc strategy=union"),
            Some(("home/.bashrc", "union"))
        );
        assert_eq!(
            parse_resolution("resolved file=dir with space/x strategy=prefer-remote"),
            Some(("dir with space/x", "prefer-remote"))
        );
        assert_eq!(parse_resolution("skipped file=x"), None);
    }

    #[test]
    fn test_analyze_window_and_ranking() {
        let lines = [
            "[2024-03-01 09:00:00] [INFO] resolved file=home/.bashrc strategy=union",
            "[2024-03-09 09:30:00] [INFO] resolved file=home/.bashrc strategy=union",
            "[2024-03-09 22:10:00] [INFO] resolved file=home/.gitconfig strategy=section",
            "[2024-03-10 09:05:00] [INFO] resolved file=home/.bashrc strategy=prefer-local",
            "[2024-03-10 09:06:00] [WARN] skipped file=home/.vimrc",
            "not a journal line",
        ];
        let analysis = analyze(&lines, 7, at("2024-03-10 12:00:00"));

        assert_eq!(analysis.total, 3);
        assert_eq!(
            analysis.by_file,
            vec![("home/.bashrc".to_string(), 2), ("home/.gitconfig".to_string(), 1)]
        );
        assert_eq!(analysis.by_strategy[0].0, "prefer-local");
        assert_eq!(analysis.by_hour[9], 2);
        assert_eq!(analysis.by_hour[22], 1);
        assert_eq!(analysis.busiest_hour(), Some(9));
    }

    #[test]
    fn test_analyze_empty() {
        let analysis = analyze::<&str>(&[], 30, at("2024-03-10 12:00:00"));
        assert_eq!(analysis.total, 0);
        assert_eq!(analysis.busiest_hour(), None);
    }
}
