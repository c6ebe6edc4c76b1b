//! Safety gate for destructive resets
//!
//! Phase A refuses anything that looks automated before a single prompt is
//! shown. Phase B needs a human: either the literal word `yes`, or, when
//! the free-text confirmation is skipped, the answer to a random addition
//! within a deadline.

use crate::error::{Error, Result};
use mentat_core::{InvocationContext, UserPrompt};
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Parent processes that indicate a scheduler, service manager, CI runner
/// or coding agent
static AUTOMATION_PARENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cron|crond|anacron|atd|systemd|launchd|supervisord|runit|jenkins|gitlab-runner|buildkite-agent|github-actions|runner|agent|claude|copilot)\b",
    )
    .expect("valid regex")
});

/// Environment variables set by CI systems and agents
pub const AUTOMATION_ENV_VARS: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BUILDKITE",
    "CIRCLECI",
    "TRAVIS",
    "TF_BUILD",
    "CLAUDECODE",
    "MENTAT_AUTOMATION",
];

/// Time allowed to answer the arithmetic challenge
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(10);

const CONFIRM_WORD: &str = "yes";

/// Why the invocation looks automated, if it does
pub fn automation_reason(ctx: &dyn InvocationContext) -> Option<String> {
    if !ctx.stdin_is_terminal() || !ctx.stdout_is_terminal() {
        return Some("not attached to an interactive terminal".to_string());
    }

    for var in AUTOMATION_ENV_VARS {
        if let Some(value) = ctx.env_var(var) {
            let value = value.trim();
            if !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false") {
                return Some(format!("automation environment variable {var} is set"));
            }
        }
    }

    if let Some(parent) = ctx.parent_process_name()
        && AUTOMATION_PARENT.is_match(&parent)
    {
        return Some(format!("launched by automation process '{parent}'"));
    }
    None
}

/// Phase A: fail with `SecurityViolation` unless a human is at a terminal
pub fn validate_invocation(ctx: &dyn InvocationContext) -> Result<()> {
    match automation_reason(ctx) {
        Some(reason) => {
            tracing::error!(%reason, "Refusing destructive operation");
            Err(Error::SecurityViolation { reason })
        }
        None => Ok(()),
    }
}

/// Single-digit addition the user must solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    a: u8,
    b: u8,
}

impl Challenge {
    /// Challenge for `a + b` (each reduced to one digit)
    pub fn new(a: u8, b: u8) -> Self {
        Self { a: a % 10, b: b % 10 }
    }

    /// Challenge with random digits
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::new(rng.random_range(0..=9), rng.random_range(0..=9))
    }

    /// Prompt shown to the user
    pub fn question(&self) -> String {
        format!("What is {} + {}?", self.a, self.b)
    }

    /// Expected reply
    pub fn answer(&self) -> u8 {
        self.a + self.b
    }

    /// Whether `reply` is the right answer
    pub fn accepts(&self, reply: &str) -> bool {
        reply.trim().parse::<u8>().is_ok_and(|n| n == self.answer())
    }
}

/// Phase B: explicit confirmation
///
/// With `skip_free_text` the literal `yes` is replaced by `challenge`,
/// which must be answered correctly within `timeout`.
pub fn confirm(
    prompt: &dyn UserPrompt,
    warning: &str,
    skip_free_text: bool,
    challenge: Challenge,
    timeout: Duration,
) -> Result<()> {
    prompt.show(warning);

    if skip_free_text {
        let started = Instant::now();
        let reply = prompt.input(&format!(
            "{} (answer within {}s)",
            challenge.question(),
            timeout.as_secs()
        ))?;
        if started.elapsed() > timeout {
            return Err(Error::Aborted("challenge not answered in time".to_string()));
        }
        if !challenge.accepts(&reply) {
            return Err(Error::Aborted("wrong challenge answer".to_string()));
        }
        return Ok(());
    }

    let reply = prompt.input(&format!("Type '{CONFIRM_WORD}' to continue"))?;
    if reply.trim() == CONFIRM_WORD {
        Ok(())
    } else {
        Err(Error::Aborted("confirmation declined".to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;

    struct Invocation {
        tty: bool,
        parent: Option<&'static str>,
        env: HashMap<&'static str, &'static str>,
    }

    impl Invocation {
        fn human() -> Self {
            Self {
                tty: true,
                parent: Some("zsh"),
                env: HashMap::new(),
            }
        }
    }

    impl InvocationContext for Invocation {
        fn stdin_is_terminal(&self) -> bool {
            self.tty
        }
        fn stdout_is_terminal(&self) -> bool {
            self.tty
        }
        fn parent_process_name(&self) -> Option<String> {
            self.parent.map(str::to_string)
        }
        fn env_var(&self, key: &str) -> Option<String> {
            self.env.get(key).map(|v| (*v).to_string())
        }
    }

    struct Replies(RefCell<VecDeque<&'static str>>);

    impl UserPrompt for Replies {
        fn select(&self, _: &str, _: &[&str]) -> mentat_core::Result<usize> {
            panic!("no menus expected")
        }
        fn confirm(&self, _: &str, _: bool) -> mentat_core::Result<bool> {
            panic!("no confirms expected")
        }
        fn input(&self, _: &str) -> mentat_core::Result<String> {
            Ok(self.0.borrow_mut().pop_front().unwrap().to_string())
        }
        fn edit_file(&self, _: &Path) -> mentat_core::Result<()> {
            Ok(())
        }
        fn show(&self, _: &str) {}
    }

    fn replies(items: &[&'static str]) -> Replies {
        Replies(RefCell::new(items.iter().copied().collect()))
    }

    #[test]
    fn test_human_passes() {
        assert!(validate_invocation(&Invocation::human()).is_ok());
    }

    #[test]
    fn test_automation_parents_refused() {
        for parent in ["cron", "CROND", "systemd", "gitlab-runner", "Runner.Worker", "claude", "ssh-agent"] {
            let ctx = Invocation {
                parent: Some(parent),
                ..Invocation::human()
            };
            let err = validate_invocation(&ctx).unwrap_err();
            assert!(matches!(err, Error::SecurityViolation { .. }), "{parent}");
        }
        for parent in ["bash", "zsh", "fish", "tmux: server"] {
            let ctx = Invocation {
                parent: Some(parent),
                ..Invocation::human()
            };
            assert!(validate_invocation(&ctx).is_ok(), "{parent}");
        }
    }

    #[test]
    fn test_ci_environment_refused() {
        let mut ctx = Invocation::human();
        ctx.env.insert("GITHUB_ACTIONS", "true");
        assert!(automation_reason(&ctx).unwrap().contains("GITHUB_ACTIONS"));

        let mut ctx = Invocation::human();
        ctx.env.insert("CI", "false");
        assert!(automation_reason(&ctx).is_none());
    }

    #[test]
    fn test_missing_terminal_refused() {
        let ctx = Invocation {
            tty: false,
            ..Invocation::human()
        };
        assert!(automation_reason(&ctx).unwrap().contains("terminal"));
    }

    #[test]
    fn test_literal_yes_required() {
        let challenge = Challenge::new(1, 2);
        assert!(confirm(&replies(&["yes"]), "", false, challenge, CHALLENGE_TIMEOUT).is_ok());
        assert!(confirm(&replies(&[" yes \n"]), "", false, challenge, CHALLENGE_TIMEOUT).is_ok());
        assert!(matches!(
            confirm(&replies(&["y"]), "", false, challenge, CHALLENGE_TIMEOUT),
            Err(Error::Aborted(_))
        ));
        assert!(confirm(&replies(&["YES"]), "", false, challenge, CHALLENGE_TIMEOUT).is_err());
    }

    #[test]
    fn test_challenge_replaces_free_text() {
        let challenge = Challenge::new(7, 8);
        assert_eq!(challenge.question(), "What is 7 + 8?");
        assert!(confirm(&replies(&["15"]), "", true, challenge, CHALLENGE_TIMEOUT).is_ok());
        assert!(confirm(&replies(&["yes"]), "", true, challenge, CHALLENGE_TIMEOUT).is_err());
        assert!(confirm(&replies(&["14"]), "", true, challenge, CHALLENGE_TIMEOUT).is_err());
    }

    #[test]
    fn test_random_challenge_in_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let c = Challenge::random(&mut rng);
            assert!(c.answer() <= 18);
        }
    }
}
