//! Interactive prompts on the controlling terminal
//!
//! [`TerminalPrompt`] is the production [`UserPrompt`]: menus, yes/no and
//! free text through dialoguer, manual edits through `$VISUAL`/`$EDITOR`.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};
use mentat_core::{Error, Result, UserPrompt};
use std::path::Path;
use std::process::Command;

/// Editor used when neither `$VISUAL` nor `$EDITOR` is set
#[cfg(unix)]
const FALLBACK_EDITOR: &str = "vi";
#[cfg(not(unix))]
const FALLBACK_EDITOR: &str = "notepad";

/// dialoguer-backed prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

fn prompt_error(err: dialoguer::Error) -> Error {
    Error::Prompt(err.to_string())
}

/// Editor command line from the environment, split on whitespace so
/// values like `code --wait` work
pub fn editor_command(visual: Option<&str>, editor: Option<&str>) -> Vec<String> {
    [visual, editor]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(FALLBACK_EDITOR)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

impl UserPrompt for TerminalPrompt {
    fn select(&self, prompt: &str, items: &[&str]) -> Result<usize> {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .map_err(prompt_error)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(prompt_error)
    }

    fn input(&self, prompt: &str) -> Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)
    }

    fn edit_file(&self, path: &Path) -> Result<()> {
        let visual = std::env::var("VISUAL").ok();
        let editor = std::env::var("EDITOR").ok();
        let command = editor_command(visual.as_deref(), editor.as_deref());
        let Some((program, args)) = command.split_first() else {
            return Err(Error::Prompt("no editor configured".to_string()));
        };

        let status = Command::new(program)
            .args(args)
            .arg(path)
            .status()
            .map_err(|e| Error::Prompt(format!("failed to launch editor {program}: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Prompt(format!(
                "editor exited with status {:?}",
                status.code()
            )))
        }
    }

    fn show(&self, text: &str) {
        println!("{text}");
    }
}
