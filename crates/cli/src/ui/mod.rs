//! Terminal output for mentat
//!
//! - Status lines with a colored severity marker
//! - The dialoguer-backed [`TerminalPrompt`]
//! - Spinners for network-bound work

pub mod progress;
pub mod prompt;

pub use progress::create_spinner;
pub use prompt::TerminalPrompt;

use owo_colors::OwoColorize;
use std::fmt::Display;

/// Print a success line: `✓ message`
pub fn success(message: impl Display) {
    println!("{} {message}", "✓".green());
}

/// Print a warning line: `⚠ message`
pub fn warning(message: impl Display) {
    println!("{} {message}", "⚠".yellow());
}

/// Print a failure line to stderr: `✗ message`
pub fn failure(message: impl Display) {
    eprintln!("{} {message}", "✗".red());
}

/// Print a bold section heading
pub fn heading(title: impl Display) {
    println!("{}", title.bold());
}
