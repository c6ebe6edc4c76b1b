//! Configuration management for mentat
//!
//! This crate handles:
//! - `config.json` loading, validation and private-permission saving
//! - State-directory layout and default paths
//! - Ignore patterns for the linked subtree
//! - Logging initialization

pub mod config;
pub mod dirs;
pub mod logging;
pub mod matcher;

// Re-export error types from core
pub use mentat_core::{Error, Result};

// Re-export main types
pub use config::{
    AuthMethod, Config, ConflictSettings, HealthSettings, HookSettings, IgnoreSettings, RepoType,
    SymlinkSettings, SyncSettings,
};
pub use dirs::{StatePaths, default_dotfiles_dir, default_state_dir};
pub use matcher::IgnoreMatcher;
