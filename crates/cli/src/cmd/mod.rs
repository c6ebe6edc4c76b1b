//! CLI command implementations
//!
//! One module per top-level sub-command; each exposes an `Args` struct
//! implementing [`Command`](crate::command::Command).

pub mod conflicts;
pub mod health;
pub mod symlinks;
pub mod sync;
