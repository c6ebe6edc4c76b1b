//! Core types and utilities for mentat
//!
//! This is the foundation crate (Layer 0) that all other mentat crates depend on.
//! It provides:
//! - Base error types
//! - Platform detection
//! - Capability traits isolating the host environment (process liveness,
//!   invocation context, interactive prompting)
//!
//! This crate has no dependencies on other mentat crates.

pub mod error;
pub mod platform;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{InvocationContext, ProcessProbe, UserPrompt};
