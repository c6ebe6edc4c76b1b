//! Host platform detection
//!
//! Platform names follow kernel conventions (`darwin`, `linux`, `windows`) so
//! they can be used directly as keys in per-platform configuration tables.

use std::sync::LazyLock;

/// Platform of the running process, detected once.
pub static CURRENT_PLATFORM: LazyLock<Platform> = LazyLock::new(Platform::detect);

/// Platform information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// OS: "darwin" (macOS), "linux", "windows", "unknown"
    pub os: &'static str,
    /// CPU architecture: "x86_64", "aarch64", etc.
    pub arch: &'static str,
}

impl Platform {
    /// Platform this binary runs on
    pub fn detect() -> Self {
        Self {
            os: Self::detect_os(),
            arch: std::env::consts::ARCH,
        }
    }

    /// Whether process ids, signals and symlinks follow Unix semantics
    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self.os, "darwin" | "linux")
    }

    /// Pick the value configured for this platform out of a per-OS table
    #[must_use]
    pub fn select<'a, T>(&self, darwin: &'a T, linux: &'a T, windows: &'a T) -> Option<&'a T> {
        match self.os {
            "darwin" => Some(darwin),
            "linux" => Some(linux),
            "windows" => Some(windows),
            _ => None,
        }
    }

    const fn detect_os() -> &'static str {
        if cfg!(target_os = "macos") {
            "darwin"
        } else if cfg!(target_os = "linux") {
            "linux"
        } else if cfg!(target_os = "windows") {
            "windows"
        } else {
            "unknown"
        }
    }
}
