//! Progress indicators
//!
//! Spinners draw to stderr and stay hidden when it is not a terminal, so
//! scripted runs see only the status lines.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate operations (fetch, push, fsck)
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("spinner template is valid"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run `op` behind a spinner that is cleared when it returns
pub fn with_spinner<T>(message: &str, op: impl FnOnce() -> T) -> T {
    let spinner = create_spinner(message);
    let result = op();
    spinner.finish_and_clear();
    result
}
