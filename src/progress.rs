//! Progress reporting for CLI runs
//!
//! A run spinner plus count and size formatting, all from `indicatif`.

use std::time::Duration;

use indicatif::{HumanBytes, HumanCount, ProgressBar, ProgressStyle};

/// Spinner shown while a pipeline run is in flight
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    /// Spinner with a message, drawing nothing unless `visible`
    pub fn new(msg: &str, visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner().with_message(msg.to_string());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish_success(&self, msg: &str) {
        self.bar.finish_with_message(format!("✓ {msg}"));
    }

    /// Leave the failure line on screen
    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon_with_message(format!("✗ {msg}"));
    }
}

/// Row count with thousand separators
pub fn format_count(n: u64) -> String {
    HumanCount(n).to_string()
}

/// Byte size with binary units
pub fn format_bytes(bytes: u64) -> String {
    HumanBytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(541909), "541,909");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(45 * 1024 * 1024), "45.00 MiB");
    }

    #[test]
    fn test_hidden_spinner_finishes() {
        let spinner = Spinner::new("Running pipeline", false);
        assert!(spinner.bar.is_hidden());
        spinner.finish_success("Pipeline finished in 3s");
        assert!(spinner.bar.is_finished());
    }
}
