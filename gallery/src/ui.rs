use colored::*;
use indicatif::ProgressStyle;

pub fn success(msg: &str) {
    tracing::info!("{} {}", "✓".green(), msg.green());
}

pub fn error(msg: &str) {
    tracing::info!("{} {}", "Error:".red(), msg.red());
}

pub fn info(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn warning(msg: &str) {
    tracing::info!("{}", msg.yellow());
}

pub fn tip(msg: &str) {
    tracing::info!("{} {}", "Tip:".dimmed(), msg.dimmed());
}

/// Bar for a download whose length is known, positioned in percent.
pub fn percent_bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:.bold} [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Spinner for a download without a known length, positioned in bytes.
pub fn bytes_spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
