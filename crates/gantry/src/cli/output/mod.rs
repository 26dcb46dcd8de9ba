//! Output formatting utilities

use std::time::Duration;

use console::{style, Style};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Style for node and task identifiers
pub fn id_style() -> Style {
    Style::new().cyan()
}

/// Seconds with one decimal, dimmed
pub fn duration(duration: &Duration) -> String {
    style(format!("{:.1}s", duration.as_secs_f64())).dim().to_string()
}

/// "task" or "tasks"
pub fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}
