// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.

use std::time::Duration;

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

// === Errors ===

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn hint_label() -> ColoredString {
    "hint".cyan()
}

// === Status ===

pub fn status_ok() -> ColoredString {
    "✓".green()
}

pub fn status_info() -> ColoredString {
    "•".blue()
}

pub fn elapsed(d: Duration) -> ColoredString {
    format!("{:.3}s", d.as_secs_f64()).dimmed()
}

pub fn address(host: &str, port: u16) -> ColoredString {
    format!("{}:{}", host, port).underline()
}

pub fn payload(bytes: &[u8]) -> ColoredString {
    format!("{:?}", String::from_utf8_lossy(bytes)).yellow()
}

// === Help ===

pub fn title(name: &str) -> ColoredString {
    name.bold()
}

pub fn version(v: &str) -> ColoredString {
    v.dimmed()
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

pub fn command(name: &str) -> ColoredString {
    name.green()
}

pub fn arg(name: &str) -> ColoredString {
    name.cyan()
}
