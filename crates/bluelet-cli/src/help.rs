// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_usage() {
    println!(
        "{} {} - cooperative coroutines over one poll loop",
        output::title("bluelet"),
        output::version(VERSION)
    );
    println!();
    println!(
        "{}: {} {} {} {}",
        output::section_header("Usage"),
        output::command("bluelet"),
        output::arg("[-v|-vv|-q]"),
        output::arg("<command>"),
        output::arg("[args]")
    );
    println!();
    println!("{}", output::section_header("Demos:"));
    println!(
        "  {} {}       Sleep concurrently for each duration (default 0 1000 3000 5000)",
        output::command("sleepers"),
        output::arg("[ms...]")
    );
    println!(
        "  {} {}   Run an echo server (default 127.0.0.1 4915)",
        output::command("echo"),
        output::arg("[host] [port]")
    );
    println!(
        "  {} {} Send one line and print the reply",
        output::command("send"),
        output::arg("<host> <port> <line>")
    );
    println!();
    println!("{}", output::section_header("Other:"));
    println!("  {}                   Show this help", output::command("help"));
    println!("  {}                Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Options:"));
    println!("  {}   Debug logging ({} for per-event tracing)", output::arg("-v"), output::arg("-vv"));
    println!("  {}   Only warnings and errors", output::arg("-q"));
}

pub fn print_command_usage(usage: &str) {
    eprintln!("{}: bluelet {}", output::section_header("Usage"), usage);
}
