// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bluelet CLI - demo runner for the coroutine scheduler.

mod demos;
mod help;
mod output;

use std::env;
use std::io;
use std::process;
use std::thread;
use std::time::Instant;

use bluelet::{Coroutine, InterruptHandle, Scheduler};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

const DEFAULT_SLEEPS_MS: [u64; 4] = [0, 1000, 3000, 5000];
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4915;

fn main() {
    output::init();

    let mut verbosity: i8 = 0;
    let args: Vec<String> = env::args()
        .skip(1)
        .filter(|a| match a.as_str() {
            "-v" | "--verbose" => {
                verbosity += 1;
                false
            }
            "-vv" => {
                verbosity += 2;
                false
            }
            "-q" | "--quiet" => {
                verbosity = -1;
                false
            }
            _ => true,
        })
        .collect();
    init_logging(verbosity);

    let Some(cmd) = args.first() else {
        help::print_usage();
        return;
    };

    match cmd.as_str() {
        "sleepers" => {
            let durations: Vec<u64> = if args.len() > 1 {
                args[1..].iter().map(|a| parse_num(a, "duration")).collect()
            } else {
                DEFAULT_SLEEPS_MS.to_vec()
            };
            run_timed(|| demos::sleepers(durations));
        }
        "echo" => {
            let host = args.get(1).map(String::as_str).unwrap_or(DEFAULT_HOST);
            let port = args
                .get(2)
                .map(|p| parse_num(p, "port"))
                .unwrap_or(DEFAULT_PORT);
            run_timed(|| demos::echo_server(host, port));
        }
        "send" => {
            if args.len() < 4 {
                help::print_command_usage("send <host> <port> <line>");
                process::exit(1);
            }
            let port = parse_num(&args[2], "port");
            run_timed(|| demos::send_line(args[1].clone(), port, args[3..].join(" ")));
        }
        "help" | "--help" | "-h" => help::print_usage(),
        "version" | "--version" | "-V" => println!("bluelet {}", help::VERSION),
        other => {
            eprintln!("{}: unknown command: {}", output::error_label(), other);
            help::print_usage();
            process::exit(1);
        }
    }
}

/// Build the root once Ctrl-C is wired to the scheduler, then run it.
fn run_timed(build: impl FnOnce() -> Coroutine) {
    let mut sched = match Scheduler::new() {
        Ok(s) => s,
        Err(e) => fail(&e),
    };
    if let Err(e) = forward_sigint(sched.interrupt_handle()) {
        fail(&e.into());
    }
    let root = build();
    let start = Instant::now();
    if let Err(e) = sched.run(root) {
        fail(&e);
    }
    println!("{} finished in {}", output::status_ok(), output::elapsed(start.elapsed()));
}

/// SIGINT interrupts the scheduler; the root sees `Error::Interrupted`.
fn forward_sigint(handle: InterruptHandle) -> io::Result<()> {
    let mut signals = Signals::new([SIGINT])?;
    thread::spawn(move || {
        for _ in signals.forever() {
            debug!("SIGINT received, interrupting scheduler");
            handle.interrupt();
        }
    });
    Ok(())
}

fn fail(err: &bluelet::Error) -> ! {
    eprintln!("{}: {}", output::error_label(), err);
    if err.is_disconnect() {
        eprintln!("{}: the peer closed the connection", output::hint_label());
    }
    process::exit(1);
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> T {
    match s.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("{}: invalid {}: {}", output::error_label(), what, s);
            process::exit(1);
        }
    }
}

/// Compact `LEVEL message` lines on stderr, no timestamps or targets.
fn init_logging(verbosity: i8) {
    let filter = match verbosity {
        i8::MIN..=-1 => LevelFilter::WARN,
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_level(true)
        .compact()
        .with_filter(filter);

    Registry::default().with(layer).init();
}
