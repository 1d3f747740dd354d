use std::sync::atomic::{AtomicU8, Ordering};

use colored::Colorize;

static VERBOSITY: AtomicU8 = AtomicU8::new(1);

pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

fn level() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

/// Progress lines for the operator (`-q` silences them).
pub fn info(message: &str) {
    if level() >= 1 {
        eprintln!("{}", message);
    }
}

/// Extra detail shown with `-v`.
pub fn detail(message: &str) {
    if level() >= 2 {
        eprintln!("{}", message.dimmed());
    }
}

pub fn warn(message: &str) {
    eprintln!("{}", format!("warning: {message}").yellow());
}

pub fn error(message: &str) {
    eprintln!("{}", format!("error: {message}").red());
}

/// Output of a `-f` follow command, surfaced verbatim.
pub fn follow(output: &str) {
    if level() >= 1 && !output.is_empty() {
        for line in output.lines() {
            eprintln!("{} {}", "|".blue(), line);
        }
    }
}
