// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stderr logger behind the `log` facade.
//!
//! Lines look like `2026-01-01T10:00:00Z [INFO] Warming up aws.foo`, with
//! the level tag coloured the way the status tables are.

use colored::*;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::env;
use std::io::{self, Write};

pub const LOG_ENV: &str = "CLOUD_AMBUSH_LOG";

struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let mut stderr = io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{} [{}] {}",
            timestamp.to_string().dimmed(),
            tag(record.level()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERR".red().bold(),
        Level::Warn => "WARN".yellow(),
        Level::Info => "INFO".cyan(),
        Level::Debug => "DEBUG".normal(),
        Level::Trace => "TRACE".dimmed(),
    }
}

/// `CLOUD_AMBUSH_LOG` when it names a level, else the CLI's choice.
pub fn level_from_flags(verbose: bool, quiet: bool) -> LevelFilter {
    if let Some(level) = env::var(LOG_ENV).ok().and_then(|value| parse_level(&value)) {
        return level;
    }
    if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    }
}

pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Installs the logger. Only the first call in a process has any effect.
pub fn init(level: LevelFilter) {
    let logger = Box::new(StderrLogger { level });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_level(" debug "), Some(LevelFilter::Debug));
        assert_eq!(parse_level("chatty"), None);
    }
}
