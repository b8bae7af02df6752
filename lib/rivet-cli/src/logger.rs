//! A logging implementation printing the core's `log` records to stderr,
//! so the UART console on stdout stays clean.

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "[{:5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Install the logger with the given maximum level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER).map(|_| log::set_max_level(level));
}
