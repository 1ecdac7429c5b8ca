use std::io::Write;
use std::time::Instant;

use log::{Level, Log, Metadata, Record};

/// Prints every record to stderr with elapsed time and thread name.
struct StderrLogger {
    start: Instant,
    level: Level,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let elapsed = self.start.elapsed();
        let thread = std::thread::current();
        let _ = writeln!(
            std::io::stderr().lock(),
            "{:>4}.{:03} [{:<5}] {} {}: {}",
            elapsed.as_secs(),
            elapsed.subsec_millis(),
            record.level(),
            thread.name().unwrap_or("?"),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the logger. The level comes from `NET_LOG` (error, warn, info,
/// debug, trace) and defaults to info.
pub fn init() {
    let level = std::env::var("NET_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::Info);
    let logger = StderrLogger {
        start: Instant::now(),
        level,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}
