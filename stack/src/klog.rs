/// Kernel logger.
///
/// Subsystems log through the `log` facade with bracket-tagged messages
/// (`[arp] ...`, `[timer] ...`). This module provides the `log::Log`
/// implementation that hands each formatted line to a platform `LogSink`
/// (UART, RAM ring buffer, test capture). Without `init`, every log call is
/// a no-op.
use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// Destination of formatted log lines.
pub trait LogSink: Send + Sync {
    fn write_line(&self, args: fmt::Arguments<'_>);
}

struct KLogger {
    sink: Once<&'static dyn LogSink>,
}

static LOGGER: KLogger = KLogger { sink: Once::new() };

impl Log for KLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && self.sink.is_completed()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink.write_line(format_args!("{:<5} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Install `sink` as the global log destination.
///
/// Fails if a logger (this one or another) is already installed; the first
/// sink stays in place.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::{String, ToString};
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    struct Capture(StdMutex<Vec<String>>);

    impl LogSink for Capture {
        fn write_line(&self, args: fmt::Arguments<'_>) {
            self.0.lock().unwrap().push(args.to_string());
        }
    }

    static CAPTURE: Capture = Capture(StdMutex::new(Vec::new()));

    #[test]
    fn lines_reach_the_sink() {
        // The only caller of `init` in the crate.
        init(&CAPTURE, LevelFilter::Trace).unwrap();
        assert!(init(&CAPTURE, LevelFilter::Trace).is_err());

        log::warn!(target: "arp", "[arp] duplicate address 10.0.0.1");
        let lines = CAPTURE.0.lock().unwrap();
        assert!(lines
            .iter()
            .any(|l| l == "WARN  [arp] duplicate address 10.0.0.1"));
    }
}
