//! Defines the kernel console, a `log` backend that fans records out to attached sinks.

use alloc::{boxed::Box, vec::Vec};
use core::{
    fmt::Write,
    sync::atomic::{AtomicBool, Ordering},
};

#[cfg(debug_assertions)]
use log::LevelFilter;
use spin::{Mutex, Once};

/// A destination for console output, such as a serial port or the host's stdout.
pub type ConsoleSink = Box<dyn Write + Send>;

pub struct Console {
    has_output: AtomicBool,
    sinks: Mutex<Vec<ConsoleSink>>,
}

static DEFAULT: Once<Console> = Once::new();
static INSTALLED: Once<()> = Once::new();

impl Console {
    /// Returns the global console, installing it as the logger on first use.
    pub fn init() -> &'static Self {
        let console = Self::global();
        console.install();
        console
    }

    pub fn global() -> &'static Self {
        DEFAULT.call_once(|| Console {
            has_output: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn install(&'static self) {
        INSTALLED.call_once(|| {
            if log::set_logger(self).is_err() {
                return;
            }

            #[cfg(debug_assertions)]
            log::set_max_level(LevelFilter::Trace);

            #[cfg(not(debug_assertions))]
            log::set_max_level(log::LevelFilter::Info);
        });
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    /// Adds a sink that receives every subsequent log record.
    pub fn attach(&self, sink: ConsoleSink) {
        self.sinks.lock().push(sink);
        self.has_output.store(true, Ordering::SeqCst);
    }
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        for sink in self.sinks.lock().iter_mut() {
            // A sink that fails to write loses the record; there is nowhere to report it.
            let _ = write_log_entry_to(&mut **sink, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to<W: Write + ?Sized>(writer: &mut W, record: &log::Record) -> core::fmt::Result {
    #[cfg(feature = "detailed-logging")]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(feature = "detailed-logging"))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
