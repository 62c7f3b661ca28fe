//! Kernel logging infrastructure.
//!
//! Two-phase logging:
//!
//! **Phase 1 — early static sink (pre-heap):** [`set_early_sink`] registers a
//! single `'static` sink (COM1 serial) that needs no allocation. All output
//! during GDT, IDT, PMM, paging, and heap bring-up goes through this path.
//!
//! **Phase 2 — sink list (post-heap):** [`add_sink`] appends boxed sinks
//! (console backend, additional serial ports) once the heap exists.
//!
//! The `kerror!`..`ktrace!` macros are usable from every module; with no
//! sinks registered (host test builds) they are cheap no-ops.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use quantum_core::sync::IrqSpinLock;

/// Log severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Unrecoverable or corrupting conditions.
    Error,
    /// Suspicious conditions the kernel can continue past.
    Warn,
    /// High-level progress messages.
    Info,
    /// Subsystem-level detail.
    Debug,
    /// Per-operation detail.
    Trace,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// A dyn-compatible output sink for the kernel logger.
pub trait LogSink: Send + Sync {
    /// Writes a string fragment to this sink.
    fn write_str(&self, s: &str);
    /// Maximum level accepted (messages with `level <= max_level` are written).
    fn max_level(&self) -> LogLevel;
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;
}

struct LoggerState {
    early: Option<&'static dyn LogSink>,
    sinks: Vec<Box<dyn LogSink>>,
}

// Lock level: logger (leaf; no other lock is taken while holding it).
static LOGGER: IrqSpinLock<LoggerState> = IrqSpinLock::new(LoggerState {
    early: None,
    sinks: Vec::new(),
});

/// Registers the pre-heap static sink.
pub fn set_early_sink(sink: &'static dyn LogSink) {
    LOGGER.lock().early = Some(sink);
}

/// Appends a sink to the post-heap sink list.
pub fn add_sink(sink: Box<dyn LogSink>) {
    LOGGER.lock().sinks.push(sink);
}

/// Fans one fragment out to every sink accepting `level`.
struct Fanout<'a> {
    state: &'a LoggerState,
    level: LogLevel,
}

impl fmt::Write for Fanout<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(early) = self.state.early {
            if self.level <= early.max_level() {
                early.write_str(s);
            }
        }
        for sink in &self.state.sinks {
            if self.level <= sink.max_level() {
                sink.write_str(s);
            }
        }
        Ok(())
    }
}

/// Writes one formatted record to all matching sinks.
///
/// Called through the logging macros; not intended for direct use.
pub fn write_record(level: LogLevel, args: fmt::Arguments<'_>) {
    use fmt::Write as _;
    let state = LOGGER.lock();
    if state.early.is_none() && state.sinks.is_empty() {
        return;
    }
    let mut out = Fanout {
        state: &state,
        level,
    };
    let _ = write!(out, "[{}] ", level.tag());
    let _ = out.write_fmt(args);
    let _ = out.write_str("\n");
}

/// Logs at [`LogLevel::Error`].
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::log::write_record($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

/// Logs at [`LogLevel::Warn`].
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::log::write_record($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

/// Logs at [`LogLevel::Info`].
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::log::write_record($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Logs at [`LogLevel::Debug`].
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::log::write_record($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

/// Logs at [`LogLevel::Trace`].
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        $crate::log::write_record($crate::log::LogLevel::Trace, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_most_severe_first() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn no_sinks_is_a_no_op() {
        // Must not panic or allocate.
        write_record(LogLevel::Info, format_args!("nobody listening"));
    }
}
