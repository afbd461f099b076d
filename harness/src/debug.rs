// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Diagnostic output for scenarios.
//!
//! The console is the only channel a bare-metal scenario has to report its
//! verdict, so every terminal path writes a line here before halting. Output
//! is fire-and-forget: there is no flow control and no acknowledgement.
//!
//! Two kinds of output share the console:
//!
//! - Protocol lines (`"Test Passed!"`, the scheduler banners) are written
//!   directly through a [`DiagnosticWriter`] with [`print`] and [`banner`].
//!   Test runners match on these strings.
//! - Internal events (state transitions, fault classification) go through the
//!   `log` facade. A board forwards them to the same console by installing a
//!   [`ConsoleLogger`].

use core::fmt::{self, Write};

use crate::config::CONFIG;

/// Printed by the fault handler when a trap is attributed to the armed
/// tracker, and by a victim that was resumed past its violation.
pub const TEST_PASSED: &str = "Test Passed!\r\n\r\n";

/// Printed by a victim whose illegal operation completed without a trap.
pub const TEST_FAILED: &str = "Test Failed. Entering an infinite loop.\r\n";

/// Title of the banner printed right before the scheduler is started.
pub const STARTING_SCHEDULER: &str = "Starting the Scheduler";

/// Title of the banner printed when the scheduler refuses to start or a task
/// cannot be created.
pub const FAILED_TO_START_SCHEDULER: &str = "Failed to Start Scheduler";

const BANNER_RULE: &str = "---------------------------";

/// A line-oriented text sink.
///
/// Implementations must accept writes from both privileged code (the driver
/// and the fault handler) and from restricted tasks whose region list grants
/// the underlying peripheral.
pub trait DiagnosticWriter {
    /// Write `buf` to the console. Must not fail; bytes that cannot be sent
    /// are dropped.
    fn write(&self, buf: &[u8]);
}

impl<W: DiagnosticWriter + ?Sized> DiagnosticWriter for &W {
    fn write(&self, buf: &[u8]) {
        (**self).write(buf);
    }
}

struct FmtAdapter<'a, W: ?Sized>(&'a W);

impl<W: DiagnosticWriter + ?Sized> Write for FmtAdapter<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}

/// Write a string as-is.
pub fn print<W: DiagnosticWriter + ?Sized>(writer: &W, msg: &str) {
    writer.write(msg.as_bytes());
}

/// Write formatted output.
pub fn print_fmt<W: DiagnosticWriter + ?Sized>(writer: &W, args: fmt::Arguments<'_>) {
    let _ = FmtAdapter(writer).write_fmt(args);
}

/// Write a framed banner such as
/// `--------------------------- Starting the Scheduler ---------------------------`.
pub fn banner<W: DiagnosticWriter + ?Sized>(writer: &W, title: &str) {
    print_fmt(
        writer,
        format_args!("\r\n{} {} {}\r\n\r\n", BANNER_RULE, title, BANNER_RULE),
    );
}

/// Level used for scenario state transitions and fault classification.
pub(crate) fn event_level() -> log::Level {
    if CONFIG.trace_scenarios {
        log::Level::Trace
    } else {
        log::Level::Debug
    }
}

/// The most verbose level a board should enable for the harness.
pub fn max_level() -> log::LevelFilter {
    event_level().to_level_filter()
}

/// `log` backend that writes records to a [`DiagnosticWriter`].
///
/// Boards create one as a `static` and install it with `log::set_logger`
/// before running a scenario.
pub struct ConsoleLogger<W> {
    writer: W,
}

impl<W> ConsoleLogger<W> {
    pub const fn new(writer: W) -> Self {
        ConsoleLogger { writer }
    }
}

impl<W: DiagnosticWriter + Send + Sync> log::Log for ConsoleLogger<W> {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            print_fmt(
                &self.writer,
                format_args!(
                    "[{}] {}: {}\r\n",
                    record.level(),
                    record.target(),
                    record.args()
                ),
            );
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct Capture {
        buf: RefCell<[u8; 256]>,
        len: RefCell<usize>,
    }

    impl Capture {
        fn new() -> Self {
            Capture {
                buf: RefCell::new([0; 256]),
                len: RefCell::new(0),
            }
        }

        fn with_text<R>(&self, f: impl FnOnce(&str) -> R) -> R {
            let buf = self.buf.borrow();
            let len = *self.len.borrow();
            f(core::str::from_utf8(&buf[..len]).unwrap())
        }
    }

    // SAFETY: each test owns its capture and logs from a single thread.
    unsafe impl Sync for Capture {}

    impl DiagnosticWriter for Capture {
        fn write(&self, buf: &[u8]) {
            let mut len = self.len.borrow_mut();
            let mut dst = self.buf.borrow_mut();
            dst[*len..*len + buf.len()].copy_from_slice(buf);
            *len += buf.len();
        }
    }

    #[test]
    fn banner_is_framed_by_rules() {
        let capture = Capture::new();
        banner(&capture, STARTING_SCHEDULER);
        capture.with_text(|text| {
            assert_eq!(
                text,
                "\r\n--------------------------- Starting the Scheduler ---------------------------\r\n\r\n"
            );
        });
    }

    #[test]
    fn print_fmt_goes_through_writer() {
        let capture = Capture::new();
        print_fmt(&capture, format_args!("fault at {:#010x}\r\n", 0x0800_0040));
        print(&capture, TEST_PASSED);
        capture.with_text(|text| {
            assert_eq!(text, "fault at 0x08000040\r\nTest Passed!\r\n\r\n");
        });
    }

    #[test]
    fn logger_formats_records_for_the_console() {
        use log::Log;

        let capture = Capture::new();
        let logger = ConsoleLogger::new(&capture);
        logger.log(
            &log::Record::builder()
                .level(log::Level::Warn)
                .target("harness::fault")
                .args(format_args!("unexpected {}", "data abort"))
                .build(),
        );
        capture.with_text(|text| {
            assert_eq!(text, "[WARN] harness::fault: unexpected data abort\r\n");
        });
    }

    #[test]
    fn logger_drops_records_above_the_harness_level() {
        use log::Log;

        let capture = Capture::new();
        let logger = ConsoleLogger::new(&capture);
        let debug = log::Metadata::builder().level(log::Level::Debug).build();
        let trace = log::Metadata::builder().level(log::Level::Trace).build();
        assert!(logger.enabled(&debug));
        assert_eq!(logger.enabled(&trace), CONFIG.trace_scenarios);

        logger.log(
            &log::Record::builder()
                .level(log::Level::Trace)
                .target("harness::scenario")
                .args(format_args!("creating task"))
                .build(),
        );
        let expected = if CONFIG.trace_scenarios {
            "[TRACE] harness::scenario: creating task\r\n"
        } else {
            ""
        };
        capture.with_text(|text| assert_eq!(text, expected));
    }
}
