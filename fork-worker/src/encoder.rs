//! Outbound event channel of the forked worker.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use fork_proto::{
    ConsoleLevel, ErrorReport, Event, OutputStream, ReportEntry, RunMode, TestEventKind,
};
use tracing::debug;

use crate::dump::DumpSink;
use crate::stack_trace::trim_stack_trace;

/// Serializes events onto one byte stream shared by every producer thread.
///
/// Each frame is built in memory and written with a single locked
/// `write_all` + `flush`, so frames from concurrent senders never tear.
/// Write failures never reach the caller: they raise a sticky trouble
/// flag (see [`ChannelEncoder::check_error`]) and go to the dump sink.
pub struct ChannelEncoder {
    out: Mutex<Box<dyn Write + Send>>,
    trouble: AtomicBool,
    rerun: AtomicBool,
    exiting: AtomicBool,
    trim_stack_traces: bool,
    dump: DumpSink,
}

impl ChannelEncoder {
    pub fn new(out: impl Write + Send + 'static, dump: DumpSink) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            trouble: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            trim_stack_traces: false,
            dump,
        }
    }

    pub fn with_trimmed_stack_traces(mut self, trim: bool) -> Self {
        self.trim_stack_traces = trim;
        self
    }

    /// Tag every following test event with `mode`.
    pub fn set_run_mode(&self, mode: RunMode) {
        self.rerun
            .store(mode == RunMode::RerunAfterFailure, Ordering::Release);
    }

    pub fn run_mode(&self) -> RunMode {
        if self.rerun.load(Ordering::Acquire) {
            RunMode::RerunAfterFailure
        } else {
            RunMode::Normal
        }
    }

    /// True once any write to the channel has failed.
    pub fn check_error(&self) -> bool {
        self.trouble.load(Ordering::Acquire)
    }

    pub fn send(&self, event: &Event) {
        let frame = event.encode();
        if let Err(e) = self.write_frame(&frame) {
            self.on_write_error(&e, event);
        }
    }

    /// One `sys-prop` event per entry, in key order.
    pub fn send_system_properties(&self, properties: &BTreeMap<String, String>) {
        let run_mode = self.run_mode();
        for (key, value) in properties {
            self.send(&Event::SystemProperty {
                run_mode,
                key: key.clone(),
                value: Some(value.clone()),
            });
        }
    }

    pub fn test_set_starting(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestSetStarting, entry);
    }

    pub fn test_set_completed(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestSetCompleted, entry);
    }

    pub fn test_starting(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestStarting, entry);
    }

    pub fn test_succeeded(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestSucceeded, entry);
    }

    pub fn test_failed(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestFailed, entry);
    }

    pub fn test_skipped(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestSkipped, entry);
    }

    pub fn test_error(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestError, entry);
    }

    pub fn test_assumption_failure(&self, entry: &ReportEntry) {
        self.test_event(TestEventKind::TestAssumptionFailure, entry);
    }

    pub fn stdout(&self, message: &str, new_line: bool) {
        self.output(OutputStream::Stdout, message, new_line);
    }

    pub fn stderr(&self, message: &str, new_line: bool) {
        self.output(OutputStream::Stderr, message, new_line);
    }

    pub fn console_info_log(&self, message: &str) {
        self.console(ConsoleLevel::Info, message);
    }

    pub fn console_debug_log(&self, message: &str) {
        self.console(ConsoleLevel::Debug, message);
    }

    pub fn console_warning_log(&self, message: &str) {
        self.console(ConsoleLevel::Warning, message);
    }

    pub fn console_error_log(&self, report: ErrorReport) {
        self.send(&Event::ConsoleError(report));
    }

    pub fn bye(&self) {
        self.send(&Event::Bye);
    }

    pub fn stop_on_next_test(&self) {
        self.send(&Event::StopOnNextTest);
    }

    /// Ask the master for one more test class.
    pub fn acquire_next_test(&self) {
        self.send(&Event::NextTest);
    }

    pub fn jvm_exit_error(&self, report: ErrorReport) {
        self.send(&Event::JvmExitError(report));
    }

    /// Mark the process as exiting and push a final line break so the
    /// master sees the last frame terminated. Later write errors are not
    /// dumped.
    pub fn on_jvm_exit(&self) {
        self.exiting.store(true, Ordering::Release);
        if let Err(e) = self.write_frame(b"\n") {
            debug!(error = %e, "event channel closed at exit");
        }
    }

    fn test_event(&self, kind: TestEventKind, entry: &ReportEntry) {
        let entry = if self.trim_stack_traces {
            trimmed(entry)
        } else {
            entry.clone()
        };
        self.send(&Event::Test {
            kind,
            run_mode: self.run_mode(),
            entry,
        });
    }

    fn output(&self, stream: OutputStream, message: &str, new_line: bool) {
        self.send(&Event::Output {
            stream,
            run_mode: self.run_mode(),
            message: Some(message.to_string()),
            new_line,
        });
    }

    fn console(&self, level: ConsoleLevel, message: &str) {
        self.send(&Event::Console {
            level,
            message: Some(message.to_string()),
        });
    }

    fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        // Recover from poisoned mutex: a panicking test thread must not
        // silence every other producer.
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(frame)?;
        out.flush()
    }

    fn on_write_error(&self, err: &io::Error, event: &Event) {
        let first = !self.trouble.swap(true, Ordering::AcqRel);
        if self.exiting.load(Ordering::Acquire) {
            debug!(error = %err, opcode = %event.kind(), "event dropped after exit");
        } else if first {
            self.dump.dump_error(
                err,
                &format!("Failed to write {} event to the master process", event.kind()),
            );
        }
    }
}

fn trimmed(entry: &ReportEntry) -> ReportEntry {
    let mut entry = entry.clone();
    if let (Some(source), Some(stack_trace)) = (&entry.source_name, &mut entry.stack_trace) {
        stack_trace.trace = trim_stack_trace(&stack_trace.trace, source);
    }
    entry
}
