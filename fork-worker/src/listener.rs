//! Producer side of the channel: test provider callbacks become events.

use std::sync::Arc;

use fork_proto::{ErrorReport, ReportEntry, RunMode};

use crate::encoder::ChannelEncoder;
use crate::error::error_chain;

/// Test lifecycle callbacks issued by a test provider.
pub trait RunListener {
    fn test_set_starting(&self, entry: &ReportEntry);
    fn test_set_completed(&self, entry: &ReportEntry);
    fn test_starting(&self, entry: &ReportEntry);
    fn test_succeeded(&self, entry: &ReportEntry);
    fn test_failed(&self, entry: &ReportEntry);
    fn test_skipped(&self, entry: &ReportEntry);
    fn test_error(&self, entry: &ReportEntry);
    fn test_assumption_failure(&self, entry: &ReportEntry);
    /// The user asked to stop; the master should skip what is left.
    fn test_execution_skipped_by_user(&self);
}

pub trait ConsoleLogger {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str, error: Option<&dyn std::error::Error>);
}

/// Receives output captured from the tests' stdout and stderr.
pub trait ConsoleOutputReceiver {
    /// `new_line` tells whether `output` ended a line, so the master can
    /// rebuild the output without doubling or losing line breaks.
    fn write_test_output(&self, output: &str, new_line: bool, stdout: bool);
}

/// Forwards every provider callback to the [`ChannelEncoder`], 1:1.
#[derive(Clone)]
pub struct ForkedRunListener {
    encoder: Arc<ChannelEncoder>,
}

impl ForkedRunListener {
    pub fn new(encoder: Arc<ChannelEncoder>) -> Self {
        Self { encoder }
    }

    /// Switch between first attempts and reruns of failed tests.
    pub fn set_run_mode(&self, mode: RunMode) {
        self.encoder.set_run_mode(mode);
    }

    pub fn run_mode(&self) -> RunMode {
        self.encoder.run_mode()
    }
}

impl RunListener for ForkedRunListener {
    fn test_set_starting(&self, entry: &ReportEntry) {
        self.encoder.test_set_starting(entry);
    }

    fn test_set_completed(&self, entry: &ReportEntry) {
        self.encoder.test_set_completed(entry);
    }

    fn test_starting(&self, entry: &ReportEntry) {
        self.encoder.test_starting(entry);
    }

    fn test_succeeded(&self, entry: &ReportEntry) {
        self.encoder.test_succeeded(entry);
    }

    fn test_failed(&self, entry: &ReportEntry) {
        self.encoder.test_failed(entry);
    }

    fn test_skipped(&self, entry: &ReportEntry) {
        self.encoder.test_skipped(entry);
    }

    fn test_error(&self, entry: &ReportEntry) {
        self.encoder.test_error(entry);
    }

    fn test_assumption_failure(&self, entry: &ReportEntry) {
        self.encoder.test_assumption_failure(entry);
    }

    fn test_execution_skipped_by_user(&self) {
        self.encoder.stop_on_next_test();
    }
}

impl ConsoleLogger for ForkedRunListener {
    fn debug(&self, message: &str) {
        self.encoder.console_debug_log(message);
    }

    fn info(&self, message: &str) {
        self.encoder.console_info_log(message);
    }

    fn warning(&self, message: &str) {
        self.encoder.console_warning_log(message);
    }

    fn error(&self, message: &str, error: Option<&dyn std::error::Error>) {
        self.encoder.console_error_log(ErrorReport {
            message: Some(message.to_string()),
            smart_trimmed: error.map(|e| e.to_string()),
            stack_trace: error.map(error_chain),
        });
    }
}

impl ConsoleOutputReceiver for ForkedRunListener {
    fn write_test_output(&self, output: &str, new_line: bool, stdout: bool) {
        if stdout {
            self.encoder.stdout(output, new_line);
        } else {
            self.encoder.stderr(output, new_line);
        }
    }
}
