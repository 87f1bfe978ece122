//! Run loop of a forked test worker.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};

use fork_proto::{Command, ErrorReport};
use tracing::{debug, error, info, warn};

use crate::config::BooterConfig;
use crate::dump::DumpSink;
use crate::encoder::ChannelEncoder;
use crate::error::{BooterError, BooterResult, error_chain};
use crate::listener::ForkedRunListener;
use crate::reader::{CommandReader, TestClasses};
use crate::terminator::{ProcessTerminator, apply_shutdown};

/// Totals reported by a provider for one test set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub completed: u32,
    pub errors: u32,
    pub failures: u32,
    pub skipped: u32,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.errors == 0 && self.failures == 0
    }
}

/// A test engine plugged into the worker.
///
/// It pulls class names from `tests` and reports through `reporter`.
/// Test failures are reported, not returned; `Err` means the engine
/// itself could not run.
pub trait ProviderRun {
    fn invoke(
        &mut self,
        tests: &mut TestClasses,
        reporter: &ForkedRunListener,
    ) -> Result<RunResult, BooterError>;
}

pub struct ForkedBooter {
    config: BooterConfig,
    terminator: Arc<dyn ProcessTerminator>,
}

impl ForkedBooter {
    pub fn new(config: BooterConfig, terminator: Arc<dyn ProcessTerminator>) -> Self {
        Self { config, terminator }
    }

    pub fn config(&self) -> &BooterConfig {
        &self.config
    }

    /// Serve one test set over `input`/`output` and return the process
    /// exit status: 0 when the provider ran, 1 on infrastructure failure.
    pub fn run(
        &self,
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
        provider: &mut dyn ProviderRun,
    ) -> i32 {
        let dump = self.config.dump_sink();
        let encoder = Arc::new(
            ChannelEncoder::new(output, dump.clone())
                .with_trimmed_stack_traces(self.config.trim_stack_traces),
        );

        let status = match self.execute(input, &encoder, &dump, provider) {
            Ok(result) => {
                info!(
                    completed = result.completed,
                    errors = result.errors,
                    failures = result.failures,
                    skipped = result.skipped,
                    "test set finished"
                );
                0
            }
            Err(e) => {
                error!(error = %e, "forked test run failed");
                dump.dump_error(&e, "Forked test run failed");
                encoder.jvm_exit_error(ErrorReport {
                    message: Some(e.to_string()),
                    smart_trimmed: None,
                    stack_trace: Some(error_chain(&e)),
                });
                1
            }
        };
        if encoder.check_error() {
            warn!("some events could not be delivered to the master process");
        }
        encoder.on_jvm_exit();
        status
    }

    fn execute(
        &self,
        input: impl Read + Send + 'static,
        encoder: &Arc<ChannelEncoder>,
        dump: &DumpSink,
        provider: &mut dyn ProviderRun,
    ) -> BooterResult<RunResult> {
        let shutdown = self.config.shutdown_mode()?;
        let reader = CommandReader::new(
            input,
            Arc::clone(encoder),
            shutdown,
            Arc::clone(&self.terminator),
            dump.clone(),
        );

        let terminator = Arc::clone(&self.terminator);
        reader.add_shutdown_listener(move |command: &Command| {
            on_shutdown_command(command, terminator.as_ref());
        });
        let (ack_tx, ack_rx) = mpsc::channel();
        reader.add_bye_ack_listener(move |_: &Command| {
            let _ = ack_tx.send(());
        });

        if !reader.await_started() {
            return Err(BooterError::ReaderTerminated);
        }
        encoder.send_system_properties(&self.config.system_properties);

        let reporter = ForkedRunListener::new(Arc::clone(encoder));
        let mut tests = reader.test_classes();
        let result = provider.invoke(&mut tests, &reporter)?;
        debug!(classes = tests.consumed().len(), "provider returned");

        encoder.bye();
        // The listener owns the only sender and a terminated reader drops
        // its listeners, so a lost channel disconnects instead of timing out.
        match ack_rx.recv_timeout(self.config.bye_ack_timeout()) {
            Ok(()) => debug!("bye acknowledged"),
            Err(RecvTimeoutError::Timeout) => dump.dump_text(&format!(
                "No bye-ack from the master process within {} ms",
                self.config.bye_ack_timeout_ms
            )),
            Err(RecvTimeoutError::Disconnected) => dump.dump_text(
                "No bye-ack from the master process: command channel closed",
            ),
        }
        reader.stop();
        Ok(result)
    }
}

/// A shutdown pushed by the master: exit and kill take effect at once,
/// the default mode lets the sealed test set drain.
fn on_shutdown_command(command: &Command, terminator: &dyn ProcessTerminator) {
    match command.shutdown_mode() {
        Some(Ok(mode)) => apply_shutdown(mode, terminator),
        Some(Err(e)) => warn!(error = %e, "ignoring shutdown command"),
        None => {}
    }
}
