//! Background command reader of the forked worker.
//!
//! One thread owns the inbound channel. Every decoded command is applied
//! to the work queue and then fanned out to listeners, in stream order.
//! Test providers pull class names through [`TestClasses`] iterators,
//! each of which asks the master for the next class before it blocks.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use fork_proto::{Command, CommandKind, ShutdownMode};
use tracing::{debug, error, warn};

use crate::decoder::ChannelDecoder;
use crate::dump::DumpSink;
use crate::encoder::ChannelEncoder;
use crate::error::ChannelError;
use crate::listeners::{CommandListener, ListenerId, ListenerRegistry};
use crate::queue::WorkQueue;
use crate::terminator::{ProcessTerminator, apply_shutdown};

const NEW: u8 = 0;
const RUNNING: u8 = 1;
const TERMINATED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    New,
    Running,
    Terminated,
}

type Input = Box<dyn Read + Send>;

/// Owns the command channel thread. Terminal once stopped: obtain a new
/// reader rather than restarting one. Dropping the reader stops it.
pub struct CommandReader {
    shared: Arc<Shared>,
    input: Mutex<Option<Input>>,
}

struct Shared {
    state: AtomicU8,
    started: Mutex<bool>,
    started_changed: Condvar,
    queue: WorkQueue,
    listeners: ListenerRegistry,
    test_set_finished: AtomicBool,
    iterated: AtomicUsize,
    shutdown: ShutdownMode,
    encoder: Arc<ChannelEncoder>,
    terminator: Arc<dyn ProcessTerminator>,
    dump: DumpSink,
}

impl CommandReader {
    pub fn new(
        input: impl Read + Send + 'static,
        encoder: Arc<ChannelEncoder>,
        shutdown: ShutdownMode,
        terminator: Arc<dyn ProcessTerminator>,
        dump: DumpSink,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(NEW),
                started: Mutex::new(false),
                started_changed: Condvar::new(),
                queue: WorkQueue::new(),
                listeners: ListenerRegistry::new(),
                test_set_finished: AtomicBool::new(false),
                iterated: AtomicUsize::new(0),
                shutdown,
                encoder,
                terminator,
                dump,
            }),
            input: Mutex::new(Some(Box::new(input))),
        }
    }

    pub fn state(&self) -> ReaderState {
        match self.shared.state.load(Ordering::Acquire) {
            NEW => ReaderState::New,
            RUNNING => ReaderState::Running,
            _ => ReaderState::Terminated,
        }
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.shared.shutdown
    }

    /// Start the reader thread. Idempotent; a no-op once terminated.
    pub fn start(&self) {
        if self
            .shared
            .state
            .compare_exchange(NEW, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let input = self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(input) = input else {
            self.shared.terminate();
            return;
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("fork-command-reader".into())
            .spawn(move || shared.run(input));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn command reader thread");
            self.shared
                .dump
                .dump_error(&e, "Failed to start the command reader");
            self.shared.terminate();
        }
    }

    /// Start if needed and wait until the reader thread runs. Returns
    /// false when the reader was terminated before it could start.
    pub fn await_started(&self) -> bool {
        self.start();
        let mut started = self
            .shared
            .started
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !*started && self.state() != ReaderState::Terminated {
            started = self
                .shared
                .started_changed
                .wait(started)
                .unwrap_or_else(|e| e.into_inner());
        }
        *started
    }

    /// Terminate the reader: seal the queue, drop listeners and wake every
    /// blocked iterator. A read already in progress is abandoned; its
    /// outcome is ignored.
    pub fn stop(&self) {
        if self.shared.terminate() {
            debug!("command reader stopped");
        }
    }

    /// New iterator over the class names pushed by the master, starting
    /// the reader if needed.
    pub fn test_classes(&self) -> TestClasses {
        self.start();
        TestClasses {
            shared: Arc::clone(&self.shared),
            cursor: 0,
        }
    }

    /// Class names handed out so far by the furthest iterator.
    pub fn iterated(&self) -> Vec<String> {
        self.shared
            .queue
            .prefix(self.shared.iterated.load(Ordering::Acquire))
    }

    pub fn is_test_set_finished(&self) -> bool {
        self.shared.test_set_finished.load(Ordering::Acquire)
    }

    /// Register `listener` for commands of `kind`, or for every command
    /// when `kind` is `None`.
    pub fn add_listener(
        &self,
        kind: Option<CommandKind>,
        listener: impl CommandListener + 'static,
    ) -> ListenerId {
        self.shared.listeners.add(kind, Arc::new(listener))
    }

    pub fn add_shutdown_listener(&self, listener: impl CommandListener + 'static) -> ListenerId {
        self.add_listener(Some(CommandKind::Shutdown), listener)
    }

    pub fn add_skip_next_tests_listener(
        &self,
        listener: impl CommandListener + 'static,
    ) -> ListenerId {
        self.add_listener(Some(CommandKind::SkipSinceNextTest), listener)
    }

    pub fn add_noop_listener(&self, listener: impl CommandListener + 'static) -> ListenerId {
        self.add_listener(Some(CommandKind::Noop), listener)
    }

    pub fn add_bye_ack_listener(&self, listener: impl CommandListener + 'static) -> ListenerId {
        self.add_listener(Some(CommandKind::ByeAck), listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }
}

impl Drop for CommandReader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == TERMINATED
    }

    /// Move to TERMINATED. Returns true for the caller that made the
    /// transition.
    fn terminate(&self) -> bool {
        let previous = self.state.swap(TERMINATED, Ordering::AcqRel);
        if previous == TERMINATED {
            return false;
        }
        self.queue.seal();
        self.listeners.clear();
        let _started = self.started.lock().unwrap_or_else(|e| e.into_inner());
        self.started_changed.notify_all();
        true
    }

    fn mark_started(&self) {
        let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
        *started = true;
        self.started_changed.notify_all();
    }

    fn run(&self, input: Input) {
        self.mark_started();
        debug!(shutdown = %self.shutdown, "command reader started");

        let mut decoder = ChannelDecoder::new(input, self.dump.clone());
        let failure = loop {
            match decoder.decode() {
                Ok(command) if !self.is_terminated() => self.handle(command),
                Ok(command) => debug!(%command, "ignoring command after stop"),
                Err(e) => break e,
            }
        };

        if self.is_terminated() {
            debug!(reason = %failure, "command channel closed after stop");
        } else {
            match &failure {
                ChannelError::EndOfStream => {
                    debug!("command channel reached end of stream");
                }
                ChannelError::Io(e) => {
                    error!(error = %e, "command channel failed");
                    self.dump.dump_error(e, "Command channel from the master process failed");
                }
            }
            if !self.test_set_finished.load(Ordering::Acquire) {
                self.exit_by_configuration();
            }
        }

        self.terminate();
    }

    fn handle(&self, command: Command) {
        debug!(opcode = %command.kind(), "received command");
        match command.kind() {
            CommandKind::RunClass => {
                let class = command.payload().unwrap_or_default();
                if class.trim().is_empty() {
                    warn!("ignoring run-testclass without class name");
                    return;
                }
                if !self.queue.push(class) {
                    debug!(class, "test set already sealed, ignoring class");
                    return;
                }
            }
            CommandKind::TestSetFinished => {
                self.test_set_finished.store(true, Ordering::Release);
                if self.queue.seal() {
                    debug!(classes = self.queue.len(), "test set sealed");
                }
            }
            CommandKind::Shutdown => {
                self.queue.seal();
            }
            CommandKind::SkipSinceNextTest | CommandKind::Noop | CommandKind::ByeAck => {}
        }
        self.listeners.dispatch(&command);
    }

    /// The channel is gone before the test set finished: unblock
    /// iterators, tell listeners, then apply the shutdown policy.
    fn exit_by_configuration(&self) {
        self.queue.seal();
        let shutdown = Command::shutdown(self.shutdown);
        self.listeners.dispatch(&shutdown);
        if !self.shutdown.is_default() {
            self.dump.dump_text(&format!(
                "The master process closed the command channel before the test set finished; applying shutdown mode {}",
                self.shutdown
            ));
        }
        apply_shutdown(self.shutdown, self.terminator.as_ref());
    }
}

/// Cursor over the class names pushed by the master.
///
/// Iterators are independent: each starts at the first class ever
/// pushed and keeps its own position. Every call that may still yield a
/// class sends one next-test request, whether or not a class is already
/// queued.
pub struct TestClasses {
    shared: Arc<Shared>,
    cursor: usize,
}

impl TestClasses {
    /// Class names this iterator has returned so far.
    pub fn consumed(&self) -> Vec<String> {
        self.shared.queue.prefix(self.cursor)
    }
}

impl Iterator for TestClasses {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let queue = &self.shared.queue;
        let exhausted = queue.is_sealed() && !queue.has(self.cursor);
        if !exhausted && !self.shared.is_terminated() {
            self.shared.encoder.acquire_next_test();
        }
        let class = queue.wait_for(self.cursor)?;
        self.cursor += 1;
        self.shared.iterated.fetch_max(self.cursor, Ordering::AcqRel);
        Some(class)
    }
}
