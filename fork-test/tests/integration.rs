#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::unreachable
)]

use std::io::Write;
use std::net::Shutdown;
use std::ops::{Deref, DerefMut};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use fork_master::{ForkClient, ForkSummary};
use fork_proto::{
    Command, Event, EventFrame, ReportEntry, RunMode, ShutdownMode, StackTrace, TestEventKind,
};
use fork_worker::{
    BooterConfig, BooterError, ConsoleLogger, ConsoleOutputReceiver, ForkedBooter,
    ForkedRunListener, ProcessTerminator, ProviderRun, RunListener, RunResult, TestClasses,
};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exit(i32),
    Halt(i32),
}

#[derive(Default)]
struct RecordingTerminator(Mutex<Vec<Termination>>);

impl RecordingTerminator {
    fn calls(&self) -> Vec<Termination> {
        self.0.lock().unwrap().clone()
    }
}

impl ProcessTerminator for RecordingTerminator {
    fn exit(&self, code: i32) {
        self.0.lock().unwrap().push(Termination::Exit(code));
    }

    fn halt(&self, code: i32) {
        self.0.lock().unwrap().push(Termination::Halt(code));
    }
}

/// Runs each class as a single test; classes ending in `Fails` fail and,
/// with `rerun_failures`, pass on a rerun. `threads` > 1 reports every
/// test from that many threads at once.
#[derive(Default)]
struct ScriptedProvider {
    rerun_failures: bool,
    threads: usize,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    fn run_class(&self, class: &str, reporter: &ForkedRunListener, result: &mut RunResult) {
        reporter.test_set_starting(&ReportEntry::new(class, None));
        reporter.info(&format!("Running {class}"));

        let entry = ReportEntry::new(class, Some("test".into()));
        reporter.test_starting(&entry);
        reporter.write_test_output("hello from ", false, true);
        reporter.write_test_output(class, true, true);

        if class.ends_with("Fails") {
            reporter.test_failed(&entry.clone().with_stack_trace(StackTrace {
                message: Some("expected: <1> but was: <2>".into()),
                smart_trimmed: Some(format!("{class}.test:7 expected")),
                trace: format!(
                    "java.lang.AssertionError: expected\n\tat {class}.test(X.java:7)\n\tat runner.Main.run(Main.java:1)"
                ),
            }));
            result.failures += 1;
            if self.rerun_failures {
                reporter.set_run_mode(RunMode::RerunAfterFailure);
                reporter.test_starting(&entry);
                reporter.test_succeeded(&entry);
                reporter.set_run_mode(RunMode::Normal);
            }
        } else {
            reporter.test_succeeded(&entry.clone().with_elapsed(5));
        }
        result.completed += 1;
        reporter.test_set_completed(&ReportEntry::new(class, None));
    }
}

impl ProviderRun for ScriptedProvider {
    fn invoke(
        &mut self,
        tests: &mut TestClasses,
        reporter: &ForkedRunListener,
    ) -> Result<RunResult, BooterError> {
        let this = &*self;
        let mut result = RunResult::default();
        for class in tests.by_ref() {
            this.seen.lock().unwrap().push(class.clone());
            if this.threads > 1 {
                thread::scope(|s| {
                    for t in 0..this.threads {
                        let class = format!("{class}{t}");
                        s.spawn(move || {
                            let mut ignored = RunResult::default();
                            this.run_class(&class, reporter, &mut ignored);
                        });
                    }
                });
                result.completed += 1;
            } else {
                this.run_class(&class, reporter, &mut result);
            }
        }
        Ok(result)
    }
}

type Client = ForkClient<OwnedReadHalf, OwnedWriteHalf>;

/// Test harness: worker booter on an OS thread, master client on tokio,
/// joined by a Unix socket pair.
///
/// Implements `Drop` to close the master end and join the worker even on panic.
struct Harness {
    client: Option<Client>,
    worker: Option<JoinHandle<i32>>,
    terminator: Arc<RecordingTerminator>,
    _dump_dir: tempfile::TempDir,
}

impl Harness {
    fn start(config: BooterConfig, provider: ScriptedProvider) -> Self {
        Self::start_with_noise(config, provider, b"", b"")
    }

    /// Like `start`, but `worker_noise` is printed on the event stream
    /// before the booter takes over and `master_noise` precedes the
    /// first command.
    fn start_with_noise(
        mut config: BooterConfig,
        mut provider: ScriptedProvider,
        worker_noise: &[u8],
        master_noise: &[u8],
    ) -> Self {
        let dump_dir = tempfile::tempdir().expect("failed to create temp dir");
        config.dump_dir = Some(dump_dir.path().to_path_buf());

        let (mut master_end, mut worker_end) = UnixStream::pair().expect("socket pair");
        worker_end.write_all(worker_noise).unwrap();
        master_end.write_all(master_noise).unwrap();

        let terminator = Arc::new(RecordingTerminator::default());
        let booter = ForkedBooter::new(config, Arc::clone(&terminator) as Arc<dyn ProcessTerminator>);
        let worker = thread::spawn(move || {
            let input = worker_end.try_clone().expect("clone worker end");
            let output = worker_end.try_clone().expect("clone worker end");
            let status = booter.run(input, output, &mut provider);
            // Stand-in for process exit: the reader thread's clone of the
            // socket would otherwise keep the master waiting for EOF.
            let _ = worker_end.shutdown(Shutdown::Both);
            status
        });

        master_end.set_nonblocking(true).unwrap();
        let (reader, writer) = tokio::net::UnixStream::from_std(master_end)
            .expect("register master end")
            .into_split();

        Self {
            client: Some(ForkClient::new(reader, writer)),
            worker: Some(worker),
            terminator,
            _dump_dir: dump_dir,
        }
    }

    /// Close the master end and return the worker's exit status.
    async fn finish(mut self) -> i32 {
        drop(self.client.take());
        let worker = self.worker.take().expect("worker already joined");
        tokio::task::spawn_blocking(move || worker.join().expect("worker thread panicked"))
            .await
            .unwrap()
    }

    /// Read frames until the worker asks for a test.
    async fn await_next_test(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.next_frame().await.unwrap() {
                Some(EventFrame::Event(Event::NextTest)) => return events,
                Some(EventFrame::Event(event)) => events.push(event),
                Some(other) => panic!("unexpected frame {other:?}"),
                None => panic!("worker closed its stream, events so far: {events:?}"),
            }
        }
    }
}

impl Deref for Harness {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

impl DerefMut for Harness {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Drop the client first so the worker sees end of stream.
        drop(self.client.take());
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

fn classes(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn drive(h: &mut Harness, names: &[&str]) -> (ForkSummary, Vec<Event>) {
    let mut events = Vec::new();
    let summary = h
        .drive(classes(names), |e| events.push(e.clone()))
        .await
        .expect("drive failed");
    (summary, events)
}

fn tests_of(events: &[Event], kind: TestEventKind) -> Vec<(String, RunMode)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Test {
                kind: k,
                run_mode,
                entry,
            } if *k == kind => Some((entry.source_name.clone().unwrap_or_default(), *run_mode)),
            _ => None,
        })
        .collect()
}

// ── full test set ────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_test_set() {
    let mut config = BooterConfig::default();
    config.system_properties.insert("basedir".into(), "/work".into());
    let provider = ScriptedProvider::default();
    let seen = Arc::clone(&provider.seen);
    let mut h = Harness::start(config, provider);

    let (summary, events) = drive(&mut h, &["pkg.ATest", "pkg.BTest", "pkg.CFails"]).await;

    assert_eq!(summary.classes_sent, classes(&["pkg.ATest", "pkg.BTest", "pkg.CFails"]));
    assert!(summary.test_set_finished_sent);
    assert!(summary.bye_received);
    assert_eq!(summary.corrupted_lines, 0);
    assert_eq!(summary.jvm_exit_error, None);
    assert_eq!(*seen.lock().unwrap(), summary.classes_sent);

    assert!(matches!(&events[0], Event::SystemProperty { key, value, .. }
        if key == "basedir" && value.as_deref() == Some("/work")));
    assert_eq!(events.last(), Some(&Event::Bye));
    assert_eq!(
        tests_of(&events, TestEventKind::TestSucceeded),
        vec![
            ("pkg.ATest".to_string(), RunMode::Normal),
            ("pkg.BTest".to_string(), RunMode::Normal),
        ]
    );
    assert_eq!(
        tests_of(&events, TestEventKind::TestFailed),
        vec![("pkg.CFails".to_string(), RunMode::Normal)]
    );

    let output: String = events
        .iter()
        .filter_map(|e| match e {
            Event::Output { message: Some(m), new_line, .. } => {
                Some(if *new_line { format!("{m}\n") } else { m.clone() })
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        output,
        "hello from pkg.ATest\nhello from pkg.BTest\nhello from pkg.CFails\n"
    );

    assert_eq!(h.finish().await, 0);
}

#[tokio::test]
async fn test_rerun_events_carry_run_mode() {
    let provider = ScriptedProvider {
        rerun_failures: true,
        ..ScriptedProvider::default()
    };
    let mut h = Harness::start(BooterConfig::default(), provider);

    let (_, events) = drive(&mut h, &["pkg.Fails"]).await;

    assert_eq!(
        tests_of(&events, TestEventKind::TestStarting),
        vec![
            ("pkg.Fails".to_string(), RunMode::Normal),
            ("pkg.Fails".to_string(), RunMode::RerunAfterFailure),
        ]
    );
    assert_eq!(
        tests_of(&events, TestEventKind::TestSucceeded),
        vec![("pkg.Fails".to_string(), RunMode::RerunAfterFailure)]
    );
    assert_eq!(
        tests_of(&events, TestEventKind::TestSetCompleted),
        vec![("pkg.Fails".to_string(), RunMode::Normal)]
    );
    assert_eq!(h.finish().await, 0);
}

#[tokio::test]
async fn test_trimmed_stack_traces() {
    let config = BooterConfig {
        trim_stack_traces: true,
        ..BooterConfig::default()
    };
    let mut h = Harness::start(config, ScriptedProvider::default());
    let (_, events) = drive(&mut h, &["pkg.Fails"]).await;

    let trace = events
        .iter()
        .find_map(|e| match e {
            Event::Test {
                kind: TestEventKind::TestFailed,
                entry,
                ..
            } => entry.stack_trace.clone(),
            _ => None,
        })
        .expect("failed test carries a trace");
    assert_eq!(
        trace.trace,
        "java.lang.AssertionError: expected\n\tat pkg.Fails.test(X.java:7)"
    );
    assert_eq!(h.finish().await, 0);
}

// ── concurrency ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_parallel_reporting_never_tears_frames() {
    let provider = ScriptedProvider {
        threads: 8,
        ..ScriptedProvider::default()
    };
    let mut h = Harness::start(BooterConfig::default(), provider);
    let (summary, events) = drive(&mut h, &["pkg.P1", "pkg.P2"]).await;

    assert_eq!(summary.corrupted_lines, 0);
    assert_eq!(summary.malformed_frames, 0);
    // 2 classes × 8 threads, each a full starting/succeeded pair.
    assert_eq!(tests_of(&events, TestEventKind::TestStarting).len(), 16);
    assert_eq!(tests_of(&events, TestEventKind::TestSucceeded).len(), 16);
    assert_eq!(h.finish().await, 0);
}

// ── noise and resynchronization ──────────────────────────────────────

#[tokio::test]
async fn test_stray_worker_output_is_reported_as_corrupted() {
    let mut h = Harness::start_with_noise(
        BooterConfig::default(),
        ScriptedProvider::default(),
        b"Listening for transport dt_socket at address: 5005\n",
        b"",
    );
    let (summary, _) = drive(&mut h, &["pkg.ATest"]).await;
    assert_eq!(summary.corrupted_lines, 1);
    assert!(summary.bye_received);
    assert_eq!(h.finish().await, 0);
}

#[tokio::test]
async fn test_garbage_on_command_channel_is_skipped() {
    let provider = ScriptedProvider::default();
    let seen = Arc::clone(&provider.seen);
    let mut h = Harness::start_with_noise(
        BooterConfig::default(),
        provider,
        b"",
        b"\x00\x01junk:maven-surefire-command:bogus:\n:maven-surefire-command:run-",
    );

    let (summary, _) = drive(&mut h, &["pkg.ATest"]).await;
    assert!(summary.bye_received);
    assert_eq!(*seen.lock().unwrap(), classes(&["pkg.ATest"]));
    assert_eq!(h.finish().await, 0);
}

#[tokio::test]
async fn test_example_run_class_frame_on_the_wire() {
    let provider = ScriptedProvider::default();
    let seen = Arc::clone(&provider.seen);
    let mut h = Harness::start(BooterConfig::default(), provider);

    h.await_next_test().await;
    let (reader, mut writer) = h.client.take().unwrap().into_inner();
    writer
        .write_all(b":maven-surefire-command:run-testclass:cGtnLkFUZXN0:\n")
        .await
        .unwrap();
    h.client = Some(ForkClient::new(reader, writer));

    h.await_next_test().await;
    h.test_set_finished().await.unwrap();
    loop {
        match h.next_frame().await.unwrap() {
            Some(EventFrame::Event(Event::Bye)) => break,
            Some(_) => {}
            None => panic!("worker closed before bye"),
        }
    }
    h.bye_ack().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), classes(&["pkg.ATest"]));
    assert_eq!(h.finish().await, 0);
}

// ── shutdown ─────────────────────────────────────────────────────────

fn eof_config(shutdown: &str) -> BooterConfig {
    BooterConfig {
        shutdown: Some(shutdown.into()),
        bye_ack_timeout_ms: 100,
        ..BooterConfig::default()
    }
}

/// Hands out one class, then closes the master end mid test set.
async fn run_then_vanish(shutdown: &str) -> (Vec<String>, Vec<Termination>, i32) {
    let provider = ScriptedProvider::default();
    let seen = Arc::clone(&provider.seen);
    let mut h = Harness::start(eof_config(shutdown), provider);

    h.await_next_test().await;
    h.run_class("pkg.ATest").await.unwrap();
    let (reader, writer) = h.client.take().unwrap().into_inner();
    drop(writer);
    drop(reader);

    let terminator = Arc::clone(&h.terminator);
    let status = h.finish().await;
    let seen = seen.lock().unwrap().clone();
    (seen, terminator.calls(), status)
}

#[tokio::test]
async fn test_master_gone_with_default_shutdown_finishes_normally() {
    let (seen, calls, status) = run_then_vanish("testset").await;
    assert_eq!(seen, classes(&["pkg.ATest"]));
    assert!(calls.is_empty(), "unexpected terminations {calls:?}");
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_master_gone_with_exit_shutdown_exits() {
    let (seen, calls, _) = run_then_vanish("exit").await;
    assert_eq!(seen, classes(&["pkg.ATest"]));
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| *c == Termination::Exit(1)), "{calls:?}");
}

#[tokio::test]
async fn test_master_gone_with_kill_shutdown_halts() {
    let (_, calls, _) = run_then_vanish("kill").await;
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| *c == Termination::Halt(1)), "{calls:?}");
}

#[tokio::test]
async fn test_shutdown_command_halts_worker() {
    let mut h = Harness::start(eof_config("testset"), ScriptedProvider::default());
    h.await_next_test().await;
    h.shutdown(ShutdownMode::Kill).await.unwrap();
    h.send(&Command::noop()).await.unwrap();

    // A recorded halt does not stop the worker; it drains until EOF.
    let terminator = Arc::clone(&h.terminator);
    h.finish().await;
    assert!(terminator.calls().contains(&Termination::Halt(1)));
}
