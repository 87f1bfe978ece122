use std::fmt;

use crate::field::{self, CHARSET, FrameBuilder, SEPARATOR};
use crate::{ProtocolError, RunMode};

/// Magic number opening every worker→master frame.
pub const EVENT_MAGIC_NUMBER: &str = "maven-surefire-event";

/// Opcode-level kind of a worker→master event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SystemProperty,
    TestSetStarting,
    TestSetCompleted,
    TestStarting,
    TestSucceeded,
    TestFailed,
    TestSkipped,
    TestError,
    TestAssumptionFailure,
    StdOut,
    StdOutNewLine,
    StdErr,
    StdErrNewLine,
    ConsoleInfo,
    ConsoleDebug,
    ConsoleWarning,
    ConsoleError,
    Bye,
    StopOnNextTest,
    NextTest,
    JvmExitError,
}

impl EventKind {
    pub const ALL: [EventKind; 21] = [
        Self::SystemProperty,
        Self::TestSetStarting,
        Self::TestSetCompleted,
        Self::TestStarting,
        Self::TestSucceeded,
        Self::TestFailed,
        Self::TestSkipped,
        Self::TestError,
        Self::TestAssumptionFailure,
        Self::StdOut,
        Self::StdOutNewLine,
        Self::StdErr,
        Self::StdErrNewLine,
        Self::ConsoleInfo,
        Self::ConsoleDebug,
        Self::ConsoleWarning,
        Self::ConsoleError,
        Self::Bye,
        Self::StopOnNextTest,
        Self::NextTest,
        Self::JvmExitError,
    ];

    pub fn opcode(self) -> &'static str {
        match self {
            Self::SystemProperty => "sys-prop",
            Self::TestSetStarting => "testset-starting",
            Self::TestSetCompleted => "testset-completed",
            Self::TestStarting => "test-starting",
            Self::TestSucceeded => "test-succeeded",
            Self::TestFailed => "test-failed",
            Self::TestSkipped => "test-skipped",
            Self::TestError => "test-error",
            Self::TestAssumptionFailure => "test-assumption-failure",
            Self::StdOut => "std-out-stream",
            Self::StdOutNewLine => "std-out-stream-new-line",
            Self::StdErr => "std-err-stream",
            Self::StdErrNewLine => "std-err-stream-new-line",
            Self::ConsoleInfo => "console-info-log",
            Self::ConsoleDebug => "console-debug-log",
            Self::ConsoleWarning => "console-warning-log",
            Self::ConsoleError => "console-error-log",
            Self::Bye => "bye",
            Self::StopOnNextTest => "stop-on-next-test",
            Self::NextTest => "next-test",
            Self::JvmExitError => "jvm-exit-error",
        }
    }

    pub fn from_opcode(opcode: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.opcode() == opcode)
    }

    /// Control signals carry nothing but their opcode.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Bye | Self::StopOnNextTest | Self::NextTest)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestEventKind {
    TestSetStarting,
    TestSetCompleted,
    TestStarting,
    TestSucceeded,
    TestFailed,
    TestSkipped,
    TestError,
    TestAssumptionFailure,
}

impl From<TestEventKind> for EventKind {
    fn from(kind: TestEventKind) -> Self {
        match kind {
            TestEventKind::TestSetStarting => Self::TestSetStarting,
            TestEventKind::TestSetCompleted => Self::TestSetCompleted,
            TestEventKind::TestStarting => Self::TestStarting,
            TestEventKind::TestSucceeded => Self::TestSucceeded,
            TestEventKind::TestFailed => Self::TestFailed,
            TestEventKind::TestSkipped => Self::TestSkipped,
            TestEventKind::TestError => Self::TestError,
            TestEventKind::TestAssumptionFailure => Self::TestAssumptionFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Info,
    Debug,
    Warning,
}

/// Serialized throwable attached to a test event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackTrace {
    pub message: Option<String>,
    pub smart_trimmed: Option<String>,
    pub trace: String,
}

/// One test or test-set report as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportEntry {
    pub source_name: Option<String>,
    pub source_text: Option<String>,
    pub name: Option<String>,
    pub name_text: Option<String>,
    pub group: Option<String>,
    pub message: Option<String>,
    /// Elapsed milliseconds. `None` lets the master use its own wall clock.
    pub elapsed_ms: Option<u64>,
    pub stack_trace: Option<StackTrace>,
}

impl ReportEntry {
    pub fn new(source_name: impl Into<String>, name: Option<String>) -> Self {
        Self {
            source_name: Some(source_name.into()),
            name,
            ..Self::default()
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: StackTrace) -> Self {
        self.stack_trace = Some(stack_trace);
        self
    }
}

/// Error carried by console-error and jvm-exit-error events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorReport {
    pub message: Option<String>,
    pub smart_trimmed: Option<String>,
    pub stack_trace: Option<String>,
}

/// A worker→master message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SystemProperty {
        run_mode: RunMode,
        key: String,
        value: Option<String>,
    },
    Test {
        kind: TestEventKind,
        run_mode: RunMode,
        entry: ReportEntry,
    },
    Output {
        stream: OutputStream,
        run_mode: RunMode,
        message: Option<String>,
        new_line: bool,
    },
    Console {
        level: ConsoleLevel,
        message: Option<String>,
    },
    ConsoleError(ErrorReport),
    JvmExitError(ErrorReport),
    Bye,
    StopOnNextTest,
    NextTest,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SystemProperty { .. } => EventKind::SystemProperty,
            Self::Test { kind, .. } => (*kind).into(),
            Self::Output {
                stream, new_line, ..
            } => match (stream, new_line) {
                (OutputStream::Stdout, false) => EventKind::StdOut,
                (OutputStream::Stdout, true) => EventKind::StdOutNewLine,
                (OutputStream::Stderr, false) => EventKind::StdErr,
                (OutputStream::Stderr, true) => EventKind::StdErrNewLine,
            },
            Self::Console { level, .. } => match level {
                ConsoleLevel::Info => EventKind::ConsoleInfo,
                ConsoleLevel::Debug => EventKind::ConsoleDebug,
                ConsoleLevel::Warning => EventKind::ConsoleWarning,
            },
            Self::ConsoleError(_) => EventKind::ConsoleError,
            Self::JvmExitError(_) => EventKind::JvmExitError,
            Self::Bye => EventKind::Bye,
            Self::StopOnNextTest => EventKind::StopOnNextTest,
            Self::NextTest => EventKind::NextTest,
        }
    }

    /// Run mode tag, for the event kinds that carry one.
    pub fn run_mode(&self) -> Option<RunMode> {
        match self {
            Self::SystemProperty { run_mode, .. }
            | Self::Test { run_mode, .. }
            | Self::Output { run_mode, .. } => Some(*run_mode),
            _ => None,
        }
    }

    /// Encode as a wire frame:
    /// `:<magic>:<opcode>:[<run-mode>:][<charset>:](<field>:)*\n`.
    pub fn encode(&self) -> Vec<u8> {
        let mut f = FrameBuilder::new(EVENT_MAGIC_NUMBER, self.kind().opcode());
        match self {
            Self::SystemProperty {
                run_mode,
                key,
                value,
            } => {
                f.raw(run_mode.token())
                    .raw(CHARSET)
                    .text(Some(key.as_str()))
                    .text(value.as_deref());
            }
            Self::Test {
                run_mode, entry, ..
            } => {
                f.raw(run_mode.token()).raw(CHARSET);
                write_entry(&mut f, entry);
            }
            Self::Output {
                run_mode, message, ..
            } => {
                f.raw(run_mode.token())
                    .raw(CHARSET)
                    .text(message.as_deref());
            }
            Self::Console { message, .. } => {
                f.raw(CHARSET).text(message.as_deref());
            }
            Self::ConsoleError(report) | Self::JvmExitError(report) => {
                f.raw(CHARSET)
                    .text(report.message.as_deref())
                    .text(report.smart_trimmed.as_deref())
                    .text(report.stack_trace.as_deref());
            }
            Self::Bye | Self::StopOnNextTest | Self::NextTest => {}
        }
        f.finish()
    }
}

fn write_entry(f: &mut FrameBuilder, entry: &ReportEntry) {
    f.text(entry.source_name.as_deref())
        .text(entry.source_text.as_deref())
        .text(entry.name.as_deref())
        .text(entry.name_text.as_deref())
        .text(entry.group.as_deref())
        .text(entry.message.as_deref())
        .integer(entry.elapsed_ms);
    match &entry.stack_trace {
        Some(st) => f
            .text(st.message.as_deref())
            .text(st.smart_trimmed.as_deref())
            .text(Some(st.trace.as_str())),
        None => f.text(None).text(None).text(None),
    };
}

/// Decode one event frame. Trailing line terminators are ignored.
pub fn decode_event(frame: &str) -> Result<Event, ProtocolError> {
    let body = frame.trim_end_matches(['\n', '\r']);
    let rest = body
        .strip_prefix(SEPARATOR)
        .and_then(|b| b.strip_prefix(EVENT_MAGIC_NUMBER))
        .and_then(|b| b.strip_prefix(SEPARATOR))
        .ok_or_else(|| ProtocolError::Malformed("missing event magic number".into()))?;

    let mut tokens = Tokens::new(rest);
    let opcode = tokens.next("opcode")?;
    let kind =
        EventKind::from_opcode(opcode).ok_or_else(|| ProtocolError::UnknownOpcode(opcode.into()))?;

    let event = match kind {
        EventKind::SystemProperty => {
            let run_mode = tokens.run_mode()?;
            tokens.charset()?;
            let key = tokens
                .text("key")?
                .ok_or_else(|| ProtocolError::Malformed("system property without key".into()))?;
            let value = tokens.text("value")?;
            Event::SystemProperty {
                run_mode,
                key,
                value,
            }
        }
        EventKind::TestSetStarting
        | EventKind::TestSetCompleted
        | EventKind::TestStarting
        | EventKind::TestSucceeded
        | EventKind::TestFailed
        | EventKind::TestSkipped
        | EventKind::TestError
        | EventKind::TestAssumptionFailure => {
            let run_mode = tokens.run_mode()?;
            tokens.charset()?;
            Event::Test {
                kind: test_kind(kind),
                run_mode,
                entry: read_entry(&mut tokens)?,
            }
        }
        EventKind::StdOut | EventKind::StdOutNewLine | EventKind::StdErr | EventKind::StdErrNewLine => {
            let run_mode = tokens.run_mode()?;
            tokens.charset()?;
            Event::Output {
                stream: if matches!(kind, EventKind::StdOut | EventKind::StdOutNewLine) {
                    OutputStream::Stdout
                } else {
                    OutputStream::Stderr
                },
                run_mode,
                message: tokens.text("message")?,
                new_line: matches!(kind, EventKind::StdOutNewLine | EventKind::StdErrNewLine),
            }
        }
        EventKind::ConsoleInfo | EventKind::ConsoleDebug | EventKind::ConsoleWarning => {
            tokens.charset()?;
            Event::Console {
                level: match kind {
                    EventKind::ConsoleInfo => ConsoleLevel::Info,
                    EventKind::ConsoleDebug => ConsoleLevel::Debug,
                    _ => ConsoleLevel::Warning,
                },
                message: tokens.text("message")?,
            }
        }
        EventKind::ConsoleError | EventKind::JvmExitError => {
            tokens.charset()?;
            let report = ErrorReport {
                message: tokens.text("message")?,
                smart_trimmed: tokens.text("smart trimmed stack trace")?,
                stack_trace: tokens.text("stack trace")?,
            };
            if kind == EventKind::ConsoleError {
                Event::ConsoleError(report)
            } else {
                Event::JvmExitError(report)
            }
        }
        EventKind::Bye => Event::Bye,
        EventKind::StopOnNextTest => Event::StopOnNextTest,
        EventKind::NextTest => Event::NextTest,
    };

    tokens.finish()?;
    Ok(event)
}

fn test_kind(kind: EventKind) -> TestEventKind {
    match kind {
        EventKind::TestSetStarting => TestEventKind::TestSetStarting,
        EventKind::TestSetCompleted => TestEventKind::TestSetCompleted,
        EventKind::TestStarting => TestEventKind::TestStarting,
        EventKind::TestSucceeded => TestEventKind::TestSucceeded,
        EventKind::TestFailed => TestEventKind::TestFailed,
        EventKind::TestSkipped => TestEventKind::TestSkipped,
        EventKind::TestError => TestEventKind::TestError,
        _ => TestEventKind::TestAssumptionFailure,
    }
}

fn read_entry(tokens: &mut Tokens<'_>) -> Result<ReportEntry, ProtocolError> {
    let source_name = tokens.text("source name")?;
    let source_text = tokens.text("source text")?;
    let name = tokens.text("name")?;
    let name_text = tokens.text("name text")?;
    let group = tokens.text("group")?;
    let message = tokens.text("message")?;
    let elapsed_ms = tokens.integer("elapsed time")?;
    let trace_message = tokens.text("trace message")?;
    let smart_trimmed = tokens.text("smart trimmed stack trace")?;
    let stack_trace = tokens.text("stack trace")?.map(|trace| StackTrace {
        message: trace_message,
        smart_trimmed,
        trace,
    });
    Ok(ReportEntry {
        source_name,
        source_text,
        name,
        name_text,
        group,
        message,
        elapsed_ms,
        stack_trace,
    })
}

/// Cursor over the `:`-separated tokens after the magic number.
struct Tokens<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Tokens<'a> {
    fn new(rest: &'a str) -> Self {
        Self {
            inner: rest.split(SEPARATOR),
        }
    }

    fn next(&mut self, what: &str) -> Result<&'a str, ProtocolError> {
        self.inner
            .next()
            .ok_or_else(|| ProtocolError::Malformed(format!("missing {what}")))
    }

    fn run_mode(&mut self) -> Result<RunMode, ProtocolError> {
        RunMode::from_token(self.next("run mode")?)
    }

    fn charset(&mut self) -> Result<(), ProtocolError> {
        match self.next("charset")? {
            CHARSET => Ok(()),
            other => Err(ProtocolError::Malformed(format!("unsupported charset {other}"))),
        }
    }

    fn text(&mut self, what: &str) -> Result<Option<String>, ProtocolError> {
        field::decode_text(self.next(what)?)
    }

    fn integer(&mut self, what: &str) -> Result<Option<u64>, ProtocolError> {
        field::decode_integer(self.next(what)?)
    }

    /// Accept the empty token left by the closing separator, nothing more.
    fn finish(mut self) -> Result<(), ProtocolError> {
        match (self.inner.next(), self.inner.next()) {
            (None, _) | (Some(""), None) => Ok(()),
            _ => Err(ProtocolError::Malformed("unexpected trailing tokens".into())),
        }
    }
}
