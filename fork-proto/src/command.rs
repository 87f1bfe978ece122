use std::fmt;

use crate::field::{self, FrameBuilder};
use crate::{ProtocolError, ShutdownMode};

/// Magic number opening every master→worker frame.
pub const COMMAND_MAGIC_NUMBER: &str = "maven-surefire-command";

/// Kind of a master→worker command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    RunClass,
    TestSetFinished,
    SkipSinceNextTest,
    Shutdown,
    Noop,
    ByeAck,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        Self::RunClass,
        Self::TestSetFinished,
        Self::SkipSinceNextTest,
        Self::Shutdown,
        Self::Noop,
        Self::ByeAck,
    ];

    pub fn opcode(self) -> &'static str {
        match self {
            Self::RunClass => "run-testclass",
            Self::TestSetFinished => "testset-finished",
            Self::SkipSinceNextTest => "skip-since-next-test",
            Self::Shutdown => "shutdown",
            Self::Noop => "noop",
            Self::ByeAck => "bye-ack",
        }
    }

    pub fn from_opcode(opcode: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.opcode() == opcode)
    }

    /// Whether the command carries a string payload.
    pub fn has_data(self) -> bool {
        matches!(self, Self::RunClass | Self::Shutdown)
    }

    /// Number of data tokens following the opcode.
    pub fn arity(self) -> usize {
        usize::from(self.has_data())
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode())
    }
}

/// A master→worker message. Immutable; equality is kind plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    kind: CommandKind,
    payload: Option<String>,
}

impl Command {
    /// Build a command, checking the payload against the kind's arity.
    pub fn new(kind: CommandKind, payload: Option<String>) -> Result<Self, ProtocolError> {
        check_arity(kind, payload.is_some())?;
        Ok(Self { kind, payload })
    }

    pub fn run_class(class_name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::RunClass,
            payload: Some(class_name.into()),
        }
    }

    pub fn shutdown(mode: ShutdownMode) -> Self {
        Self {
            kind: CommandKind::Shutdown,
            payload: Some(mode.parameter().to_string()),
        }
    }

    pub fn test_set_finished() -> Self {
        Self::void(CommandKind::TestSetFinished)
    }

    pub fn skip_since_next_test() -> Self {
        Self::void(CommandKind::SkipSinceNextTest)
    }

    pub fn noop() -> Self {
        Self::void(CommandKind::Noop)
    }

    pub fn bye_ack() -> Self {
        Self::void(CommandKind::ByeAck)
    }

    fn void(kind: CommandKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Shutdown mode carried by a SHUTDOWN command; `None` for other kinds.
    pub fn shutdown_mode(&self) -> Option<Result<ShutdownMode, ProtocolError>> {
        match (self.kind, self.payload.as_deref()) {
            (CommandKind::Shutdown, Some(param)) => Some(ShutdownMode::from_parameter(param)),
            _ => None,
        }
    }

    /// Encode as a wire frame. Infallible: arity was checked on construction.
    pub fn encode(&self) -> Vec<u8> {
        frame(self.kind, self.payload.as_deref())
    }

    /// Rebuild a command from the data tokens of a decoded frame.
    pub(crate) fn from_tokens(kind: CommandKind, data: &[String]) -> Result<Self, ProtocolError> {
        if data.len() != kind.arity() {
            return Err(arity_error(kind, data.len()));
        }
        let payload = match data.first() {
            Some(token) => Some(
                field::decode_text(token)?.ok_or_else(|| arity_error(kind, 0))?,
            ),
            None => None,
        };
        Ok(Self { kind, payload })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{}({payload})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Encode a command frame: `:<magic>:<opcode>:[<base64 data>:]\n`.
///
/// Returns `Err` when a void command is given data or a string command is
/// given none.
pub fn encode_command(kind: CommandKind, payload: Option<&str>) -> Result<Vec<u8>, ProtocolError> {
    check_arity(kind, payload.is_some())?;
    Ok(frame(kind, payload))
}

fn frame(kind: CommandKind, payload: Option<&str>) -> Vec<u8> {
    let mut f = FrameBuilder::new(COMMAND_MAGIC_NUMBER, kind.opcode());
    if kind.has_data() {
        f.text(payload);
    }
    f.finish()
}

fn check_arity(kind: CommandKind, has_payload: bool) -> Result<(), ProtocolError> {
    if kind.has_data() == has_payload {
        Ok(())
    } else {
        Err(arity_error(kind, usize::from(has_payload)))
    }
}

fn arity_error(kind: CommandKind, actual: usize) -> ProtocolError {
    ProtocolError::Arity {
        kind: kind.opcode(),
        expected: kind.arity(),
        actual,
    }
}
