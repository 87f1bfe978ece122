/// Protocol error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("unknown run mode: {0}")]
    UnknownRunMode(String),

    #[error("command {kind} takes {expected} data token(s), got {actual}")]
    Arity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid base64 in field: {0}")]
    InvalidBase64(String),

    #[error("invalid UTF-8 in field")]
    InvalidUtf8,

    #[error("invalid integer field: {0}")]
    InvalidInteger(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown shutdown parameter {0:?}, expected one of {list}", list = crate::ShutdownMode::list_parameters())]
    UnknownShutdown(String),
}
