use std::io;

use fork_proto::ProtocolError;

/// Why the command channel stopped yielding commands.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("end of command stream")]
    EndOfStream,

    #[error("command stream io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BooterError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("command reader terminated before it started")]
    ReaderTerminated,
}

pub type BooterResult<T> = Result<T, BooterError>;

/// Render an error with its `source()` chain, one cause per line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
