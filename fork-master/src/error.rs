use fork_proto::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type MasterResult<T> = Result<T, MasterError>;
