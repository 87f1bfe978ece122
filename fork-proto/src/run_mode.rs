use std::fmt;

use crate::ProtocolError;

/// Tags test events as first attempts or reruns of failed tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    Normal,
    RerunAfterFailure,
}

impl RunMode {
    pub fn token(self) -> &'static str {
        match self {
            Self::Normal => "normal-run",
            Self::RerunAfterFailure => "rerun-test-after-failure",
        }
    }

    pub fn from_token(token: &str) -> Result<Self, ProtocolError> {
        match token {
            "normal-run" => Ok(Self::Normal),
            "rerun-test-after-failure" => Ok(Self::RerunAfterFailure),
            other => Err(ProtocolError::UnknownRunMode(other.to_string())),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
