use std::fmt;

use crate::ProtocolError;

/// Environment variable through which a master hands the shutdown
/// parameter to the worker it spawns.
pub const SHUTDOWN_ENV: &str = "FORK_SHUTDOWN";

/// Environment variable naming the worker's dump directory.
pub const DUMP_DIR_ENV: &str = "FORK_DUMP_DIR";

/// What a forked worker does when its command channel ends before the
/// master finished the test set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownMode {
    /// Let the current test set run to its natural end.
    Default,
    /// Terminate the process with a non-zero status.
    Exit,
    /// Halt immediately, skipping exit handlers.
    Kill,
}

impl ShutdownMode {
    pub const ALL: [ShutdownMode; 3] = [Self::Default, Self::Exit, Self::Kill];

    /// Short parameter name used on the command line and on the wire.
    pub fn parameter(self) -> &'static str {
        match self {
            Self::Default => "testset",
            Self::Exit => "exit",
            Self::Kill => "kill",
        }
    }

    /// Parse a parameter name. Blank and unknown names are rejected.
    pub fn from_parameter(parameter: &str) -> Result<Self, ProtocolError> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.parameter() == parameter)
            .ok_or_else(|| ProtocolError::UnknownShutdown(parameter.to_string()))
    }

    pub fn is_known(parameter: &str) -> bool {
        Self::from_parameter(parameter).is_ok()
    }

    /// Known parameter names, quoted and comma separated.
    pub fn list_parameters() -> String {
        Self::ALL
            .iter()
            .map(|mode| format!("\"{}\"", mode.parameter()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_default(self) -> bool {
        self == Self::Default
    }
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.parameter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_roundtrip() {
        for mode in ShutdownMode::ALL {
            assert_eq!(ShutdownMode::from_parameter(mode.parameter()).unwrap(), mode);
        }
    }

    #[test]
    fn rejects_unknown_and_blank() {
        assert!(!ShutdownMode::is_known("halt"));
        assert!(!ShutdownMode::is_known(""));
        assert!(!ShutdownMode::is_known("EXIT"));
        let err = ShutdownMode::from_parameter("halt").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown shutdown parameter \"halt\", expected one of \"testset\", \"exit\", \"kill\""
        );
    }

    #[test]
    fn display_is_parameter() {
        assert_eq!(ShutdownMode::Kill.to_string(), "kill");
    }
}
