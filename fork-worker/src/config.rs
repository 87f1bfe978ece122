use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fork_proto::{DUMP_DIR_ENV, SHUTDOWN_ENV, ShutdownMode};
use serde::{Deserialize, Serialize};

use crate::dump::DumpSink;
use crate::error::{BooterError, BooterResult};

pub(crate) const DEFAULT_FORK_NUMBER: u32 = 1;
pub(crate) const DEFAULT_BYE_ACK_TIMEOUT_MS: u64 = 30_000;

/// Settings the master hands to one forked worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BooterConfig {
    /// Shutdown parameter (`testset`, `exit`, `kill`). Absent or blank
    /// means `testset`.
    pub shutdown: Option<String>,
    pub trim_stack_traces: bool,
    pub dump_dir: Option<PathBuf>,
    pub fork_number: u32,
    pub bye_ack_timeout_ms: u64,
    pub system_properties: BTreeMap<String, String>,
}

impl Default for BooterConfig {
    fn default() -> Self {
        Self {
            shutdown: None,
            trim_stack_traces: false,
            dump_dir: None,
            fork_number: DEFAULT_FORK_NUMBER,
            bye_ack_timeout_ms: DEFAULT_BYE_ACK_TIMEOUT_MS,
            system_properties: BTreeMap::new(),
        }
    }
}

/// Load and validate a booter config from a YAML file.
///
/// A relative `dump_dir` is resolved against the config file's parent directory.
pub fn load(path: &Path) -> BooterResult<BooterConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BooterError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: BooterConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| BooterError::Config(format!("parse {}: {e}", path.display())))?;
    config.shutdown_mode()?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    Ok(config)
}

impl BooterConfig {
    pub fn from_yaml(content: &str) -> BooterResult<Self> {
        let config: Self = serde_yaml_ng::from_str(content)
            .map_err(|e| BooterError::Config(format!("parse: {e}")))?;
        config.shutdown_mode()?;
        Ok(config)
    }

    /// Let the shutdown parameter and dump directory handed down by the
    /// master through the environment override the file.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var_os(key))
    }

    /// Apply [`SHUTDOWN_ENV`] and [`DUMP_DIR_ENV`] as resolved by `lookup`.
    /// Blank values leave the file's setting in place. The shutdown value
    /// is validated later, by [`BooterConfig::shutdown_mode`].
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        if let Some(dir) = lookup(DUMP_DIR_ENV).filter(|d| !d.is_empty()) {
            self.dump_dir = Some(PathBuf::from(dir));
        }
        let shutdown = lookup(SHUTDOWN_ENV).map(|s| s.to_string_lossy().into_owned());
        self.with_shutdown_override(shutdown)
    }

    pub fn with_shutdown_override(mut self, shutdown: Option<String>) -> Self {
        if let Some(shutdown) = shutdown.filter(|s| !s.trim().is_empty()) {
            self.shutdown = Some(shutdown);
        }
        self
    }

    pub fn shutdown_mode(&self) -> BooterResult<ShutdownMode> {
        match self.shutdown.as_deref().map(str::trim) {
            None | Some("") => Ok(ShutdownMode::Default),
            Some(parameter) => ShutdownMode::from_parameter(parameter)
                .map_err(|e| BooterError::Config(e.to_string())),
        }
    }

    pub fn bye_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.bye_ack_timeout_ms)
    }

    pub fn dump_sink(&self) -> DumpSink {
        match &self.dump_dir {
            Some(dir) => DumpSink::for_fork(dir, self.fork_number),
            None => DumpSink::disabled(),
        }
    }

    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        if let Some(dir) = self.dump_dir.as_mut().filter(|d| d.is_relative()) {
            *dir = config_dir.join(&*dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booter.yaml");
        std::fs::write(
            &path,
            "shutdown: kill\n\
             trim_stack_traces: true\n\
             dump_dir: dumps\n\
             fork_number: 4\n\
             bye_ack_timeout_ms: 500\n\
             system_properties:\n  \
               user.dir: /work\n  \
               basedir: /work/module\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Kill);
        assert!(config.trim_stack_traces);
        assert_eq!(config.dump_dir, Some(dir.path().join("dumps")));
        assert_eq!(config.fork_number, 4);
        assert_eq!(config.bye_ack_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.system_properties.keys().collect::<Vec<_>>(),
            vec!["basedir", "user.dir"]
        );
    }

    #[test]
    fn defaults_apply() {
        let config = BooterConfig::from_yaml("{}").unwrap();
        assert_eq!(config, BooterConfig::default());
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Default);
        assert_eq!(config.bye_ack_timeout_ms, DEFAULT_BYE_ACK_TIMEOUT_MS);
        assert!(!config.dump_sink().is_enabled());
    }

    #[test]
    fn blank_shutdown_is_default() {
        let config = BooterConfig::from_yaml("shutdown: '  '").unwrap();
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Default);
    }

    #[test]
    fn unknown_shutdown_is_rejected() {
        let err = BooterConfig::from_yaml("shutdown: abort").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("abort"), "{msg}");
        assert!(msg.contains(r#""testset", "exit", "kill""#), "{msg}");
    }

    #[test]
    fn absolute_dump_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booter.yaml");
        std::fs::write(&path, "dump_dir: /var/dumps\n").unwrap();
        assert_eq!(load(&path).unwrap().dump_dir, Some(PathBuf::from("/var/dumps")));
    }

    #[test]
    fn shutdown_override_wins_unless_blank() {
        let config = BooterConfig::default().with_shutdown_override(Some("exit".into()));
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Exit);
        let config = config.with_shutdown_override(Some(" ".into()));
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Exit);
        let config = config.with_shutdown_override(None);
        assert_eq!(config.shutdown.as_deref(), Some("exit"));
    }

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<OsString> + 'a {
        move |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| OsString::from(v))
        }
    }

    #[test]
    fn env_overrides_the_file() {
        let config = BooterConfig::from_yaml("shutdown: testset
dump_dir: /from/file
")
            .unwrap()
            .with_overrides(env(&[(SHUTDOWN_ENV, "kill"), (DUMP_DIR_ENV, "/from/env")]));
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Kill);
        assert_eq!(config.dump_dir, Some(PathBuf::from("/from/env")));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = BooterConfig::from_yaml("shutdown: exit
dump_dir: /from/file
")
            .unwrap()
            .with_overrides(env(&[(SHUTDOWN_ENV, "  "), (DUMP_DIR_ENV, "")]));
        assert_eq!(config.shutdown_mode().unwrap(), ShutdownMode::Exit);
        assert_eq!(config.dump_dir, Some(PathBuf::from("/from/file")));

        let config = BooterConfig::default().with_overrides(env(&[]));
        assert_eq!(config, BooterConfig::default());
    }

    #[test]
    fn unknown_env_shutdown_is_rejected() {
        let config = BooterConfig::default().with_overrides(env(&[(SHUTDOWN_ENV, "abort")]));
        let err = config.shutdown_mode().unwrap_err();
        assert!(matches!(err, BooterError::Config(_)));
        assert!(err.to_string().contains("abort"), "{err}");
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, BooterError::Config(_)));
    }
}
