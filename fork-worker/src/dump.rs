//! Fail-safe diagnostic files.
//!
//! Problems on the protocol channels cannot be reported over those same
//! channels, so they are appended to `<stem>.dump` (worker-side errors)
//! and `<stem>.dumpstream` (stream corruption) in a dump directory. A
//! sink never fails its caller: write errors are logged and dropped.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::error_chain;

#[derive(Debug, Clone, Default)]
pub struct DumpSink {
    files: Option<Arc<DumpFiles>>,
}

#[derive(Debug)]
struct DumpFiles {
    dir: PathBuf,
    dump: PathBuf,
    dumpstream: PathBuf,
    lock: Mutex<()>,
}

impl DumpSink {
    /// A sink that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(dir: impl Into<PathBuf>, stem: &str) -> Self {
        let dir = dir.into();
        Self {
            files: Some(Arc::new(DumpFiles {
                dump: dir.join(format!("{stem}.dump")),
                dumpstream: dir.join(format!("{stem}.dumpstream")),
                dir,
                lock: Mutex::new(()),
            })),
        }
    }

    /// Sink named `<timestamp>-jvmRun<N>` so that forks of one build
    /// sort together and never collide.
    pub fn for_fork(dir: impl Into<PathBuf>, fork_number: u32) -> Self {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S_%3f");
        Self::new(dir, &format!("{stamp}-jvmRun{fork_number}"))
    }

    pub fn is_enabled(&self) -> bool {
        self.files.is_some()
    }

    pub fn dump_path(&self) -> Option<&Path> {
        self.files.as_deref().map(|f| f.dump.as_path())
    }

    pub fn dumpstream_path(&self) -> Option<&Path> {
        self.files.as_deref().map(|f| f.dumpstream.as_path())
    }

    pub fn dump_text(&self, msg: &str) {
        warn!("{msg}");
        self.append(Target::Dump, msg);
    }

    pub fn dump_error(&self, err: &dyn std::error::Error, msg: &str) {
        let record = format!("{msg}\n{}", error_chain(err));
        warn!(error = %err, "{msg}");
        self.append(Target::Dump, &record);
    }

    pub fn dump_stream_text(&self, msg: &str) {
        warn!("{msg}");
        self.append(Target::Stream, msg);
    }

    pub fn dump_stream_error(&self, err: &dyn std::error::Error, msg: &str) {
        let record = format!("{msg}\n{}", error_chain(err));
        warn!(error = %err, "{msg}");
        self.append(Target::Stream, &record);
    }

    fn append(&self, target: Target, msg: &str) {
        let Some(files) = self.files.as_deref() else {
            return;
        };
        let path = match target {
            Target::Dump => &files.dump,
            Target::Stream => &files.dumpstream,
        };
        let record = format!(
            "# Created at {}\n{msg}\n\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );

        let _guard = files.lock.lock().unwrap_or_else(|e| e.into_inner());
        let written = fs::create_dir_all(&files.dir).and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?
                .write_all(record.as_bytes())
        });
        if let Err(e) = written {
            debug!(path = %path.display(), error = %e, "failed to write dump file");
        }
    }
}

#[derive(Clone, Copy)]
enum Target {
    Dump,
    Stream,
}
