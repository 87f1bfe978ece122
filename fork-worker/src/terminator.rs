use fork_proto::ShutdownMode;
use tracing::warn;

/// Ends the worker process. Substituted in tests.
pub trait ProcessTerminator: Send + Sync {
    /// Orderly exit: exit handlers and stdio flushing run.
    fn exit(&self, code: i32);

    /// Immediate halt: nothing else runs.
    fn halt(&self, code: i32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminator;

impl ProcessTerminator for SystemTerminator {
    fn exit(&self, code: i32) {
        std::process::exit(code)
    }

    fn halt(&self, code: i32) {
        // SAFETY: _exit is async-signal-safe and takes no pointers; it never returns.
        unsafe { libc::_exit(code) }
    }
}

/// Carry out `mode` after the command channel was lost.
pub fn apply_shutdown(mode: ShutdownMode, terminator: &dyn ProcessTerminator) {
    match mode {
        ShutdownMode::Default => {}
        ShutdownMode::Exit => {
            warn!(mode = %mode, "exiting forked process");
            terminator.exit(1);
        }
        ShutdownMode::Kill => {
            warn!(mode = %mode, "halting forked process");
            terminator.halt(1);
        }
    }
}
