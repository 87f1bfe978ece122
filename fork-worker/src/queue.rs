use std::sync::{Condvar, Mutex, MutexGuard};

/// Append-only list of test class names that can be sealed.
///
/// One writer appends, any number of readers walk it with their own
/// cursor. Once sealed nothing more is appended and every waiter wakes.
/// Entries are never removed, so a new reader can replay from index 0.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    classes: Vec<String>,
    sealed: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a class name. Returns false when the queue is sealed.
    pub fn push(&self, class: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.classes.push(class.into());
        self.changed.notify_all();
        true
    }

    /// Seal the queue and wake every waiter. Returns false if it was
    /// already sealed.
    pub fn seal(&self) -> bool {
        let mut state = self.lock();
        let newly = !state.sealed;
        state.sealed = true;
        self.changed.notify_all();
        newly
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.lock().classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `index` is already available without waiting.
    pub fn has(&self, index: usize) -> bool {
        index < self.lock().classes.len()
    }

    /// Block until entry `index` exists or the queue is sealed.
    pub fn wait_for(&self, index: usize) -> Option<String> {
        let mut state = self.lock();
        while index >= state.classes.len() && !state.sealed {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.classes.get(index).cloned()
    }

    /// The first `len` entries, or all of them if fewer exist.
    pub fn prefix(&self, len: usize) -> Vec<String> {
        let state = self.lock();
        state.classes.iter().take(len).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
