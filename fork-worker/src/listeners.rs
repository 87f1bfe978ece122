use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fork_proto::{Command, CommandKind};

/// Callback for commands read from the master.
pub trait CommandListener: Send + Sync {
    fn update(&self, command: &Command);
}

impl<F> CommandListener for F
where
    F: Fn(&Command) + Send + Sync,
{
    fn update(&self, command: &Command) {
        self(command)
    }
}

/// Handle returned by [`ListenerRegistry::add`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    kind: Option<CommandKind>,
    listener: Arc<dyn CommandListener>,
}

/// Listeners keyed by command kind; `None` receives every command.
///
/// The list is copy-on-write: dispatch iterates a snapshot taken under a
/// short lock, so listeners may be added or removed (even from inside a
/// callback) while a dispatch is in flight.
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: Mutex<Arc<Vec<Registration>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: Option<CommandKind>, listener: Arc<dyn CommandListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registrations = self.lock();
        let mut updated = Vec::clone(&registrations);
        updated.push(Registration { id, kind, listener });
        *registrations = Arc::new(updated);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut registrations = self.lock();
        if !registrations.iter().any(|r| r.id == id) {
            return false;
        }
        let updated: Vec<Registration> = registrations
            .iter()
            .filter(|r| r.id != id)
            .cloned()
            .collect();
        *registrations = Arc::new(updated);
        true
    }

    pub fn clear(&self) {
        *self.lock() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener registered for the command's kind, or for all
    /// kinds, in registration order. Returns how many were called.
    pub fn dispatch(&self, command: &Command) -> usize {
        let snapshot = Arc::clone(&self.lock());
        let mut called = 0;
        for registration in snapshot.iter() {
            if registration.kind.is_none_or(|kind| kind == command.kind()) {
                registration.listener.update(command);
                called += 1;
            }
        }
        called
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Arc<Vec<Registration>>> {
        self.registrations.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
