//! Per-object event bus
//!
//! Every socket, namespace and server owns its own [`EventEmitter`], so
//! listeners never leak between objects.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event listener stored by an [`EventEmitter`]
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`EventEmitter::on`], used to remove the listener later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<T> {
    id: ListenerId,
    once: bool,
    listener: Listener<T>,
}

struct Shared<T> {
    listeners: Mutex<HashMap<String, Vec<Entry<T>>>>,
    next_id: AtomicU64,
}

/// Event-name keyed listener registry.
///
/// Cloning yields another handle to the same registry. Listeners run
/// synchronously, in registration order, on the thread that calls
/// [`emit`](EventEmitter::emit).
pub struct EventEmitter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.shared.listeners.lock();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event, entries)| (event.as_str(), entries.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}

impl<T> EventEmitter<T> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener for every future emission of `event`
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(event, listener, false)
    }

    /// Register a listener for the next emission of `event` only
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(event, listener, true)
    }

    fn register<F>(&self, event: &str, listener: F, once: bool) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(event, Arc::new(listener), once)
    }

    pub(crate) fn insert(&self, event: &str, listener: Listener<T>, once: bool) -> ListenerId {
        let id = self.reserve_id();
        self.shared
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Allocate an id without registering anything
    pub(crate) fn reserve_id(&self) -> ListenerId {
        ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Remove every listener for `event`
    pub fn remove_all(&self, event: &str) {
        self.shared.listeners.lock().remove(event);
    }

    /// Invoke the listeners of `event` with `value`.
    ///
    /// Returns `true` if at least one listener ran. The listener list is
    /// snapshotted before any listener runs, so listeners may freely
    /// register, remove or emit.
    pub fn emit(&self, event: &str, value: &T) -> bool {
        let snapshot = self.take(event);
        for listener in &snapshot {
            listener(value);
        }
        !snapshot.is_empty()
    }

    /// Listeners an emission of `event` would run right now. `once` entries
    /// are removed as if the emission had happened.
    pub(crate) fn take(&self, event: &str) -> Vec<Listener<T>> {
        let mut listeners = self.shared.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return Vec::new();
        };
        let snapshot = entries
            .iter()
            .map(|entry| Arc::clone(&entry.listener))
            .collect();
        entries.retain(|entry| !entry.once);
        if entries.is_empty() {
            listeners.remove(event);
        }
        snapshot
    }

    /// Number of listeners registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared
            .listeners
            .lock()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Names of all events with at least one listener
    pub fn event_names(&self) -> Vec<String> {
        self.shared.listeners.lock().keys().cloned().collect()
    }
}
