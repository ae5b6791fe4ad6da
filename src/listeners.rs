//! Ordered callback registry with unsubscribe handles
//!
//! Backs both the connection lifecycle notifications and the dispatcher's
//! per-kind handler lists.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A list of listeners invoked in registration order
pub struct Listeners<T: ?Sized> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: ?Sized + 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener; the returned handle removes it again
    pub fn add<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(listener)));
        drop(registry);

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        ListenerHandle {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invoke every listener with `value`, returning how many were called
    pub fn emit(&self, value: &T) -> usize {
        // Snapshot so a listener can unsubscribe itself mid-emit
        let snapshot: Vec<Callback<T>> = self
            .registry
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for cb in &snapshot {
            cb(value);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a registered listener.
///
/// Dropping the handle leaves the listener registered.
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
