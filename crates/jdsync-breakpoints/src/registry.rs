use std::collections::HashMap;
use std::sync::Arc;

use jdsync_jdi::RequestId;
use parking_lot::RwLock;

use crate::listener::EventListener;

/// Request -> listeners mapping shared by the management and dispatch paths.
///
/// Every operation takes the lock once, so readers see either the mapping
/// before or after a mutation, never a partial one. Listeners are compared by
/// identity (`Arc` pointer), not by value.
///
/// Once closed the registry stays empty: later registrations are refused
/// under the same lock that cleared it.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    closed: bool,
    by_request: HashMap<RequestId, Vec<Arc<dyn EventListener>>>,
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair was already registered or the registry is
    /// closed.
    pub fn register(&self, request: RequestId, listener: Arc<dyn EventListener>) -> bool {
        let mut entries = self.entries.write();
        if entries.closed {
            return false;
        }
        let listeners = entries.by_request.entry(request).or_default();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if the pair was not registered.
    pub fn deregister(&self, request: RequestId, listener: &Arc<dyn EventListener>) -> bool {
        let mut entries = self.entries.write();
        let Some(listeners) = entries.by_request.get_mut(&request) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            entries.by_request.remove(&request);
        }
        removed
    }

    /// Snapshot of the listeners of `request`, in registration order.
    pub fn listeners_for(&self, request: RequestId) -> Vec<Arc<dyn EventListener>> {
        self.entries
            .read()
            .by_request
            .get(&request)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_registered(&self, request: RequestId, listener: &Arc<dyn EventListener>) -> bool {
        self.entries
            .read()
            .by_request
            .get(&request)
            .is_some_and(|listeners| listeners.iter().any(|l| same_listener(l, listener)))
    }

    /// Drops every registration and refuses new ones.
    pub fn close(&self) {
        let mut entries = self.entries.write();
        entries.closed = true;
        entries.by_request.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.entries.read().closed
    }

    /// Number of requests with at least one listener.
    pub fn len(&self) -> usize {
        self.entries.read().by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().by_request.is_empty()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        let mut map = f.debug_map();
        for (request, listeners) in entries.by_request.iter() {
            map.entry(request, &listeners.len());
        }
        map.finish()
    }
}
