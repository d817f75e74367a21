//! Lifecycle event stream
//!
//! Events are broadcast synchronously while the cache mutex is held, so
//! subscribers observe them in creation order. Callbacks must be quick and
//! must not call back into the cache.

use std::sync::Arc;

use crate::entity::ResourceState;
use crate::kind::ResourceKind;

/// Events emitted for individual entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEventKind {
    /// Broadcast for every existing entity after
    /// [`ResourceCache::broadcast_exists_event`](crate::cache::ResourceCache::broadcast_exists_event).
    Exists,
    /// A new entity was registered.
    Created,
    /// The entity is about to be destroyed.
    Deleted,
    /// Content was built or replaced; also sent when a load ends missing.
    ContentUpdated,
    /// Content is about to be released; still valid while the event runs.
    ContentUnloading,
    PriorityChanged,
}

#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub event: ResourceEventKind,
    pub kind: ResourceKind,
    pub id: Arc<str>,
    pub state: ResourceState,
}

/// Events affecting the whole cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Sent first thing during shutdown.
    ShuttingDown,
    /// Sent by a reload-all pass that unloaded at least one entity.
    ReloadAll,
}

/// Token returned by subscribe calls; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type ResourceCallback = Box<dyn FnMut(&ResourceEvent) + Send>;
type ManagerCallback = Box<dyn FnMut(&ManagerEvent) + Send>;

#[derive(Default)]
pub(crate) struct EventHub {
    resource_subscribers: Vec<(u64, ResourceCallback)>,
    manager_subscribers: Vec<(u64, ManagerCallback)>,
    next_id: u64,
}

impl EventHub {
    pub fn subscribe(&mut self, callback: ResourceCallback) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.resource_subscribers.push((id, callback));
        SubscriberId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.resource_subscribers.retain(|(sid, _)| *sid != id.0);
    }

    pub fn subscribe_manager(&mut self, callback: ManagerCallback) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.manager_subscribers.push((id, callback));
        SubscriberId(id)
    }

    pub fn unsubscribe_manager(&mut self, id: SubscriberId) {
        self.manager_subscribers.retain(|(sid, _)| *sid != id.0);
    }

    pub fn broadcast(&mut self, event: &ResourceEvent) {
        for (_, callback) in &mut self.resource_subscribers {
            callback(event);
        }
    }

    pub fn broadcast_manager(&mut self, event: &ManagerEvent) {
        for (_, callback) in &mut self.manager_subscribers {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: ResourceEventKind) -> ResourceEvent {
        ResourceEvent {
            event: kind,
            kind: ResourceKind::from_index(0),
            id: Arc::from("res://events"),
            state: ResourceState::Unloaded,
        }
    }

    #[test]
    fn test_subscribers_observe_in_order() {
        let mut hub = EventHub::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = seen.clone();
        hub.subscribe(Box::new(move |ev| sink.lock().push(ev.event)));

        hub.broadcast(&event(ResourceEventKind::Created));
        hub.broadcast(&event(ResourceEventKind::ContentUpdated));
        hub.broadcast(&event(ResourceEventKind::Deleted));

        assert_eq!(
            *seen.lock(),
            vec![
                ResourceEventKind::Created,
                ResourceEventKind::ContentUpdated,
                ResourceEventKind::Deleted
            ]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut hub = EventHub::default();
        let count = Arc::new(AtomicUsize::new(0));

        let sink = count.clone();
        let id = hub.subscribe(Box::new(move |_| {
            sink.fetch_add(1, Ordering::Relaxed);
        }));

        hub.broadcast(&event(ResourceEventKind::Created));
        hub.unsubscribe(id);
        hub.broadcast(&event(ResourceEventKind::Deleted));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
