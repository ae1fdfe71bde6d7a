//! Callbacks fired when resources finish loading.
//!
//! There are two kinds of them. `ResourceObserver`s are subscribed to `Resources`
//! and see every resource being loaded, modified or destroyed, from whatever thread
//! that happened on. `ResourceListener`s are registered per UUID in the
//! `ResourceListeners` registry, and are notified once the load of that UUID (and
//! its dependencies) completes. Synchronous loads notify them before returning,
//! asynchronous completions are queued until the host calls `update`.

use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use super::handle::ResourceHandle;
use crate::utils::hash::FastHashMap;

/// Observes the lifetime events of all resources.
pub trait ResourceObserver: Send + Sync + 'static {
    /// Called after a resource and all of its dependencies are loaded.
    fn on_loaded(&self, _: &ResourceHandle) {}
    /// Called right before a loaded resource is destroyed.
    fn on_destroyed(&self, _: &ResourceHandle) {}
    /// Called after the payload of a resource has been replaced.
    fn on_modified(&self, _: &ResourceHandle) {}
}

pub trait ResourceListener: Send + Sync + 'static {
    fn on_resource_loaded(&self, uuid: Uuid);
}

/// UUID keyed registry of `ResourceListener`s.
#[derive(Default)]
pub struct ResourceListeners {
    listeners: RwLock<FastHashMap<Uuid, Vec<Arc<dyn ResourceListener>>>>,
    pending: Mutex<Vec<Uuid>>,
}

impl ResourceListeners {
    pub fn new() -> Self {
        ResourceListeners::default()
    }

    /// Registers `listener` for the completion of resource `uuid`.
    pub fn add(&self, uuid: Uuid, listener: Arc<dyn ResourceListener>) {
        let mut listeners = self.listeners.write().unwrap();
        listeners.entry(uuid).or_insert_with(Vec::new).push(listener);
    }

    /// Unregisters `listener` from `uuid`.
    pub fn remove(&self, uuid: Uuid, listener: &Arc<dyn ResourceListener>) {
        let mut listeners = self.listeners.write().unwrap();
        let empty = match listeners.get_mut(&uuid) {
            Some(v) => {
                v.retain(|l| !Arc::ptr_eq(l, listener));
                v.is_empty()
            }
            None => false,
        };

        if empty {
            listeners.remove(&uuid);
        }
    }

    /// Notifies the listeners of `uuid` on the calling thread.
    pub fn notify_listeners(&self, uuid: Uuid) {
        let listeners = match self.listeners.read().unwrap().get(&uuid) {
            Some(v) => v.clone(),
            None => return,
        };

        for v in listeners {
            v.on_resource_loaded(uuid);
        }
    }

    /// Queues the notification of `uuid` until the next `update`. Resources nobody
    /// listens to are not queued.
    pub fn mark_loaded(&self, uuid: Uuid) {
        if !self.listeners.read().unwrap().contains_key(&uuid) {
            return;
        }

        self.pending.lock().unwrap().push(uuid);
    }

    /// Dispatches the queued notifications, in the order they were queued.
    pub fn update(&self) {
        let pending = ::std::mem::replace(&mut *self.pending.lock().unwrap(), Vec::new());
        for uuid in pending {
            self.notify_listeners(uuid);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ResourceListener for Counter {
        fn on_resource_loaded(&self, _: Uuid) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn deferred() {
        let listeners = ResourceListeners::new();
        let counter = Arc::new(Counter::default());
        let uuid = Uuid::new_v4();

        let listener: Arc<dyn ResourceListener> = counter.clone();
        listeners.add(uuid, listener.clone());

        listeners.notify_listeners(uuid);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        listeners.mark_loaded(uuid);
        listeners.mark_loaded(Uuid::new_v4());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(*listeners.pending.lock().unwrap(), vec![uuid]);
        listeners.update();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        listeners.update();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        listeners.remove(uuid, &listener);
        listeners.notify_listeners(uuid);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unobserved() {
        let listeners = ResourceListeners::new();
        for _ in 0..64 {
            listeners.mark_loaded(Uuid::new_v4());
        }

        assert!(listeners.pending.lock().unwrap().is_empty());
    }
}
