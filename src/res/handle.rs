use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use uuid::Uuid;

impl_handle!(ResourceId);

/// The observable state of a resource slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceState {
    /// The payload has been installed. Resources created in-memory without
    /// payload are `Ok` as well.
    Ok,
    /// The resource is still loading, or has never been requested.
    NotReady,
    /// The resource could not be located or decoded.
    Err,
}

/// Reference counts shared by every strong handle of one resource.
#[derive(Debug, Default)]
pub struct RefCounts {
    refs: AtomicU32,
    internal: AtomicU32,
}

impl RefCounts {
    #[inline]
    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn internal_refs(&self) -> u32 {
        self.internal.load(Ordering::SeqCst)
    }

    /// Adds a reference that is held by the resource manager itself.
    pub(crate) fn add_internal_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.internal.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes an internal reference. Removing one that does not exist is a no-op.
    pub(crate) fn remove_internal_ref(&self) -> bool {
        let removed = self
            .internal
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();

        debug_assert!(removed, "internal reference count underflow.");
        if removed {
            self.dec_refs();
        }

        removed
    }

    /// Drops every internal reference at once.
    pub(crate) fn clear_internal_refs(&self) {
        let internal = self.internal.swap(0, Ordering::SeqCst);
        for _ in 0..internal {
            self.dec_refs();
        }
    }

    fn inc_refs(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn dec_refs(&self) {
        let prev = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));

        debug_assert!(prev.is_ok(), "reference count underflow.");
    }
}

/// A strong reference to a resource. Cloning it increases the reference count, and
/// dropping it decreases the count again. The payload itself is owned by `Resources`,
/// and could be fetched with `Resources::get` once loaded.
pub struct ResourceHandle {
    id: ResourceId,
    uuid: Uuid,
    counts: Arc<RefCounts>,
}

impl ResourceHandle {
    pub(crate) fn new(id: ResourceId, uuid: Uuid, counts: Arc<RefCounts>) -> Self {
        counts.inc_refs();
        ResourceHandle { id, uuid, counts }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Total number of references, including internal ones.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.counts.refs()
    }

    /// Number of references held by the resource manager.
    #[inline]
    pub fn internal_ref_count(&self) -> u32 {
        self.counts.internal_refs()
    }

    /// Makes a weak reference that does not keep the resource alive.
    #[inline]
    pub fn downgrade(&self) -> WeakResourceHandle {
        WeakResourceHandle {
            id: self.id,
            uuid: self.uuid,
        }
    }

    pub(crate) fn counts(&self) -> &Arc<RefCounts> {
        &self.counts
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        ResourceHandle::new(self.id, self.uuid, self.counts.clone())
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.counts.dec_refs();
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, rhs: &Self) -> bool {
        self.id == rhs.id
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("refs", &self.counts.refs())
            .field("internal", &self.counts.internal_refs())
            .finish()
    }
}

/// A weak reference to a resource, use `Resources::lock` to upgrade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakResourceHandle {
    id: ResourceId,
    uuid: Uuid,
}

impl WeakResourceHandle {
    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}
