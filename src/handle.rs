//! Reference-counted resource handles
//!
//! Handles are what consumers hold instead of raw pointers. Cloning a handle
//! increments its entity's reference count, dropping it decrements it; the
//! eviction sweeper only frees entities whose count reached zero. A handle
//! answers metadata queries lock-free; content access goes through
//! [`ResourceCache::acquire`](crate::cache::ResourceCache::acquire).

use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::content::{MemoryUsage, ResourceContent};
use crate::entity::{Entity, Priority, ResourceState};
use crate::kind::ResourceKind;

/// Type-erased handle to a resource entity.
pub struct UntypedHandle {
    pub(crate) entity: Arc<Entity>,
}

impl UntypedHandle {
    pub(crate) fn new(entity: Arc<Entity>) -> Self {
        entity.ref_count.fetch_add(1, Ordering::AcqRel);
        Self { entity }
    }

    /// Unique id of the target entity.
    pub fn id(&self) -> &str {
        self.debug_check_alive();
        &self.entity.id
    }

    /// xxh3 hash of the id.
    pub fn id_hash(&self) -> u64 {
        self.entity.id_hash
    }

    pub fn kind(&self) -> ResourceKind {
        self.debug_check_alive();
        self.entity.kind
    }

    pub fn state(&self) -> ResourceState {
        self.debug_check_alive();
        self.entity.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ResourceState::Loaded
    }

    /// True once loading failed and the entity holds no content.
    pub fn is_missing(&self) -> bool {
        self.state() == ResourceState::LoadedResourceMissing
    }

    pub fn priority(&self) -> Priority {
        self.entity.priority()
    }

    /// Number of live handles (including fallback links) to this entity.
    pub fn reference_count(&self) -> u32 {
        self.entity.reference_count()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.entity.memory_usage()
    }

    /// Bumped every time the entity's content is replaced.
    pub fn change_counter(&self) -> u32 {
        self.entity.change_counter.load(Ordering::Acquire)
    }

    /// Debug description recorded by the loader, if any.
    pub fn description(&self) -> Option<String> {
        self.entity.extra.lock().description.clone()
    }

    /// Converts to a typed handle. The content type is verified on acquire.
    pub fn typed<T: ResourceContent>(self) -> Handle<T> {
        Handle {
            untyped: self,
            _marker: PhantomData,
        }
    }

    fn debug_check_alive(&self) {
        debug_assert!(
            !self.entity.unregistered.load(Ordering::Acquire),
            "handle used after its entity was destroyed"
        );
    }
}

impl Clone for UntypedHandle {
    fn clone(&self) -> Self {
        Self::new(self.entity.clone())
    }
}

impl Drop for UntypedHandle {
    fn drop(&mut self) {
        let previous = self.entity.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "entity reference count underflow");
    }
}

impl PartialEq for UntypedHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }
}

impl Eq for UntypedHandle {}

impl std::fmt::Debug for UntypedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UntypedHandle")
            .field("kind", &self.entity.kind)
            .field("id", &self.entity.id)
            .field("state", &self.entity.state())
            .finish()
    }
}

/// Handle carrying the content type it expects at acquire time.
pub struct Handle<T: ResourceContent> {
    untyped: UntypedHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ResourceContent> Handle<T> {
    pub fn untyped(&self) -> &UntypedHandle {
        &self.untyped
    }

    pub fn into_untyped(self) -> UntypedHandle {
        self.untyped
    }
}

impl<T: ResourceContent> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            untyped: self.untyped.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ResourceContent> std::ops::Deref for Handle<T> {
    type Target = UntypedHandle;

    fn deref(&self) -> &Self::Target {
        &self.untyped
    }
}

impl<T: ResourceContent> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.untyped == other.untyped
    }
}

impl<T: ResourceContent> Eq for Handle<T> {}

impl<T: ResourceContent> From<Handle<T>> for UntypedHandle {
    fn from(handle: Handle<T>) -> Self {
        handle.untyped
    }
}

impl<T: ResourceContent> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.untyped, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Arc<Entity> {
        Entity::new(ResourceKind::from_index(0), "res://handle", Priority::Medium, 0)
    }

    #[test]
    fn test_clone_and_drop_track_reference_count() {
        let entity = entity();
        let first = UntypedHandle::new(entity.clone());
        assert_eq!(entity.reference_count(), 1);

        let second = first.clone();
        assert_eq!(entity.reference_count(), 2);

        drop(first);
        assert_eq!(entity.reference_count(), 1);
        drop(second);
        assert_eq!(entity.reference_count(), 0);
    }

    #[test]
    fn test_typed_conversion_keeps_count() {
        let entity = entity();
        let handle = UntypedHandle::new(entity.clone());
        let typed = handle.typed::<Vec<u8>>();
        assert_eq!(entity.reference_count(), 1);
        drop(typed);
        assert_eq!(entity.reference_count(), 0);
    }

    #[test]
    fn test_equality_is_identity() {
        let a = UntypedHandle::new(entity());
        let b = UntypedHandle::new(entity());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
