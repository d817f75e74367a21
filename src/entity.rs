//! Per-asset entity state
//!
//! An entity is the cache's internal record for one loadable asset instance:
//! its load state, flags, reference count, memory report, and the content
//! payload itself. Entities are created by the table on first lookup and only
//! destroyed by the eviction sweeper once nothing references them.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::content::{ContentPayload, MemoryUsage};
use crate::handle::UntypedHandle;
use crate::kind::ResourceKind;
use crate::loader::ResourceLoader;

/// Load state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResourceState {
    /// Created, no data loaded.
    Unloaded = 0,
    /// Waiting in the load queue.
    QueuedForLoad = 1,
    /// A worker owns it; read or build phase in progress.
    Loading = 2,
    /// Content is available.
    Loaded = 3,
    /// The read phase could not produce a stream, or the build failed.
    LoadedResourceMissing = 4,
}

impl ResourceState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unloaded,
            1 => Self::QueuedForLoad,
            2 => Self::Loading,
            3 => Self::Loaded,
            _ => Self::LoadedResourceMissing,
        }
    }

    /// Loaded or missing: the load pipeline is done with this entity.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Loaded | Self::LoadedResourceMissing)
    }
}

/// Scheduling priority; lower values load earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    VeryHigh = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    VeryLow = 5,
}

impl Priority {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Critical,
            1 => Self::VeryHigh,
            2 => Self::High,
            3 => Self::Medium,
            4 => Self::Low,
            _ => Self::VeryLow,
        }
    }
}

/// Bit set stored in the entity's atomic flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityFlags(pub(crate) u16);

impl EntityFlags {
    pub const QUEUED_FOR_LOAD: u16 = 1 << 0;
    pub const RELOADABLE: u16 = 1 << 1;
    pub const HAS_TYPE_FALLBACK: u16 = 1 << 2;
    pub const HAS_INSTANCE_FALLBACK: u16 = 1 << 3;
    pub const PREVENT_FILE_RELOAD: u16 = 1 << 4;
    pub const HAS_LOW_RES_DATA: u16 = 1 << 5;
    pub const CREATED_VIA_DESCRIPTOR: u16 = 1 << 6;
    pub const HAS_CUSTOM_LOADER: u16 = 1 << 7;
    pub const MAIN_THREAD_BUILD: u16 = 1 << 8;

    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits != 0
    }
}

/// Mutable odds and ends guarded by the cache mutex.
#[derive(Default)]
pub(crate) struct EntityExtra {
    pub description: Option<String>,
    pub modified: Option<SystemTime>,
    pub loading_fallback: Option<UntypedHandle>,
    pub missing_fallback: Option<UntypedHandle>,
    pub custom_loader: Option<Arc<dyn ResourceLoader>>,
}

/// One loadable asset instance.
///
/// State, flags, priority and timestamps are atomics so handles can answer
/// queries without taking the cache mutex; all writers hold the mutex.
pub(crate) struct Entity {
    pub kind: ResourceKind,
    pub id: Arc<str>,
    pub id_hash: u64,
    state: AtomicU8,
    flags: AtomicU16,
    priority: AtomicU8,
    pub ref_count: AtomicU32,
    last_acquire_ms: AtomicU64,
    pub change_counter: AtomicU32,
    cpu_bytes: AtomicU64,
    gpu_bytes: AtomicU64,
    pub unregistered: AtomicBool,
    pub content: Mutex<Option<ContentPayload>>,
    pub extra: Mutex<EntityExtra>,
}

impl Entity {
    pub fn new(kind: ResourceKind, id: &str, priority: Priority, flags: u16) -> Arc<Self> {
        Arc::new(Self {
            kind,
            id: Arc::from(id),
            id_hash: xxh3_64(id.as_bytes()),
            state: AtomicU8::new(ResourceState::Unloaded as u8),
            flags: AtomicU16::new(flags),
            priority: AtomicU8::new(priority as u8),
            ref_count: AtomicU32::new(0),
            last_acquire_ms: AtomicU64::new(0),
            change_counter: AtomicU32::new(0),
            cpu_bytes: AtomicU64::new(0),
            gpu_bytes: AtomicU64::new(0),
            unregistered: AtomicBool::new(false),
            content: Mutex::new(None),
            extra: Mutex::new(EntityExtra::default()),
        })
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ResourceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn flags(&self) -> EntityFlags {
        EntityFlags(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flag(&self, bits: u16) -> bool {
        self.flags().contains(bits)
    }

    pub fn set_flag(&self, bits: u16) {
        self.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clears the bits; returns true if any of them were set.
    pub fn clear_flag(&self, bits: u16) -> bool {
        self.flags.fetch_and(!bits, Ordering::AcqRel) & bits != 0
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Ordering::Acquire))
    }

    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Ordering::Release);
    }

    pub fn reference_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn last_acquire_ms(&self) -> u64 {
        self.last_acquire_ms.load(Ordering::Acquire)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_acquire_ms.store(now_ms, Ordering::Release);
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            cpu_bytes: self.cpu_bytes.load(Ordering::Acquire),
            gpu_bytes: self.gpu_bytes.load(Ordering::Acquire),
        }
    }

    pub fn set_memory_usage(&self, usage: MemoryUsage) {
        self.cpu_bytes.store(usage.cpu_bytes, Ordering::Release);
        self.gpu_bytes.store(usage.gpu_bytes, Ordering::Release);
    }

    pub fn bump_change_counter(&self) {
        self.change_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Scheduling weight; smaller loads earlier.
    ///
    /// Priority dominates, entities that can fall back are penalized, and a
    /// capped bonus for time spent in the queue keeps low-priority entries
    /// from starving behind a steady stream of hotter ones.
    pub fn load_weight(&self, now_ms: u64, enqueued_ms: u64) -> f32 {
        if self.priority() == Priority::Critical {
            return 0.0;
        }

        let mut weight = self.priority() as u8 as f32 * 10.0;

        let flags = self.flags();
        if flags.contains(EntityFlags::HAS_INSTANCE_FALLBACK) {
            weight += 20.0;
        } else if flags.contains(EntityFlags::HAS_TYPE_FALLBACK) {
            weight += 10.0;
        }

        let since_acquire = (now_ms.saturating_sub(self.last_acquire_ms()) as f32) / 1000.0;
        weight += since_acquire.min(10.0);

        let queue_age = (now_ms.saturating_sub(enqueued_ms) as f32) / 1000.0;
        (weight - (queue_age * 0.5).min(15.0)).max(0.0)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("ref_count", &self.reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_entity(priority: Priority, flags: u16) -> Arc<Entity> {
        Entity::new(ResourceKind::from_index(0), "res://test", priority, flags)
    }

    #[test]
    fn test_flag_set_and_clear() {
        let entity = test_entity(Priority::Medium, 0);
        assert!(!entity.has_flag(EntityFlags::QUEUED_FOR_LOAD));

        entity.set_flag(EntityFlags::QUEUED_FOR_LOAD);
        assert!(entity.has_flag(EntityFlags::QUEUED_FOR_LOAD));

        assert!(entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD));
        assert!(!entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD));
    }

    #[test]
    fn test_critical_weight_is_zero() {
        let entity = test_entity(Priority::Critical, 0);
        assert_eq!(entity.load_weight(60_000, 0), 0.0);
    }

    #[test]
    fn test_fallback_lowers_urgency() {
        let plain = test_entity(Priority::Medium, 0);
        let with_fallback = test_entity(Priority::Medium, EntityFlags::HAS_INSTANCE_FALLBACK);
        let now = 1_000;
        assert!(plain.load_weight(now, now) < with_fallback.load_weight(now, now));
    }

    #[test]
    fn test_queue_age_promotes_stale_entries() {
        let entity = test_entity(Priority::Low, 0);
        let fresh = entity.load_weight(10_000, 10_000);
        let stale = entity.load_weight(40_000, 10_000);
        assert!(stale < fresh);
    }
}
