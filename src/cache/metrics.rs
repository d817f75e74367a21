use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::content::MemoryUsage;

/// Tracks counters for entity lifecycle and resident memory
#[derive(Debug, Default)]
pub struct CacheMetrics {
    entities_created: AtomicU64,
    entities_freed: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    resident_cpu_bytes: AtomicU64,
    resident_gpu_bytes: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self) {
        self.entities_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_freed(&self) {
        self.entities_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_completed(&self) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_resident(&self, usage: MemoryUsage) {
        self.resident_cpu_bytes
            .fetch_add(usage.cpu_bytes, Ordering::Relaxed);
        self.resident_gpu_bytes
            .fetch_add(usage.gpu_bytes, Ordering::Relaxed);
    }

    pub(crate) fn sub_resident(&self, usage: MemoryUsage) {
        self.resident_cpu_bytes
            .fetch_sub(usage.cpu_bytes, Ordering::Relaxed);
        self.resident_gpu_bytes
            .fetch_sub(usage.gpu_bytes, Ordering::Relaxed);
    }

    /// Total entities registered over the cache lifetime
    pub fn entities_created(&self) -> u64 {
        self.entities_created.load(Ordering::Relaxed)
    }

    /// Total entities destroyed by the sweeper or shutdown
    pub fn entities_freed(&self) -> u64 {
        self.entities_freed.load(Ordering::Relaxed)
    }

    pub fn loads_completed(&self) -> u64 {
        self.loads_completed.load(Ordering::Relaxed)
    }

    pub fn loads_failed(&self) -> u64 {
        self.loads_failed.load(Ordering::Relaxed)
    }

    /// CPU bytes currently held by loaded content
    pub fn resident_cpu_bytes(&self) -> u64 {
        self.resident_cpu_bytes.load(Ordering::Relaxed)
    }

    /// GPU bytes currently held by loaded content
    pub fn resident_gpu_bytes(&self) -> u64 {
        self.resident_gpu_bytes.load(Ordering::Relaxed)
    }
}

/// A thread-safe wrapper around CacheMetrics
#[derive(Debug, Clone, Default)]
pub struct CacheMetricsHandle(Arc<CacheMetrics>);

impl CacheMetricsHandle {
    /// Create a new metrics handle
    pub fn new() -> Self {
        Self(Arc::new(CacheMetrics::new()))
    }

    /// Get a reference to the underlying metrics
    pub fn inner(&self) -> &CacheMetrics {
        &self.0
    }
}

impl std::ops::Deref for CacheMetricsHandle {
    type Target = CacheMetrics;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
