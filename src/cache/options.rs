//! Cache construction
//!
//! Builder-style options consumed by [`CacheOptions::init`], which creates
//! the cache and spawns its worker pool. The thread calling `init` becomes
//! the cache's main thread: main-thread builds and deferred unloads run
//! there, through `per_frame_update` or blocking acquires.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{scheduler, ResourceCache};
use crate::loader::{FileLoader, ResourceLoader};

pub struct CacheOptions {
    pub(crate) worker_threads: usize,
    pub(crate) default_loader: Arc<dyn ResourceLoader>,
    pub(crate) auto_free_budget: Option<Duration>,
    pub(crate) auto_free_idle: Duration,
    pub(crate) export_mode: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self {
            worker_threads: 4,
            default_loader: Arc::new(FileLoader::new()),
            auto_free_budget: None,
            auto_free_idle: Duration::from_secs(10),
            export_mode: false,
        }
    }

    /// Size of the worker pool. Zero is valid: all loading then happens on
    /// the calling threads through blocking acquires and `pump_loading`.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Loader used by kinds without a loader override.
    pub fn default_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.default_loader = loader;
        self
    }

    /// Runs a time-boxed eviction pass on every `per_frame_update`.
    pub fn auto_free(mut self, budget: Duration, min_idle: Duration) -> Self {
        self.auto_free_budget = Some(budget);
        self.auto_free_idle = min_idle;
        self
    }

    /// Start in export mode: acquires that would load content assert.
    pub fn export_mode(mut self, enable: bool) -> Self {
        self.export_mode = enable;
        self
    }

    /// Builds the cache and spawns the worker pool.
    pub fn init(self) -> Arc<ResourceCache> {
        let cache = Arc::new(ResourceCache::from_options(&self));

        let mut workers = Vec::with_capacity(self.worker_threads);
        for index in 0..self.worker_threads {
            let cache = cache.clone();
            let handle = std::thread::Builder::new()
                .name(format!("resource-loader-{index}"))
                .spawn(move || scheduler::worker_main(cache))
                .expect("failed to spawn resource loader thread");
            workers.push(handle);
        }
        cache.inner.lock().workers = workers;

        cache
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new()
    }
}
