//! The resource cache
//!
//! This is the context object everything else hangs off: it owns the kind
//! registry, the table of live entities, the load queue, the event stream and
//! the worker pool. Create one through [`CacheOptions`](options::CacheOptions)
//! and tear it down with [`ResourceCache::shutdown`]; per-frame maintenance
//! goes through [`ResourceCache::per_frame_update`].

pub mod metrics;
pub mod options;
mod queue;
mod scheduler;
mod sweeper;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::content::{Descriptor, ResourceContent};
use crate::entity::{Entity, EntityFlags, Priority, ResourceState};
use crate::events::{
    ManagerEvent, ResourceEvent, ResourceEventKind, SubscriberId,
};
use crate::handle::{Handle, UntypedHandle};
use crate::kind::{KindDescriptor, KindRegistry, ResourceKind};
use crate::loader::{LoadRequest, ResourceLoader};
use crate::overrides::{OverrideDecider, RedirectTable};

use metrics::CacheMetricsHandle;
use queue::LoadQueue;
use scheduler::PendingBuild;
use sweeper::SweepCursor;

pub use scheduler::{
    AcquireMode, AcquireResult, ContentGuard, LoadProgress, UntypedContentGuard,
};

/// Entities acquired within this window before a reload get requeued right
/// away instead of waiting for the next acquire.
const RELOAD_PRELOAD_WINDOW_MS: u64 = 30_000;

pub(crate) struct CacheInner {
    pub registry: KindRegistry,
    pub redirects: RedirectTable,
    /// Entity tables, indexed by kind. Ordered so sweep cursors can resume.
    pub tables: Vec<BTreeMap<Arc<str>, Arc<Entity>>>,
    pub queue: LoadQueue,
    pub events: crate::events::EventHub,
    pub asset_types: HashMap<String, ResourceKind>,
    pub default_loader: Arc<dyn ResourceLoader>,
    pub pending_main_builds: Vec<PendingBuild>,
    pub pending_main_unloads: Vec<Arc<Entity>>,
    pub workers: Vec<std::thread::JoinHandle<()>>,
    /// Loads currently owned by a thread (read or build phase).
    pub in_flight: usize,
    pub broadcast_exists: bool,
    pub no_fallback_frames: u32,
    pub auto_free_budget: Option<Duration>,
    pub auto_free_idle: Duration,
    pub sweep_cursor: SweepCursor,
    pub shutdown: bool,
}

pub struct ResourceCache {
    pub(crate) inner: Mutex<CacheInner>,
    /// Wakes workers when the queue gains entries.
    pub(crate) work_cv: Condvar,
    /// Wakes blocking acquirers when any entity settles.
    pub(crate) state_cv: Condvar,
    metrics: CacheMetricsHandle,
    epoch: Instant,
    main_thread: ThreadId,
    export_mode: AtomicBool,
}

pub(crate) fn emit(inner: &mut CacheInner, event: ResourceEventKind, entity: &Entity) {
    let ev = ResourceEvent {
        event,
        kind: entity.kind,
        id: entity.id.clone(),
        state: entity.state(),
    };
    inner.events.broadcast(&ev);
}

impl ResourceCache {
    pub(crate) fn from_options(options: &options::CacheOptions) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                registry: KindRegistry::default(),
                redirects: RedirectTable::default(),
                tables: Vec::new(),
                queue: LoadQueue::default(),
                events: crate::events::EventHub::default(),
                asset_types: HashMap::new(),
                default_loader: options.default_loader.clone(),
                pending_main_builds: Vec::new(),
                pending_main_unloads: Vec::new(),
                workers: Vec::new(),
                in_flight: 0,
                broadcast_exists: false,
                no_fallback_frames: 0,
                auto_free_budget: options.auto_free_budget,
                auto_free_idle: options.auto_free_idle,
                sweep_cursor: SweepCursor::default(),
                shutdown: false,
            }),
            work_cv: Condvar::new(),
            state_cv: Condvar::new(),
            metrics: CacheMetricsHandle::new(),
            epoch: Instant::now(),
            main_thread: std::thread::current().id(),
            export_mode: AtomicBool::new(options.export_mode),
        }
    }

    /// Milliseconds since the cache was created; the time base for
    /// `last_acquire` stamps and idle thresholds.
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    pub fn metrics(&self) -> &CacheMetricsHandle {
        &self.metrics
    }

    // ---------------------------------------------------------------- kinds

    /// Registers a kind. Must happen before entities of the kind are requested.
    pub fn register_kind(&self, descriptor: KindDescriptor) -> ResourceKind {
        let mut inner = self.inner.lock();
        let kind = inner.registry.register(descriptor);
        inner.tables.push(BTreeMap::new());
        kind
    }

    pub fn kind_by_name(&self, name: &str) -> Option<ResourceKind> {
        self.inner.lock().registry.by_name(name)
    }

    pub fn kind_name(&self, kind: ResourceKind) -> Arc<str> {
        self.inner.lock().registry.record(kind).name.clone()
    }

    /// Maps a tooling-side asset type name to the kind that loads it.
    pub fn register_asset_type(&self, asset_type: &str, kind: ResourceKind) {
        self.inner
            .lock()
            .asset_types
            .insert(asset_type.to_lowercase(), kind);
    }

    pub fn find_kind_for_asset_type(&self, asset_type: &str) -> Option<ResourceKind> {
        self.inner
            .lock()
            .asset_types
            .get(&asset_type.to_lowercase())
            .copied()
    }

    /// Allows `target` to be acquired while content of `updating` builds.
    /// Must be called before load traffic exercises the pair.
    pub fn allow_nested_acquire(&self, updating: ResourceKind, target: ResourceKind) {
        self.inner.lock().registry.allow_nested_acquire(updating, target);
    }

    pub fn is_nested_acquire_allowed(&self, updating: ResourceKind, target: ResourceKind) -> bool {
        self.inner
            .lock()
            .registry
            .is_nested_acquire_allowed(updating, target)
    }

    // ------------------------------------------------------------- fallbacks

    /// Kind-level fallback returned while entities of `kind` are still loading.
    pub fn set_kind_loading_fallback(&self, kind: ResourceKind, fallback: Option<UntypedHandle>) {
        let mut inner = self.inner.lock();
        let has_fallback = fallback.is_some();
        inner.registry.record_mut(kind).loading_fallback = fallback;
        for entity in inner.tables[kind.index()].values() {
            if has_fallback {
                entity.set_flag(EntityFlags::HAS_TYPE_FALLBACK);
            } else {
                entity.clear_flag(EntityFlags::HAS_TYPE_FALLBACK);
            }
        }
    }

    /// Kind-level substitute for entities whose load failed.
    pub fn set_kind_missing_fallback(&self, kind: ResourceKind, fallback: Option<UntypedHandle>) {
        self.inner.lock().registry.record_mut(kind).missing_fallback = fallback;
    }

    /// Per-entity loading fallback; beats the kind-level one on acquire.
    pub fn set_instance_loading_fallback(
        &self,
        handle: &UntypedHandle,
        fallback: Option<UntypedHandle>,
    ) {
        let _guard = self.inner.lock();
        if fallback.is_some() {
            handle.entity.set_flag(EntityFlags::HAS_INSTANCE_FALLBACK);
        } else {
            handle.entity.clear_flag(EntityFlags::HAS_INSTANCE_FALLBACK);
        }
        handle.entity.extra.lock().loading_fallback = fallback;
    }

    /// Per-entity missing fallback; beats the kind-level one on acquire.
    pub fn set_instance_missing_fallback(
        &self,
        handle: &UntypedHandle,
        fallback: Option<UntypedHandle>,
    ) {
        let _guard = self.inner.lock();
        handle.entity.extra.lock().missing_fallback = fallback;
    }

    // ------------------------------------------------- redirection, override

    /// Redirects lookups of `alias` to `target` before the table is probed.
    pub fn register_redirect(&self, alias: &str, target: &str) {
        self.inner.lock().redirects.register_alias(alias, target);
    }

    pub fn unregister_redirect(&self, alias: &str) {
        self.inner.lock().redirects.unregister_alias(alias);
    }

    /// Installs `decider` so requests for any ancestor of `derived` resolve to
    /// `derived` when the decider matches the resolved id.
    pub fn register_override(&self, derived: ResourceKind, decider: OverrideDecider) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.redirects.register_override(&inner.registry, derived, decider);
    }

    pub fn unregister_override(&self, derived: ResourceKind) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.redirects.unregister_override(&inner.registry, derived);
    }

    // ------------------------------------------------------------ table ops

    /// Returns a handle to `(kind, id)`, creating the entity on first request.
    /// Resolves redirection and kind overrides; never blocks on I/O.
    pub fn load_untyped(&self, kind: ResourceKind, id: &str) -> UntypedHandle {
        let mut inner = self.inner.lock();
        self.get_or_create_locked(&mut inner, kind, id, true)
    }

    pub fn load<T: ResourceContent>(&self, kind: ResourceKind, id: &str) -> Handle<T> {
        self.load_untyped(kind, id).typed()
    }

    /// Same as [`load`](Self::load) but also installs an instance fallback.
    pub fn load_with_fallback<T: ResourceContent>(
        &self,
        kind: ResourceKind,
        id: &str,
        fallback: &Handle<T>,
    ) -> Handle<T> {
        let handle = self.load_untyped(kind, id);
        self.set_instance_loading_fallback(&handle, Some(fallback.untyped().clone()));
        handle.typed()
    }

    /// Lookup without creating; used to avoid duplicate procedural creation.
    pub fn get_existing_untyped(&self, kind: ResourceKind, id: &str) -> Option<UntypedHandle> {
        let inner = self.inner.lock();
        let canonical = inner.redirects.resolve_alias(id);
        let kind = inner.redirects.resolve_kind(kind, canonical);
        inner.tables[kind.index()]
            .get(canonical)
            .map(|entity| UntypedHandle::new(entity.clone()))
    }

    pub fn get_existing<T: ResourceContent>(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Option<Handle<T>> {
        Some(self.get_existing_untyped(kind, id)?.typed())
    }

    /// Builds content synchronously from an in-memory descriptor. The entity
    /// goes through the normal state machine but skips the read phase, and is
    /// neither reloadable nor evictable piecemeal differently from others.
    pub fn create_from_descriptor_untyped(
        &self,
        kind: ResourceKind,
        id: &str,
        descriptor: Descriptor,
    ) -> UntypedHandle {
        let (handle, build) = {
            let mut inner = self.inner.lock();
            let handle = self.get_or_create_locked(&mut inner, kind, id, false);
            let entity = handle.entity.clone();
            assert!(
                entity.state() == ResourceState::Unloaded,
                "create_from_descriptor: '{}' already has content",
                entity.id
            );
            entity.set_flag(EntityFlags::CREATED_VIA_DESCRIPTOR);
            let build = self.begin_detached_build(&mut inner, entity);
            (handle, build)
        };
        self.run_descriptor_build(build, descriptor);
        handle
    }

    pub fn create_from_descriptor<T: ResourceContent>(
        &self,
        kind: ResourceKind,
        id: &str,
        descriptor: Descriptor,
    ) -> Handle<T> {
        self.create_from_descriptor_untyped(kind, id, descriptor).typed()
    }

    /// Returns the existing entity or creates it from the descriptor.
    pub fn get_or_create_from_descriptor_untyped(
        &self,
        kind: ResourceKind,
        id: &str,
        descriptor: Descriptor,
    ) -> UntypedHandle {
        let (handle, build) = {
            let mut inner = self.inner.lock();
            let handle = self.get_or_create_locked(&mut inner, kind, id, false);
            let entity = handle.entity.clone();
            if entity.state() != ResourceState::Unloaded {
                return handle;
            }
            entity.set_flag(EntityFlags::CREATED_VIA_DESCRIPTOR);
            let build = self.begin_detached_build(&mut inner, entity);
            (handle, build)
        };
        self.run_descriptor_build(build, descriptor);
        handle
    }

    /// Returns the existing entity or creates one wired to a custom loader,
    /// queued like any other load instead of built synchronously.
    pub fn get_existing_or_create_with_loader(
        &self,
        kind: ResourceKind,
        id: &str,
        loader: Arc<dyn ResourceLoader>,
        loading_fallback: Option<UntypedHandle>,
    ) -> UntypedHandle {
        let mut inner = self.inner.lock();
        let canonical = inner.redirects.resolve_alias(id).to_string();
        let resolved = inner.redirects.resolve_kind(kind, &canonical);
        if let Some(entity) = inner.tables[resolved.index()].get(canonical.as_str()) {
            return UntypedHandle::new(entity.clone());
        }

        let handle = self.get_or_create_locked(&mut inner, kind, id, false);
        handle
            .entity
            .set_flag(EntityFlags::HAS_CUSTOM_LOADER | EntityFlags::CREATED_VIA_DESCRIPTOR);
        {
            let mut extra = handle.entity.extra.lock();
            extra.custom_loader = Some(loader);
            if loading_fallback.is_some() {
                handle.entity.set_flag(EntityFlags::HAS_INSTANCE_FALLBACK);
                extra.loading_fallback = loading_fallback;
            }
        }
        handle
    }

    /// Generates an id that no other caller using the same scheme will mint.
    pub fn generate_unique_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::new_v4())
    }

    pub(crate) fn get_or_create_locked(
        &self,
        inner: &mut CacheInner,
        requested: ResourceKind,
        id: &str,
        reloadable: bool,
    ) -> UntypedHandle {
        let canonical = inner.redirects.resolve_alias(id).to_string();
        let kind = inner.redirects.resolve_kind(requested, &canonical);

        if let Some(entity) = inner.tables[kind.index()].get(canonical.as_str()) {
            return UntypedHandle::new(entity.clone());
        }

        let record = inner.registry.record(kind);
        let mut flags = 0;
        if reloadable {
            flags |= EntityFlags::RELOADABLE;
        }
        if record.loading_fallback.is_some() {
            flags |= EntityFlags::HAS_TYPE_FALLBACK;
        }
        if record.main_thread_build {
            flags |= EntityFlags::MAIN_THREAD_BUILD;
        }

        let entity = Entity::new(kind, &canonical, record.default_priority, flags);
        inner.tables[kind.index()].insert(entity.id.clone(), entity.clone());
        self.metrics.record_created();
        emit(inner, ResourceEventKind::Created, &entity);
        UntypedHandle::new(entity)
    }

    // ------------------------------------------------------------- reloading

    /// Unloads and requeues one entity. Returns false for entities that are
    /// not reloadable, protected from file reloads, current on disk, or
    /// already owned by a worker.
    pub fn reload(&self, handle: &UntypedHandle, force: bool) -> bool {
        let mut inner = self.inner.lock();
        self.reload_locked(&mut inner, &handle.entity, force)
    }

    pub fn reload_of_kind(&self, kind: ResourceKind, force: bool) -> u32 {
        let mut inner = self.inner.lock();
        let entities: Vec<Arc<Entity>> =
            inner.tables[kind.index()].values().cloned().collect();
        let mut count = 0;
        for entity in &entities {
            if self.reload_locked(&mut inner, entity, force) {
                count += 1;
            }
        }
        count
    }

    pub fn reload_all(&self, force: bool) -> u32 {
        let mut inner = self.inner.lock();
        let entities: Vec<Arc<Entity>> = inner
            .tables
            .iter()
            .flat_map(|table| table.values().cloned())
            .collect();
        let mut count = 0;
        for entity in &entities {
            if self.reload_locked(&mut inner, entity, force) {
                count += 1;
            }
        }
        if count > 0 {
            inner.events.broadcast_manager(&ManagerEvent::ReloadAll);
        }
        count
    }

    fn reload_locked(&self, inner: &mut CacheInner, entity: &Arc<Entity>, force: bool) -> bool {
        if inner.shutdown {
            return false;
        }
        if !entity.has_flag(EntityFlags::RELOADABLE) {
            return false;
        }
        if !force && entity.has_flag(EntityFlags::PREVENT_FILE_RELOAD) {
            return false;
        }
        if entity.state() == ResourceState::Unloaded {
            return false;
        }

        let mut allow_preload = true;
        if entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
            allow_preload = false;
            if !inner.queue.contains(entity) {
                // owned by a worker right now; touching it would race the build
                log::debug!(
                    "Resource '{}' is not being reloaded, it is currently being loaded",
                    entity.id
                );
                return false;
            }
        }

        if !force {
            let record = inner.registry.record(entity.kind);
            let loader = record
                .loader
                .clone()
                .unwrap_or_else(|| inner.default_loader.clone());
            let request = LoadRequest {
                kind: entity.kind,
                kind_name: &record.name,
                id: &entity.id,
            };
            let modified = entity.extra.lock().modified;
            if !loader.is_outdated(&request, modified) {
                return false;
            }
            if entity.state() == ResourceState::LoadedResourceMissing {
                log::debug!("Resource '{}' is missing and will be reloaded", entity.id);
            } else {
                log::debug!("Resource '{}' is outdated and will be reloaded", entity.id);
            }
        }

        if entity.has_flag(EntityFlags::MAIN_THREAD_BUILD) && !self.is_main_thread() {
            inner.pending_main_unloads.push(entity.clone());
        } else {
            self.unload_content(inner, entity);
            if entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
                entity.set_state(ResourceState::QueuedForLoad);
            }
        }

        if allow_preload
            && self.now_ms().saturating_sub(entity.last_acquire_ms()) <= RELOAD_PRELOAD_WINDOW_MS
        {
            self.preload_locked(inner, entity, false);
        }

        true
    }

    /// Replaces an entity's bytes with data served by `loader` and reloads it.
    /// Sets `prevent-file-reload` so later file reloads keep the custom data.
    pub fn update_with_custom_loader(
        &self,
        handle: &UntypedHandle,
        loader: Arc<dyn ResourceLoader>,
    ) {
        let mut inner = self.inner.lock();
        let entity = &handle.entity;
        entity.set_flag(EntityFlags::HAS_CUSTOM_LOADER);
        entity.extra.lock().custom_loader = Some(loader);
        self.reload_locked(&mut inner, entity, true);
    }

    /// Removes `prevent-file-reload` and forces a reload from the regular
    /// loader, undoing [`update_with_custom_loader`](Self::update_with_custom_loader).
    pub fn restore(&self, handle: &UntypedHandle) {
        let mut inner = self.inner.lock();
        handle.entity.clear_flag(EntityFlags::PREVENT_FILE_RELOAD);
        self.reload_locked(&mut inner, &handle.entity, true);
    }

    /// Feeds preliminary low-resolution data into an entity so consumers get
    /// usable content before the full load runs. Skipped when the entity
    /// already received low-res data or a worker owns it.
    pub fn set_low_res_data(&self, handle: &UntypedHandle, stream: Box<dyn Read + Send>) {
        let entity = handle.entity.clone();
        if entity.has_flag(EntityFlags::HAS_LOW_RES_DATA) {
            return;
        }
        if !entity.has_flag(EntityFlags::RELOADABLE) {
            return;
        }

        let build = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return;
            }
            // set even if the data ends up unused, so nobody tries again
            entity.set_flag(EntityFlags::HAS_LOW_RES_DATA);

            if entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
                if !inner.queue.remove(&entity) {
                    // already picked up by a worker; do not touch it
                    return;
                }
                entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
            } else if entity.state() == ResourceState::Loading {
                return;
            }
            self.begin_detached_build(&mut inner, entity)
        };
        self.run_stream_build(build, stream);
    }

    // ---------------------------------------------------------------- events

    pub fn subscribe(
        &self,
        callback: impl FnMut(&ResourceEvent) + Send + 'static,
    ) -> SubscriberId {
        self.inner.lock().events.subscribe(Box::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().events.unsubscribe(id);
    }

    pub fn subscribe_manager(
        &self,
        callback: impl FnMut(&ManagerEvent) + Send + 'static,
    ) -> SubscriberId {
        self.inner.lock().events.subscribe_manager(Box::new(callback))
    }

    pub fn unsubscribe_manager(&self, id: SubscriberId) {
        self.inner.lock().events.unsubscribe_manager(id);
    }

    /// Requests an `Exists` event for every live entity on the next
    /// [`per_frame_update`](Self::per_frame_update); used by inspection tools
    /// to learn about entities created before they subscribed.
    pub fn broadcast_exists_event(&self) {
        self.inner.lock().broadcast_exists = true;
    }

    // ------------------------------------------------------------ per frame

    /// One call per external tick: flushes the `Exists` broadcast, runs
    /// deferred main-thread unloads and builds, ages the no-fallback window
    /// and triggers the automatic eviction pass when configured.
    pub fn per_frame_update(&self) {
        let auto_free = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.shutdown {
                return;
            }

            if inner.broadcast_exists {
                inner.broadcast_exists = false;
                let snapshot: Vec<Arc<Entity>> = inner
                    .tables
                    .iter()
                    .flat_map(|table| table.values().cloned())
                    .collect();
                for entity in &snapshot {
                    emit(inner, ResourceEventKind::Exists, entity);
                }
            }

            let unloads: Vec<Arc<Entity>> = inner.pending_main_unloads.drain(..).collect();
            for entity in &unloads {
                self.unload_content(inner, entity);
                if entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
                    entity.set_state(ResourceState::QueuedForLoad);
                }
            }

            inner.no_fallback_frames = inner.no_fallback_frames.saturating_sub(1);
            inner.auto_free_budget.map(|budget| (budget, inner.auto_free_idle))
        };

        self.drain_pending_main_builds();

        if let Some((budget, idle)) = auto_free {
            self.free_unused(budget, idle);
        }
    }

    /// Treats `AllowLoadingFallback` acquires as blocking for the next
    /// `frames` frames; used around loading screens and cutscene starts.
    pub fn force_no_fallback_acquisition(&self, frames: u32) {
        let mut inner = self.inner.lock();
        inner.no_fallback_frames = inner.no_fallback_frames.max(frames);
    }

    // ------------------------------------------------------------- shutdown

    /// True while queued or in-flight loads exist.
    pub fn is_loading_in_progress(&self) -> bool {
        let inner = self.inner.lock();
        !inner.queue.is_empty() || inner.in_flight > 0 || !inner.pending_main_builds.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Stops all loading, drains the workers, frees everything unreferenced
    /// and reports entities that are still referenced. Idempotent.
    pub fn shutdown(&self) {
        const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

        let workers = {
            let mut guard = self.inner.lock();
            if guard.shutdown {
                return;
            }
            guard.shutdown = true;
            guard.events.broadcast_manager(&ManagerEvent::ShuttingDown);

            // drop kind-level fallback handles so their targets can be freed
            {
                let inner = &mut *guard;
                for kind in inner.registry.kinds().collect::<Vec<_>>() {
                    let record = inner.registry.record_mut(kind);
                    record.loading_fallback = None;
                    record.missing_fallback = None;
                }
            }

            // cancel everything still waiting
            for entry in guard.queue.drain() {
                entry.entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
                entry.entity.set_state(ResourceState::Unloaded);
            }
            self.work_cv.notify_all();

            // give in-flight loads a bounded chance to finish
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            while guard.in_flight > 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let _ = self.state_cv.wait_for(&mut guard, deadline - now);
            }

            // force-clear the queued flag on anything that could not be
            // cancelled in time; otherwise eviction would stay blocked forever
            for table in &guard.tables {
                for entity in table.values() {
                    entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
                }
            }
            guard.pending_main_builds.clear();

            let unloads: Vec<Arc<Entity>> = guard.pending_main_unloads.drain(..).collect();
            let inner = &mut *guard;
            for entity in &unloads {
                self.unload_content(inner, entity);
            }

            std::mem::take(&mut guard.workers)
        };

        for worker in workers {
            let _ = worker.join();
        }

        let freed = self.free_all_unused();
        log::debug!("Freed {freed} resources during shutdown");

        // anything left is a leak on the caller's side
        let inner = self.inner.lock();
        for kind in inner.registry.kinds() {
            let table = &inner.tables[kind.index()];
            if table.is_empty() {
                continue;
            }
            let name = inner.registry.record(kind).name.clone();
            log::error!(
                "{} resources of kind '{}' are still referenced",
                table.len(),
                name
            );
            for entity in table.values() {
                log::info!("RC = {}, ID = '{}'", entity.reference_count(), entity.id);
            }
        }
    }

    // ---------------------------------------------------------- export mode

    /// In export mode any acquire that would trigger loading asserts instead;
    /// used when only handle shape matters, e.g. while exporting scenes.
    pub fn enable_export_mode(&self, enable: bool) {
        self.export_mode.store(enable, Ordering::Release);
    }

    pub fn is_export_mode(&self) -> bool {
        self.export_mode.load(Ordering::Acquire)
    }

    /// Creates a handle without any loading; only legal in export mode.
    pub fn get_handle_for_export(&self, kind: ResourceKind, id: &str) -> UntypedHandle {
        assert!(
            self.is_export_mode(),
            "get_handle_for_export requires export mode"
        );
        self.load_untyped(kind, id)
    }

    // ------------------------------------------------------------- priority

    pub fn set_priority(&self, handle: &UntypedHandle, priority: Priority) {
        if handle.entity.priority() == priority {
            return;
        }
        let mut inner = self.inner.lock();
        handle.entity.set_priority(priority);
        emit(&mut inner, ResourceEventKind::PriorityChanged, &handle.entity);
    }
}
