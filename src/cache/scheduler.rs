//! Loading pipeline
//!
//! Queued entities are drained by a fixed pool of worker threads. Each load
//! runs in two phases: the read phase asks the resolved loader for a byte
//! stream, the build phase hands that stream to the kind's content builder.
//! Builds for main-thread kinds are parked and picked up by the per-frame
//! entry point or a blocking acquirer running on the init thread.
//!
//! The same pipeline is also driven inline: blocking acquires steal their
//! entity out of the queue and load it on the calling thread, and
//! [`ResourceCache::pump_loading`] processes entries on the caller until a
//! wall-clock budget runs out.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::cache::{emit, CacheInner, ResourceCache};
use crate::content::{BuildContext, BuiltContent, ContentPayload, Descriptor, ResourceContent};
use crate::entity::{Entity, EntityFlags, Priority, ResourceState};
use crate::error::ResourceError;
use crate::events::ResourceEventKind;
use crate::kind::ResourceKind;
use crate::loader::{LoadData, LoadRequest, ResourceLoader};

thread_local! {
    /// Kind whose content is being built on this thread, if any. Drives the
    /// reentrancy check that catches illegal nested acquires.
    static CURRENT_BUILD_KIND: Cell<Option<ResourceKind>> = const { Cell::new(None) };
}

fn current_build_kind() -> Option<ResourceKind> {
    CURRENT_BUILD_KIND.with(Cell::get)
}

fn with_build_scope<R>(kind: ResourceKind, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_BUILD_KIND.with(|cell| cell.replace(Some(kind)));
    let result = f();
    CURRENT_BUILD_KIND.with(|cell| cell.set(previous));
    result
}

/// How the caller wants to wait for content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Return the loading fallback while the entity is still on its way;
    /// the default for steady-state consumers.
    AllowLoadingFallback,
    /// Suspend the calling thread until the entity settles.
    BlockUntilLoaded,
}

/// What an acquire actually returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The entity's own content.
    Final,
    /// A loading fallback; the real content is still on its way.
    LoadingFallback,
    /// A missing fallback; the real content failed to load.
    MissingFallback,
}

/// Outcome of a budget-bounded loading step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    /// Work remains; call again.
    Continue,
    /// Queue and in-flight loads are fully drained.
    Finished,
}

/// Pinned, typed view of acquired content. Keeps the payload alive even if
/// the entity is evicted while the guard is held.
pub struct ContentGuard<T: ResourceContent> {
    content: Arc<T>,
    result: AcquireResult,
}

impl<T: ResourceContent> ContentGuard<T> {
    fn downcast(payload: ContentPayload, result: AcquireResult, id: &str) -> Self {
        match payload.downcast::<T>() {
            Ok(content) => Self { content, result },
            Err(_) => panic!("content of '{id}' does not match the requested handle type"),
        }
    }

    pub fn result(&self) -> AcquireResult {
        self.result
    }

    /// Shares ownership of the payload beyond the guard's lifetime.
    pub fn into_arc(self) -> Arc<T> {
        self.content
    }
}

impl<T: ResourceContent> std::ops::Deref for ContentGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.content
    }
}

/// Type-erased version of [`ContentGuard`].
pub struct UntypedContentGuard {
    content: ContentPayload,
    result: AcquireResult,
}

impl UntypedContentGuard {
    pub fn result(&self) -> AcquireResult {
        self.result
    }

    pub fn downcast_ref<T: ResourceContent>(&self) -> Option<&T> {
        self.content.downcast_ref::<T>()
    }

    pub fn into_arc(self) -> ContentPayload {
        self.content
    }
}

/// A load a thread has committed to: loader and builder resolved, entity in
/// the `Loading` state, counted as in-flight.
pub(crate) struct LoadTask {
    entity: Arc<Entity>,
    loader: Arc<dyn ResourceLoader>,
    builder: Arc<dyn crate::content::ContentBuilder>,
    kind_name: Arc<str>,
    main_thread_build: bool,
}

/// A read-phase result waiting for the main thread to build it.
pub(crate) struct PendingBuild {
    pub entity: Arc<Entity>,
    builder: Arc<dyn crate::content::ContentBuilder>,
    kind_name: Arc<str>,
    data: LoadData,
}

/// A synchronous build (descriptor or low-res data) outside the queue.
pub(crate) struct DetachedBuild {
    entity: Arc<Entity>,
    builder: Arc<dyn crate::content::ContentBuilder>,
    kind_name: Arc<str>,
}

enum PumpStep {
    Load(Box<LoadTask>),
    Build(Box<PendingBuild>),
    Skip,
    Idle(LoadProgress),
}

enum EnsureAction {
    Run(Box<LoadTask>),
    Build(Box<PendingBuild>),
    Retry,
}

/// Body of a pool worker thread.
pub(crate) fn worker_main(cache: Arc<ResourceCache>) {
    loop {
        let task = {
            let mut inner = cache.inner.lock();
            loop {
                if inner.shutdown {
                    return;
                }
                inner.queue.refresh(cache.now_ms());
                match inner.queue.pop_front() {
                    Some(entry) => {
                        // cancelled entries lose the flag before removal, but
                        // a stale one slipping through must not be loaded
                        if !entry.entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
                            continue;
                        }
                        break cache.begin_load(&mut inner, entry.entity);
                    }
                    None => cache.work_cv.wait(&mut inner),
                }
            }
        };
        cache.run_load_task(task);
    }
}

impl ResourceCache {
    // ------------------------------------------------------------ enqueueing

    /// Queues an entity for loading; front insertion is reserved for blocking
    /// acquires and marks the entity critical.
    pub(crate) fn preload_locked(
        &self,
        inner: &mut CacheInner,
        entity: &Arc<Entity>,
        front: bool,
    ) {
        if inner.shutdown {
            return;
        }
        assert!(
            !self.is_export_mode(),
            "resource '{}' cannot be loaded in export mode",
            entity.id
        );

        match entity.state() {
            ResourceState::Loaded
            | ResourceState::LoadedResourceMissing
            | ResourceState::Loading => {}
            ResourceState::QueuedForLoad => {
                // already waiting; a blocking acquire may still jump the line
                if front && inner.queue.remove(entity) {
                    entity.set_priority(Priority::Critical);
                    inner.queue.push_front(entity.clone(), self.now_ms());
                }
            }
            ResourceState::Unloaded => {
                entity.set_flag(EntityFlags::QUEUED_FOR_LOAD);
                entity.set_state(ResourceState::QueuedForLoad);
                if front {
                    entity.set_priority(Priority::Critical);
                    inner.queue.push_front(entity.clone(), self.now_ms());
                } else {
                    inner.queue.push_back(entity.clone(), self.now_ms());
                }
                self.work_cv.notify_one();
            }
        }
    }

    /// Queues the entity without blocking; concurrent preloads of the same
    /// entity never duplicate work.
    pub fn preload(&self, handle: &crate::handle::UntypedHandle) {
        let mut inner = self.inner.lock();
        self.preload_locked(&mut inner, &handle.entity, false);
    }

    /// Loads the entity before returning, jumping the queue if necessary.
    pub fn force_load_now(&self, handle: &crate::handle::UntypedHandle) {
        if handle.entity.state().is_settled() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            self.preload_locked(&mut inner, &handle.entity, true);
        }
        self.ensure_loaded(&handle.entity);
    }

    // --------------------------------------------------------------- phases

    /// Marks the entity `Loading` and resolves its loader and builder.
    /// A pending custom loader is consumed here and pins the entity against
    /// later file reloads.
    pub(crate) fn begin_load(&self, inner: &mut CacheInner, entity: Arc<Entity>) -> Box<LoadTask> {
        entity.set_state(ResourceState::Loading);

        let record = inner.registry.record(entity.kind);
        let builder = record.builder.clone();
        let kind_name = record.name.clone();
        let main_thread_build = record.main_thread_build;
        let kind_loader = record.loader.clone();

        let custom = if entity.has_flag(EntityFlags::HAS_CUSTOM_LOADER) {
            entity.clear_flag(EntityFlags::HAS_CUSTOM_LOADER);
            entity.set_flag(EntityFlags::PREVENT_FILE_RELOAD);
            entity.extra.lock().custom_loader.take()
        } else {
            None
        };
        let loader = custom
            .or(kind_loader)
            .unwrap_or_else(|| inner.default_loader.clone());

        inner.in_flight += 1;
        Box::new(LoadTask {
            entity,
            loader,
            builder,
            kind_name,
            main_thread_build,
        })
    }

    /// Marks the entity `Loading` for a synchronous build outside the queue.
    pub(crate) fn begin_detached_build(
        &self,
        inner: &mut CacheInner,
        entity: Arc<Entity>,
    ) -> DetachedBuild {
        entity.set_state(ResourceState::Loading);
        let record = inner.registry.record(entity.kind);
        let builder = record.builder.clone();
        let kind_name = record.name.clone();
        inner.in_flight += 1;
        DetachedBuild {
            entity,
            builder,
            kind_name,
        }
    }

    /// Read phase, then build phase or main-thread hand-off.
    pub(crate) fn run_load_task(&self, task: Box<LoadTask>) {
        let task = *task;
        let open_result = {
            let request = LoadRequest {
                kind: task.entity.kind,
                kind_name: &task.kind_name,
                id: &task.entity.id,
            };
            task.loader.open(&request)
        };

        match open_result {
            Ok(data) => {
                if task.main_thread_build && !self.is_main_thread() {
                    let mut inner = self.inner.lock();
                    if inner.shutdown {
                        task.entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
                        task.entity.set_state(ResourceState::Unloaded);
                        inner.in_flight -= 1;
                        self.state_cv.notify_all();
                        return;
                    }
                    inner.pending_main_builds.push(PendingBuild {
                        entity: task.entity.clone(),
                        builder: task.builder,
                        kind_name: task.kind_name,
                        data,
                    });
                    inner.in_flight -= 1;
                    // blocked acquirers on the main thread pick these up
                    self.state_cv.notify_all();
                    return;
                }
                self.build_with_data(task.entity, task.builder, task.kind_name, data);
            }
            Err(err) => {
                let mut inner = self.inner.lock();
                self.finalize_result(
                    &mut inner,
                    &task.entity,
                    Err(ResourceError::Io(err)),
                    None,
                    None,
                );
            }
        }
    }

    fn build_with_data(
        &self,
        entity: Arc<Entity>,
        builder: Arc<dyn crate::content::ContentBuilder>,
        kind_name: Arc<str>,
        data: LoadData,
    ) {
        let LoadData {
            description,
            modified,
            mut stream,
        } = data;

        let cx = BuildContext {
            cache: self,
            kind: entity.kind,
            kind_name,
            id: entity.id.clone(),
            has_low_res_data: entity.has_flag(EntityFlags::HAS_LOW_RES_DATA),
        };
        let outcome = with_build_scope(entity.kind, || builder.build(&cx, &mut *stream));

        let mut inner = self.inner.lock();
        self.finalize_result(&mut inner, &entity, outcome, description, modified);
    }

    pub(crate) fn run_stream_build(
        &self,
        build: DetachedBuild,
        stream: Box<dyn std::io::Read + Send>,
    ) {
        let data = LoadData {
            description: None,
            modified: None,
            stream,
        };
        self.build_with_data(build.entity, build.builder, build.kind_name, data);
    }

    pub(crate) fn run_descriptor_build(&self, build: DetachedBuild, descriptor: Descriptor) {
        let cx = BuildContext {
            cache: self,
            kind: build.entity.kind,
            kind_name: build.kind_name,
            id: build.entity.id.clone(),
            has_low_res_data: false,
        };
        let outcome = with_build_scope(build.entity.kind, || {
            build.builder.build_from_descriptor(&cx, descriptor)
        });

        let mut inner = self.inner.lock();
        self.finalize_result(&mut inner, &build.entity, outcome, None, None);
    }

    /// Commits a build outcome: stores content and the memory report, moves
    /// the entity to `Loaded` or `LoadedResourceMissing`, and wakes waiters.
    pub(crate) fn finalize_result(
        &self,
        inner: &mut CacheInner,
        entity: &Arc<Entity>,
        outcome: crate::error::Result<BuiltContent>,
        description: Option<String>,
        modified: Option<SystemTime>,
    ) {
        if entity.unregistered.load(std::sync::atomic::Ordering::Acquire) {
            // destroyed while we were building; nothing to commit
            inner.in_flight -= 1;
            self.state_cv.notify_all();
            return;
        }

        {
            let mut extra = entity.extra.lock();
            if description.is_some() {
                extra.description = description;
            }
            if modified.is_some() {
                extra.modified = modified;
            }
        }

        let kind_name = inner.registry.record(entity.kind).name.clone();
        match outcome {
            Ok(built) => {
                assert!(
                    built.memory.is_fully_reported(),
                    "builder for kind '{}' did not report memory usage for '{}'",
                    kind_name,
                    entity.id
                );
                self.metrics().sub_resident(entity.memory_usage());
                *entity.content.lock() = Some(built.content);
                entity.set_memory_usage(built.memory);
                self.metrics().add_resident(built.memory);
                entity.bump_change_counter();
                entity.set_state(ResourceState::Loaded);
                self.metrics().record_load_completed();
                log::debug!("Updated {} - '{}'", kind_name, entity.id);
            }
            Err(err) => {
                log::warn!(
                    "Missing resource of kind '{}': '{}' ({})",
                    kind_name,
                    entity.id,
                    err
                );
                entity.set_state(ResourceState::LoadedResourceMissing);
                self.metrics().record_load_failed();
            }
        }

        entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
        entity.touch(self.now_ms());
        emit(inner, ResourceEventKind::ContentUpdated, entity);

        inner.in_flight -= 1;
        self.state_cv.notify_all();
        if !inner.queue.is_empty() {
            self.work_cv.notify_one();
        }
    }

    // ---------------------------------------------------- main-thread builds

    fn take_parked(
        &self,
        inner: &mut CacheInner,
        entity: &Arc<Entity>,
    ) -> Option<Box<PendingBuild>> {
        if !self.is_main_thread() {
            return None;
        }
        let index = inner
            .pending_main_builds
            .iter()
            .position(|build| Arc::ptr_eq(&build.entity, entity))?;
        inner.in_flight += 1;
        Some(Box::new(inner.pending_main_builds.remove(index)))
    }

    fn build_parked(&self, build: Box<PendingBuild>) {
        let build = *build;
        self.build_with_data(build.entity, build.builder, build.kind_name, build.data);
    }

    /// Builds everything parked for the main thread; no-op elsewhere.
    pub(crate) fn drain_pending_main_builds(&self) {
        if !self.is_main_thread() {
            return;
        }
        loop {
            let build = {
                let mut inner = self.inner.lock();
                if inner.pending_main_builds.is_empty() {
                    return;
                }
                inner.in_flight += 1;
                Box::new(inner.pending_main_builds.remove(0))
            };
            self.build_parked(build);
        }
    }

    // ------------------------------------------------------------- blocking

    /// Blocks until the entity settles, helping with the load inline instead
    /// of waiting whenever it can steal the entity from the queue. Never
    /// sleeps while holding the cache mutex. Returns false on shutdown.
    pub(crate) fn ensure_loaded(&self, entity: &Arc<Entity>) -> bool {
        loop {
            if entity.state().is_settled() {
                return true;
            }

            let action = {
                let mut inner = self.inner.lock();
                if entity.state().is_settled() {
                    return true;
                }
                if inner.shutdown {
                    return false;
                }

                match entity.state() {
                    ResourceState::QueuedForLoad => {
                        if inner.queue.remove(entity) {
                            EnsureAction::Run(self.begin_load(&mut inner, entity.clone()))
                        } else {
                            // a worker owns it; wait for it to settle
                            let _ = self
                                .state_cv
                                .wait_for(&mut inner, Duration::from_millis(50));
                            EnsureAction::Retry
                        }
                    }
                    ResourceState::Loading => {
                        if let Some(build) = self.take_parked(&mut inner, entity) {
                            EnsureAction::Build(build)
                        } else {
                            let _ = self
                                .state_cv
                                .wait_for(&mut inner, Duration::from_millis(50));
                            EnsureAction::Retry
                        }
                    }
                    ResourceState::Unloaded => {
                        // direct hand-off, no need to go through the queue
                        entity.set_flag(EntityFlags::QUEUED_FOR_LOAD);
                        EnsureAction::Run(self.begin_load(&mut inner, entity.clone()))
                    }
                    _ => EnsureAction::Retry,
                }
            };

            match action {
                EnsureAction::Run(task) => self.run_load_task(task),
                EnsureAction::Build(build) => self.build_parked(build),
                EnsureAction::Retry => {}
            }
        }
    }

    // ------------------------------------------------------------ budgeting

    /// Processes queued loads on the calling thread until `budget` elapses.
    /// Always performs at least one unit of work on a non-empty queue, and
    /// only reports `Finished` once nothing queued or in flight remains.
    pub fn pump_loading(&self, budget: Duration) -> LoadProgress {
        let start = Instant::now();
        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.shutdown {
                    PumpStep::Idle(LoadProgress::Finished)
                } else if self.is_main_thread() && !inner.pending_main_builds.is_empty() {
                    inner.in_flight += 1;
                    PumpStep::Build(Box::new(inner.pending_main_builds.remove(0)))
                } else {
                    inner.queue.refresh(self.now_ms());
                    match inner.queue.pop_front() {
                        Some(entry) => {
                            if entry.entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
                                PumpStep::Load(self.begin_load(&mut inner, entry.entity))
                            } else {
                                PumpStep::Skip
                            }
                        }
                        None => {
                            if inner.in_flight == 0 && inner.pending_main_builds.is_empty() {
                                PumpStep::Idle(LoadProgress::Finished)
                            } else {
                                PumpStep::Idle(LoadProgress::Continue)
                            }
                        }
                    }
                }
            };

            match step {
                PumpStep::Load(task) => self.run_load_task(task),
                PumpStep::Build(build) => self.build_parked(build),
                PumpStep::Skip => {}
                PumpStep::Idle(progress) => return progress,
            }

            if start.elapsed() >= budget {
                let inner = self.inner.lock();
                let done = inner.queue.is_empty()
                    && inner.pending_main_builds.is_empty()
                    && inner.in_flight == 0;
                return if done {
                    LoadProgress::Finished
                } else {
                    LoadProgress::Continue
                };
            }
        }
    }

    // -------------------------------------------------------------- acquire

    /// Acquires content for a typed handle. Panics if the entity is missing
    /// and no missing fallback is registered (fail-fast), or if the content
    /// type does not match the handle.
    pub fn acquire<T: ResourceContent>(
        &self,
        handle: &crate::handle::Handle<T>,
        mode: AcquireMode,
    ) -> ContentGuard<T> {
        let (payload, result) = self
            .acquire_inner(handle.untyped().entity.clone(), mode, None, false)
            .expect("acquire_inner only fails in never-fail mode");
        ContentGuard::downcast(payload, result, handle.id())
    }

    /// Like [`acquire`](Self::acquire) with a call-site loading fallback that
    /// beats the kind-level one.
    pub fn acquire_with_fallback<T: ResourceContent>(
        &self,
        handle: &crate::handle::Handle<T>,
        mode: AcquireMode,
        fallback: &crate::handle::Handle<T>,
    ) -> ContentGuard<T> {
        let call_fallback = Some(fallback.untyped().entity.clone());
        let (payload, result) = self
            .acquire_inner(handle.untyped().entity.clone(), mode, call_fallback, false)
            .expect("acquire_inner only fails in never-fail mode");
        ContentGuard::downcast(payload, result, handle.id())
    }

    /// Never-fail acquire: a missing entity without fallback yields `None`
    /// instead of aborting.
    pub fn try_acquire<T: ResourceContent>(
        &self,
        handle: &crate::handle::Handle<T>,
        mode: AcquireMode,
    ) -> Option<ContentGuard<T>> {
        let (payload, result) =
            self.acquire_inner(handle.untyped().entity.clone(), mode, None, true)?;
        Some(ContentGuard::downcast(payload, result, handle.id()))
    }

    pub fn acquire_untyped(
        &self,
        handle: &crate::handle::UntypedHandle,
        mode: AcquireMode,
    ) -> UntypedContentGuard {
        let (content, result) = self
            .acquire_inner(handle.entity.clone(), mode, None, false)
            .expect("acquire_inner only fails in never-fail mode");
        UntypedContentGuard { content, result }
    }

    pub fn try_acquire_untyped(
        &self,
        handle: &crate::handle::UntypedHandle,
        mode: AcquireMode,
    ) -> Option<UntypedContentGuard> {
        let (content, result) = self.acquire_inner(handle.entity.clone(), mode, None, true)?;
        Some(UntypedContentGuard { content, result })
    }

    fn acquire_inner(
        &self,
        entity: Arc<Entity>,
        mode: AcquireMode,
        call_fallback: Option<Arc<Entity>>,
        never_fail: bool,
    ) -> Option<(ContentPayload, AcquireResult)> {
        debug_assert!(
            !entity.unregistered.load(std::sync::atomic::Ordering::Acquire),
            "acquire through a handle whose entity was destroyed"
        );

        // acquiring from inside a content build is only legal for registered
        // kind pairs; anything else is a deadlock waiting to happen
        if let Some(updating) = current_build_kind() {
            let (allowed, updating_name, target_name) = {
                let mut inner = self.inner.lock();
                let allowed = inner.registry.is_nested_acquire_allowed(updating, entity.kind);
                (
                    allowed,
                    inner.registry.record(updating).name.clone(),
                    inner.registry.record(entity.kind).name.clone(),
                )
            };
            assert!(
                allowed,
                "acquiring kind '{target_name}' while building content of kind \
                 '{updating_name}'; permit the pair with allow_nested_acquire at startup"
            );
        }

        let mut current = entity;
        let mut mode = mode;
        let mut result = AcquireResult::Final;

        loop {
            match current.state() {
                ResourceState::Loaded => {
                    current.touch(self.now_ms());
                    // content is cloned under the cache mutex so a concurrent
                    // evictor cannot destroy it between the check and the read
                    let payload = {
                        let _inner = self.inner.lock();
                        current.content.lock().clone()
                    };
                    match payload {
                        Some(payload) => return Some((payload, result)),
                        None => continue,
                    }
                }
                ResourceState::LoadedResourceMissing => {
                    let fallback = {
                        let inner = self.inner.lock();
                        let from_instance =
                            current.extra.lock().missing_fallback.as_ref().map(|h| h.entity.clone());
                        from_instance.or_else(|| {
                            inner
                                .registry
                                .record(current.kind)
                                .missing_fallback
                                .as_ref()
                                .map(|h| h.entity.clone())
                        })
                    };
                    match fallback {
                        Some(fb) if !Arc::ptr_eq(&fb, &current) => {
                            current = fb;
                            result = AcquireResult::MissingFallback;
                            mode = AcquireMode::BlockUntilLoaded;
                        }
                        _ if never_fail => return None,
                        _ => panic!(
                            "resource '{}' is missing and no missing fallback is registered",
                            current.id
                        ),
                    }
                }
                _ => {
                    assert!(
                        !self.is_export_mode(),
                        "resource '{}' cannot be loaded in export mode",
                        current.id
                    );
                    current.touch(self.now_ms());

                    let fallback = {
                        let mut inner = self.inner.lock();
                        if inner.shutdown {
                            if never_fail {
                                return None;
                            }
                            panic!("cannot acquire '{}': the cache is shut down", current.id);
                        }
                        let effective = if inner.no_fallback_frames > 0 {
                            AcquireMode::BlockUntilLoaded
                        } else {
                            mode
                        };
                        if effective == AcquireMode::AllowLoadingFallback {
                            self.preload_locked(&mut inner, &current, false);
                            let from_instance = current
                                .extra
                                .lock()
                                .loading_fallback
                                .as_ref()
                                .map(|h| h.entity.clone());
                            from_instance.or_else(|| call_fallback.clone()).or_else(|| {
                                inner
                                    .registry
                                    .record(current.kind)
                                    .loading_fallback
                                    .as_ref()
                                    .map(|h| h.entity.clone())
                            })
                        } else {
                            None
                        }
                    };

                    match fallback {
                        Some(fb) if !Arc::ptr_eq(&fb, &current) => {
                            current = fb;
                            result = AcquireResult::LoadingFallback;
                            mode = AcquireMode::BlockUntilLoaded;
                        }
                        _ => {
                            if !self.ensure_loaded(&current) {
                                if never_fail {
                                    return None;
                                }
                                panic!(
                                    "cannot acquire '{}': the cache is shut down",
                                    current.id
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}
