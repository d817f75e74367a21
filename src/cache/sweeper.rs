//! Eviction sweeper
//!
//! Frees entities whose reference count reached zero. The bulk pass keeps
//! scanning until a full sweep frees nothing, which also picks up cascades
//! where destroying one entity drops the last reference to another. The
//! budgeted pass round-robins across kinds with a persisted cursor so tight
//! per-frame budgets still cover the whole table over time.

use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{emit, CacheInner, ResourceCache};
use crate::content::MemoryUsage;
use crate::entity::{Entity, EntityFlags, ResourceState};
use crate::events::ResourceEventKind;

#[derive(Default)]
pub(crate) struct SweepCursor {
    kind_index: usize,
    last_id: Option<Arc<str>>,
}

impl ResourceCache {
    /// Releases an entity's content. The entity stays registered.
    pub(crate) fn unload_content(&self, inner: &mut CacheInner, entity: &Arc<Entity>) {
        emit(inner, ResourceEventKind::ContentUnloading, entity);

        self.metrics().sub_resident(entity.memory_usage());
        *entity.content.lock() = None;
        entity.set_memory_usage(MemoryUsage::zero());
        entity.clear_flag(EntityFlags::HAS_LOW_RES_DATA);
        entity.set_state(ResourceState::Unloaded);
    }

    /// Destroys one entity. Fails (returns false) when the entity is owned by
    /// the load pipeline; the caller retries after the pipeline drains.
    pub(crate) fn deallocate_entity(&self, inner: &mut CacheInner, entity: &Arc<Entity>) -> bool {
        if entity.has_flag(EntityFlags::QUEUED_FOR_LOAD) {
            if inner.queue.remove(entity) {
                entity.clear_flag(EntityFlags::QUEUED_FOR_LOAD);
            } else {
                // picked up by a worker or parked for a main-thread build
                return false;
            }
        }

        self.unload_content(inner, entity);
        emit(inner, ResourceEventKind::Deleted, entity);
        entity
            .unregistered
            .store(true, std::sync::atomic::Ordering::Release);

        // fallback links may hold the last reference to other entities
        {
            let mut extra = entity.extra.lock();
            extra.loading_fallback = None;
            extra.missing_fallback = None;
            extra.custom_loader = None;
        }

        self.metrics().record_freed();
        true
    }

    /// Frees every zero-reference entity, repeating until a full pass frees
    /// nothing. Entities mid-flight in the scheduler make the pass yield
    /// briefly and retry instead of live-locking against the workers.
    pub fn free_all_unused(&self) -> u32 {
        let mut total = 0u32;

        loop {
            let mut any_busy = false;
            let mut freed_this_pass = 0u32;

            {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                for kind_index in 0..inner.tables.len() {
                    let candidates: Vec<Arc<str>> = inner.tables[kind_index]
                        .iter()
                        .filter(|(_, entity)| entity.reference_count() == 0)
                        .map(|(id, _)| id.clone())
                        .collect();

                    for id in candidates {
                        let Some(entity) = inner.tables[kind_index].get(&id).cloned() else {
                            continue;
                        };
                        if entity.reference_count() != 0 {
                            continue;
                        }
                        if self.deallocate_entity(inner, &entity) {
                            inner.tables[kind_index].remove(&id);
                            log::debug!("Freed '{}'", id);
                            freed_this_pass += 1;
                        } else {
                            any_busy = true;
                        }
                    }
                }
            }

            total += freed_this_pass;

            if any_busy {
                // a busy entity may be waiting for a build only this thread
                // can run
                self.drain_pending_main_builds();
                std::thread::yield_now();
            }

            if freed_this_pass == 0 && !any_busy {
                break;
            }
        }

        total
    }

    /// Frees zero-reference entities idle for longer than `min_idle`, within
    /// `budget` wall-clock time. Resumes where the previous call stopped and
    /// skips kinds registered with incremental unload disabled. Returns the
    /// number of freed entities.
    pub fn free_unused(&self, budget: Duration, min_idle: Duration) -> u32 {
        if budget.is_zero() {
            return 0;
        }

        let start = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let kind_count = inner.tables.len();
        if kind_count == 0 {
            return 0;
        }

        let mut kind_index = inner.sweep_cursor.kind_index;
        let mut resume = inner.sweep_cursor.last_id.take();
        if kind_index >= kind_count {
            kind_index = 0;
            resume = None;
        }

        let now_ms = self.now_ms();
        let min_idle_ms = min_idle.as_millis() as u64;
        let mut freed = 0u32;

        loop {
            if start.elapsed() >= budget {
                inner.sweep_cursor = SweepCursor {
                    kind_index,
                    last_id: resume,
                };
                return freed;
            }

            let kind = crate::kind::ResourceKind::from_index(kind_index);
            if !inner.registry.record(kind).incremental_unload {
                kind_index += 1;
                resume = None;
                if kind_index >= kind_count {
                    inner.sweep_cursor = SweepCursor::default();
                    return freed;
                }
                continue;
            }

            let next: Option<(Arc<str>, Arc<Entity>)> = match &resume {
                Some(last) => inner.tables[kind_index]
                    .range::<str, _>((Bound::Excluded(last.as_ref()), Bound::Unbounded))
                    .next()
                    .map(|(id, entity)| (id.clone(), entity.clone())),
                None => inner.tables[kind_index]
                    .iter()
                    .next()
                    .map(|(id, entity)| (id.clone(), entity.clone())),
            };

            match next {
                None => {
                    kind_index += 1;
                    resume = None;
                    if kind_index >= kind_count {
                        // wrapped around; start fresh next call
                        inner.sweep_cursor = SweepCursor::default();
                        return freed;
                    }
                }
                Some((id, entity)) => {
                    resume = Some(id.clone());
                    if entity.reference_count() == 0
                        && now_ms.saturating_sub(entity.last_acquire_ms()) > min_idle_ms
                        && self.deallocate_entity(inner, &entity)
                    {
                        inner.tables[kind_index].remove(&id);
                        log::debug!("Freed '{}'", id);
                        freed += 1;
                    }
                }
            }
        }
    }

    /// Configures the automatic per-frame eviction pass; `None` disables it.
    pub fn set_auto_free(&self, budget: Option<Duration>, min_idle: Duration) {
        let mut inner = self.inner.lock();
        inner.auto_free_budget = budget;
        inner.auto_free_idle = min_idle;
    }
}
