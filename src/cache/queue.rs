//! Priority-ordered load queue
//!
//! Pending loads wait here until a worker (or the budget pump) picks them up.
//! Ordering is by a float weight where smaller loads earlier; entries with
//! equal weight keep insertion order. Instead of sorting on every mutation,
//! weights are refreshed for a bounded slice of entries per scheduling step
//! and a single stable bubble pass moves the minimum toward the front, which
//! converges over successive steps without a full re-sort ever happening.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::entity::Entity;

/// How many entries get their weight recomputed per refresh step.
const REFRESH_SLICE: usize = 50;

pub(crate) struct QueueEntry {
    weight: f32,
    enqueued_ms: u64,
    pub entity: Arc<Entity>,
}

#[derive(Default)]
pub(crate) struct LoadQueue {
    entries: VecDeque<QueueEntry>,
    refresh_cursor: usize,
}

impl LoadQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_back(&mut self, entity: Arc<Entity>, now_ms: u64) {
        let weight = entity.load_weight(now_ms, now_ms);
        self.entries.push_back(QueueEntry {
            weight,
            enqueued_ms: now_ms,
            entity,
        });
    }

    /// Front insertion for blocking acquires; always wins the next pop.
    pub fn push_front(&mut self, entity: Arc<Entity>, now_ms: u64) {
        self.entries.push_front(QueueEntry {
            weight: 0.0,
            enqueued_ms: now_ms,
            entity,
        });
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front();
        if entry.is_some() && self.refresh_cursor > 0 {
            self.refresh_cursor -= 1;
        }
        entry
    }

    pub fn contains(&self, entity: &Arc<Entity>) -> bool {
        self.entries
            .iter()
            .any(|entry| Arc::ptr_eq(&entry.entity, entity))
    }

    /// Removes the entry for `entity` if it is still waiting.
    pub fn remove(&mut self, entity: &Arc<Entity>) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.entity, entity))
        else {
            return false;
        };
        // order is restored by later refresh steps
        self.entries.swap_remove_back(index);
        if self.refresh_cursor > index {
            self.refresh_cursor -= 1;
        }
        true
    }

    pub fn drain(&mut self) -> impl Iterator<Item = QueueEntry> + '_ {
        self.refresh_cursor = 0;
        self.entries.drain(..)
    }

    /// One amortized scheduling step: recompute a slice of weights, then run a
    /// single stable bubble pass that moves the smallest weight frontward.
    pub fn refresh(&mut self, now_ms: u64) {
        let count = self.entries.len();
        if count == 0 {
            return;
        }

        self.refresh_cursor = self.refresh_cursor.min(count);
        let mut slice = REFRESH_SLICE.min(count - self.refresh_cursor);
        if slice == 0 {
            self.refresh_cursor = 0;
            slice = REFRESH_SLICE.min(count);
        }
        for _ in 0..slice {
            let entry = &mut self.entries[self.refresh_cursor];
            entry.weight = entry.entity.load_weight(now_ms, entry.enqueued_ms);
            self.refresh_cursor += 1;
        }

        self.bubble_step();
    }

    fn bubble_step(&mut self) {
        for i in (1..self.entries.len()).rev() {
            if self.entries[i - 1].weight > self.entries[i].weight {
                self.entries.swap(i - 1, i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Priority;
    use crate::kind::ResourceKind;

    fn entity(id: &str, priority: Priority) -> Arc<Entity> {
        Entity::new(ResourceKind::from_index(0), id, priority, 0)
    }

    fn pop_ids(queue: &mut LoadQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(entry) = queue.pop_front() {
            out.push(entry.entity.id.to_string());
        }
        out
    }

    #[test]
    fn test_higher_priority_loads_first() {
        let mut queue = LoadQueue::default();
        queue.push_back(entity("low", Priority::Low), 0);
        queue.push_back(entity("high", Priority::High), 0);
        queue.push_back(entity("critical", Priority::Critical), 0);

        // several steps so the bubble pass settles
        for _ in 0..3 {
            queue.refresh(0);
        }

        assert_eq!(pop_ids(&mut queue), vec!["critical", "high", "low"]);
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut queue = LoadQueue::default();
        for name in ["first", "second", "third"] {
            queue.push_back(entity(name, Priority::Medium), 0);
        }
        for _ in 0..3 {
            queue.refresh(0);
        }

        assert_eq!(pop_ids(&mut queue), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_push_front_wins_next_pop() {
        let mut queue = LoadQueue::default();
        queue.push_back(entity("queued", Priority::Critical), 0);
        queue.push_front(entity("urgent", Priority::VeryLow), 0);

        assert_eq!(queue.pop_front().unwrap().entity.id.as_ref(), "urgent");
    }

    #[test]
    fn test_stale_entry_overtakes_hotter_one() {
        let mut queue = LoadQueue::default();
        let old = entity("old-low", Priority::Low);
        let hot = entity("new-high", Priority::High);

        queue.push_back(old, 0);
        // 40 seconds later a higher-priority entry arrives
        queue.push_back(hot, 40_000);

        for _ in 0..3 {
            queue.refresh(40_000);
        }

        // Low base weight 40+10(acquire) - 15(age cap) = 35 vs High 20+10 = 30:
        // the newcomer still wins here, but the gap shrank by the aging cap.
        // After enough waiting the low entry reaches the cap and ties break by
        // insertion order once weights meet.
        let first = queue.pop_front().unwrap();
        assert_eq!(first.entity.id.as_ref(), "new-high");
        let second = queue.pop_front().unwrap();
        assert_eq!(second.entity.id.as_ref(), "old-low");
    }

    #[test]
    fn test_remove_only_while_waiting() {
        let mut queue = LoadQueue::default();
        let target = entity("target", Priority::Medium);
        queue.push_back(target.clone(), 0);

        assert!(queue.remove(&target));
        assert!(!queue.remove(&target));
        assert!(queue.is_empty());
    }
}
