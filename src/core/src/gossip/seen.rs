//! Bounded recency cache of message ids.

use std::collections::{HashMap, VecDeque};

use crate::identity::MessageId;

/// Remembers the most recently seen message ids.
///
/// A hit refreshes the entry. Eviction drops the least recently touched id
/// once `capacity` is exceeded.
#[derive(Debug)]
pub struct SeenCache {
    capacity: usize,
    generation: u64,
    entries: HashMap<MessageId, u64>,
    order: VecDeque<(MessageId, u64)>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            generation: 0,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns `true` when it was not already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        self.generation += 1;
        let generation = self.generation;
        let fresh = self.entries.insert(id, generation).is_none();
        self.order.push_back((id, generation));

        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }
        // Refreshes leave stale queue entries behind.
        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order.retain(|(id, gen)| entries.get(id) == Some(gen));
        }
        fresh
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_oldest(&mut self) {
        while let Some((id, generation)) = self.order.pop_front() {
            if self.entries.get(&id) == Some(&generation) {
                self.entries.remove(&id);
                return;
            }
        }
    }
}
