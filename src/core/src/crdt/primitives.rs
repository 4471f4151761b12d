//! Building blocks for the task list: Lamport stamps, a last-writer-wins
//! register and an observed-remove set.
//!
//! Every merge here is commutative, associative and idempotent, so replicas
//! converge regardless of delivery order or duplication.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::identity::AgentId;

// =============================================================================
// Stamp
// =============================================================================

/// A Lamport timestamp made unique by the writing agent.
///
/// Ordered by `lamport` first, then by agent id bytes. Wall clocks never take
/// part in conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub lamport: u64,
    pub agent: AgentId,
}

impl Stamp {
    pub const fn new(lamport: u64, agent: AgentId) -> Self {
        Self { lamport, agent }
    }
}

// =============================================================================
// LWW Register
// =============================================================================

/// A Last-Writer-Wins register. The write with the greater [`Stamp`] wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    stamp: Stamp,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Write `value` if `stamp` is newer. Returns whether it was taken.
    pub fn set(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    /// Keep the winning write. Returns whether `self` changed.
    pub fn merge(&mut self, other: &LwwRegister<T>) -> bool {
        self.set(other.value.clone(), other.stamp)
    }
}

// =============================================================================
// OR-Set
// =============================================================================

/// Unique tag of one add operation: the adding agent and its add counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub agent: AgentId,
    pub counter: u64,
}

/// An Observed-Remove set.
///
/// A remove tombstones only the dots it has seen, so an add concurrent with a
/// remove survives the merge ("add wins").
#[derive(Debug, Clone)]
pub struct OrSet<T: Eq + Hash + Clone> {
    /// element -> live add dots
    elements: HashMap<T, HashSet<Dot>>,
    /// element -> removed add dots
    tombstones: HashMap<T, HashSet<Dot>>,
}

impl<T: Eq + Hash + Clone> OrSet<T> {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    /// Record an add. Ignored if the dot was already removed. Returns whether
    /// anything changed.
    pub fn add(&mut self, element: T, dot: Dot) -> bool {
        if self
            .tombstones
            .get(&element)
            .is_some_and(|dead| dead.contains(&dot))
        {
            return false;
        }
        self.elements.entry(element).or_default().insert(dot)
    }

    /// Record the removal of one dot. Returns whether anything changed.
    pub fn tombstone(&mut self, element: T, dot: Dot) -> bool {
        let mut changed = false;
        if let Some(live) = self.elements.get_mut(&element) {
            changed = live.remove(&dot);
            if live.is_empty() {
                self.elements.remove(&element);
            }
        }
        changed | self.tombstones.entry(element).or_default().insert(dot)
    }

    /// Remove an element by tombstoning every dot observed for it.
    ///
    /// Returns the removed dots; empty if the element was absent.
    pub fn remove(&mut self, element: &T) -> Vec<Dot> {
        let Some(live) = self.elements.remove(element) else {
            return Vec::new();
        };
        let mut dots: Vec<Dot> = live.into_iter().collect();
        dots.sort();
        self.tombstones
            .entry(element.clone())
            .or_default()
            .extend(dots.iter().copied());
        dots
    }

    /// Whether the element has at least one live dot.
    pub fn contains(&self, element: &T) -> bool {
        self.elements.get(element).is_some_and(|live| !live.is_empty())
    }

    /// Live elements, in no particular order.
    pub fn elements(&self) -> impl Iterator<Item = &T> {
        self.elements.keys()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Every live (element, dot) pair.
    pub fn live_dots(&self) -> impl Iterator<Item = (&T, Dot)> {
        self.elements
            .iter()
            .flat_map(|(element, dots)| dots.iter().map(move |dot| (element, *dot)))
    }

    /// Every removed (element, dot) pair.
    pub fn removed_dots(&self) -> impl Iterator<Item = (&T, Dot)> {
        self.tombstones
            .iter()
            .flat_map(|(element, dots)| dots.iter().map(move |dot| (element, *dot)))
    }

    /// Union of dots minus union of tombstones. Returns whether `self` changed.
    pub fn merge(&mut self, other: &OrSet<T>) -> bool {
        let mut changed = false;
        for (element, dot) in other.removed_dots() {
            changed |= self.tombstone(element.clone(), dot);
        }
        for (element, dot) in other.live_dots() {
            changed |= self.add(element.clone(), dot);
        }
        changed
    }
}

impl<T: Eq + Hash + Clone> Default for OrSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
