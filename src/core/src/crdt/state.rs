//! The task list replica: an OR-Set of task ids plus one record per task.
//!
//! Local operations mutate the replica and return the delta to broadcast.
//! [`TaskListState::apply`] joins a delta from anywhere. Full state is just
//! a delta that carries everything.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::order::OrderKey;
use super::primitives::{Dot, OrSet, Stamp};
use super::task::{TaskItem, TaskRecord, TaskState, TaskStatus};
use crate::error::{Result, SwarmError};
use crate::identity::{AgentId, TaskId};

/// A state fragment. Applying one is idempotent and order-independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<(TaskId, Dot)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<(TaskId, Dot)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<TaskRecord>,
}

impl TaskListDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.records.is_empty()
    }

    fn record(record: &TaskRecord) -> Self {
        Self {
            records: vec![record.clone()],
            ..Default::default()
        }
    }
}

/// Status or assignee of a live task changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskChange {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub assignee: Option<AgentId>,
}

/// One agent's replica of a task list.
#[derive(Debug, Clone)]
pub struct TaskListState {
    agent: AgentId,
    lamport: u64,
    next_dot: u64,
    members: OrSet<TaskId>,
    records: HashMap<TaskId, TaskRecord>,
}

impl TaskListState {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            lamport: 0,
            next_dot: 0,
            members: OrSet::new(),
            records: HashMap::new(),
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    fn tick(&mut self) -> Stamp {
        self.lamport += 1;
        Stamp::new(self.lamport, self.agent)
    }

    fn live(&self, task_id: TaskId) -> Result<&TaskRecord> {
        if !self.members.contains(&task_id) {
            return Err(SwarmError::task_not_found(task_id));
        }
        self.records
            .get(&task_id)
            .ok_or_else(|| SwarmError::task_not_found(task_id))
    }

    fn live_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord> {
        if !self.members.contains(&task_id) {
            return Err(SwarmError::task_not_found(task_id));
        }
        self.records
            .get_mut(&task_id)
            .ok_or_else(|| SwarmError::task_not_found(task_id))
    }

    fn change_of(record: &TaskRecord) -> TaskChange {
        TaskChange {
            task_id: record.id,
            status: record.state.status,
            assignee: record.state.assignee,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a new Empty task after the current last one.
    pub fn add_task(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
    ) -> (TaskId, TaskListDelta) {
        let order = match self.ordered().last() {
            Some(last) => OrderKey::after(last.order.value(), &self.agent),
            None => OrderKey::first(&self.agent),
        };
        let stamp = self.tick();
        let id = TaskId::random();
        self.next_dot += 1;
        let dot = Dot {
            agent: self.agent,
            counter: self.next_dot,
        };

        let record = TaskRecord::new(id, title.into(), description.into(), priority, order, stamp);
        self.members.add(id, dot);
        self.records.insert(id, record.clone());

        let delta = TaskListDelta {
            added: vec![(id, dot)],
            records: vec![record],
            ..Default::default()
        };
        (id, delta)
    }

    /// Empty → Claimed by this agent.
    pub fn claim(&mut self, task_id: TaskId) -> Result<(TaskChange, TaskListDelta)> {
        let current = self.live(task_id)?.state.status;
        if current != TaskStatus::Empty {
            return Err(SwarmError::invalid_transition(current, TaskStatus::Claimed));
        }
        let stamp = self.tick();
        let agent = self.agent;
        let record = self.live_mut(task_id)?;
        record.state = TaskState {
            status: TaskStatus::Claimed,
            assignee: Some(agent),
            stamp,
        };
        Ok((Self::change_of(record), TaskListDelta::record(record)))
    }

    /// Claimed → Done, only by the assignee.
    pub fn complete(&mut self, task_id: TaskId) -> Result<(TaskChange, TaskListDelta)> {
        let state = self.live(task_id)?.state.clone();
        if state.status != TaskStatus::Claimed {
            return Err(SwarmError::invalid_transition(state.status, TaskStatus::Done));
        }
        if state.assignee != Some(self.agent) {
            return Err(SwarmError::not_assignee(task_id));
        }
        let stamp = self.tick();
        let record = self.live_mut(task_id)?;
        record.state = TaskState {
            status: TaskStatus::Done,
            assignee: state.assignee,
            stamp,
        };
        Ok((Self::change_of(record), TaskListDelta::record(record)))
    }

    /// Move a task to `new_position` in the current order. Out of range
    /// positions are clamped to the end.
    pub fn reorder(&mut self, task_id: TaskId, new_position: usize) -> Result<TaskListDelta> {
        self.live(task_id)?;
        let others: Vec<OrderKey> = self
            .ordered()
            .into_iter()
            .filter(|r| r.id != task_id)
            .map(|r| r.order.value().clone())
            .collect();
        let position = new_position.min(others.len());
        let lo = position.checked_sub(1).and_then(|i| others.get(i));
        let hi = others.get(position);
        let key = OrderKey::between(lo, hi, &self.agent);

        let stamp = self.tick();
        let record = self.live_mut(task_id)?;
        record.order.set(key, stamp);
        Ok(TaskListDelta::record(record))
    }

    /// Remove every observed add of the task. A concurrent add elsewhere wins.
    pub fn remove(&mut self, task_id: TaskId) -> Result<TaskListDelta> {
        self.live(task_id)?;
        let dots = self.members.remove(&task_id);
        Ok(TaskListDelta {
            removed: dots.into_iter().map(|dot| (task_id, dot)).collect(),
            ..Default::default()
        })
    }

    pub fn update_title(&mut self, task_id: TaskId, title: impl Into<String>) -> Result<TaskListDelta> {
        self.live(task_id)?;
        let stamp = self.tick();
        let record = self.live_mut(task_id)?;
        record.title.set(title.into(), stamp);
        Ok(TaskListDelta::record(record))
    }

    pub fn update_description(
        &mut self,
        task_id: TaskId,
        description: impl Into<String>,
    ) -> Result<TaskListDelta> {
        self.live(task_id)?;
        let stamp = self.tick();
        let record = self.live_mut(task_id)?;
        record.description.set(description.into(), stamp);
        Ok(TaskListDelta::record(record))
    }

    pub fn set_priority(&mut self, task_id: TaskId, priority: u8) -> Result<TaskListDelta> {
        self.live(task_id)?;
        let stamp = self.tick();
        let record = self.live_mut(task_id)?;
        record.priority.set(priority, stamp);
        Ok(TaskListDelta::record(record))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    fn ordered(&self) -> Vec<&TaskRecord> {
        let mut live: Vec<&TaskRecord> = self
            .members
            .elements()
            .filter_map(|id| self.records.get(id))
            .collect();
        live.sort_by(|a, b| {
            a.order
                .value()
                .cmp(b.order.value())
                .then_with(|| a.id.cmp(&b.id))
        });
        live
    }

    /// Live tasks by (ordering key, task id).
    pub fn list(&self) -> Vec<TaskItem> {
        self.ordered().into_iter().map(TaskRecord::to_item).collect()
    }

    pub fn get(&self, task_id: TaskId) -> Result<TaskItem> {
        self.live(task_id).map(TaskRecord::to_item)
    }

    pub fn len(&self) -> usize {
        self.ordered().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replication
    // ─────────────────────────────────────────────────────────────────────────

    /// Everything this replica knows, as one delta.
    pub fn full_state(&self) -> TaskListDelta {
        let mut added: Vec<(TaskId, Dot)> =
            self.members.live_dots().map(|(id, dot)| (*id, dot)).collect();
        let mut removed: Vec<(TaskId, Dot)> =
            self.members.removed_dots().map(|(id, dot)| (*id, dot)).collect();
        let mut records: Vec<TaskRecord> = self.records.values().cloned().collect();
        added.sort();
        removed.sort();
        records.sort_by_key(|r| r.id);
        TaskListDelta {
            added,
            removed,
            records,
        }
    }

    /// Join a delta into this replica.
    ///
    /// Returns the live tasks whose status or assignee differs from before.
    pub fn apply(&mut self, delta: &TaskListDelta) -> Vec<TaskChange> {
        let before: HashMap<TaskId, (TaskStatus, Option<AgentId>)> = Self::touched(delta)
            .filter(|id| self.members.contains(id))
            .filter_map(|id| {
                self.records
                    .get(&id)
                    .map(|r| (id, (r.state.status, r.state.assignee)))
            })
            .collect();

        for record in &delta.records {
            self.lamport = self.lamport.max(record.max_lamport());
            match self.records.get_mut(&record.id) {
                Some(existing) => {
                    existing.merge(record);
                }
                None => {
                    self.records.insert(record.id, record.clone());
                }
            }
        }
        for (id, dot) in &delta.removed {
            self.members.tombstone(*id, *dot);
        }
        for (id, dot) in &delta.added {
            self.members.add(*id, *dot);
            if dot.agent == self.agent {
                self.next_dot = self.next_dot.max(dot.counter);
            }
        }

        let mut changes: Vec<TaskChange> = Self::touched(delta)
            .filter(|id| self.members.contains(id))
            .filter_map(|id| self.records.get(&id))
            .filter(|r| before.get(&r.id) != Some(&(r.state.status, r.state.assignee)))
            .map(Self::change_of)
            .collect();
        changes.sort_by_key(|c| c.task_id);
        changes.dedup_by_key(|c| c.task_id);
        changes
    }

    fn touched(delta: &TaskListDelta) -> impl Iterator<Item = TaskId> + '_ {
        delta
            .records
            .iter()
            .map(|r| r.id)
            .chain(delta.added.iter().map(|(id, _)| *id))
    }
}
