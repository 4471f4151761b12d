//! Task records and their per-field conflict resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::OrderKey;
use super::primitives::{LwwRegister, Stamp};
use crate::identity::{AgentId, TaskId};

/// Lifecycle of a task. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Empty,
    Claimed,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Claimed => "claimed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and assignee, resolved together.
///
/// The later status wins. Within one status the smaller stamp wins, so the
/// earliest claim survives at every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub assignee: Option<AgentId>,
    pub stamp: Stamp,
}

impl TaskState {
    fn beats(&self, other: &TaskState) -> bool {
        self.status > other.status || (self.status == other.status && self.stamp < other.stamp)
    }

    /// Returns whether `self` changed.
    pub fn merge(&mut self, other: &TaskState) -> bool {
        if other.beats(self) {
            *self = other.clone();
            true
        } else {
            false
        }
    }
}

/// Replicated state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub created_by: AgentId,
    pub created_at: DateTime<Utc>,
    pub title: LwwRegister<String>,
    pub description: LwwRegister<String>,
    pub priority: LwwRegister<u8>,
    pub order: LwwRegister<OrderKey>,
    pub state: TaskState,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        title: String,
        description: String,
        priority: u8,
        order: OrderKey,
        stamp: Stamp,
    ) -> Self {
        Self {
            id,
            created_by: stamp.agent,
            created_at: Utc::now(),
            title: LwwRegister::new(title, stamp),
            description: LwwRegister::new(description, stamp),
            priority: LwwRegister::new(priority, stamp),
            order: LwwRegister::new(order, stamp),
            state: TaskState {
                status: TaskStatus::Empty,
                assignee: None,
                stamp,
            },
        }
    }

    /// Field-wise join. Returns whether anything changed.
    pub fn merge(&mut self, other: &TaskRecord) -> bool {
        let mut changed = false;
        if (other.created_at, other.created_by) < (self.created_at, self.created_by) {
            self.created_at = other.created_at;
            self.created_by = other.created_by;
            changed = true;
        }
        changed |= self.title.merge(&other.title);
        changed |= self.description.merge(&other.description);
        changed |= self.priority.merge(&other.priority);
        changed |= self.order.merge(&other.order);
        changed |= self.state.merge(&other.state);
        changed
    }

    /// Highest Lamport value in this record.
    pub fn max_lamport(&self) -> u64 {
        [
            self.title.stamp().lamport,
            self.description.stamp().lamport,
            self.priority.stamp().lamport,
            self.order.stamp().lamport,
            self.state.stamp.lamport,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn to_item(&self) -> TaskItem {
        TaskItem {
            id: self.id,
            title: self.title.value().clone(),
            description: self.description.value().clone(),
            status: self.state.status,
            assignee: self.state.assignee,
            priority: *self.priority.value(),
            order_key: self.order.value().clone(),
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

/// Read-only view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Option<AgentId>,
    pub priority: u8,
    pub order_key: OrderKey,
    pub created_by: AgentId,
    pub created_at: DateTime<Utc>,
}
