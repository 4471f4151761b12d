//! Wire messages exchanged on a task list topic.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::primitives::Dot;
use super::state::TaskListDelta;
use crate::error::Result;
use crate::identity::{AgentId, TaskId};

/// Gossip topics reserved for task lists start with this.
pub const TOPIC_PREFIX: &str = "swarmlink/tasklist/";

/// Bytes for the list names and brackets of a delta carrying all three lists.
const DELTA_FRAMING: usize = 64;

/// Gossip topic carrying the task list called `name`.
pub fn topic_for(name: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskListMessage {
    /// A state fragment, or the full state in reply to a sync request.
    Delta { origin: AgentId, delta: TaskListDelta },
    /// Ask every replica for its full state.
    SyncRequest { origin: AgentId },
}

impl TaskListMessage {
    pub fn origin(&self) -> AgentId {
        match self {
            Self::Delta { origin, .. } | Self::SyncRequest { origin } => *origin,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode `delta` as `Delta` messages of at most `limit` bytes each.
    ///
    /// Each task's record travels with its add dots, so a receiver sees
    /// whole tasks whichever batches arrive first. A single record larger
    /// than the limit still gets a message of its own.
    pub fn encode_batches(origin: AgentId, delta: TaskListDelta, limit: usize) -> Result<Vec<Bytes>> {
        let empty = Self::Delta {
            origin,
            delta: TaskListDelta::default(),
        }
        .encode()?
        .len();
        let mut batcher = Batcher::new(limit.saturating_sub(empty + DELTA_FRAMING));

        let TaskListDelta {
            added,
            removed,
            records,
        } = delta;
        let mut dots: BTreeMap<TaskId, Vec<Dot>> = BTreeMap::new();
        for (id, dot) in added {
            dots.entry(id).or_default().push(dot);
        }

        for record in records {
            let task_dots = dots.remove(&record.id).unwrap_or_default();
            let mut size = encoded_len(&record)?;
            for dot in &task_dots {
                size += encoded_len(&(record.id, *dot))?;
            }
            let id = record.id;
            let batch = batcher.reserve(size);
            batch.records.push(record);
            batch.added.extend(task_dots.into_iter().map(|dot| (id, dot)));
        }
        for (id, task_dots) in dots {
            for dot in task_dots {
                let size = encoded_len(&(id, dot))?;
                batcher.reserve(size).added.push((id, dot));
            }
        }
        for entry in removed {
            let size = encoded_len(&entry)?;
            batcher.reserve(size).removed.push(entry);
        }

        batcher
            .finish()
            .into_iter()
            .map(|delta| Self::Delta { origin, delta }.encode())
            .collect()
    }
}

/// Size of `value` inside a JSON array, separator included.
fn encoded_len<T: Serialize>(value: &T) -> Result<usize> {
    Ok(serde_json::to_vec(value)?.len() + 1)
}

/// Packs fragments into deltas under a byte budget.
struct Batcher {
    budget: usize,
    used: usize,
    current: TaskListDelta,
    full: Vec<TaskListDelta>,
}

impl Batcher {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            current: TaskListDelta::default(),
            full: Vec::new(),
        }
    }

    /// The delta the next `size` bytes go into.
    fn reserve(&mut self, size: usize) -> &mut TaskListDelta {
        if self.used + size > self.budget && !self.current.is_empty() {
            self.full.push(std::mem::take(&mut self.current));
            self.used = 0;
        }
        self.used += size;
        &mut self.current
    }

    fn finish(mut self) -> Vec<TaskListDelta> {
        if !self.current.is_empty() {
            self.full.push(self.current);
        }
        self.full
    }
}
