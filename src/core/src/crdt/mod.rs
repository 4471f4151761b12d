//! Replicated task list.
//!
//! Tasks live in an observed-remove set. Each task's fields resolve
//! independently: title, description, priority and position are
//! last-writer-wins registers, while status and assignee resolve together
//! on the Empty → Claimed → Done lattice.

pub mod order;
pub mod primitives;
pub mod state;
pub mod sync;
pub mod task;
pub mod task_list;

pub use order::OrderKey;
pub use primitives::{Dot, LwwRegister, OrSet, Stamp};
pub use state::{TaskChange, TaskListDelta, TaskListState};
pub use sync::{topic_for, TaskListMessage, TOPIC_PREFIX};
pub use task::{TaskItem, TaskRecord, TaskState, TaskStatus};
pub use task_list::TaskList;
