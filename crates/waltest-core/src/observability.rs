//! Status views for operators (what is queued, running, blocked).

use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    pub capacity: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl PoolCounts {
    /// Every worker is busy.
    pub fn is_saturated(&self) -> bool {
        self.running >= self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: Option<String>,
    pub state: TaskState,
    /// Blocked inside its body on another pool task.
    pub waiting: bool,
    /// Pool tasks blocked on this one.
    pub waiters: Vec<TaskId>,
}

/// A running task blocked on another pool task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEdge {
    pub waiter: TaskId,
    pub dependency: TaskId,
    pub dependency_state: TaskState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub store: String,
    pub pool: PoolCounts,
    pub live_tasks: Vec<TaskSnapshot>,
    pub wait_edges: Vec<WaitEdge>,
    pub live_subscriptions: usize,
}
