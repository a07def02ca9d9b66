//! State - タスクとトランザクションの状態

use serde::{Deserialize, Serialize};

/// Lifecycle of a task inside the worker pool.
///
/// State transitions:
/// - Created -> Queued -> Running -> Completed
/// - Created -> Queued -> Running -> Failed
/// - Created -> Queued -> Failed (pool shut down before dispatch)
///
/// A task blocked forever on a nested dependency simply stays `Running`;
/// there is no distinguished "deadlocked" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// State of the transaction bound to one store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(self) -> bool {
        self == TransactionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Created, false)]
    #[case(TaskState::Queued, false)]
    #[case(TaskState::Running, false)]
    #[case(TaskState::Completed, true)]
    #[case(TaskState::Failed, true)]
    fn terminal_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn only_active_is_active() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Committed.is_active());
        assert!(!TransactionState::RolledBack.is_active());
        assert!(!TransactionState::NotStarted.is_active());
    }
}
