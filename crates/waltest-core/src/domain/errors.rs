//! Errors - エラー型
//!
//! Deadlock は意図的にここに含めない（検出しない）。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// Underlying storage / I/O failure.
    #[error("store fault: {0}")]
    StoreFault(String),

    /// Read attempted while the table has no rows.
    #[error("no rows present")]
    EmptyResult,

    /// commit/rollback without an active transaction, or a double begin.
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// A task body panicked; captured at the task boundary.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The pool stopped before the task could be dispatched.
    #[error("worker pool shut down before the task ran")]
    PoolShutdown,

    #[error("failed to spawn thread: {0}")]
    Spawn(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for HarnessError {
    fn from(err: rusqlite::Error) -> Self {
        HarnessError::StoreFault(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rusqlite_errors_become_store_faults() {
        let err: HarnessError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, HarnessError::StoreFault(_)));
    }

    #[test]
    fn messages_name_the_problem() {
        let msg = HarnessError::InvalidTransactionState("commit without begin".into()).to_string();
        assert!(msg.contains("commit without begin"));
        assert_eq!(HarnessError::EmptyResult.to_string(), "no rows present");
    }
}
