//! Per-handle transaction ownership.
//!
//! A handle's transaction belongs to the thread that began it. Another thread
//! beginning on the same handle waits until the owner ends it; the owner
//! beginning again is an error (it would otherwise wait on itself).

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::domain::{HarnessError, TransactionState};

struct OwnerState {
    owner: Option<ThreadId>,
    state: TransactionState,
}

pub(crate) struct TxOwner {
    inner: Mutex<OwnerState>,
    released: Condvar,
}

impl TxOwner {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(OwnerState {
                owner: None,
                state: TransactionState::NotStarted,
            }),
            released: Condvar::new(),
        }
    }

    /// Make the calling thread the owner, waiting for any other owner to finish.
    pub(crate) fn claim(&self) -> Result<(), HarnessError> {
        let me = thread::current().id();
        let mut guard = self.inner.lock();
        loop {
            match guard.owner {
                None => break,
                Some(owner) if owner == me => {
                    return Err(HarnessError::InvalidTransactionState(
                        "transaction already active on this thread".into(),
                    ));
                }
                Some(_) => self.released.wait(&mut guard),
            }
        }
        guard.owner = Some(me);
        guard.state = TransactionState::Active;
        Ok(())
    }

    /// Undo a claim whose store-level begin failed.
    pub(crate) fn abandon(&self) {
        let mut guard = self.inner.lock();
        if guard.owner == Some(thread::current().id()) {
            guard.owner = None;
            guard.state = TransactionState::RolledBack;
            self.released.notify_all();
        }
    }

    /// Fails unless the calling thread owns an active transaction.
    pub(crate) fn ensure_owned(&self, action: &str) -> Result<(), HarnessError> {
        let guard = self.inner.lock();
        match guard.owner {
            Some(owner) if owner == thread::current().id() => Ok(()),
            Some(_) => Err(HarnessError::InvalidTransactionState(format!(
                "{action} from a thread that does not own the transaction"
            ))),
            None => Err(HarnessError::InvalidTransactionState(format!(
                "{action} without an active transaction"
            ))),
        }
    }

    /// End the caller's transaction with the given terminal state.
    pub(crate) fn release(&self, end: TransactionState) {
        let mut guard = self.inner.lock();
        if guard.owner == Some(thread::current().id()) {
            guard.owner = None;
            guard.state = end;
            self.released.notify_all();
        }
    }

    /// Any thread currently holds a transaction on the handle.
    pub(crate) fn is_held(&self) -> bool {
        self.inner.lock().owner.is_some()
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn double_claim_on_same_thread_fails() {
        let owner = TxOwner::new();
        owner.claim().unwrap();
        let err = owner.claim().unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransactionState(_)));
        assert_eq!(owner.state(), TransactionState::Active);
    }

    #[test]
    fn release_without_claim_is_rejected_by_ensure() {
        let owner = TxOwner::new();
        assert!(owner.ensure_owned("commit").is_err());
        assert_eq!(owner.state(), TransactionState::NotStarted);
    }

    #[test]
    fn other_thread_waits_for_release() {
        let owner = Arc::new(TxOwner::new());
        owner.claim().unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&owner);
        let join = std::thread::spawn(move || {
            other.claim().unwrap();
            tx.send(()).unwrap();
            other.release(TransactionState::Committed);
        });

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        owner.release(TransactionState::Committed);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        join.join().unwrap();
        assert!(!owner.is_held());
    }

    #[test]
    fn non_owner_cannot_end() {
        let owner = Arc::new(TxOwner::new());
        owner.claim().unwrap();
        let other = Arc::clone(&owner);
        let result = std::thread::spawn(move || other.ensure_owned("rollback"))
            .join()
            .unwrap();
        assert!(matches!(result, Err(HarnessError::InvalidTransactionState(_))));
    }
}
