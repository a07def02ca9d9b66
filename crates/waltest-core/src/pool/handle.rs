//! TaskHandle - submit の戻り値

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::PoolShared;
use crate::domain::{HarnessError, TaskId, TaskState};

thread_local! {
    /// Task currently running on this worker thread, if any.
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

pub(crate) fn set_current_task(id: Option<TaskId>) {
    CURRENT_TASK.with(|current| current.set(id));
}

/// Id of the pool task running on the calling thread.
pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(|current| current.get())
}

/// Shared bookkeeping for one submitted task.
pub(crate) struct TaskCell {
    pub(crate) id: TaskId,
    pub(crate) name: Option<String>,
    state: Mutex<TaskState>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            state: Mutex::new(TaskState::Created),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }
}

pub(crate) type TaskResult<T> = Result<T, HarnessError>;

/// Eventual outcome of a submitted task.
///
/// Consume it either with the blocking [`TaskHandle::wait`] (from plain
/// threads, including pool workers) or by `.await`ing it.
pub struct TaskHandle<T> {
    cell: Arc<TaskCell>,
    rx: oneshot::Receiver<TaskResult<T>>,
    pool: Arc<PoolShared>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        cell: Arc<TaskCell>,
        rx: oneshot::Receiver<TaskResult<T>>,
        pool: Arc<PoolShared>,
    ) -> Self {
        Self { cell, rx, pool }
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    pub fn name(&self) -> Option<&str> {
        self.cell.name.as_deref()
    }

    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Called from a pool worker, the worker stays occupied for the whole wait
    /// and the wait is recorded in the pool's wait-for graph. Nothing here
    /// runs the dependency inline or adds a worker: if the pool is saturated
    /// the wait never returns.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T, HarnessError> {
        let waiter = current_task();
        let dependency = self.cell.id;
        if let Some(waiter) = waiter {
            debug!(%waiter, %dependency, "worker blocking on nested task");
            self.pool.graph.lock().add_wait(waiter, &self.cell);
        }

        let result = self
            .rx
            .blocking_recv()
            .unwrap_or(Err(HarnessError::PoolShutdown));

        if let Some(waiter) = waiter {
            self.pool.graph.lock().remove_wait(waiter, dependency);
        }
        result
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, HarnessError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HarnessError::PoolShutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("state", &self.cell.state())
            .finish()
    }
}
