//! WorkerPool - 固定サイズのワーカープール
//!
//! # 設計
//! - N 本の OS スレッド（core size == max size、アイドルで縮まない）
//! - 上限なしの FIFO キュー。submit は拒否もドロップもしない
//! - タスク本体の panic は catch_unwind で捕まえて、そのタスクの失敗として返す
//! - タスク本体の中でブロックすると、そのワーカーはブロック中ずっと占有される
//!
//! 最後の性質がこのハーネスの目的そのもの: 飽和したプールで入れ子のタスクを
//! 待つと、内側のタスクは永遠にディスパッチされない。

mod graph;
mod handle;
mod queue;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use self::graph::WaitGraph;
pub use self::handle::{TaskHandle, current_task};
use self::handle::{TaskCell, set_current_task};
use self::queue::JobQueue;
use crate::domain::{HarnessError, TaskId, TaskState};
use crate::observability::{PoolCounts, TaskSnapshot, WaitEdge};

/// Worker thread prefix used when none is configured.
pub const DEFAULT_THREAD_PREFIX: &str = "fixed-io";

/// Default number of workers.
pub const DEFAULT_POOL_SIZE: usize = 4;

struct Job {
    cell: Arc<TaskCell>,
    run: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct Counters {
    completed: usize,
    failed: usize,
}

pub(crate) struct PoolShared {
    capacity: usize,
    queue: JobQueue<Job>,
    /// Non-terminal tasks, for status reporting.
    live: Mutex<HashMap<TaskId, Arc<TaskCell>>>,
    counters: Mutex<Counters>,
    graph: Mutex<WaitGraph>,
}

impl PoolShared {
    fn finish(&self, cell: &TaskCell, ok: bool) {
        let state = if ok {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        cell.set_state(state);
        self.live.lock().remove(&cell.id);
        let mut counters = self.counters.lock();
        if ok {
            counters.completed += 1;
        } else {
            counters.failed += 1;
        }
    }
}

/// Fixed-size pool of evergreen worker threads.
///
/// Ownership is explicit: construct one, share it behind an `Arc`, and pass it
/// to whoever submits work.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    prefix: String,
}

impl WorkerPool {
    /// Spawn `size` workers named `{prefix}-1 ..= {prefix}-{size}`.
    pub fn new(size: usize, prefix: &str) -> Result<Self, HarnessError> {
        if size == 0 {
            return Err(HarnessError::Config("pool size must be at least 1".into()));
        }

        let shared = Arc::new(PoolShared {
            capacity: size,
            queue: JobQueue::new(),
            live: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            graph: Mutex::new(WaitGraph::new()),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size),
            prefix: prefix.to_string(),
        };
        for n in 1..=size {
            let name = format!("{prefix}-{n}");
            let shared = Arc::clone(&pool.shared);
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&name, shared))
                .map_err(|e| HarnessError::Spawn(e.to_string()))?;
            pool.workers.push(join);
        }

        info!(size, prefix, "worker pool started");
        Ok(pool)
    }

    pub fn with_defaults() -> Result<Self, HarnessError> {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_THREAD_PREFIX)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn thread_prefix(&self) -> &str {
        &self.prefix
    }

    /// Queue `body` for execution. Never rejects; a task submitted after
    /// shutdown resolves to [`HarnessError::PoolShutdown`].
    pub fn submit<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, HarnessError> + Send + 'static,
    {
        self.submit_named(None, body)
    }

    /// Like [`WorkerPool::submit`], with a name shown in logs and status.
    pub fn submit_named<T, F>(&self, name: Option<String>, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, HarnessError> + Send + 'static,
    {
        let cell = Arc::new(TaskCell::new(TaskId::generate(), name));
        let (tx, rx) = oneshot::channel();

        let run = {
            let cell = Arc::clone(&cell);
            let shared = Arc::clone(&self.shared);
            Box::new(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(task = %cell.id, %message, "task panicked");
                        Err(HarnessError::TaskPanicked(message))
                    }
                };
                shared.finish(&cell, result.is_ok());
                debug!(task = %cell.id, ok = result.is_ok(), "task finished");
                // Receiver gone means nobody listens any more; the work still ran.
                let _ = tx.send(result);
            })
        };

        cell.set_state(TaskState::Queued);
        self.shared
            .live
            .lock()
            .insert(cell.id, Arc::clone(&cell));
        let job = Job {
            cell: Arc::clone(&cell),
            run,
        };
        match self.shared.queue.push(job) {
            Ok(()) => debug!(task = %cell.id, name = ?cell.name, "task queued"),
            Err(job) => self.discard(job),
        }

        TaskHandle::new(cell, rx, Arc::clone(&self.shared))
    }

    /// Stop handing out work. Idle workers exit, queued tasks fail with
    /// [`HarnessError::PoolShutdown`], and workers stuck inside a task body
    /// stay stuck (their threads are detached).
    pub fn request_shutdown(&self) {
        let leftovers = self.shared.queue.close();
        if !leftovers.is_empty() {
            info!(discarded = leftovers.len(), "dropping queued tasks on shutdown");
        }
        for job in leftovers {
            self.discard(job);
        }
    }

    /// Shut down and wait for every worker to return. Never returns while a
    /// task is blocked indefinitely.
    pub fn shutdown_and_join(mut self) {
        self.request_shutdown();
        for join in self.workers.drain(..) {
            let _ = join.join();
        }
    }

    pub fn counts(&self) -> PoolCounts {
        let queued = self.shared.queue.len();
        let running = self
            .shared
            .live
            .lock()
            .values()
            .filter(|cell| cell.state() == TaskState::Running)
            .count();
        let counters = self.shared.counters.lock();
        PoolCounts {
            capacity: self.shared.capacity,
            queued,
            running,
            completed: counters.completed,
            failed: counters.failed,
        }
    }

    /// Tasks that have not reached a terminal state, oldest first.
    pub fn live_tasks(&self) -> Vec<TaskSnapshot> {
        let graph = self.shared.graph.lock();
        let mut tasks: Vec<_> = self
            .shared
            .live
            .lock()
            .values()
            .map(|cell| TaskSnapshot {
                id: cell.id,
                name: cell.name.clone(),
                state: cell.state(),
                waiting: graph.is_waiting(cell.id),
                waiters: graph.waiters_of(cell.id),
            })
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    /// Outstanding "waiter is blocked on dependency" edges.
    pub fn wait_edges(&self) -> Vec<WaitEdge> {
        self.shared
            .graph
            .lock()
            .edges()
            .into_iter()
            .map(|(waiter, dependency, dependency_state)| WaitEdge {
                waiter,
                dependency,
                dependency_state,
            })
            .collect()
    }

    fn discard(&self, job: Job) {
        self.shared.finish(&job.cell, false);
        debug!(task = %job.cell.id, "task discarded");
        // Dropping `run` drops the result sender; the handle sees PoolShutdown.
        drop(job.run);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

fn worker_loop(name: &str, shared: Arc<PoolShared>) {
    debug!(worker = name, "worker started");
    while let Some(job) = shared.queue.pop() {
        job.cell.set_state(TaskState::Running);
        debug!(worker = name, task = %job.cell.id, "task started");
        set_current_task(Some(job.cell.id));
        (job.run)();
        set_current_task(None);
    }
    debug!(worker = name, "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
