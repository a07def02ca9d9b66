//! Result Delivery - タスク結果をコーディネータスレッドでコールバックに届ける
//!
//! # 構成
//! - **Coordinator**: 専用スレッド上の tokio current-thread ランタイム。
//!   コールバックは全てここで 1 つずつ実行される
//! - **ResultDelivery**: subscribe / dispose / dispose_all
//!
//! # 保証
//! - コールバックは高々 1 回
//! - dispose 済みの購読のコールバックは実行されない（registry から外した側だけが実行する）
//! - dispose はプール上の処理を止めない。結果を受け取る側が消えるだけ

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};

use crate::domain::{HarnessError, SubscriptionId};
use crate::pool::TaskHandle;

/// Default name of the delivery thread.
pub const DEFAULT_COORDINATOR_THREAD: &str = "coordinator";

/// A single sequential execution context on its own thread.
pub struct Coordinator {
    handle: Handle,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl Coordinator {
    /// Spawn the coordinator thread and its runtime. The runtime is built
    /// on the new thread, so this may be called from inside another runtime.
    pub fn start(thread_name: &str) -> Result<Self, HarnessError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Handle, String>>(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
            })
            .map_err(|e| HarnessError::Spawn(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| HarnessError::Spawn("coordinator exited during startup".into()))?
            .map_err(HarnessError::Spawn)?;

        info!(thread = thread_name, "coordinator started");
        Ok(Self {
            handle,
            stop: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
            name: thread_name.to_string(),
        })
    }

    pub fn thread_name(&self) -> &str {
        &self.name
    }

    /// Run `future` on the coordinator thread.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future).abort_handle()
    }

    /// Stop the coordinator. Pending deliveries are dropped.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
            debug!(thread = %self.name, "coordinator stopping");
        }
    }

    /// Stop and wait for the thread to exit. Must not be called from a
    /// callback.
    pub fn stop_and_join(&self) {
        self.stop();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

type Registry = Arc<Mutex<HashMap<SubscriptionId, AbortHandle>>>;

/// Subscriptions from task handles to callbacks.
#[derive(Clone)]
pub struct ResultDelivery {
    coordinator: Arc<Coordinator>,
    live: Registry,
}

impl ResultDelivery {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Deliver the outcome of `handle` to exactly one of the callbacks, on
    /// the coordinator thread, in task completion order.
    pub fn subscribe<T, S, E>(&self, handle: TaskHandle<T>, on_success: S, on_error: E) -> SubscriptionId
    where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(HarnessError) + Send + 'static,
    {
        let id = SubscriptionId::generate();
        let task = handle.id();
        let live = Arc::clone(&self.live);

        // Holding the registry while spawning keeps the delivery from
        // looking itself up before it is registered.
        let mut registry = self.live.lock();
        let abort = self.coordinator.spawn(async move {
            let outcome = handle.await;
            let claimed = live.lock().remove(&id);
            if claimed.is_none() {
                trace!(subscription = %id, %task, "callback suppressed after dispose");
                return;
            }
            match outcome {
                Ok(value) => on_success(value),
                Err(err) => on_error(err),
            }
        });
        registry.insert(id, abort);
        debug!(subscription = %id, %task, "subscribed");
        id
    }

    /// Detach one subscription. Returns whether it was still live.
    pub fn dispose(&self, id: SubscriptionId) -> bool {
        match self.live.lock().remove(&id) {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// Detach every live subscription; work on the pool keeps running.
    /// Returns how many were detached, so a second call returns 0.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<_> = self.live.lock().drain().collect();
        for (_, abort) in &drained {
            abort.abort();
        }
        if !drained.is_empty() {
            info!(disposed = drained.len(), "subscriptions disposed");
        }
        drained.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}
