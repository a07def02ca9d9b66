//! Orchestrator - TaskSpec をプールに投入し、ストア操作として実行する
//!
//! # フロー（Simple）
//! 1. start_delay だけ待つ
//! 2. (任意) begin transaction
//! 3. work（insert / read / sleep / echo）
//! 4. delay だけ待つ
//! 5. (任意) commit
//!
//! # Nested
//! work の直後に依存タスクを **同じ submit 経路で** 同じプールへ投入し、
//! ワーカーを占有したまま結果を待つ。インライン実行もプールの拡張もしない。

use std::sync::Arc;
use std::thread;

use tracing::{debug, info_span};

use super::transaction::TransactionScope;
use crate::domain::{ConnectionChoice, HarnessError, TaskSpec, Work};
use crate::pool::{TaskHandle, WorkerPool};
use crate::ports::{Clock, Store, StoreConnection};

/// Issues task specs onto the pool. Cheap to clone; every clone submits to
/// the same pool and shares the same store handle.
#[derive(Clone)]
pub struct Orchestrator {
    pool: Arc<WorkerPool>,
    store: Arc<dyn Store>,
    shared: Arc<dyn StoreConnection>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Opens the shared handle up front.
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HarnessError> {
        let shared = store.connect()?;
        Ok(Self {
            pool,
            store,
            shared,
            clock,
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn shared_connection(&self) -> &Arc<dyn StoreConnection> {
        &self.shared
    }

    /// Submit one spec. The only path onto the pool, for top-level and
    /// nested tasks alike.
    pub fn submit(&self, spec: TaskSpec) -> TaskHandle<String> {
        let name = spec
            .label
            .clone()
            .unwrap_or_else(|| work_name(&spec.work).to_string());
        let this = self.clone();
        self.pool.submit_named(Some(name), move || this.run(&spec))
    }

    fn connection_for(
        &self,
        choice: ConnectionChoice,
    ) -> Result<Arc<dyn StoreConnection>, HarnessError> {
        match choice {
            ConnectionChoice::Shared => Ok(Arc::clone(&self.shared)),
            ConnectionChoice::Distinct => self.store.connect(),
        }
    }

    fn run(&self, spec: &TaskSpec) -> Result<String, HarnessError> {
        let span = info_span!(
            "task",
            work = work_name(&spec.work),
            label = spec.label.as_deref().unwrap_or("")
        );
        let _entered = span.enter();

        if !spec.start_delay().is_zero() {
            thread::sleep(spec.start_delay());
        }

        let conn = self.connection_for(spec.connection)?;
        let tx = if spec.transactional {
            Some(TransactionScope::begin(conn.as_ref())?)
        } else {
            None
        };

        let mut display = self.perform(&spec.work, conn.as_ref())?;

        if let Some(dependency) = spec.dependency() {
            let inner = self.submit(dependency.clone());
            debug!(inner = %inner.id(), "waiting on nested task");
            let inner_display = inner.wait()?;
            display = format!("Done action - {inner_display}");
        }

        if !spec.delay().is_zero() {
            thread::sleep(spec.delay());
        }

        if let Some(tx) = tx {
            tx.commit()?;
        }

        Ok(match &spec.label {
            Some(label) => format!("[{label}] {display}"),
            None => display,
        })
    }

    fn perform(&self, work: &Work, conn: &dyn StoreConnection) -> Result<String, HarnessError> {
        match work {
            Work::Insert(value) => {
                conn.insert_value(value)?;
                Ok(format!("Done Write - {value}"))
            }
            Work::InsertNow => {
                let value = self.clock.time_text();
                conn.insert_value(&value)?;
                Ok(format!("Done Write - {value}"))
            }
            Work::ReadLatest => {
                let value = conn.read_latest_value()?;
                Ok(format!("Done Read - {value}"))
            }
            Work::Sleep => Ok("Done Sleep".to_string()),
            Work::Echo(value) => Ok(value.clone()),
        }
    }
}

fn work_name(work: &Work) -> &'static str {
    match work {
        Work::Insert(_) | Work::InsertNow => "write",
        Work::ReadLatest => "read",
        Work::Sleep => "sleep",
        Work::Echo(_) => "echo",
    }
}
