//! HarnessBuilder - 設定からハーネス一式を組み立てる
//!
//! # 学習ポイント
//! - 起動時検証（Fail-fast）: 設定の誤りは build() で返し、タスク投入後には持ち越さない
//! - プールもストアも明示的に生成して所有者に渡す（グローバルな singleton は持たない）

use std::sync::Arc;

use tracing::info;

use super::delivery::{Coordinator, ResultDelivery};
use super::orchestrator::Orchestrator;
use crate::config::{Backend, HarnessConfig};
use crate::domain::HarnessError;
use crate::impls::{MemoryStore, MemoryStoreOptions, SqliteStore, SqliteStoreOptions};
use crate::observability::StatusReport;
use crate::pool::WorkerPool;
use crate::ports::{Clock, Store, SystemClock};

/// Builds a [`Harness`].
///
/// # 使用例
/// ```ignore
/// let harness = HarnessBuilder::new()
///     .config(HarnessConfig::load("harness.toml")?)
///     .build()?;
/// ```
pub struct HarnessBuilder {
    config: HarnessConfig,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: HarnessConfig::default(),
            store: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of the one `store.backend` names.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config, open the store, start the pool and the
    /// coordinator.
    pub fn build(self) -> Result<Harness, HarnessError> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let pool = Arc::new(WorkerPool::new(
            self.config.pool.size,
            &self.config.pool.thread_name_prefix,
        )?);
        let orchestrator = Orchestrator::new(Arc::clone(&pool), store, clock)?;
        let coordinator = Arc::new(Coordinator::start(&self.config.coordinator.thread_name)?);
        let delivery = ResultDelivery::new(coordinator);

        info!(
            store = %orchestrator.store().describe(),
            pool = pool.capacity(),
            "harness ready"
        );
        Ok(Harness {
            pool,
            orchestrator,
            delivery,
        })
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn open_store(config: &HarnessConfig) -> Result<Arc<dyn Store>, HarnessError> {
    let store: Arc<dyn Store> = match config.store.backend {
        Backend::Memory => Arc::new(MemoryStore::new(MemoryStoreOptions {
            torn_write_step: config.store.torn_write_step(),
        })),
        Backend::Sqlite => Arc::new(SqliteStore::open(SqliteStoreOptions {
            path: config.store.path.clone(),
            wal: config.store.wal,
            busy_timeout: config.store.busy_timeout(),
        })?),
    };
    Ok(store)
}

/// A running harness: one pool, one orchestrator, one delivery context.
pub struct Harness {
    pub pool: Arc<WorkerPool>,
    pub orchestrator: Orchestrator,
    pub delivery: ResultDelivery,
}

impl Harness {
    pub fn status(&self) -> StatusReport {
        StatusReport {
            store: self.orchestrator.store().describe(),
            pool: self.pool.counts(),
            live_tasks: self.pool.live_tasks(),
            wait_edges: self.pool.wait_edges(),
            live_subscriptions: self.delivery.live_count(),
        }
    }

    /// Detach every subscription, drop queued work and stop the
    /// coordinator. Workers blocked inside a task stay blocked.
    pub fn shutdown(&self) {
        self.delivery.dispose_all();
        self.pool.request_shutdown();
        self.delivery.coordinator().stop();
    }
}
