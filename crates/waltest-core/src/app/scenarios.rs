//! Scenarios - 1 回のトリガーで投入するタスクの組み合わせ
//!
//! どのシナリオも Simple / Nested の 2 つの形に還元される。
//! writer は常に共有 handle を使い、相手側（reader / 後発 writer / 内側タスク）が
//! `use_same_connection` に従って共有 handle か別 handle を選ぶ。

use serde::{Deserialize, Serialize};
use tracing::info;

use super::orchestrator::Orchestrator;
use crate::domain::{ConnectionChoice, ScenarioParams, TaskSpec};
use crate::pool::TaskHandle;

/// Scenario names accepted by [`Orchestrator::run_scenario`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scenario")]
pub enum Scenario {
    WriteThenRead,
    Write,
    Read,
    RacingInserts { first: String, second: String },
    Nested,
    NestedPure { outer: String, inner: String },
    Saturate { count: usize },
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WriteThenRead => "write_then_read",
            Self::Write => "write",
            Self::Read => "read",
            Self::RacingInserts { .. } => "racing_inserts",
            Self::Nested => "nested_insert_then_read",
            Self::NestedPure { .. } => "nested_pure",
            Self::Saturate { .. } => "saturate",
        }
    }
}

/// Handles of every task one trigger submitted, in submission order.
#[derive(Debug)]
pub struct ScenarioRun {
    pub name: &'static str,
    pub tasks: Vec<TaskHandle<String>>,
}

impl ScenarioRun {
    fn new(name: &'static str, tasks: Vec<TaskHandle<String>>) -> Self {
        info!(scenario = name, tasks = tasks.len(), "scenario submitted");
        Self { name, tasks }
    }
}

impl Orchestrator {
    pub fn run_scenario(&self, scenario: &Scenario, params: &ScenarioParams) -> ScenarioRun {
        match scenario {
            Scenario::WriteThenRead => self.write_then_read(params),
            Scenario::Write => self.write(params),
            Scenario::Read => self.read_latest(params),
            Scenario::RacingInserts { first, second } => {
                self.racing_inserts(params, first, second)
            }
            Scenario::Nested => self.nested_insert_then_read(params),
            Scenario::NestedPure { outer, inner } => self.nested_pure(params, outer, inner),
            Scenario::Saturate { count } => self.saturate(params, *count),
        }
    }

    /// A writer holds its transaction open for the delay while a reader
    /// reads latest concurrently.
    pub fn write_then_read(&self, params: &ScenarioParams) -> ScenarioRun {
        let writer = self.submit(writer_spec(params));
        let reader = self.submit(
            TaskSpec::read_latest()
                .transactional(params.use_transaction)
                .on(params.connection())
                .with_label(params.request_label.clone()),
        );
        ScenarioRun::new("write_then_read", vec![writer, reader])
    }

    pub fn write(&self, params: &ScenarioParams) -> ScenarioRun {
        let writer = self.submit(writer_spec(params));
        ScenarioRun::new("write", vec![writer])
    }

    pub fn read_latest(&self, params: &ScenarioParams) -> ScenarioRun {
        let reader = self.submit(
            TaskSpec::read_latest()
                .transactional(params.use_transaction)
                .on(params.connection())
                .with_start_delay(params.delay())
                .with_label(params.request_label.clone()),
        );
        ScenarioRun::new("read", vec![reader])
    }

    /// `first` goes in at once; a late writer inserts `second` and a reader
    /// reads latest, both after the delay. Which value the reader sees is
    /// left to timing.
    pub fn racing_inserts(&self, params: &ScenarioParams, first: &str, second: &str) -> ScenarioRun {
        let early = self.submit(
            TaskSpec::insert(first)
                .transactional(params.use_transaction)
                .with_label(params.request_label.clone()),
        );
        let late = self.submit(
            TaskSpec::insert(second)
                .transactional(params.use_transaction)
                .on(params.connection())
                .with_start_delay(params.delay())
                .with_label(params.request_label.clone()),
        );
        let reader = self.submit(
            TaskSpec::read_latest()
                .transactional(params.use_transaction)
                .on(params.connection())
                .with_start_delay(params.delay())
                .with_label(params.request_label.clone()),
        );
        ScenarioRun::new("racing_inserts", vec![early, late, reader])
    }

    /// The outer writer keeps its transaction and its worker while it waits
    /// for an inner reader submitted to the same pool.
    pub fn nested_insert_then_read(&self, params: &ScenarioParams) -> ScenarioRun {
        let inner = TaskSpec::read_latest().on(params.connection());
        let outer = self.submit(writer_spec(params).nested(inner));
        ScenarioRun::new("nested_insert_then_read", vec![outer])
    }

    /// `count` sleepers, each holding a worker for the delay.
    pub fn saturate(&self, params: &ScenarioParams, count: usize) -> ScenarioRun {
        let tasks = (0..count)
            .map(|_| {
                self.submit(
                    TaskSpec::sleep(params.delay()).with_label(params.request_label.clone()),
                )
            })
            .collect();
        ScenarioRun::new("saturate", tasks)
    }

    /// Store-free nesting: the outer task blocks on an inner task that only
    /// returns `inner`.
    pub fn nested_pure(&self, params: &ScenarioParams, outer: &str, inner: &str) -> ScenarioRun {
        let spec = TaskSpec::echo(outer)
            .with_delay(params.delay())
            .with_label(params.request_label.clone())
            .nested(TaskSpec::echo(inner));
        let outer = self.submit(spec);
        ScenarioRun::new("nested_pure", vec![outer])
    }
}

fn writer_spec(params: &ScenarioParams) -> TaskSpec {
    TaskSpec::insert_now()
        .transactional(params.use_transaction)
        .with_delay(params.delay())
        .on(ConnectionChoice::Shared)
        .with_label(params.request_label.clone())
}

/// Default pair used by the racing scenario.
pub const RACING_VALUES: (&str, &str) = ("10:15:00 AM", "10:15:03 AM");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HarnessError, TaskState};
    use crate::impls::{MemoryStore, MemoryStoreOptions};
    use crate::pool::WorkerPool;
    use crate::ports::{FixedClock, StoreConnection};
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn harness(pool_size: usize, store: MemoryStore) -> Orchestrator {
        let pool = Arc::new(WorkerPool::new(pool_size, "scenario-test").unwrap());
        Orchestrator::new(
            pool,
            Arc::new(store),
            Arc::new(FixedClock::at_hms(10, 15, 0)),
        )
        .unwrap()
    }

    fn params(delay_millis: u64, same: bool, tx: bool) -> ScenarioParams {
        ScenarioParams {
            delay_millis,
            use_same_connection: same,
            use_transaction: tx,
            request_label: None,
        }
    }

    fn wait_all(run: ScenarioRun) -> Vec<Result<String, HarnessError>> {
        run.tasks.into_iter().map(TaskHandle::wait).collect()
    }

    #[rstest]
    #[case::same_handle_no_tx(true, false)]
    #[case::same_handle_tx(true, true)]
    #[case::distinct_handles_no_tx(false, false)]
    fn racing_reader_sees_one_of_both_values(#[case] same: bool, #[case] tx: bool) {
        let orch = harness(4, MemoryStore::default());
        let (first, second) = RACING_VALUES;
        let run = orch.racing_inserts(&params(200, same, tx), first, second);
        assert_eq!(run.tasks.len(), 3);

        let results = wait_all(run);
        assert_eq!(results[0].as_deref(), Ok("Done Write - 10:15:00 AM"));
        assert_eq!(results[1].as_deref(), Ok("Done Write - 10:15:03 AM"));
        let read = results[2].as_deref().unwrap();
        assert!(
            read == "Done Read - 10:15:00 AM" || read == "Done Read - 10:15:03 AM",
            "unexpected read: {read}"
        );
    }

    #[test]
    fn transactional_writers_on_shared_handle_never_interleave() {
        let store = MemoryStore::new(MemoryStoreOptions {
            torn_write_step: Some(Duration::from_millis(5)),
        });
        let orch = harness(4, store.clone());
        let values = ["aaaaaaaa", "bbbbbbbb", "cccccccc"];
        let handles: Vec<_> = values
            .iter()
            .map(|v| orch.submit(TaskSpec::insert(*v).transactional(true)))
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }

        let rows = store.committed_rows();
        assert_eq!(rows.len(), values.len());
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
        for row in &rows {
            assert!(values.contains(&row.value.as_str()), "torn row: {}", row.value);
        }
    }

    #[test]
    fn reader_completes_while_writer_holds_transaction() {
        let store = MemoryStore::default();
        store.open().insert_value("committed").unwrap();
        let orch = harness(4, store);

        let writer = orch.submit(
            TaskSpec::insert("pending")
                .transactional(true)
                .on(ConnectionChoice::Distinct)
                .with_delay(Duration::from_secs(2)),
        );
        thread::sleep(Duration::from_millis(100));
        let reader = orch.submit(TaskSpec::read_latest().on(ConnectionChoice::Distinct));

        assert_eq!(reader.wait().unwrap(), "Done Read - committed");
        assert_eq!(writer.state(), TaskState::Running);
        writer.wait().unwrap();
    }

    #[test]
    fn round_trip_returns_inserted_value() {
        let orch = harness(4, MemoryStore::default());
        let results = wait_all(orch.write(&params(0, true, true)));
        assert_eq!(results[0].as_deref(), Ok("Done Write - 10:15:00 AM"));
        let read = wait_all(orch.read_latest(&params(0, true, false)));
        assert_eq!(read[0].as_deref(), Ok("Done Read - 10:15:00 AM"));
    }

    #[test]
    fn write_then_read_reader_sees_a_committed_state() {
        let store = MemoryStore::default();
        store.open().insert_value("older").unwrap();
        let orch = harness(4, store);
        let results = wait_all(orch.write_then_read(&params(300, false, true)));
        assert_eq!(results[0].as_deref(), Ok("Done Write - 10:15:00 AM"));
        // Either before the writer began or after it committed; never mid-transaction.
        let read = results[1].as_deref().unwrap();
        assert!(
            read == "Done Read - older" || read == "Done Read - 10:15:00 AM",
            "unexpected read: {read}"
        );
    }

    #[test]
    fn nested_scenario_completes_on_idle_pool() {
        let orch = harness(4, MemoryStore::default());
        let mut p = params(0, true, true);
        p.request_label = Some("n1".into());
        let results = wait_all(orch.nested_insert_then_read(&p));
        assert_eq!(
            results[0].as_deref(),
            Ok("[n1] Done action - Done Read - 10:15:00 AM")
        );
    }

    #[test]
    fn nested_scenario_deadlocks_on_saturated_pool() {
        let capacity = 4;
        let orch = harness(capacity, MemoryStore::default());
        let sleepers = orch.saturate(&params(30_000, true, false), capacity - 1);
        thread::sleep(Duration::from_millis(100));
        let outer = orch.nested_insert_then_read(&params(0, true, true));

        thread::sleep(Duration::from_millis(500));
        let counts = orch.pool().counts();
        assert_eq!(counts.running, capacity);
        assert_eq!(counts.queued, 1);
        assert_eq!(outer.tasks[0].state(), TaskState::Running);
        let edges = orch.pool().wait_edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].waiter, outer.tasks[0].id());
        assert_eq!(edges[0].dependency_state, TaskState::Queued);
        // The outer transaction is still held.
        assert!(orch.shared_connection().transaction_state().is_active());
        assert_eq!(sleepers.tasks.len(), capacity - 1);
    }

    #[test]
    fn nested_pure_returns_inner_value() {
        let orch = harness(2, MemoryStore::default());
        let results = wait_all(orch.nested_pure(&params(0, true, false), "outer", "inner"));
        assert_eq!(results[0].as_deref(), Ok("Done action - inner"));
    }

    #[test]
    fn saturate_submits_count_sleepers() {
        let orch = harness(2, MemoryStore::default());
        let run = orch.saturate(&params(10, true, false), 3);
        assert_eq!(run.name, "saturate");
        let results = wait_all(run);
        assert!(results.iter().all(|r| r.as_deref() == Ok("Done Sleep")));
    }

    #[test]
    fn scenario_from_json() {
        let scenario: Scenario =
            serde_json::from_str(r#"{ "scenario": "saturate", "count": 3 }"#).unwrap();
        assert_eq!(scenario, Scenario::Saturate { count: 3 });
        assert_eq!(scenario.name(), "saturate");
    }
}
