//! Input specs for the harness (tasks and scenario parameters).
//!
//! A task with a dependency is a tagged variant rather than an ad hoc nested
//! call: `TaskShape::Nested` carries the spec of the task it blocks on, and the
//! orchestrator submits that spec through the same pool path as any top-level
//! task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a task body does against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Work {
    /// Insert the given text.
    Insert(String),
    /// Insert the clock's current time, formatted like `10:15:00 AM`.
    InsertNow,
    /// Read the most recently inserted value.
    ReadLatest,
    /// Touch nothing; only the delay applies.
    Sleep,
    /// Return the given text without touching the store.
    Echo(String),
}

/// Which store handle a task runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionChoice {
    /// The orchestrator's single shared handle.
    #[default]
    Shared,
    /// A freshly opened handle for this task only.
    Distinct,
}

/// Whether the task blocks on a dependent task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskShape {
    #[default]
    Simple,
    /// After its own work, the task submits this spec to the same pool and
    /// blocks its worker until the result arrives.
    Nested(Box<TaskSpec>),
}

/// A deferred unit of work, described as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub label: Option<String>,
    pub work: Work,
    #[serde(default)]
    pub transactional: bool,
    /// Sleep before the task touches the store (a late starter).
    #[serde(default)]
    pub start_delay_ms: u64,
    /// Artificial delay after the work and before the transaction ends.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub connection: ConnectionChoice,
    #[serde(default)]
    pub shape: TaskShape,
}

impl TaskSpec {
    pub fn new(work: Work) -> Self {
        Self {
            label: None,
            work,
            transactional: false,
            start_delay_ms: 0,
            delay_ms: 0,
            connection: ConnectionChoice::Shared,
            shape: TaskShape::Simple,
        }
    }

    pub fn insert(value: impl Into<String>) -> Self {
        Self::new(Work::Insert(value.into()))
    }

    pub fn insert_now() -> Self {
        Self::new(Work::InsertNow)
    }

    pub fn read_latest() -> Self {
        Self::new(Work::ReadLatest)
    }

    pub fn sleep(delay: Duration) -> Self {
        Self::new(Work::Sleep).with_delay(delay)
    }

    pub fn echo(value: impl Into<String>) -> Self {
        Self::new(Work::Echo(value.into()))
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = millis(delay);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay_ms = millis(delay);
        self
    }

    pub fn on(mut self, connection: ConnectionChoice) -> Self {
        self.connection = connection;
        self
    }

    pub fn nested(mut self, dependency: TaskSpec) -> Self {
        self.shape = TaskShape::Nested(Box::new(dependency));
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn dependency(&self) -> Option<&TaskSpec> {
        match &self.shape {
            TaskShape::Simple => None,
            TaskShape::Nested(dep) => Some(dep.as_ref()),
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Parameters shared by every scenario trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioParams {
    pub delay_millis: u64,
    pub use_same_connection: bool,
    pub use_transaction: bool,
    pub request_label: Option<String>,
}

impl ScenarioParams {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_millis)
    }

    pub fn connection(&self) -> ConnectionChoice {
        if self.use_same_connection {
            ConnectionChoice::Shared
        } else {
            ConnectionChoice::Distinct
        }
    }
}
