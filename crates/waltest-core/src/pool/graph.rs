//! Wait-for graph between tasks blocked on each other inside the pool.
//!
//! Design:
//! - Forward edges: waiter -> tasks it is blocked on
//! - Reverse edges: dependency -> tasks blocked on it
//! - Invariant: edges and reverse_edges must be kept in sync
//! - A dependency's cell is held while anyone waits on it, so its state stays
//!   readable after it leaves the pool's live set
//!
//! The graph is for operator status only. It never resolves a wait and never
//! classifies one as a deadlock.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::handle::TaskCell;
use crate::domain::{TaskId, TaskState};

#[derive(Default)]
pub(crate) struct WaitGraph {
    edges: HashMap<TaskId, HashSet<TaskId>>,
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
    dependencies: HashMap<TaskId, Arc<TaskCell>>,
}

impl WaitGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `waiter` is now blocked on `dependency`.
    pub(crate) fn add_wait(&mut self, waiter: TaskId, dependency: &Arc<TaskCell>) {
        let dep = dependency.id;
        self.edges.entry(waiter).or_default().insert(dep);
        self.reverse_edges.entry(dep).or_default().insert(waiter);
        self.dependencies
            .entry(dep)
            .or_insert_with(|| Arc::clone(dependency));
    }

    /// `waiter` stopped waiting on `dependency`.
    pub(crate) fn remove_wait(&mut self, waiter: TaskId, dependency: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(waiter) {
            e.get_mut().remove(&dependency);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(dependency) {
            e.get_mut().remove(&waiter);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if self.waiters_of(dependency).is_empty() {
            self.dependencies.remove(&dependency);
        }
    }

    /// Tasks currently blocked on `dependency`, ordered by id.
    pub(crate) fn waiters_of(&self, dependency: TaskId) -> Vec<TaskId> {
        let mut waiters: Vec<_> = self
            .reverse_edges
            .get(&dependency)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default();
        waiters.sort();
        waiters
    }

    pub(crate) fn is_waiting(&self, waiter: TaskId) -> bool {
        self.edges
            .get(&waiter)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    /// Every (waiter, dependency, dependency state), ordered by waiter then
    /// dependency.
    pub(crate) fn edges(&self) -> Vec<(TaskId, TaskId, TaskState)> {
        let mut all: Vec<_> = self
            .edges
            .iter()
            .flat_map(|(waiter, deps)| deps.iter().map(move |dep| (*waiter, *dep)))
            .map(|(waiter, dep)| {
                let state = self
                    .dependencies
                    .get(&dep)
                    .map(|cell| cell.state())
                    .unwrap_or(TaskState::Created);
                (waiter, dep, state)
            })
            .collect();
        all.sort_by_key(|(waiter, dep, _)| (*waiter, *dep));
        all
    }
}
