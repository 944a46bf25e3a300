// src/dag/resolver.rs

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};

use super::graph::DagGraph;

/// Runtime readiness tracking for one job.
///
/// Each task carries a counter of dependencies not yet satisfied. When a
/// dependency settles, the counters of its direct dependents drop by one;
/// any that reach zero join the ready frontier at once. The frontier is
/// ordered by descending priority, then insertion index.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    graph: DagGraph,
    unsatisfied: Vec<usize>,
    satisfied: Vec<bool>,
    priorities: Vec<i32>,
    ready: BTreeSet<(Reverse<i32>, usize)>,
}

impl DependencyResolver {
    /// Build the resolver; every task without dependencies starts ready.
    pub fn new(graph: DagGraph, priorities: Vec<i32>) -> Self {
        let n = graph.len();
        let unsatisfied: Vec<usize> = (0..n).map(|i| graph.dependencies_of(i).len()).collect();
        let mut ready = BTreeSet::new();
        for (idx, &count) in unsatisfied.iter().enumerate() {
            if count == 0 {
                ready.insert((Reverse(priorities[idx]), idx));
            }
        }

        Self {
            graph,
            unsatisfied,
            satisfied: vec![false; n],
            priorities,
            ready,
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Record that `idx` no longer blocks its dependents (it completed, or
    /// failed under a continue-on-failure policy).
    ///
    /// Returns the dependents that became ready, in frontier order.
    /// Settling the same task twice has no effect.
    pub fn mark_satisfied(&mut self, idx: usize) -> Vec<usize> {
        if self.satisfied[idx] {
            return Vec::new();
        }
        self.satisfied[idx] = true;

        let mut newly_ready = Vec::new();
        for child in self.graph.dependents_of(idx) {
            let count = &mut self.unsatisfied[child];
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ready.insert((Reverse(self.priorities[child]), child));
                newly_ready.push(child);
            }
        }
        newly_ready.sort_by_key(|&i| (Reverse(self.priorities[i]), i));
        newly_ready
    }

    pub fn unsatisfied_count(&self, idx: usize) -> usize {
        self.unsatisfied[idx]
    }

    /// Put a task (back) on the ready frontier, e.g. after its retry delay.
    pub fn push_ready(&mut self, idx: usize) {
        self.ready.insert((Reverse(self.priorities[idx]), idx));
    }

    pub fn pop_ready(&mut self) -> Option<usize> {
        self.ready.pop_first().map(|(_, idx)| idx)
    }

    pub fn remove_ready(&mut self, idx: usize) {
        self.ready.remove(&(Reverse(self.priorities[idx]), idx));
    }

    pub fn clear_ready(&mut self) {
        self.ready.clear();
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Current frontier in dispatch order.
    pub fn ready_tasks(&self) -> Vec<usize> {
        self.ready.iter().map(|&(_, idx)| idx).collect()
    }

    /// Every task that transitively depends on `idx`, each exactly once,
    /// in breadth-first order.
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let mut visited = vec![false; self.graph.len()];
        visited[idx] = true;
        let mut queue: VecDeque<usize> = VecDeque::from([idx]);
        let mut out = Vec::new();

        while let Some(node) = queue.pop_front() {
            for child in self.graph.dependents_of(node) {
                if !visited[child] {
                    visited[child] = true;
                    out.push(child);
                    queue.push_back(child);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskSpec, work_fn};

    fn resolver(spec: &[(&str, &[&str], i32)]) -> DependencyResolver {
        let tasks: Vec<Task> = spec
            .iter()
            .map(|(name, deps, prio)| {
                let work = work_fn(|_ctx| async { Ok(serde_json::Value::Null) });
                Task::from_spec(
                    TaskSpec::new(*name, work)
                        .depends_on(deps.iter().copied())
                        .with_priority(*prio),
                )
            })
            .collect();
        let priorities = tasks.iter().map(|t| t.priority).collect();
        DependencyResolver::new(DagGraph::from_tasks(&tasks), priorities)
    }

    #[test]
    fn roots_start_ready_in_priority_order() {
        let r = resolver(&[("a", &[], 0), ("b", &[], 3), ("c", &[], 0), ("d", &["a"], 9)]);
        assert_eq!(r.ready_tasks(), vec![1, 0, 2]);
    }

    #[test]
    fn fan_in_waits_for_every_dependency() {
        let mut r = resolver(&[("a", &[], 0), ("b", &[], 0), ("c", &["a", "b"], 0)]);
        assert!(r.mark_satisfied(0).is_empty());
        assert_eq!(r.unsatisfied_count(2), 1);
        assert_eq!(r.mark_satisfied(1), vec![2]);
        assert!(r.mark_satisfied(1).is_empty());
    }

    #[test]
    fn diamond_dependents_are_visited_once() {
        let r = resolver(&[
            ("a", &[], 0),
            ("b", &["a"], 0),
            ("c", &["a"], 0),
            ("d", &["b", "c"], 0),
        ]);
        assert_eq!(r.transitive_dependents(0), vec![1, 2, 3]);
    }

    #[test]
    fn pop_follows_frontier_order() {
        let mut r = resolver(&[("a", &[], 1), ("b", &[], 2)]);
        assert_eq!(r.pop_ready(), Some(1));
        r.push_ready(1);
        assert_eq!(r.pop_ready(), Some(1));
        assert_eq!(r.pop_ready(), Some(0));
        assert_eq!(r.pop_ready(), None);
    }
}
