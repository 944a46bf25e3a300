// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Write as _;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Dependency graph over a job's tasks, addressed by task position.
///
/// Node `i` is the `i`-th task of the job. An edge `a -> b` means "`b`
/// depends on `a`". Dependencies naming tasks outside the slice are ignored
/// here; [`Job::validate`](crate::model::Job::validate) rejects them.
#[derive(Debug, Clone)]
pub struct DagGraph {
    graph: DiGraph<TaskId, ()>,
    priorities: Vec<i32>,
}

impl DagGraph {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut nodes: HashMap<&TaskId, NodeIndex> = HashMap::with_capacity(tasks.len());
        for task in tasks {
            nodes.insert(&task.id, graph.add_node(task.id.clone()));
        }

        for (idx, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if let Some(&dep_node) = nodes.get(dep) {
                    graph.add_edge(dep_node, NodeIndex::new(idx), ());
                }
            }
        }

        Self {
            graph,
            priorities: tasks.iter().map(|t| t.priority).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn id_of(&self, idx: usize) -> &TaskId {
        &self.graph[NodeIndex::new(idx)]
    }

    /// Immediate dependencies of `idx`, ascending.
    pub fn dependencies_of(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Incoming)
    }

    /// Immediate dependents of `idx`, ascending.
    pub fn dependents_of(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Outgoing)
    }

    fn neighbors(&self, idx: usize, dir: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), dir)
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Find one dependency cycle, if any.
    ///
    /// Depth-first traversal tracking the nodes still on the current path;
    /// reaching one of them again closes a cycle. The returned members are
    /// in path order, starting from the node where the cycle was entered.
    pub fn detect_cycle(&self) -> Option<Vec<usize>> {
        if !is_cyclic_directed(&self.graph) {
            return None;
        }

        let n = self.len();
        let mut marks = vec![Mark::Unvisited; n];
        let mut path: Vec<usize> = Vec::new();

        for root in 0..n {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            let mut stack: Vec<(usize, Vec<usize>, usize)> =
                vec![(root, self.dependents_of(root), 0)];
            marks[root] = Mark::Visiting;
            path.push(root);

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let next = frame.1.get(frame.2).copied();
                frame.2 += 1;

                match next {
                    Some(child) => match marks[child] {
                        Mark::Visiting => {
                            let start = path.iter().position(|&p| p == child)?;
                            return Some(path[start..].to_vec());
                        }
                        Mark::Unvisited => {
                            marks[child] = Mark::Visiting;
                            path.push(child);
                            stack.push((child, self.dependents_of(child), 0));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Topological order that prefers higher priority, then lower index,
    /// among nodes whose dependencies are already placed.
    ///
    /// Nodes on a cycle are left out.
    pub fn topological_order(&self) -> Vec<usize> {
        self.stages().into_iter().flatten().collect()
    }

    /// Group nodes into stages: stage `k` holds every node whose longest
    /// dependency chain has length `k`. Within a stage, nodes are sorted by
    /// priority then index.
    pub fn stages(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut remaining: Vec<usize> = (0..n).map(|i| self.dependencies_of(i).len()).collect();
        let mut level = vec![0usize; n];
        let mut heap: BinaryHeap<(Reverse<usize>, i32, Reverse<usize>)> = BinaryHeap::new();

        for idx in 0..n {
            if remaining[idx] == 0 {
                heap.push((Reverse(0), self.priorities[idx], Reverse(idx)));
            }
        }

        let mut stages: Vec<Vec<usize>> = Vec::new();
        while let Some((Reverse(lvl), _, Reverse(idx))) = heap.pop() {
            if stages.len() <= lvl {
                stages.resize_with(lvl + 1, Vec::new);
            }
            stages[lvl].push(idx);

            for child in self.dependents_of(idx) {
                level[child] = level[child].max(lvl + 1);
                remaining[child] -= 1;
                if remaining[child] == 0 {
                    heap.push((Reverse(level[child]), self.priorities[child], Reverse(child)));
                }
            }
        }

        stages
    }

    /// Human-readable plan, one line per stage.
    pub fn execution_plan(&self, tasks: &[Task]) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages().iter().enumerate() {
            let names: Vec<String> = stage
                .iter()
                .map(|&idx| {
                    let task = &tasks[idx];
                    if task.priority != 0 {
                        format!("{} (priority {})", task.name, task.priority)
                    } else {
                        task.name.clone()
                    }
                })
                .collect();
            let _ = writeln!(out, "stage {}: {}", i + 1, names.join(", "));
        }
        out
    }
}
