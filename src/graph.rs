//! Task DAG executor.
//!
//! Stages are declared with their predecessors and run on the rayon pool as
//! soon as every predecessor has succeeded:
//!
//! ```text
//! clean ──► prep ──► bundle ──► finalize
//!             └────► assets
//! ```
//!
//! The first failure stops scheduling. Tasks already running finish, nothing
//! new starts, and the run reports the failing task by name.

use anyhow::Result;
use parking_lot::Mutex;
use petgraph::{
    Direction,
    algo::{tarjan_scc, toposort},
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("task `{0}` is declared twice")]
    Duplicate(&'static str),

    #[error("task `{task}` runs after unknown task `{after}`")]
    UnknownPredecessor {
        task: &'static str,
        after: &'static str,
    },

    #[error("tasks form a cycle: {}", .0.join(", "))]
    Cycle(Vec<&'static str>),

    #[error("stage `{0}` failed")]
    Failed(&'static str),
}

type TaskFn<'a> = Box<dyn Fn() -> Result<()> + Send + Sync + 'a>;

struct Task<'a> {
    name: &'static str,
    after: Vec<&'static str>,
    run: TaskFn<'a>,
}

/// A set of named tasks with ordering constraints.
#[derive(Default)]
pub struct TaskGraph<'a> {
    tasks: Vec<Task<'a>>,
}

/// Validated dependency graph, one node per task in declaration order.
struct Plan {
    graph: DiGraph<&'static str, ()>,
}

impl Plan {
    fn successors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(NodeIndex::index)
    }

    fn predecessor_count(&self, index: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .count()
    }
}

impl<'a> TaskGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task that starts once every task in `after` succeeded.
    pub fn task<F>(mut self, name: &'static str, after: &[&'static str], run: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'a,
    {
        self.tasks.push(Task {
            name,
            after: after.to_vec(),
            run: Box::new(run),
        });
        self
    }

    fn plan(&self) -> Result<Plan, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = FxHashMap::default();
        for task in &self.tasks {
            let node = graph.add_node(task.name);
            if index.insert(task.name, node).is_some() {
                return Err(GraphError::Duplicate(task.name));
            }
        }

        for (i, task) in self.tasks.iter().enumerate() {
            for after in &task.after {
                let &p = index.get(after).ok_or(GraphError::UnknownPredecessor {
                    task: task.name,
                    after: *after,
                })?;
                graph.add_edge(p, NodeIndex::new(i), ());
            }
        }

        if toposort(&graph, None).is_err() {
            let mut cycle: Vec<NodeIndex> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
                .flatten()
                .collect();
            cycle.sort();
            return Err(GraphError::Cycle(cycle.into_iter().map(|n| graph[n]).collect()));
        }

        Ok(Plan { graph })
    }

    /// Run every task, respecting the declared order.
    pub fn run(&self) -> Result<()> {
        let plan = self.plan()?;
        let counts: Vec<usize> = (0..self.tasks.len())
            .map(|i| plan.predecessor_count(i))
            .collect();
        let state = RunState {
            graph: self,
            plan: &plan,
            pending: counts.iter().map(|&n| AtomicUsize::new(n)).collect(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        };

        rayon::scope(|scope| {
            for (i, &count) in counts.iter().enumerate() {
                if count == 0 {
                    state.start(scope, i);
                }
            }
        });

        match state.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Shared bookkeeping of one graph run.
struct RunState<'g, 'a> {
    graph: &'g TaskGraph<'a>,
    plan: &'g Plan,
    pending: Vec<AtomicUsize>,
    failed: AtomicBool,
    /// First failure, with the failing task attached.
    error: Mutex<Option<anyhow::Error>>,
}

impl<'g, 'a> RunState<'g, 'a> {
    fn start<'s>(&'s self, scope: &rayon::Scope<'s>, index: usize) {
        scope.spawn(move |scope| {
            if self.failed.load(Ordering::SeqCst) {
                return;
            }

            let task = &self.graph.tasks[index];
            if let Err(err) = (task.run)() {
                self.failed.store(true, Ordering::SeqCst);
                let mut slot = self.error.lock();
                if slot.is_none() {
                    *slot = Some(err.context(GraphError::Failed(task.name)));
                }
                return;
            }

            for next in self.plan.successors(index) {
                if self.pending[next].fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.start(scope, next);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::{thread, time::Duration};

    #[test]
    fn test_runs_after_predecessors() {
        let log = Mutex::new(Vec::new());
        let record = |name: &'static str| {
            let log = &log;
            move || {
                log.lock().push(name);
                Ok(())
            }
        };

        TaskGraph::new()
            .task("finalize", &["bundle"], record("finalize"))
            .task("clean", &[], record("clean"))
            .task("assets", &["prep"], record("assets"))
            .task("prep", &["clean"], record("prep"))
            .task("bundle", &["prep"], record("bundle"))
            .run()
            .unwrap();

        let log = log.into_inner();
        let pos = |name| log.iter().position(|n| *n == name).unwrap();
        assert_eq!(log.len(), 5);
        assert!(pos("clean") < pos("prep"));
        assert!(pos("prep") < pos("bundle"));
        assert!(pos("bundle") < pos("finalize"));
        assert!(pos("prep") < pos("assets"));
    }

    #[test]
    fn test_failure_stops_scheduling() {
        let ran = Mutex::new(Vec::new());
        // A single worker would run `slow` and its successor before `prep`
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let graph = TaskGraph::new()
            .task("prep", &[], || bail!("sass exploded"))
            .task("bundle", &["prep"], || {
                ran.lock().push("bundle");
                Ok(())
            })
            .task("slow", &[], || {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            })
            .task("after_slow", &["slow"], || {
                ran.lock().push("after_slow");
                Ok(())
            });
        let err = pool.install(|| graph.run()).unwrap_err();

        let message = format!("{err:#}");
        assert!(message.starts_with("stage `prep` failed"));
        assert!(message.contains("sass exploded"));
        assert!(ran.lock().is_empty());
    }

    #[test]
    fn test_invalid_graphs() {
        let ok = || Ok(());
        let err = TaskGraph::new().task("a", &["b"], ok).run().unwrap_err();
        assert_eq!(
            err.downcast_ref::<GraphError>(),
            Some(&GraphError::UnknownPredecessor {
                task: "a",
                after: "b"
            })
        );

        let err = TaskGraph::new()
            .task("a", &["b"], ok)
            .task("b", &["a"], ok)
            .task("c", &[], ok)
            .run()
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<GraphError>(),
            Some(&GraphError::Cycle(vec!["a", "b"]))
        );

        let err = TaskGraph::new().task("a", &[], ok).task("a", &[], ok).run().unwrap_err();
        assert_eq!(err.downcast_ref::<GraphError>(), Some(&GraphError::Duplicate("a")));
    }
}
