//! Tasks and their composition.
//!
//! A [`Task`] is either a named leaf wrapping an [`Action`], or a group of
//! tasks composed in [`Order::Sequential`] or [`Order::Parallel`] order.
//! Groups are tasks themselves, so they nest into a tree:
//!
//! ```rust,no_run
//! use kumade::Task;
//!
//! let tree = Task::series([
//!     Task::new("clean", || async { anyhow::Ok(()) }),
//!     Task::parallel([
//!         Task::new("scripts", || async { anyhow::Ok(()) }),
//!         Task::new("images", || async { anyhow::Ok(()) }),
//!     ]),
//!     Task::new("styles", || async { anyhow::Ok(()) }),
//! ]);
//! ```
//!
//! Running a sequential group starts each member only after the previous one
//! completed and stops at the first failure. A parallel group polls all of its
//! members concurrently and waits for every one of them, even when some of
//! them fail; there is no cancellation.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::TaskError;
use crate::utils::{style_task, took};

/// The body of a leaf task.
///
/// Implemented for every `Fn() -> impl Future<Output = anyhow::Result<()>>`,
/// so plain async closures can be used directly.
pub trait Action: Send + Sync {
    fn call(&self) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> Action for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        (self)().boxed()
    }
}

/// How the members of a group are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Sequential,
    Parallel,
}

#[derive(Clone)]
pub enum Task {
    Unit {
        name: Cow<'static, str>,
        action: Arc<dyn Action>,
    },
    Series(Vec<Task>),
    Parallel(Vec<Task>),
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_action(name, Arc::new(action))
    }

    pub fn from_action(name: impl Into<Cow<'static, str>>, action: Arc<dyn Action>) -> Self {
        Task::Unit {
            name: name.into(),
            action,
        }
    }

    pub fn series(tasks: impl IntoIterator<Item = Task>) -> Self {
        Task::Series(tasks.into_iter().collect())
    }

    pub fn parallel(tasks: impl IntoIterator<Item = Task>) -> Self {
        Task::Parallel(tasks.into_iter().collect())
    }

    pub fn compose(tasks: impl IntoIterator<Item = Task>, order: Order) -> Self {
        match order {
            Order::Sequential => Task::series(tasks),
            Order::Parallel => Task::parallel(tasks),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Task::Unit { name, .. } => name.to_string(),
            Task::Series(tasks) => format!("series({})", join_names(tasks)),
            Task::Parallel(tasks) => format!("parallel({})", join_names(tasks)),
        }
    }

    /// Names of all leaf tasks, depth first.
    pub fn leaves(&self) -> Vec<&str> {
        match self {
            Task::Unit { name, .. } => vec![name.as_ref()],
            Task::Series(tasks) | Task::Parallel(tasks) => {
                tasks.iter().flat_map(Task::leaves).collect()
            }
        }
    }

    pub fn run(&self) -> BoxFuture<'_, Result<(), TaskError>> {
        match self {
            Task::Unit { name, action } => {
                let span = tracing::info_span!("task", name = %name);
                span.pb_set_style(&style_task());
                span.pb_set_message(&format!("Running {name}"));

                async move {
                    let s = Instant::now();
                    tracing::info!("Starting '{}'...", name);

                    match action.call().await {
                        Ok(()) => {
                            tracing::info!("Finished '{}' {}", name, took(s));
                            Ok(())
                        }
                        Err(err) => {
                            tracing::error!("'{}' errored {}", name, took(s));
                            Err(TaskError::Failed(name.to_string(), err))
                        }
                    }
                }
                .instrument(span)
                .boxed()
            }
            Task::Series(tasks) => async move {
                for task in tasks {
                    task.run().await?;
                }
                Ok(())
            }
            .boxed(),
            Task::Parallel(tasks) => async move {
                let mut errors: Vec<_> = join_all(tasks.iter().map(Task::run))
                    .await
                    .into_iter()
                    .filter_map(Result::err)
                    .collect();

                match errors.len() {
                    0 => Ok(()),
                    1 => Err(errors.remove(0)),
                    _ => Err(TaskError::Parallel(errors)),
                }
            }
            .boxed(),
        }
    }

    /// Lowers the tree into a DAG of leaf tasks. Every leaf of a sequential
    /// stage gets an edge to every entry leaf of the following stage.
    pub fn graph(&self) -> Graph<String, ()> {
        let mut graph = Graph::new();
        self.lower(&mut graph);
        graph
    }

    fn lower(&self, graph: &mut Graph<String, ()>) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
        match self {
            Task::Unit { name, .. } => {
                let index = graph.add_node(name.to_string());
                (vec![index], vec![index])
            }
            Task::Series(tasks) => {
                let mut sources = Vec::new();
                let mut sinks: Vec<NodeIndex> = Vec::new();

                for task in tasks {
                    let (entry, exit) = task.lower(graph);
                    if entry.is_empty() {
                        continue;
                    }

                    if sources.is_empty() {
                        sources = entry.clone();
                    }

                    for &from in &sinks {
                        for &to in &entry {
                            graph.add_edge(from, to, ());
                        }
                    }

                    sinks = exit;
                }

                (sources, sinks)
            }
            Task::Parallel(tasks) => {
                let mut sources = Vec::new();
                let mut sinks = Vec::new();

                for task in tasks {
                    let (entry, exit) = task.lower(graph);
                    sources.extend(entry);
                    sinks.extend(exit);
                }

                (sources, sinks)
            }
        }
    }

    /// Renders the task tree as a Mermaid flowchart.
    pub fn mermaid(&self) -> Mermaid {
        Mermaid(self.graph())
    }
}

fn join_names(tasks: &[Task]) -> String {
    tasks.iter().map(Task::name).collect::<Vec<_>>().join(", ")
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name())
    }
}

/// Runs `tasks` as one group in the given order.
pub async fn run(tasks: Vec<Task>, order: Order) -> Result<(), TaskError> {
    Task::compose(tasks, order).run().await
}

pub struct Mermaid(Graph<String, ()>);

impl Display for Mermaid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let graph = &self.0;
        let order = petgraph::algo::toposort(graph, None).map_err(|_| std::fmt::Error)?;

        writeln!(f, "graph LR")?;

        for index in order {
            let name = graph[index].replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(name, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("start {name}"));
                tokio::task::yield_now().await;
                log.lock().unwrap().push(format!("end {name}"));
                anyhow::Ok(())
            }
        })
    }

    fn failing(name: &'static str) -> Task {
        Task::new(name, || async { Err::<(), _>(anyhow::anyhow!("boom")) })
    }

    #[tokio::test]
    async fn series_runs_members_one_after_another() {
        let log = Log::default();
        let tree = Task::series([recorder(&log, "a"), recorder(&log, "b")]);

        tree.run().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "end a", "start b", "end b"]
        );
    }

    #[tokio::test]
    async fn series_stops_at_first_failure() {
        let log = Log::default();
        let tree = Task::series([recorder(&log, "a"), failing("bad"), recorder(&log, "c")]);

        let err = tree.run().await.unwrap_err();

        assert_eq!(err.failed_tasks(), vec!["bad"]);
        assert!(!log.lock().unwrap().iter().any(|line| line.ends_with('c')));
    }

    #[tokio::test]
    async fn parallel_members_are_pending_together() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let member = |name: &'static str| {
            let barrier = barrier.clone();
            Task::new(name, move || {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    anyhow::Ok(())
                }
            })
        };

        let tree = Task::parallel([member("a"), member("b")]);
        let result = tokio::time::timeout(Duration::from_secs(5), tree.run()).await;

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn parallel_failure_lets_siblings_finish() {
        let log = Log::default();
        let tree = Task::parallel([failing("bad"), recorder(&log, "slow")]);

        let err = tree.run().await.unwrap_err();

        assert_eq!(err.failed_tasks(), vec!["bad"]);
        assert!(log.lock().unwrap().contains(&"end slow".to_string()));
    }

    #[tokio::test]
    async fn parallel_reports_every_failure() {
        let tree = run(vec![failing("x"), failing("y")], Order::Parallel);

        let err = tree.await.unwrap_err();

        assert!(matches!(err, TaskError::Parallel(ref errors) if errors.len() == 2));
        assert_eq!(err.failed_tasks(), vec!["x", "y"]);
    }

    #[test]
    fn names_of_groups() {
        let log = Log::default();
        let tree = Task::series([
            recorder(&log, "a"),
            Task::parallel([recorder(&log, "b"), recorder(&log, "c")]),
        ]);

        assert_eq!(tree.name(), "series(a, parallel(b, c))");
        assert_eq!(tree.leaves(), vec!["a", "b", "c"]);
    }

    #[test]
    fn graph_connects_stages() {
        let log = Log::default();
        let tree = Task::series([
            recorder(&log, "a"),
            Task::parallel([recorder(&log, "b"), recorder(&log, "c")]),
            recorder(&log, "d"),
        ]);

        let graph = tree.graph();
        let edges: Vec<_> = graph
            .raw_edges()
            .iter()
            .map(|e| (graph[e.source()].as_str(), graph[e.target()].as_str()))
            .collect();

        assert_eq!(edges, vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);

        let mermaid = tree.mermaid().to_string();
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("0[\"a\"]"));
        assert!(mermaid.contains("0 --> 1"));
    }
}
