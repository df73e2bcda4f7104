//! Task graph: a tree of [`Task`] leaves composed with [`sequence`] and
//! [`parallel`], and the interpreter that walks it.
//!
//! ## Semantics
//!
//! * A **sequence** runs its children in the listed order. Each child must
//!   finish before the next one starts, so child *k+1* observes everything
//!   child *k* wrote. The first failure is returned immediately and the
//!   remaining children never start.
//! * A **parallel** group starts every child at once as an independent tokio
//!   task and resolves once all of them resolve. The first failure observed
//!   rejects the group right away. Children still in flight are not
//!   cancelled: they run to completion and their outcome is discarded.
//! * A **leaf** runs on its own tokio task, so a panic inside a transform is
//!   reported as a failure of that leaf instead of tearing down the process.

mod report;
mod task;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::Instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::GraphError;
use crate::io::as_overhead;
use crate::logging::TASK_STYLE;

pub use report::{Report, TaskExecution};
pub(crate) use report::Recorder;
pub use task::{Task, TaskResult};

#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Task),
    Sequence(Arc<[Node]>),
    Parallel(Arc<[Node]>),
}

/// Children run one after another, fail-fast.
pub fn sequence(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Sequence(nodes.into_iter().collect())
}

/// Children run concurrently; the group fails on the first failure.
pub fn parallel(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Parallel(nodes.into_iter().collect())
}

impl From<Task> for Node {
    fn from(task: Task) -> Self {
        Node::Leaf(task)
    }
}

impl Node {
    /// Run the graph to completion, returning the timings of every leaf that
    /// finished before the graph did.
    pub async fn run(&self) -> Result<Report, GraphError> {
        let recorder = Recorder::new();
        self.clone().execute(recorder.clone()).await?;
        Ok(recorder.snapshot())
    }

    /// Leaves in declaration order.
    pub fn leaves(&self) -> Vec<&Task> {
        match self {
            Node::Leaf(task) => vec![task],
            Node::Sequence(nodes) | Node::Parallel(nodes) => {
                nodes.iter().flat_map(Node::leaves).collect()
            }
        }
    }

    fn execute(self, recorder: Recorder) -> BoxFuture<'static, Result<(), GraphError>> {
        async move {
            match self {
                Node::Leaf(task) => run_leaf(task, recorder).await,
                Node::Sequence(nodes) => {
                    for node in nodes.iter() {
                        node.clone().execute(recorder.clone()).await?;
                    }
                    Ok(())
                }
                Node::Parallel(nodes) => run_parallel(&nodes, recorder).await,
            }
        }
        .boxed()
    }
}

async fn run_parallel(nodes: &[Node], recorder: Recorder) -> Result<(), GraphError> {
    let mut pending: FuturesUnordered<_> = nodes
        .iter()
        .cloned()
        .map(|node| {
            let label = node.to_string();
            let handle = tokio::spawn(node.execute(recorder.clone()));
            handle.map(move |joined| joined.unwrap_or_else(|e| Err(join_error(&label, e))))
        })
        .collect();

    while let Some(result) = pending.next().await {
        if let Err(e) = result {
            // Dropping the join handles detaches the siblings, they keep running.
            if !pending.is_empty() {
                tracing::debug!(
                    siblings = pending.len(),
                    "parallel group failed, remaining tasks continue detached"
                );
            }
            return Err(e);
        }
    }

    Ok(())
}

async fn run_leaf(task: Task, recorder: Recorder) -> Result<(), GraphError> {
    let name = task.name_arc();

    let span = tracing::info_span!("task", task = %name);
    span.pb_set_style(&TASK_STYLE);
    span.pb_set_message(&format!("Running {name}"));

    let start = Instant::now();
    let joined = tokio::spawn(task.run().instrument(span)).await;

    let result = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GraphError::Task(name.to_string(), e)),
        Err(e) => Err(join_error(&name, e)),
    };

    recorder.record(name.clone(), start, result.is_ok());

    match &result {
        Ok(()) => tracing::info!("finished '{name}' {}", as_overhead(start)),
        Err(_) => tracing::error!("'{name}' failed {}", as_overhead(start)),
    }

    result
}

fn join_error(name: &str, error: tokio::task::JoinError) -> GraphError {
    let msg = match error.try_into_panic() {
        Ok(panic) => task::panic_message(&*panic),
        Err(e) => e.to_string(),
    };

    GraphError::Panic(name.to_string(), msg)
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (label, nodes) = match self {
            Node::Leaf(task) => return f.write_str(task.name()),
            Node::Sequence(nodes) => ("sequence", nodes),
            Node::Parallel(nodes) => ("parallel", nodes),
        };

        write!(f, "{label}(")?;
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{node}")?;
        }
        f.write_str(")")
    }
}
