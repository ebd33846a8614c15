//! Executor runtime.
//!
//! Holds the set of in-flight `Start`-rooted graphs, invokes the optimizer,
//! pushes exactly one token to the await-list (the next protocol), consumes
//! tokens, records `started_time`/`finished_time` on the matching node, and
//! re-optimizes. Single-threaded cooperative: the only suspension point that
//! crosses a process boundary is the driver call.

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::awaitlist::{AwaitList, AwaitListError, Task};
use crate::config::ExecutorConfig;
use crate::driver::{Driver, DriverError};
use crate::graph::{Graph, GraphError, Node, NodeId};
use crate::optimizer::{Optimizer, OptimizerError};
use crate::storage::{JsonStorage, StorageError};

/// Errors surfaced by top-level executor operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// `add_protocol`'s argument reused an identifier already in flight.
    #[error("identifier {id} is already present in an in-flight protocol")]
    #[diagnostic(code(labsched::executor::duplicate_identifier))]
    DuplicateIdentifier { id: NodeId },

    /// A token or node lookup referenced an identifier that isn't present.
    #[error("unknown identifier {id}")]
    #[diagnostic(code(labsched::executor::unknown_identifier))]
    UnknownIdentifier { id: NodeId },

    /// The submitted or persisted graph is structurally invalid.
    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidGraph(#[from] GraphError),

    /// The optimizer could not produce a feasible schedule.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Infeasible(#[from] OptimizerError),

    /// The driver failed while running a work unit.
    #[error(transparent)]
    #[diagnostic(transparent)]
    DriverFailure(#[from] DriverError),

    /// Persistence read/write failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] StorageError),

    /// An await-list operation failed (identifier collision on enqueue).
    #[error(transparent)]
    #[diagnostic(transparent)]
    AwaitList(#[from] AwaitListError),
}

/// Holds in-flight protocols, the await-list, the optimizer, and the
/// injected driver/storage.
pub struct Executor {
    protocols: Vec<Graph>,
    await_list: AwaitList,
    optimizer: Optimizer,
    driver: Arc<dyn Driver>,
    storage: Arc<dyn JsonStorage>,
}

impl Executor {
    #[must_use]
    pub fn new(config: ExecutorConfig, driver: Arc<dyn Driver>, storage: Arc<dyn JsonStorage>) -> Self {
        Self {
            protocols: Vec::new(),
            await_list: AwaitList::new(),
            optimizer: Optimizer::new(config.optimizer),
            driver,
            storage,
        }
    }

    /// Load the most recent snapshot and rebuild `protocols`, then
    /// re-optimize. Kept outside the constructor: the source's analogous
    /// resume path called an async routine from a synchronous constructor,
    /// which this crate treats as a latent bug to avoid rather than imitate.
    pub async fn resume(&mut self) -> Result<(), ExecutorError> {
        if let Some(snapshot) = self.storage.load_latest().await? {
            let array = snapshot.as_array().ok_or_else(|| ExecutorError::InvalidGraph(GraphError::InvalidGraph {
                reason: "persisted snapshot is not a JSON array of graphs".to_string(),
            }))?;
            let mut protocols = Vec::with_capacity(array.len());
            for entry in array {
                protocols.push(Graph::decode(entry)?);
            }
            self.protocols = protocols;
        }
        self.optimize().await
    }

    /// Reject `p` if any of its node identifiers collide with one already
    /// present in an in-flight protocol; otherwise append and re-optimize.
    ///
    /// Identifiers are the uniqueness key; two `Protocol` nodes within `p`
    /// sharing a human `name` are not rejected, only logged, since nothing
    /// downstream keys off `name`.
    pub async fn add_protocol(&mut self, p: Graph) -> Result<(), ExecutorError> {
        let new_ids: HashSet<NodeId> = p.flatten().iter().map(|n| n.id()).collect();
        for existing in &self.protocols {
            for n in existing.flatten() {
                if new_ids.contains(&n.id()) {
                    return Err(ExecutorError::DuplicateIdentifier { id: n.id() });
                }
            }
        }

        let mut seen_names = HashSet::new();
        for proto in p.flatten().iter().filter_map(|n| n.as_protocol()) {
            if !seen_names.insert(proto.name.as_str()) {
                tracing::warn!(name = %proto.name, "duplicate protocol name within submitted tree");
            }
        }

        self.protocols.push(p);
        self.optimize().await
    }

    /// Combine all in-flight protocols under one synthetic `Start`, run the
    /// optimizer, restore original parentage, then select and enqueue the
    /// next token and persist.
    pub async fn optimize(&mut self) -> Result<(), ExecutorError> {
        if !self.protocols.is_empty() {
            let mut synthetic = Node::new_start();
            let mut counts = Vec::with_capacity(self.protocols.len());
            for graph in &mut self.protocols {
                let children = mem::take(graph.root_mut().post_node_mut());
                counts.push(children.len());
                synthetic.post_node_mut().extend(children);
            }
            let mut combined = Graph::from_root(synthetic).expect("synthetic root is always Start");

            let result = self.optimizer.optimize(&mut combined, Utc::now());

            let mut drained = mem::take(combined.root_mut().post_node_mut()).into_iter();
            for (graph, count) in self.protocols.iter_mut().zip(counts) {
                let children: Vec<Node> = (&mut drained).take(count).collect();
                *graph.root_mut().post_node_mut() = children;
            }

            // Surface an optimizer failure without altering state: parentage
            // is already restored above regardless of outcome, and the
            // optimizer only writes scheduled_time after a successful solve.
            result?;
        }

        self.await_list.cancel_all().await;

        let mut best: Option<(NodeId, Option<chrono::DateTime<Utc>>)> = None;
        for graph in &self.protocols {
            for node in graph.flatten() {
                if let Some(p) = node.as_protocol() {
                    if p.started_time.is_some() {
                        continue;
                    }
                    let candidate = (p.id, p.scheduled_time);
                    best = Some(match best {
                        None => candidate,
                        Some(current) => pick_earlier(current, candidate),
                    });
                }
            }
        }

        if let Some((id, scheduled_time)) = best {
            if let Some(execution_time) = scheduled_time {
                self.await_list
                    .add(execution_time, id.to_string(), None)
                    .await?;
            }
        }

        self.persist().await?;
        Ok(())
    }

    async fn persist(&self) -> Result<(), ExecutorError> {
        let array: Vec<Value> = self.protocols.iter().map(Graph::encode).collect();
        self.storage.save(&json!(array), None).await?;
        Ok(())
    }

    /// Locate the `Protocol` named by `task.content`, run the driver against
    /// it, record `started_time`/`finished_time`, and re-optimize.
    pub async fn process_task(&mut self, task: Task) -> Result<(), ExecutorError> {
        let id: NodeId = task
            .content
            .parse()
            .map_err(|_| ExecutorError::UnknownIdentifier { id: Uuid::nil() })?;

        let name = self
            .find_protocol(id)
            .ok_or(ExecutorError::UnknownIdentifier { id })?
            .name
            .clone();

        self.set_started_time(id, Utc::now())?;

        let outcome = self.driver.execute(&name).await?;
        tracing::info!(protocol = %name, files = ?outcome, "work unit complete");

        self.set_finished_time(id, Utc::now())?;

        self.optimize().await
    }

    /// Wait for and process exactly one due task. Returns `false` without
    /// waiting if nothing is pending (all work complete).
    pub async fn step(&mut self) -> Result<bool, ExecutorError> {
        if self.await_list.get_tasks().await.is_empty() {
            return Ok(false);
        }
        let task = self.await_list.wait_next().await;
        self.process_task(task).await?;
        Ok(true)
    }

    /// Repeatedly [`step`](Self::step) until an `optimize` leaves nothing
    /// pending.
    pub async fn run_loop(&mut self) -> Result<(), ExecutorError> {
        while self.step().await? {}
        tracing::info!("no pending work remains, executor loop complete");
        Ok(())
    }

    fn find_protocol(&self, id: NodeId) -> Option<&crate::graph::ProtocolNode> {
        self.protocols
            .iter()
            .find_map(|g| g.find(id).and_then(Node::as_protocol))
    }

    fn set_started_time(&mut self, id: NodeId, at: chrono::DateTime<Utc>) -> Result<(), ExecutorError> {
        for graph in &mut self.protocols {
            if let Some(node) = graph.find_mut(id).and_then(Node::as_protocol_mut) {
                node.started_time = Some(at);
                return Ok(());
            }
        }
        Err(ExecutorError::UnknownIdentifier { id })
    }

    fn set_finished_time(&mut self, id: NodeId, at: chrono::DateTime<Utc>) -> Result<(), ExecutorError> {
        for graph in &mut self.protocols {
            if let Some(node) = graph.find_mut(id).and_then(Node::as_protocol_mut) {
                node.finished_time = Some(at);
                return Ok(());
            }
        }
        Err(ExecutorError::UnknownIdentifier { id })
    }
}

fn pick_earlier(
    a: (NodeId, Option<chrono::DateTime<Utc>>),
    b: (NodeId, Option<chrono::DateTime<Utc>>),
) -> (NodeId, Option<chrono::DateTime<Utc>>) {
    match (a.1, b.1) {
        (Some(at), Some(bt)) => {
            if at <= bt {
                a
            } else {
                b
            }
        }
        (Some(_), None) => a,
        (None, Some(_)) => b,
        (None, None) => a,
    }
}
