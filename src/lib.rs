//! # labsched: graph-driven lab automation orchestrator
//!
//! A submitted plan is a DAG of [`graph::Node`]s rooted at a single `Start`:
//! `Protocol` nodes are atomic units of physical work, `Delay` nodes impose a
//! target gap between two points on the timeline. The [`optimizer::Optimizer`]
//! turns a graph into a concrete schedule by solving a MILP over a single
//! shared resource; the [`executor::Executor`] drives the schedule forward
//! one `Protocol` at a time through an [`awaitlist::AwaitList`], persisting a
//! snapshot after every re-optimize via [`storage::JsonStorage`] and running
//! each work unit through a pluggable [`driver::Driver`].
//!
//! ## Quick start
//!
//! ```
//! use labsched::config::ExecutorConfig;
//! use labsched::driver::DummyDriver;
//! use labsched::executor::Executor;
//! use labsched::graph::{Graph, Node};
//! use labsched::storage::InMemoryJsonStorage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new();
//! let wash = graph.attach(graph.root_id(), Node::new_protocol("wash", 300))?;
//! graph.attach(wash, Node::new_protocol("stain", 600))?;
//!
//! let mut executor = Executor::new(
//!     ExecutorConfig::default(),
//!     Arc::new(DummyDriver::new(Duration::from_millis(1))),
//!     Arc::new(InMemoryJsonStorage::new()),
//! );
//! executor.add_protocol(graph).await?;
//! executor.run_loop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`graph`] - the `Start`/`Protocol`/`Delay` DAG and its canonical encoding
//! - [`optimizer`] - MILP scheduling over the graph
//! - [`awaitlist`] - the time-ordered queue the executor waits on
//! - [`storage`] - append-only JSON snapshot persistence
//! - [`driver`] - the instrument-facing work-unit contract
//! - [`config`] - executor-lifetime configuration
//! - [`telemetry`] - structured logging setup
//! - [`executor`] - ties the above together into the run loop

pub mod awaitlist;
pub mod config;
pub mod driver;
pub mod executor;
pub mod graph;
pub mod optimizer;
pub mod storage;
pub mod telemetry;
