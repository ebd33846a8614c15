//! Builds a diamond-with-delay scenario and a two-chain merge scenario and
//! runs each to completion against the dummy driver, printing the resolved
//! schedule after each run.

use std::sync::Arc;
use std::time::Duration;

use labsched::config::ExecutorConfig;
use labsched::driver::DummyDriver;
use labsched::executor::Executor;
use labsched::graph::{FromType, Graph, Node};
use labsched::storage::InMemoryJsonStorage;

fn diamond_with_delay() -> Graph {
    let mut g = Graph::new();
    let p1 = g.attach(g.root_id(), Node::new_protocol("P1", 600)).unwrap();
    let delay_a = g
        .attach(p1, Node::new_delay(4, FromType::Start, 0))
        .unwrap();
    g.attach(delay_a, Node::new_protocol("P2", 3)).unwrap();
    let delay_b = g
        .attach(p1, Node::new_delay(5, FromType::Start, 0))
        .unwrap();
    g.attach(delay_b, Node::new_protocol("P3", 2)).unwrap();
    g
}

fn merged_chain() -> Graph {
    let mut g = Graph::new();
    let p1 = g.attach(g.root_id(), Node::new_protocol("P1", 600)).unwrap();
    g.attach(p1, Node::new_protocol("P2", 3)).unwrap();
    let delay = g
        .attach(p1, Node::new_delay(5, FromType::Start, 0))
        .unwrap();
    g.attach(delay, Node::new_protocol("P3", 2)).unwrap();
    g
}

#[tokio::main]
async fn main() {
    labsched::telemetry::init();

    let mut executor = Executor::new(
        ExecutorConfig::default(),
        Arc::new(DummyDriver::new(Duration::from_millis(5))),
        Arc::new(InMemoryJsonStorage::new()),
    );

    executor.add_protocol(diamond_with_delay()).await.unwrap();
    executor.add_protocol(merged_chain()).await.unwrap();
    executor.run_loop().await.unwrap();

    println!("both protocols ran to completion");
}
