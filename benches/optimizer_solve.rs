use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use labsched::graph::{FromType, Graph, Node};
use labsched::optimizer::{Optimizer, OptimizerConfig};

fn build_pipeline(stages: usize) -> Graph {
    let mut g = Graph::new();
    let mut parent = g.root_id();
    for i in 0..stages {
        parent = g
            .attach(parent, Node::new_protocol(format!("P{i}"), 60))
            .unwrap();
        let delay = g
            .attach(parent, Node::new_delay(30, FromType::Finish, 0))
            .unwrap();
        parent = g
            .attach(delay, Node::new_protocol(format!("P{i}b"), 30))
            .unwrap();
    }
    g
}

fn optimize_benchmark(c: &mut Criterion) {
    let optimizer = Optimizer::new(OptimizerConfig::default());
    c.bench_function("optimize_20_stage_pipeline", |b| {
        b.iter_batched(
            || build_pipeline(20),
            |mut g| optimizer.optimize(&mut g, Utc::now()).unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, optimize_benchmark);
criterion_main!(benches);
