//! Benchmarks for graph compilation and pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use taskgraph::graph::Pipeline;
use taskgraph::runner::Runner;
use taskgraph::vars::Vars;

const MEDIAN_OF_SOURCES: &str = r#"
    s1 [type=memo value="101.5"];
    s2 [type=memo value="99.25"];
    s3 [type=memo value="100"];
    s4 [type=memo value="100.75"];
    s5 [type=memo value="98"];
    m  [type=median allowedFaults=2];
    x  [type=multiply times=100 precision=0];
    s1 -> m; s2 -> m; s3 -> m; s4 -> m; s5 -> m;
    m -> x;
"#;

fn chain(len: usize) -> String {
    let mut text = String::from("t0 [type=memo value=\"1\"];\n");
    for i in 1..len {
        text.push_str(&format!("t{i} [type=multiply times=1];\nt{} -> t{i};\n", i - 1));
    }
    text
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile_median", |b| {
        b.iter(|| Pipeline::parse(black_box(MEDIAN_OF_SOURCES)))
    });

    let long = chain(200);
    c.bench_function("compile_chain_200", |b| {
        b.iter(|| Pipeline::parse(black_box(&long)))
    });
}

fn run_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let runner = Runner::default();

    let median = Arc::new(Pipeline::parse(MEDIAN_OF_SOURCES).expect("valid pipeline"));
    c.bench_function("run_median", |b| {
        b.iter(|| rt.block_on(runner.run(Arc::clone(&median), Vars::new())))
    });

    let long = Arc::new(Pipeline::parse(&chain(50)).expect("valid pipeline"));
    c.bench_function("run_chain_50", |b| {
        b.iter(|| rt.block_on(runner.run(Arc::clone(&long), Vars::new())))
    });
}

criterion_group!(benches, compile_benchmark, run_benchmark);
criterion_main!(benches);
