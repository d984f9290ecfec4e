//! Assembly and instantiation cost for chains of dense blocks.
//!
//! 1. Graph assembly at default values (plan recording only)
//! 2. Plan instantiation on NdArray
//! 3. Model-file parse + graph construction

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hyperdag::blocks::{ClassificationHead, DenseBlock, MergeBlock, Setting};
use hyperdag::config::scaffold::model_template;
use hyperdag::config::ModelFile;
use hyperdag::graph::{assemble, Graph, GraphBuilder, InputSpec};
use hyperdag::hp::HyperParameters;

use burn::backend::NdArray;

type B = NdArray;

/// `towers` parallel dense chains of `depth` blocks merged into one head.
fn synthetic_graph(towers: usize, depth: usize) -> Graph {
    let mut g = GraphBuilder::new();
    let mut ends = Vec::with_capacity(towers);
    for t in 0..towers {
        let mut node = g
            .input(InputSpec::float(format!("x{}", t), &[16]))
            .expect("unique input name");
        for d in 0..depth {
            let block = DenseBlock::new(format!("t{}_d{}", t, d))
                .with_units(Setting::choice([32i64, 64]));
            node = g.block(block, &[node]).expect("valid block");
        }
        ends.push(node);
    }
    let merged = g.block(MergeBlock::new("merge"), &ends).expect("valid merge");
    let head = g
        .block(ClassificationHead::new("head", 2), &[merged])
        .expect("valid head");
    g.build(&[head]).expect("valid graph")
}

fn bench_assemble(c: &mut Criterion) {
    let small = synthetic_graph(2, 4);
    let large = synthetic_graph(8, 16);

    let mut group = c.benchmark_group("assemble");
    group.bench_function("2x4_blocks", |b| {
        b.iter(|| assemble(black_box(&small), &mut HyperParameters::new()))
    });
    group.bench_function("8x16_blocks", |b| {
        b.iter(|| assemble(black_box(&large), &mut HyperParameters::new()))
    });
    group.finish();
}

fn bench_init(c: &mut Criterion) {
    let device = Default::default();
    let graph = synthetic_graph(2, 4);
    let plan = assemble(&graph, &mut HyperParameters::new())
        .expect("assembles")
        .plan;

    c.bench_function("init_2x4_ndarray", |b| {
        b.iter(|| plan.init::<B>(black_box(&device)))
    });
}

fn bench_model_file(c: &mut Criterion) {
    let source = model_template("bench");
    c.bench_function("parse_and_graph", |b| {
        b.iter(|| {
            let file = ModelFile::parse(black_box(&source)).expect("template parses");
            file.to_graph().expect("template builds")
        })
    });
}

criterion_group!(benches, bench_assemble, bench_init, bench_model_file);
criterion_main!(benches);
