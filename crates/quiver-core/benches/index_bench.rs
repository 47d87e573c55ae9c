use std::hint::black_box;
use std::ops::Bound;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quiver_common::types::{EdgeId, EdgeTypeId, NodeId, Value};
use quiver_core::index::{BTreeIndex, ChunkedAdjacency, HashIndex};

const ENTRIES: u64 = 100_000;

fn hash_lookup(c: &mut Criterion) {
    let index: HashIndex<NodeId> = HashIndex::new();
    for i in 0..ENTRIES {
        index.insert(&Value::Int64((i % 1_000) as i64), NodeId::new(i));
    }
    let mut group = c.benchmark_group("index/hash");
    group.throughput(Throughput::Elements(1));
    group.bench_function("get", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = (key + 7) % 1_000;
            black_box(index.get(&Value::Int64(key)))
        });
    });
    group.finish();
}

fn btree_range(c: &mut Criterion) {
    let index: BTreeIndex<NodeId> = BTreeIndex::new();
    for i in 0..ENTRIES {
        index.insert(&Value::Int64(i as i64), NodeId::new(i));
    }
    let mut group = c.benchmark_group("index/btree");
    for width in [10i64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("range", width), &width, |b, width| {
            let lower = Value::Int64(50_000);
            let upper = Value::Int64(50_000 + width);
            b.iter(|| black_box(index.range(Bound::Included(&lower), Bound::Excluded(&upper))));
        });
    }
    group.finish();
}

fn adjacency_scan(c: &mut Criterion) {
    let adjacency = ChunkedAdjacency::new();
    let knows = EdgeTypeId(0);
    let mut edge = 0u64;
    for node in 0..1_000u64 {
        for k in 1..=32u64 {
            adjacency.add_edge(NodeId::new(node), NodeId::new((node + k) % 1_000), knows, EdgeId::new(edge));
            edge += 1;
        }
    }
    let mut group = c.benchmark_group("index/adjacency");
    group.throughput(Throughput::Elements(32));
    group.bench_function("edges_from", |b| {
        let mut node = 0u64;
        b.iter(|| {
            node = (node + 1) % 1_000;
            black_box(adjacency.edges_from(NodeId::new(node), Some(knows)))
        });
    });
    group.finish();
}

criterion_group!(benches, hash_lookup, btree_range, adjacency_scan);
criterion_main!(benches);
