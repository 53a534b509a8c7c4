// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glam::Mat4;
use quarry_forest::{BrushId, CombineOp, Forest, NodeId};

/// Build a hierarchy of `branches` branches under one tree, each holding
/// `brushes_per_branch` brushes. Returns the root and the branch ids.
fn build_tree(forest: &mut Forest, branches: usize, brushes_per_branch: usize) -> (NodeId, Vec<NodeId>) {
    let tree = forest.create_tree(0);
    let mut branch_ids = Vec::with_capacity(branches);
    for b in 0..branches {
        let branch = forest
            .create_branch(CombineOp::Additive, b as i32, Some(tree))
            .unwrap();
        for i in 0..brushes_per_branch {
            forest
                .create_brush(
                    BrushId((b * brushes_per_branch + i) as i32),
                    Mat4::IDENTITY,
                    CombineOp::Additive,
                    0,
                    Some(branch),
                )
                .unwrap();
        }
        branch_ids.push(branch);
    }
    (tree, branch_ids)
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");
    for &(branches, brushes) in &[(16usize, 16usize), (64, 64)] {
        let total = (1 + branches * (1 + brushes)) as u64;
        group.throughput(Throughput::Elements(total));
        group.bench_function(format!("tree_{branches}x{brushes}"), |bencher| {
            bencher.iter_batched(
                Forest::new,
                |mut forest| {
                    let (tree, _) = build_tree(&mut forest, branches, brushes);
                    black_box(tree);
                    forest
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut forest = Forest::new();
    let (_, branches) = build_tree(&mut forest, 64, 64);
    let probe = branches[31];
    c.bench_function("resolve/hot", |bencher| {
        bencher.iter(|| black_box(forest.resolve(black_box(probe)).unwrap()));
    });
}

fn bench_reparent_same_hierarchy(c: &mut Criterion) {
    c.bench_function("reparent/same_hierarchy", |bencher| {
        bencher.iter_batched(
            || {
                let mut forest = Forest::new();
                let (tree, branches) = build_tree(&mut forest, 32, 8);
                (forest, tree, branches)
            },
            |(mut forest, tree, branches)| {
                for &branch in &branches {
                    forest.add_child(tree, branch).unwrap();
                }
                forest
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_cross_hierarchy_move(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_hierarchy_move");
    for &brushes in &[8usize, 64, 256] {
        group.throughput(Throughput::Elements(brushes as u64 + 1));
        group.bench_function(format!("subtree_{brushes}"), |bencher| {
            bencher.iter_batched(
                || {
                    let mut forest = Forest::new();
                    let (_, branches) = build_tree(&mut forest, 1, brushes);
                    let dest = forest.create_tree(0);
                    (forest, dest, branches[0])
                },
                |(mut forest, dest, branch)| {
                    forest.add_child(dest, branch).unwrap();
                    forest
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_destroy_subtree(c: &mut Criterion) {
    c.bench_function("destroy/subtree_64", |bencher| {
        bencher.iter_batched(
            || {
                let mut forest = Forest::new();
                let (_, branches) = build_tree(&mut forest, 1, 64);
                (forest, branches[0])
            },
            |(mut forest, branch)| {
                forest.destroy_node(branch).unwrap();
                forest
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_dirty_propagation(c: &mut Criterion) {
    c.bench_function("dirty/deep_chain_256", |bencher| {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let mut cursor = tree;
        for _ in 0..256 {
            cursor = forest
                .create_branch(CombineOp::Additive, 0, Some(cursor))
                .unwrap();
        }
        let leaf = cursor;
        bencher.iter(|| {
            forest.set_dirty(black_box(leaf)).unwrap();
            forest.clear_dirty(leaf).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_create,
    bench_resolve,
    bench_reparent_same_hierarchy,
    bench_cross_hierarchy_move,
    bench_destroy_subtree,
    bench_dirty_propagation
);
criterion_main!(benches);
