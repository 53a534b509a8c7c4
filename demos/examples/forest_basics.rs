// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forest basics.
//!
//! Build one CSG hierarchy, edit it, and watch the update flags.
//!
//! Run:
//! - `cargo run -p quarry_demos --example forest_basics`

use glam::{Mat4, Vec3};
use quarry_forest::{BrushId, CombineOp, Forest, NodeFlags};

fn main() {
    let mut forest = Forest::new();

    // A tree root, an additive branch, and two brushes under it.
    let tree = forest.create_tree(0);
    let body = forest
        .create_branch(CombineOp::Additive, 0, Some(tree))
        .unwrap();
    let block = forest
        .create_brush(BrushId(1), Mat4::IDENTITY, CombineOp::Additive, 0, Some(body))
        .unwrap();
    let hole = forest
        .create_brush(
            BrushId(2),
            Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0)),
            CombineOp::Subtractive,
            0,
            Some(body),
        )
        .unwrap();

    println!("nodes: {}", forest.node_count());
    println!("children of body: {:?}", forest.children(body).unwrap());

    // Fresh nodes start dirty; settle the hierarchy as an evaluator would.
    for id in [tree, body, block, hole] {
        forest.clear_dirty(id).unwrap();
    }

    // Nudging a brush flags it, its branch, and the tree root.
    forest
        .set_transform(hole, Mat4::from_translation(Vec3::new(0.75, 0.0, 0.0)))
        .unwrap();
    println!("hole flags: {:?}", forest.flags(hole).unwrap());
    println!("root flags: {:?}", forest.flags(tree).unwrap());
    assert!(forest
        .flags(tree)
        .unwrap()
        .contains(NodeFlags::TREE_NEEDS_UPDATE));

    // Destroying the branch takes both brushes with it.
    forest.destroy_node(body).unwrap();
    assert!(!forest.is_alive(block));
    assert!(!forest.is_alive(hole));
    println!("nodes after destroy: {}", forest.node_count());
}
