// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-hierarchy moves.
//!
//! Reparent a subtree between two hierarchies and show that the caller's ids
//! keep resolving across the relocation.
//!
//! Run:
//! - `cargo run -p quarry_demos --example forest_moves`

use glam::Mat4;
use quarry_forest::{BrushId, CombineOp, Forest};

fn main() {
    let mut forest = Forest::new();

    let workbench = forest.create_tree(1);
    let scene = forest.create_tree(2);

    // Assemble a part on the workbench.
    let part = forest
        .create_branch(CombineOp::Additive, 0, Some(workbench))
        .unwrap();
    let solid = forest
        .create_brush(BrushId(10), Mat4::IDENTITY, CombineOp::Additive, 0, Some(part))
        .unwrap();
    let cut = forest
        .create_brush(BrushId(11), Mat4::IDENTITY, CombineOp::Subtractive, 0, Some(part))
        .unwrap();

    let before = forest.resolve(cut).unwrap();
    println!("cut lives in hierarchy {:?}", before.hierarchy);

    // Drop the finished part into the scene. The whole subtree relocates;
    // every id the caller holds stays valid.
    forest.add_child(scene, part).unwrap();

    let after = forest.resolve(cut).unwrap();
    println!("cut now lives in hierarchy {:?}", after.hierarchy);
    assert_ne!(before.hierarchy, after.hierarchy);
    assert_eq!(forest.parent(part).unwrap(), Some(scene));
    assert_eq!(forest.children(part).unwrap(), vec![solid, cut]);
    assert_eq!(forest.child_count(workbench).unwrap(), 0);

    // Destroying a tree root hands its children to the default hierarchy
    // instead of deleting them.
    forest.destroy_node(scene).unwrap();
    let default_root = forest.root_of(forest.default_hierarchy()).unwrap();
    assert_eq!(forest.parent(part).unwrap(), Some(default_root));
    println!(
        "after root destroy, part parent is the default root: {:?}",
        forest.parent(part).unwrap()
    );
}
