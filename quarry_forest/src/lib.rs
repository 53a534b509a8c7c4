// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quarry Forest: handle-stable management for a forest of CSG trees.
//!
//! A [`Forest`] owns any number of independent constructive-solid-geometry
//! hierarchies. Nodes come in three kinds — a `Tree` root per hierarchy,
//! `Branch` groups with a combine operation, and leaf `Brush`es referencing
//! opaque geometry payloads — and callers address all of them through stable
//! [`NodeId`] handles.
//!
//! - Storage per hierarchy is compact (generational slots via
//!   [`quarry_slots`]), so internal locations change when subtrees move
//!   between hierarchies or a hierarchy is rebuilt.
//! - The forest's handle table absorbs that relocation: a [`NodeId`] issued
//!   at creation keeps resolving to the same logical node across any number
//!   of moves, and goes stale exactly when the node is destroyed.
//! - Structural edits keep child order, refuse cycles and duplicate
//!   attachments, and propagate dirty / transform-modified flags to the
//!   hierarchy roots that downstream mesh evaluation watches.
//!
//! ## Two handle spaces
//!
//! [`NodeId`] is the external, stable space; [`CompactNodeId`] is the
//! per-hierarchy location a resolve returns. Structural algorithms work on
//! the compact space, which is why a `CompactNodeId` may go stale across a
//! move while the owning `NodeId` does not. Re-resolve instead of caching
//! compact locations.
//!
//! ## Failure model
//!
//! Every operation returns `Result<_, ForestError>`.
//! [`ForestError::InvalidHandle`] means a stale handle reached the forest —
//! a caller bug. Every other variant is an expected structural rejection
//! (cycle, duplicate child, tree-as-child, bad index, ...) with a no-op
//! guarantee: nothing changed. Batch operations validate the whole batch
//! before touching anything.
//!
//! ## Minimal usage
//!
//! ```
//! use quarry_forest::{CombineOp, Forest, BrushId};
//! use glam::Mat4;
//!
//! let mut forest = Forest::new();
//!
//! // One hierarchy: a tree root with a subtractive branch holding a brush.
//! let tree = forest.create_tree(0);
//! let branch = forest
//!     .create_branch(CombineOp::Subtractive, 0, Some(tree))
//!     .unwrap();
//! let brush = forest
//!     .create_brush(BrushId(42), Mat4::IDENTITY, CombineOp::Additive, 0, Some(branch))
//!     .unwrap();
//!
//! assert_eq!(forest.children(tree).unwrap(), vec![branch]);
//! assert_eq!(forest.parent(brush).unwrap(), Some(branch));
//!
//! // Reparent across hierarchies; the ids survive the move.
//! let other = forest.create_tree(0);
//! forest.add_child(other, branch).unwrap();
//! assert_eq!(forest.parent(brush).unwrap(), Some(branch));
//! assert_eq!(forest.hierarchy_of(brush).unwrap(), forest.hierarchy_of(other).unwrap());
//!
//! // Destroying a node invalidates its id and its descendants' ids.
//! forest.destroy_node(branch).unwrap();
//! assert!(!forest.is_alive(branch));
//! assert!(!forest.is_alive(brush));
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod error;
mod forest;
mod record;
mod types;

pub use error::ForestError;
pub use forest::Forest;
pub use types::{BrushId, CombineOp, CompactNodeId, HierarchyId, NodeFlags, NodeId, NodeKind};
