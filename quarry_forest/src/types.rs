// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types for the forest: handles, node kinds, combine operations, flags.

use quarry_slots::Slot;

/// Stable external handle to a node.
///
/// A `NodeId` is issued once per logical node and is never reused for a
/// different node. It survives relocation: when a subtree moves between
/// hierarchies the internal storage location changes, but every `NodeId`
/// inside the moved subtree keeps resolving to the same logical node.
///
/// A `NodeId` goes stale only when its node is destroyed (directly, or as a
/// descendant of a destroyed node). Stale ids never alias a newer node
/// because the underlying slot generation must match.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) Slot);

impl NodeId {
    /// An id no forest will ever issue or resolve.
    pub const INVALID: Self = Self(Slot::INVALID);
}

/// Handle to a hierarchy (one independently rooted tree) within a forest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HierarchyId(pub(crate) Slot);

impl HierarchyId {
    /// An id no forest will ever issue or resolve.
    pub const INVALID: Self = Self(Slot::INVALID);
}

/// Location of a node inside one hierarchy's compact storage.
///
/// Unlike [`NodeId`] this is *not* stable: structural operations that move a
/// node between hierarchies invalidate its `CompactNodeId` while the owning
/// [`NodeId`] stays valid. Re-resolve through the forest after any structural
/// edit rather than caching these.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CompactNodeId {
    /// The hierarchy holding the node.
    pub hierarchy: HierarchyId,
    /// The node's slot within that hierarchy's storage.
    pub slot: Slot,
}

impl CompactNodeId {
    /// A location no forest will ever produce.
    pub const INVALID: Self = Self {
        hierarchy: HierarchyId::INVALID,
        slot: Slot::INVALID,
    };
}

/// Opaque reference to brush geometry in an external payload store.
///
/// The forest stores and returns this identifier but never interprets it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BrushId(pub i32);

/// What a node is.
///
/// A tagged union rather than a class hierarchy: brush-specific data rides on
/// the `Brush` variant and simply does not exist on the others.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// The root of a hierarchy. Exactly one per hierarchy, always the root.
    Tree,
    /// An interior grouping node combining its children.
    Branch,
    /// A leaf referencing a single solid in the payload store.
    Brush(BrushId),
}

impl NodeKind {
    /// Whether this kind may hold children. Brushes are always leaves.
    pub const fn can_have_children(self) -> bool {
        !matches!(self, Self::Brush(_))
    }
}

/// The boolean operation a node contributes relative to its siblings.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CombineOp {
    /// Union with the result so far.
    #[default]
    Additive,
    /// Subtract from the result so far.
    Subtractive,
    /// Intersect with the result so far.
    Intersecting,
}

bitflags::bitflags! {
    /// Per-node update flags consumed by the downstream mesh evaluator.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// The node's structure or content changed since the last evaluation.
        const DIRTY              = 0b0000_0001;
        /// The node's cached node-to-root transform is stale.
        const TRANSFORM_MODIFIED = 0b0000_0010;
        /// Set on a hierarchy root when anything below it needs re-evaluation.
        const TREE_NEEDS_UPDATE  = 0b0000_0100;
        /// Set on branch ancestors of a dirtied node.
        const BRANCH_NEEDS_UPDATE = 0b0000_1000;
    }
}
