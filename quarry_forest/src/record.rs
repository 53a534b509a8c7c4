// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-hierarchy compact node storage and intra-hierarchy structural edits.
//!
//! A [`HierarchyRecord`] owns the entries of one rooted tree. All operations
//! here work on record-local [`Slot`]s; translating stable [`NodeId`]s to
//! slots is the forest's job.

use alloc::vec::Vec;
use glam::Mat4;
use quarry_slots::{Slot, SlotMap};

use crate::error::ForestError;
use crate::types::{CombineOp, NodeFlags, NodeId, NodeKind};

/// One node's storage within a record.
#[derive(Clone, Debug)]
pub(crate) struct NodeEntry {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<Slot>,
    pub(crate) children: Vec<Slot>,
    pub(crate) operation: CombineOp,
    pub(crate) local_transform: Mat4,
    pub(crate) flags: NodeFlags,
    pub(crate) external: NodeId,
    pub(crate) user_tag: i32,
}

impl NodeEntry {
    fn new(kind: NodeKind, operation: CombineOp, external: NodeId, user_tag: i32) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            operation,
            local_transform: Mat4::IDENTITY,
            flags: NodeFlags::empty(),
            external,
            user_tag,
        }
    }
}

/// One node of a linearized subtree.
///
/// `parent` is an offset into the pack (pre-order, so always less than the
/// node's own position), or `None` for the pack's first entry.
#[derive(Clone, Debug)]
pub(crate) struct PackedNode {
    pub(crate) kind: NodeKind,
    pub(crate) operation: CombineOp,
    pub(crate) local_transform: Mat4,
    pub(crate) flags: NodeFlags,
    pub(crate) external: NodeId,
    pub(crate) user_tag: i32,
    pub(crate) parent: Option<usize>,
}

/// A subtree lifted out of a record, ready to be imported elsewhere.
///
/// Entries are in pre-order; external ids ride along so the forest can rebind
/// its handle table after an import.
#[derive(Clone, Debug, Default)]
pub(crate) struct SubtreePack {
    pub(crate) entries: Vec<PackedNode>,
}

/// Compact, order-preserving storage for one rooted hierarchy.
pub(crate) struct HierarchyRecord {
    nodes: SlotMap<NodeEntry>,
    root: Slot,
}

impl core::fmt::Debug for HierarchyRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HierarchyRecord")
            .field("nodes", &self.nodes)
            .field("root", &self.root)
            .finish()
    }
}

impl HierarchyRecord {
    /// Create a record with a fresh `Tree` root entry.
    pub(crate) fn new(root_external: NodeId, user_tag: i32) -> Self {
        let mut nodes = SlotMap::new();
        let root = nodes.insert(NodeEntry::new(
            NodeKind::Tree,
            CombineOp::Additive,
            root_external,
            user_tag,
        ));
        Self { nodes, root }
    }

    pub(crate) fn root(&self) -> Slot {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn contains(&self, slot: Slot) -> bool {
        self.nodes.contains(slot)
    }

    /// Iterate the record's live slots in storage order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = Slot> {
        self.nodes.slots()
    }

    pub(crate) fn entry(&self, slot: Slot) -> Option<&NodeEntry> {
        self.nodes.get(slot)
    }

    pub(crate) fn entry_mut(&mut self, slot: Slot) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(slot)
    }

    /// Append a new entry, optionally attaching it at the end of `parent`'s
    /// child list.
    pub(crate) fn create_node(
        &mut self,
        kind: NodeKind,
        operation: CombineOp,
        external: NodeId,
        user_tag: i32,
        parent: Option<Slot>,
    ) -> Result<Slot, ForestError> {
        if let Some(p) = parent {
            let parent_entry = self.nodes.get(p).ok_or(ForestError::InvalidHandle)?;
            if !parent_entry.kind.can_have_children() {
                return Err(ForestError::BrushParent);
            }
        }
        let slot = self
            .nodes
            .insert(NodeEntry::new(kind, operation, external, user_tag));
        if let Some(p) = parent {
            self.nodes.get_mut(p).expect("parent checked above").children.push(slot);
            self.nodes.get_mut(slot).expect("just inserted").parent = Some(p);
        }
        Ok(slot)
    }

    /// Insert `child` into `parent`'s child list at `at`.
    ///
    /// `child` must currently be detached (no parent in this record); callers
    /// detach first when reparenting.
    pub(crate) fn attach_child(
        &mut self,
        parent: Slot,
        child: Slot,
        at: usize,
    ) -> Result<(), ForestError> {
        if parent == child {
            return Err(ForestError::SelfReference);
        }
        let parent_entry = self.nodes.get(parent).ok_or(ForestError::InvalidHandle)?;
        if !parent_entry.kind.can_have_children() {
            return Err(ForestError::BrushParent);
        }
        if at > parent_entry.children.len() {
            return Err(ForestError::OutOfRange);
        }
        let child_entry = self.nodes.get(child).ok_or(ForestError::InvalidHandle)?;
        if child_entry.parent.is_some() {
            return Err(ForestError::DuplicateChild);
        }
        // Cycle check: the parent must not live inside the child's subtree.
        if self.is_descendant(parent, child) {
            return Err(ForestError::CycleDetected);
        }
        self.nodes
            .get_mut(parent)
            .expect("parent checked above")
            .children
            .insert(at, child);
        self.nodes.get_mut(child).expect("child checked above").parent = Some(parent);
        Ok(())
    }

    /// Remove `child` from `parent`'s child list without deleting it.
    ///
    /// The child stays live as an orphan; the forest decides whether to
    /// reattach, delete, or move it. Returns false when `child` was not a
    /// child of `parent`.
    pub(crate) fn detach_child(&mut self, parent: Slot, child: Slot) -> bool {
        let Some(parent_entry) = self.nodes.get_mut(parent) else {
            return false;
        };
        let Some(pos) = parent_entry.children.iter().position(|c| *c == child) else {
            return false;
        };
        parent_entry.children.remove(pos);
        if let Some(child_entry) = self.nodes.get_mut(child) {
            child_entry.parent = None;
        }
        true
    }

    /// Delete `node` and every descendant, returning the external ids that
    /// were freed so the forest can drop its handle-table bindings.
    pub(crate) fn delete_subtree(&mut self, node: Slot) -> Vec<NodeId> {
        if !self.nodes.contains(node) {
            return Vec::new();
        }
        if let Some(parent) = self.nodes.get(node).and_then(|e| e.parent) {
            self.detach_child(parent, node);
        }
        let mut freed = Vec::new();
        let mut stack = alloc::vec![node];
        while let Some(slot) = stack.pop() {
            if let Some(entry) = self.nodes.remove(slot) {
                freed.push(entry.external);
                stack.extend(entry.children);
            }
        }
        freed
    }

    /// Collect `node` and its descendants in pre-order. Does not mutate.
    pub(crate) fn collect_subtree(&self, node: Slot) -> Vec<Slot> {
        let mut out = Vec::new();
        let mut stack = alloc::vec![node];
        while let Some(slot) = stack.pop() {
            let Some(entry) = self.nodes.get(slot) else {
                continue;
            };
            out.push(slot);
            // Reverse so the work-stack pops children in order.
            stack.extend(entry.children.iter().rev().copied());
        }
        out
    }

    /// Linearize `node` and its descendants in pre-order for a cross-record
    /// move. Does not mutate this record.
    pub(crate) fn export_subtree(&self, node: Slot) -> Option<SubtreePack> {
        if !self.nodes.contains(node) {
            return None;
        }
        let mut pack = SubtreePack::default();
        // (slot, pack index of its parent within the subtree)
        let mut stack = alloc::vec![(node, None::<usize>)];
        while let Some((slot, parent_idx)) = stack.pop() {
            let entry = self.nodes.get(slot).expect("subtree slots are live");
            let my_idx = pack.entries.len();
            pack.entries.push(PackedNode {
                kind: entry.kind,
                operation: entry.operation,
                local_transform: entry.local_transform,
                flags: entry.flags,
                external: entry.external,
                user_tag: entry.user_tag,
                parent: parent_idx,
            });
            for child in entry.children.iter().rev() {
                stack.push((*child, Some(my_idx)));
            }
        }
        Some(pack)
    }

    /// Rebuild a linearized subtree inside this record.
    ///
    /// The pack root is appended at the end of `parent`'s child list, or left
    /// as an orphan when `parent` is `None` (callers then place it with
    /// [`attach_child`](Self::attach_child)). Interior entries are wired to
    /// their new parents as they are appended, so the structure is valid at
    /// every step. External ids are preserved; the returned list maps each of
    /// them to its new slot for handle-table rebinding.
    pub(crate) fn import_subtree(
        &mut self,
        pack: &SubtreePack,
        parent: Option<Slot>,
    ) -> Result<(Slot, Vec<(NodeId, Slot)>), ForestError> {
        let Some(first) = pack.entries.first() else {
            return Err(ForestError::OutOfRange);
        };
        if let Some(p) = parent {
            let parent_entry = self.nodes.get(p).ok_or(ForestError::InvalidHandle)?;
            if !parent_entry.kind.can_have_children() {
                return Err(ForestError::BrushParent);
            }
        }
        debug_assert!(first.parent.is_none(), "pack root must have no parent offset");

        let mut new_slots = Vec::with_capacity(pack.entries.len());
        let mut rebinds = Vec::with_capacity(pack.entries.len());
        for packed in &pack.entries {
            let slot = self.nodes.insert(NodeEntry {
                kind: packed.kind,
                parent: None,
                children: Vec::new(),
                operation: packed.operation,
                local_transform: packed.local_transform,
                flags: packed.flags,
                external: packed.external,
                user_tag: packed.user_tag,
            });
            let new_parent = match packed.parent {
                Some(idx) => Some(new_slots[idx]),
                None => parent,
            };
            if let Some(p) = new_parent {
                self.nodes.get_mut(p).expect("parents precede children").children.push(slot);
                self.nodes.get_mut(slot).expect("just inserted").parent = Some(p);
            }
            new_slots.push(slot);
            rebinds.push((packed.external, slot));
        }
        Ok((new_slots[0], rebinds))
    }

    /// Whether `candidate` lies in `ancestor`'s subtree (inclusive).
    ///
    /// O(depth) upward walk from `candidate`.
    pub(crate) fn is_descendant(&self, candidate: Slot, ancestor: Slot) -> bool {
        let mut cursor = Some(candidate);
        while let Some(slot) = cursor {
            if slot == ancestor {
                return true;
            }
            cursor = self.nodes.get(slot).and_then(|e| e.parent);
        }
        false
    }

    pub(crate) fn sibling_index_of(&self, node: Slot) -> Option<usize> {
        let parent = self.nodes.get(node)?.parent?;
        self.nodes
            .get(parent)?
            .children
            .iter()
            .position(|c| *c == node)
    }

    pub(crate) fn child_count(&self, node: Slot) -> Option<usize> {
        self.nodes.get(node).map(|e| e.children.len())
    }

    /// Mark `node` dirty and flag the path up to the root so the evaluator
    /// knows this hierarchy needs a pass. O(depth).
    pub(crate) fn set_dirty(&mut self, node: Slot) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.flags |= NodeFlags::DIRTY;
        } else {
            return;
        }
        self.propagate_needs_update(node);
    }

    /// Mark every direct child of `node` dirty.
    pub(crate) fn set_children_dirty(&mut self, node: Slot) {
        let Some(children) = self.nodes.get(node).map(|e| e.children.clone()) else {
            return;
        };
        for child in children {
            if let Some(entry) = self.nodes.get_mut(child) {
                entry.flags |= NodeFlags::DIRTY;
            }
        }
        self.propagate_needs_update(node);
    }

    /// Clear all update flags on `node`, typically after the evaluator has
    /// consumed it.
    pub(crate) fn clear_dirty(&mut self, node: Slot) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.flags = NodeFlags::empty();
        }
    }

    /// Set the local transform and eagerly flag `node` and every descendant
    /// as transform-modified.
    ///
    /// The fan-out is eager rather than lazy because downstream consumers
    /// index directly by node and need a precise "re-bake these subtrees"
    /// signal without re-walking ancestry.
    pub(crate) fn set_transform(&mut self, node: Slot, transform: Mat4) -> bool {
        let Some(entry) = self.nodes.get_mut(node) else {
            return false;
        };
        entry.local_transform = transform;
        entry.flags |= NodeFlags::DIRTY;
        for slot in self.collect_subtree(node) {
            if let Some(e) = self.nodes.get_mut(slot) {
                e.flags |= NodeFlags::TRANSFORM_MODIFIED;
            }
        }
        self.propagate_needs_update(node);
        true
    }

    /// Walk from `node` to the root, setting `BRANCH_NEEDS_UPDATE` on branch
    /// ancestors and `TREE_NEEDS_UPDATE` on the tree root.
    fn propagate_needs_update(&mut self, node: Slot) {
        let mut cursor = Some(node);
        while let Some(slot) = cursor {
            let Some(entry) = self.nodes.get_mut(slot) else {
                break;
            };
            match entry.kind {
                NodeKind::Tree => entry.flags |= NodeFlags::TREE_NEEDS_UPDATE,
                NodeKind::Branch if slot != node => {
                    entry.flags |= NodeFlags::BRANCH_NEEDS_UPDATE;
                }
                _ => {}
            }
            cursor = entry.parent;
        }
    }

    /// Full structural self-audit. O(nodes). Failures indicate a bug in this
    /// crate, not a caller error.
    pub(crate) fn check_consistency(&self) -> bool {
        let Some(root_entry) = self.nodes.get(self.root) else {
            return false;
        };
        if root_entry.kind != NodeKind::Tree || root_entry.parent.is_some() {
            return false;
        }
        let limit = self.nodes.len();
        for (slot, entry) in self.nodes.iter() {
            // Only the root is a Tree entry.
            if entry.kind == NodeKind::Tree && slot != self.root {
                return false;
            }
            if !entry.kind.can_have_children() && !entry.children.is_empty() {
                return false;
            }
            // Child links and parent links must mutually agree, and no child
            // may be listed twice.
            for (i, child) in entry.children.iter().enumerate() {
                if entry.children[..i].contains(child) {
                    return false;
                }
                match self.nodes.get(*child) {
                    Some(c) if c.parent == Some(slot) => {}
                    _ => return false,
                }
            }
            if let Some(parent) = entry.parent {
                match self.nodes.get(parent) {
                    Some(p) if p.children.contains(&slot) => {}
                    _ => return false,
                }
            }
            // The parent chain must terminate.
            let mut cursor = entry.parent;
            let mut steps = 0_usize;
            while let Some(up) = cursor {
                steps += 1;
                if steps > limit {
                    return false;
                }
                cursor = self.nodes.get(up).and_then(|e| e.parent);
            }
        }
        true
    }
}
