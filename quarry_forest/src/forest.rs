// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The forest manager: node lifecycle, reparenting, and cross-hierarchy moves.

use alloc::vec::Vec;
use glam::Mat4;
use quarry_slots::{Slot, SlotMap};

use crate::error::ForestError;
use crate::record::HierarchyRecord;
use crate::types::{BrushId, CombineOp, CompactNodeId, HierarchyId, NodeFlags, NodeId, NodeKind};

/// A forest of CSG hierarchies with stable external node handles.
///
/// All structural work goes through this type. Callers hold [`NodeId`]s; the
/// forest resolves them through its handle table to a [`CompactNodeId`] and
/// delegates to the owning hierarchy's compact storage. When a subtree moves
/// between hierarchies the handle table is rebound in the same operation, so
/// the caller's ids keep working and never need to know a move happened.
///
/// The forest is single-writer: structural operations assume exclusive access
/// for their duration. Queries may run concurrently with each other but never
/// with a write. No operation blocks or performs I/O.
///
/// A forest always owns one *default hierarchy*. Nodes created without a
/// parent are allocated there (as orphans, for the caller to reparent), and
/// when a tree root is destroyed its children are reparented under the
/// default hierarchy's root rather than deleted.
pub struct Forest {
    hierarchies: SlotMap<HierarchyRecord>,
    node_table: SlotMap<Option<CompactNodeId>>,
    default_hierarchy: HierarchyId,
}

impl core::fmt::Debug for Forest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Forest")
            .field("hierarchies", &self.hierarchies.len())
            .field("nodes", &self.node_table.len())
            .field("default_hierarchy", &self.default_hierarchy)
            .finish()
    }
}

impl Default for Forest {
    fn default() -> Self {
        Self::new()
    }
}

impl Forest {
    /// Create a forest with its default hierarchy in place.
    pub fn new() -> Self {
        let mut forest = Self {
            hierarchies: SlotMap::new(),
            node_table: SlotMap::new(),
            default_hierarchy: HierarchyId::INVALID,
        };
        let (default_id, _root) = forest.create_tree_record(0);
        forest.default_hierarchy = default_id;
        forest
    }

    /// The hierarchy that adopts parentless creations and orphaned children
    /// of destroyed roots.
    pub fn default_hierarchy(&self) -> HierarchyId {
        self.default_hierarchy
    }

    /// Number of live nodes across all hierarchies.
    pub fn node_count(&self) -> usize {
        self.node_table.len()
    }

    /// Number of live hierarchies, the default one included.
    pub fn hierarchy_count(&self) -> usize {
        self.hierarchies.len()
    }

    // --- lifecycle ---

    /// Create a new hierarchy with a fresh `Tree` root, returning the root's
    /// stable id.
    pub fn create_tree(&mut self, user_tag: i32) -> NodeId {
        let (_, root) = self.create_tree_record(user_tag);
        root
    }

    /// Create a branch, under `parent` when given, otherwise as an orphan in
    /// the default hierarchy for the caller to reparent.
    pub fn create_branch(
        &mut self,
        operation: CombineOp,
        user_tag: i32,
        parent: Option<NodeId>,
    ) -> Result<NodeId, ForestError> {
        self.create_in_place(NodeKind::Branch, operation, Mat4::IDENTITY, user_tag, parent)
    }

    /// Create a brush leaf referencing `brush` in the payload store.
    ///
    /// Placement follows [`create_branch`](Self::create_branch).
    pub fn create_brush(
        &mut self,
        brush: BrushId,
        transform: Mat4,
        operation: CombineOp,
        user_tag: i32,
        parent: Option<NodeId>,
    ) -> Result<NodeId, ForestError> {
        self.create_in_place(NodeKind::Brush(brush), operation, transform, user_tag, parent)
    }

    /// Destroy a node.
    ///
    /// Destroying a hierarchy's root reparents its children (in order) under
    /// the default hierarchy's root, migrates any detached orphans to the
    /// default hierarchy, and disposes the now-empty hierarchy; root
    /// destruction never silently deletes other nodes. Destroying any other
    /// node deletes it and its entire subtree, invalidating every
    /// descendant's id.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), ForestError> {
        let compact = self.resolve(node)?;
        let record = self.record(compact.hierarchy)?;
        if compact.slot == record.root() {
            self.destroy_root(node, compact)
        } else {
            let old_parent = record
                .entry(compact.slot)
                .expect("resolved slot is live")
                .parent;
            let freed = self
                .record_mut(compact.hierarchy)?
                .delete_subtree(compact.slot);
            for external in freed {
                self.node_table.remove(external.0);
            }
            let record = self.record_mut(compact.hierarchy)?;
            match old_parent {
                Some(p) => record.set_dirty(p),
                None => {
                    let root = record.root();
                    record.set_dirty(root);
                }
            }
            Ok(())
        }
    }

    // --- reparenting ---

    /// Append `child` to `parent`'s child list, reparenting it from wherever
    /// it currently lives (possibly another hierarchy).
    ///
    /// When `child` is already the last child of `parent` this is a success
    /// no-op. Cross-hierarchy moves deep-copy the child's subtree into the
    /// parent's hierarchy and rebind every moved id before deleting the
    /// source copy, so caller-held ids inside the subtree stay valid.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ForestError> {
        let (pc, cc) = self.validate_attach(parent, child)?;
        if pc.hierarchy == cc.hierarchy {
            let record = self.record(pc.hierarchy)?;
            let child_entry = record.entry(cc.slot).expect("resolved slot is live");
            let old_parent = child_entry.parent;
            if old_parent == Some(pc.slot)
                && record.entry(pc.slot).expect("resolved slot is live").children.last()
                    == Some(&cc.slot)
            {
                return Ok(());
            }
            if record.is_descendant(pc.slot, cc.slot) {
                return Err(ForestError::CycleDetected);
            }
            let record = self.record_mut(pc.hierarchy)?;
            if let Some(op) = old_parent {
                record.detach_child(op, cc.slot);
            }
            let end = record.child_count(pc.slot).expect("resolved slot is live");
            record.attach_child(pc.slot, cc.slot, end)?;
            if let Some(op) = old_parent {
                record.set_dirty(op);
            }
            record.set_dirty(pc.slot);
            Ok(())
        } else {
            self.move_subtree(cc, pc.hierarchy, Some(pc.slot), None)
                .map(|_| ())
        }
    }

    /// Insert `child` into `parent`'s child list at `index`.
    ///
    /// Unlike [`add_child`](Self::add_child), a child already attached to
    /// `parent` is rejected as [`ForestError::DuplicateChild`].
    pub fn insert_child_at(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), ForestError> {
        self.insert_children(parent, index, &[child])
    }

    /// Insert `children` into `parent`'s child list starting at `index`.
    ///
    /// The entire batch is validated before anything mutates; a rejected
    /// batch leaves every hierarchy unchanged.
    pub fn insert_children(
        &mut self,
        parent: NodeId,
        index: usize,
        children: &[NodeId],
    ) -> Result<(), ForestError> {
        let pc = self.resolve(parent)?;
        {
            let record = self.record(pc.hierarchy)?;
            let parent_entry = record.entry(pc.slot).expect("resolved slot is live");
            if !parent_entry.kind.can_have_children() {
                return Err(ForestError::BrushParent);
            }
            if index > parent_entry.children.len() {
                return Err(ForestError::OutOfRange);
            }
        }
        for (i, &child) in children.iter().enumerate() {
            if child == parent {
                return Err(ForestError::SelfReference);
            }
            if children[..i].contains(&child) {
                return Err(ForestError::DuplicateChild);
            }
            let cc = self.resolve(child)?;
            if cc.slot == self.record(cc.hierarchy)?.root() {
                return Err(ForestError::TreeAsChild);
            }
            if cc.hierarchy == pc.hierarchy {
                let record = self.record(pc.hierarchy)?;
                if record.entry(cc.slot).expect("resolved slot is live").parent == Some(pc.slot) {
                    return Err(ForestError::DuplicateChild);
                }
                if record.is_descendant(pc.slot, cc.slot) {
                    return Err(ForestError::CycleDetected);
                }
            }
        }

        let mut at = index;
        for &child in children {
            let cc = self.resolve(child)?;
            if cc.hierarchy == pc.hierarchy {
                let record = self.record_mut(pc.hierarchy)?;
                let old_parent = record.entry(cc.slot).expect("resolved slot is live").parent;
                if let Some(op) = old_parent {
                    record.detach_child(op, cc.slot);
                    record.set_dirty(op);
                }
                record
                    .attach_child(pc.slot, cc.slot, at)
                    .expect("batch was validated");
            } else {
                self.move_subtree(cc, pc.hierarchy, Some(pc.slot), Some(at))?;
            }
            at += 1;
        }
        self.record_mut(pc.hierarchy)?.set_dirty(pc.slot);
        Ok(())
    }

    /// Replace `parent`'s entire child list with `children`, atomically.
    ///
    /// Current children not in the new list are detached (they stay live as
    /// orphans); listed children are attached in the given order, moved
    /// across hierarchies where needed. Validation happens before any
    /// mutation.
    pub fn set_children(
        &mut self,
        parent: NodeId,
        children: &[NodeId],
    ) -> Result<(), ForestError> {
        let pc = self.resolve(parent)?;
        if !self
            .record(pc.hierarchy)?
            .entry(pc.slot)
            .expect("resolved slot is live")
            .kind
            .can_have_children()
        {
            return Err(ForestError::BrushParent);
        }
        for (i, &child) in children.iter().enumerate() {
            if child == parent {
                return Err(ForestError::SelfReference);
            }
            if children[..i].contains(&child) {
                return Err(ForestError::DuplicateChild);
            }
            let cc = self.resolve(child)?;
            if cc.slot == self.record(cc.hierarchy)?.root() {
                return Err(ForestError::TreeAsChild);
            }
            if cc.hierarchy == pc.hierarchy
                && self.record(pc.hierarchy)?.is_descendant(pc.slot, cc.slot)
            {
                return Err(ForestError::CycleDetected);
            }
        }

        // Detach all current children first so the new order is exact.
        let record = self.record_mut(pc.hierarchy)?;
        let old_children = record
            .entry(pc.slot)
            .expect("resolved slot is live")
            .children
            .clone();
        for child in old_children {
            record.detach_child(pc.slot, child);
        }
        for &child in children {
            let cc = self.resolve(child)?;
            if cc.hierarchy == pc.hierarchy {
                let record = self.record_mut(pc.hierarchy)?;
                let old_parent = record.entry(cc.slot).expect("resolved slot is live").parent;
                if let Some(op) = old_parent {
                    record.detach_child(op, cc.slot);
                    record.set_dirty(op);
                }
                let end = record.child_count(pc.slot).expect("resolved slot is live");
                record
                    .attach_child(pc.slot, cc.slot, end)
                    .expect("batch was validated");
            } else {
                self.move_subtree(cc, pc.hierarchy, Some(pc.slot), None)?;
            }
        }
        self.record_mut(pc.hierarchy)?.set_dirty(pc.slot);
        Ok(())
    }

    /// Detach `child` from `parent` without deleting it.
    ///
    /// The child stays live as an orphan in its hierarchy until the caller
    /// destroys or reattaches it.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ForestError> {
        let pc = self.resolve(parent)?;
        let cc = self.resolve(child)?;
        if pc.hierarchy != cc.hierarchy {
            return Err(ForestError::NotAChild);
        }
        let record = self.record_mut(pc.hierarchy)?;
        if !record.detach_child(pc.slot, cc.slot) {
            return Err(ForestError::NotAChild);
        }
        record.set_dirty(pc.slot);
        Ok(())
    }

    /// Detach the child at `index`, returning its id.
    pub fn remove_child_at(
        &mut self,
        parent: NodeId,
        index: usize,
    ) -> Result<NodeId, ForestError> {
        let pc = self.resolve(parent)?;
        let record = self.record_mut(pc.hierarchy)?;
        let children = &record.entry(pc.slot).expect("resolved slot is live").children;
        let Some(&child_slot) = children.get(index) else {
            return Err(ForestError::OutOfRange);
        };
        let child = record
            .entry(child_slot)
            .expect("child links are live")
            .external;
        record.detach_child(pc.slot, child_slot);
        record.set_dirty(pc.slot);
        Ok(child)
    }

    /// Detach `count` children starting at `index`.
    pub fn remove_child_range(
        &mut self,
        parent: NodeId,
        index: usize,
        count: usize,
    ) -> Result<(), ForestError> {
        let pc = self.resolve(parent)?;
        let record = self.record_mut(pc.hierarchy)?;
        let children = &record.entry(pc.slot).expect("resolved slot is live").children;
        if index.checked_add(count).is_none_or(|end| end > children.len()) {
            return Err(ForestError::OutOfRange);
        }
        let doomed: Vec<Slot> = children[index..index + count].to_vec();
        for slot in doomed {
            record.detach_child(pc.slot, slot);
        }
        if count > 0 {
            record.set_dirty(pc.slot);
        }
        Ok(())
    }

    /// Detach every child of `parent`.
    pub fn clear_children(&mut self, parent: NodeId) -> Result<(), ForestError> {
        let pc = self.resolve(parent)?;
        let count = self
            .record(pc.hierarchy)?
            .child_count(pc.slot)
            .expect("resolved slot is live");
        self.remove_child_range(parent, 0, count)
    }

    /// Relocate `node` into `destination`'s storage without giving it a new
    /// logical parent: the moved subtree is appended under the destination
    /// root. Used when merging or splitting hierarchies.
    ///
    /// With `recursive` false only the named node moves; its children stay in
    /// the source hierarchy, spliced into the node's old position (or under
    /// the source root when the node was an orphan).
    ///
    /// Returns the node's new compact location. Ids held by callers remain
    /// valid either way.
    pub fn move_to_hierarchy(
        &mut self,
        node: NodeId,
        destination: HierarchyId,
        recursive: bool,
    ) -> Result<CompactNodeId, ForestError> {
        let cc = self.resolve(node)?;
        let dest_root = self.record(destination)?.root();
        if cc.slot == self.record(cc.hierarchy)?.root() {
            return Err(ForestError::TreeAsChild);
        }
        if cc.hierarchy == destination {
            return Ok(cc);
        }
        if !recursive {
            self.hoist_children(cc)?;
        }
        let new_slot = self.move_subtree(cc, destination, Some(dest_root), None)?;
        Ok(CompactNodeId {
            hierarchy: destination,
            slot: new_slot,
        })
    }

    // --- queries and per-node state ---

    /// Resolve a stable id to its current compact location.
    ///
    /// The result is invalidated by any structural operation; re-resolve
    /// rather than caching it.
    pub fn resolve(&self, node: NodeId) -> Result<CompactNodeId, ForestError> {
        let bound = self
            .node_table
            .get(node.0)
            .ok_or(ForestError::InvalidHandle)?;
        let compact = bound.ok_or(ForestError::InvalidHandle)?;
        let record = self
            .hierarchies
            .get(compact.hierarchy.0)
            .ok_or(ForestError::InvalidHandle)?;
        match record.entry(compact.slot) {
            Some(entry) if entry.external == node => Ok(compact),
            _ => Err(ForestError::InvalidHandle),
        }
    }

    /// Whether `node` still refers to a live node.
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.resolve(node).is_ok()
    }

    /// The hierarchy currently holding `node`.
    pub fn hierarchy_of(&self, node: NodeId) -> Result<HierarchyId, ForestError> {
        Ok(self.resolve(node)?.hierarchy)
    }

    /// The root node id of `hierarchy`.
    pub fn root_of(&self, hierarchy: HierarchyId) -> Result<NodeId, ForestError> {
        let record = self.record(hierarchy)?;
        Ok(record
            .entry(record.root())
            .expect("records always have a live root")
            .external)
    }

    /// The node's parent, or `None` for hierarchy roots and orphans.
    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, ForestError> {
        let cc = self.resolve(node)?;
        let record = self.record(cc.hierarchy)?;
        let entry = record.entry(cc.slot).expect("resolved slot is live");
        Ok(entry
            .parent
            .map(|p| record.entry(p).expect("parent links are live").external))
    }

    /// The node's children, in order.
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, ForestError> {
        let cc = self.resolve(node)?;
        let record = self.record(cc.hierarchy)?;
        let entry = record.entry(cc.slot).expect("resolved slot is live");
        Ok(entry
            .children
            .iter()
            .map(|c| record.entry(*c).expect("child links are live").external)
            .collect())
    }

    /// Number of children of `node`. Brushes always report zero.
    pub fn child_count(&self, node: NodeId) -> Result<usize, ForestError> {
        let cc = self.resolve(node)?;
        Ok(self
            .record(cc.hierarchy)?
            .child_count(cc.slot)
            .expect("resolved slot is live"))
    }

    /// The child of `node` at `index`.
    pub fn child_at(&self, node: NodeId, index: usize) -> Result<NodeId, ForestError> {
        let cc = self.resolve(node)?;
        let record = self.record(cc.hierarchy)?;
        let entry = record.entry(cc.slot).expect("resolved slot is live");
        let slot = entry.children.get(index).ok_or(ForestError::OutOfRange)?;
        Ok(record.entry(*slot).expect("child links are live").external)
    }

    /// The node's position within its parent's child list, or `None` for
    /// roots and orphans.
    pub fn sibling_index(&self, node: NodeId) -> Result<Option<usize>, ForestError> {
        let cc = self.resolve(node)?;
        Ok(self.record(cc.hierarchy)?.sibling_index_of(cc.slot))
    }

    /// What the node is.
    pub fn kind(&self, node: NodeId) -> Result<NodeKind, ForestError> {
        self.with_entry(node, |e| e.kind)
    }

    /// The node's combine operation.
    pub fn operation(&self, node: NodeId) -> Result<CombineOp, ForestError> {
        self.with_entry(node, |e| e.operation)
    }

    /// Change the node's combine operation, marking it dirty.
    pub fn set_operation(
        &mut self,
        node: NodeId,
        operation: CombineOp,
    ) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        let record = self.record_mut(cc.hierarchy)?;
        record.entry_mut(cc.slot).expect("resolved slot is live").operation = operation;
        record.set_dirty(cc.slot);
        Ok(())
    }

    /// The caller-provided tag stored on the node.
    pub fn user_tag(&self, node: NodeId) -> Result<i32, ForestError> {
        self.with_entry(node, |e| e.user_tag)
    }

    /// Replace the caller-provided tag. Does not mark the node dirty.
    pub fn set_user_tag(&mut self, node: NodeId, user_tag: i32) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        self.record_mut(cc.hierarchy)?
            .entry_mut(cc.slot)
            .expect("resolved slot is live")
            .user_tag = user_tag;
        Ok(())
    }

    /// The node's local transform.
    pub fn transform(&self, node: NodeId) -> Result<Mat4, ForestError> {
        self.with_entry(node, |e| e.local_transform)
    }

    /// Replace the node's local transform.
    ///
    /// Eagerly marks the node and every descendant transform-modified (their
    /// cached node-to-root transforms are stale) and flags the hierarchy
    /// root as needing an update.
    pub fn set_transform(&mut self, node: NodeId, transform: Mat4) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        self.record_mut(cc.hierarchy)?.set_transform(cc.slot, transform);
        Ok(())
    }

    /// The node's raw update flags.
    pub fn flags(&self, node: NodeId) -> Result<NodeFlags, ForestError> {
        self.with_entry(node, |e| e.flags)
    }

    /// Whether the node is flagged dirty.
    pub fn is_dirty(&self, node: NodeId) -> Result<bool, ForestError> {
        self.with_entry(node, |e| e.flags.contains(NodeFlags::DIRTY))
    }

    /// Mark the node dirty, flagging its hierarchy root for re-evaluation.
    pub fn set_dirty(&mut self, node: NodeId) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        self.record_mut(cc.hierarchy)?.set_dirty(cc.slot);
        Ok(())
    }

    /// Mark every direct child of the node dirty.
    pub fn set_children_dirty(&mut self, node: NodeId) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        self.record_mut(cc.hierarchy)?.set_children_dirty(cc.slot);
        Ok(())
    }

    /// Clear the node's update flags, typically after the evaluator has
    /// consumed its hierarchy.
    pub fn clear_dirty(&mut self, node: NodeId) -> Result<(), ForestError> {
        let cc = self.resolve(node)?;
        self.record_mut(cc.hierarchy)?.clear_dirty(cc.slot);
        Ok(())
    }

    /// Full self-audit: parent/child links mutually agree in every record,
    /// every binding in the handle table resolves to an entry carrying that
    /// id, and no parent chain cycles. O(total nodes).
    ///
    /// A failure indicates a bug in this crate, not a caller error.
    pub fn check_consistency(&self) -> bool {
        let mut entries_seen = 0_usize;
        for (slot, record) in self.hierarchies.iter() {
            if !record.check_consistency() {
                return false;
            }
            let hierarchy = HierarchyId(slot);
            entries_seen += record.len();
            for node_slot in record.slots() {
                let external = record
                    .entry(node_slot)
                    .expect("iterated slots are live")
                    .external;
                match self.node_table.get(external.0) {
                    Some(Some(compact))
                        if compact.hierarchy == hierarchy && compact.slot == node_slot => {}
                    _ => return false,
                }
            }
        }
        // Every live binding must point at an entry, and we just saw every
        // entry point back; equal counts close the loop.
        self.node_table.len() == entries_seen
            && self
                .node_table
                .iter()
                .all(|(_, bound)| bound.is_some())
    }

    // --- internals ---

    fn create_tree_record(&mut self, user_tag: i32) -> (HierarchyId, NodeId) {
        let node = NodeId(self.node_table.insert(None));
        let record = HierarchyRecord::new(node, user_tag);
        let root_slot = record.root();
        let hierarchy = HierarchyId(self.hierarchies.insert(record));
        *self
            .node_table
            .get_mut(node.0)
            .expect("just inserted") = Some(CompactNodeId {
            hierarchy,
            slot: root_slot,
        });
        let record = self
            .hierarchies
            .get_mut(hierarchy.0)
            .expect("just inserted");
        record.set_dirty(root_slot);
        (hierarchy, node)
    }

    fn create_in_place(
        &mut self,
        kind: NodeKind,
        operation: CombineOp,
        transform: Mat4,
        user_tag: i32,
        parent: Option<NodeId>,
    ) -> Result<NodeId, ForestError> {
        let (hierarchy, parent_slot) = match parent {
            Some(p) => {
                let pc = self.resolve(p)?;
                (pc.hierarchy, Some(pc.slot))
            }
            None => (self.default_hierarchy, None),
        };
        let node = NodeId(self.node_table.insert(None));
        let record = self
            .hierarchies
            .get_mut(hierarchy.0)
            .expect("hierarchy was just resolved");
        let slot = match record.create_node(kind, operation, node, user_tag, parent_slot) {
            Ok(slot) => slot,
            Err(e) => {
                self.node_table.remove(node.0);
                return Err(e);
            }
        };
        record.entry_mut(slot).expect("just created").local_transform = transform;
        record.set_dirty(slot);
        *self.node_table.get_mut(node.0).expect("just inserted") =
            Some(CompactNodeId { hierarchy, slot });
        Ok(node)
    }

    fn record(&self, hierarchy: HierarchyId) -> Result<&HierarchyRecord, ForestError> {
        self.hierarchies
            .get(hierarchy.0)
            .ok_or(ForestError::InvalidHandle)
    }

    fn record_mut(&mut self, hierarchy: HierarchyId) -> Result<&mut HierarchyRecord, ForestError> {
        self.hierarchies
            .get_mut(hierarchy.0)
            .ok_or(ForestError::InvalidHandle)
    }

    /// Shared validation for attach-style operations: both handles resolve,
    /// the child is not the parent, not a hierarchy root, and the parent can
    /// hold children.
    fn validate_attach(
        &self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(CompactNodeId, CompactNodeId), ForestError> {
        if parent == child {
            return Err(ForestError::SelfReference);
        }
        let pc = self.resolve(parent)?;
        let cc = self.resolve(child)?;
        if cc.slot == self.record(cc.hierarchy)?.root() {
            return Err(ForestError::TreeAsChild);
        }
        if !self
            .record(pc.hierarchy)?
            .entry(pc.slot)
            .expect("resolved slot is live")
            .kind
            .can_have_children()
        {
            return Err(ForestError::BrushParent);
        }
        Ok((pc, cc))
    }

    /// Move the subtree at `source` into `dest_hierarchy`.
    ///
    /// The destination copy is built fully (each entry wired to its new
    /// parent before its children are appended) and the handle table rebound
    /// before the source copy is deleted in a single pass, so a failure on
    /// the destination side leaves the source intact and no caller ever
    /// observes a half-moved subtree.
    fn move_subtree(
        &mut self,
        source: CompactNodeId,
        dest_hierarchy: HierarchyId,
        new_parent: Option<Slot>,
        at: Option<usize>,
    ) -> Result<Slot, ForestError> {
        let old_parent = self
            .record(source.hierarchy)?
            .entry(source.slot)
            .ok_or(ForestError::InvalidHandle)?
            .parent;
        let pack = self
            .record(source.hierarchy)?
            .export_subtree(source.slot)
            .ok_or(ForestError::InvalidHandle)?;

        let (new_slot, rebinds) = match at {
            None => self
                .record_mut(dest_hierarchy)?
                .import_subtree(&pack, new_parent)?,
            Some(index) => {
                // Import as an orphan, then place at the exact index; on a
                // bad index the orphan copy is discarded and the source is
                // untouched.
                let (slot, rebinds) = self
                    .record_mut(dest_hierarchy)?
                    .import_subtree(&pack, None)?;
                if let Some(p) = new_parent {
                    if let Err(e) = self.record_mut(dest_hierarchy)?.attach_child(p, slot, index) {
                        let _ = self.record_mut(dest_hierarchy)?.delete_subtree(slot);
                        return Err(e);
                    }
                }
                (slot, rebinds)
            }
        };

        for (external, slot) in rebinds {
            if let Some(bound) = self.node_table.get_mut(external.0) {
                *bound = Some(CompactNodeId {
                    hierarchy: dest_hierarchy,
                    slot,
                });
            }
        }
        // Single-pass delete of the source copy; externals stay bound to the
        // destination.
        let _ = self
            .record_mut(source.hierarchy)?
            .delete_subtree(source.slot);

        let source_record = self.record_mut(source.hierarchy)?;
        match old_parent {
            Some(p) => source_record.set_dirty(p),
            None => {
                let root = source_record.root();
                source_record.set_dirty(root);
            }
        }
        if let Some(p) = new_parent {
            self.record_mut(dest_hierarchy)?.set_dirty(p);
        }
        Ok(new_slot)
    }

    /// For a non-recursive hierarchy move: splice `node`'s children into its
    /// old position (or under the source root for orphans) so only the node
    /// itself travels.
    fn hoist_children(&mut self, node: CompactNodeId) -> Result<(), ForestError> {
        let record = self.record_mut(node.hierarchy)?;
        let entry = record.entry(node.slot).ok_or(ForestError::InvalidHandle)?;
        let old_parent = entry.parent;
        let children = entry.children.clone();
        if children.is_empty() {
            return Ok(());
        }
        let target = old_parent.unwrap_or_else(|| record.root());
        let mut at = record
            .sibling_index_of(node.slot)
            .unwrap_or_else(|| record.child_count(target).expect("root is live"));
        if let Some(op) = old_parent {
            record.detach_child(op, node.slot);
        }
        for child in children {
            record.detach_child(node.slot, child);
            record.attach_child(target, child, at)?;
            at += 1;
        }
        record.set_dirty(target);
        Ok(())
    }

    /// Destroy a hierarchy root: its children move (in order) under the
    /// default root, detached orphans move to the default hierarchy as
    /// orphans, then the emptied hierarchy is disposed.
    fn destroy_root(&mut self, node: NodeId, compact: CompactNodeId) -> Result<(), ForestError> {
        if compact.hierarchy == self.default_hierarchy {
            return Err(ForestError::DefaultHierarchy);
        }
        let children = self
            .record(compact.hierarchy)?
            .entry(compact.slot)
            .expect("resolved slot is live")
            .children
            .clone();
        // Detached orphans in the doomed record stay alive too; their ids are
        // only freed by destroying them directly.
        let record = self.record(compact.hierarchy)?;
        let orphans: Vec<Slot> = record
            .slots()
            .filter(|&slot| {
                slot != compact.slot
                    && record
                        .entry(slot)
                        .expect("iterated slots are live")
                        .parent
                        .is_none()
            })
            .collect();
        let default_hierarchy = self.default_hierarchy;
        let default_root = self.record(default_hierarchy)?.root();
        for child in children {
            self.relocate_into_default(compact.hierarchy, child, Some(default_root))?;
        }
        for orphan in orphans {
            self.relocate_into_default(compact.hierarchy, orphan, None)?;
        }
        // The source copies go down with the record as a whole.
        self.hierarchies.remove(compact.hierarchy.0);
        self.node_table.remove(node.0);
        self.record_mut(default_hierarchy)?.set_dirty(default_root);
        Ok(())
    }

    /// Copy one subtree of a record being destroyed into the default
    /// hierarchy and rebind its ids. The source copy is not deleted; the
    /// caller disposes the whole record afterwards.
    fn relocate_into_default(
        &mut self,
        source: HierarchyId,
        subtree: Slot,
        parent: Option<Slot>,
    ) -> Result<(), ForestError> {
        let pack = self
            .record(source)?
            .export_subtree(subtree)
            .expect("subtree slots are live");
        let default_hierarchy = self.default_hierarchy;
        let (_, rebinds) = self
            .record_mut(default_hierarchy)?
            .import_subtree(&pack, parent)?;
        for (external, slot) in rebinds {
            if let Some(bound) = self.node_table.get_mut(external.0) {
                *bound = Some(CompactNodeId {
                    hierarchy: default_hierarchy,
                    slot,
                });
            }
        }
        Ok(())
    }

    fn with_entry<T>(
        &self,
        node: NodeId,
        f: impl FnOnce(&crate::record::NodeEntry) -> T,
    ) -> Result<T, ForestError> {
        let cc = self.resolve(node)?;
        Ok(f(self
            .record(cc.hierarchy)?
            .entry(cc.slot)
            .expect("resolved slot is live")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use glam::Vec3;

    fn tree_with_branch_and_brush(forest: &mut Forest) -> (NodeId, NodeId, NodeId) {
        let tree = forest.create_tree(1);
        let branch = forest
            .create_branch(CombineOp::Subtractive, 2, Some(tree))
            .unwrap();
        let brush = forest
            .create_brush(
                BrushId(7),
                Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)),
                CombineOp::Additive,
                3,
                Some(branch),
            )
            .unwrap();
        (tree, branch, brush)
    }

    #[test]
    fn create_and_query() {
        let mut forest = Forest::new();
        let (tree, branch, brush) = tree_with_branch_and_brush(&mut forest);

        assert_eq!(forest.kind(tree).unwrap(), NodeKind::Tree);
        assert_eq!(forest.kind(branch).unwrap(), NodeKind::Branch);
        assert_eq!(forest.kind(brush).unwrap(), NodeKind::Brush(BrushId(7)));
        assert_eq!(forest.operation(branch).unwrap(), CombineOp::Subtractive);
        assert_eq!(forest.user_tag(brush).unwrap(), 3);
        assert_eq!(forest.parent(tree).unwrap(), None);
        assert_eq!(forest.parent(branch).unwrap(), Some(tree));
        assert_eq!(forest.parent(brush).unwrap(), Some(branch));
        assert_eq!(forest.children(tree).unwrap(), vec![branch]);
        assert_eq!(forest.child_count(brush).unwrap(), 0);
        assert_eq!(forest.sibling_index(branch).unwrap(), Some(0));
        assert!(forest.check_consistency());
    }

    #[test]
    fn parentless_creations_live_in_default_hierarchy_as_orphans() {
        let mut forest = Forest::new();
        let branch = forest.create_branch(CombineOp::Additive, 0, None).unwrap();
        assert_eq!(
            forest.hierarchy_of(branch).unwrap(),
            forest.default_hierarchy()
        );
        assert_eq!(forest.parent(branch).unwrap(), None);
        assert!(forest.check_consistency());
    }

    #[test]
    fn brush_cannot_parent() {
        let mut forest = Forest::new();
        let (_, _, brush) = tree_with_branch_and_brush(&mut forest);
        assert_eq!(
            forest.create_branch(CombineOp::Additive, 0, Some(brush)),
            Err(ForestError::BrushParent)
        );
        let orphan = forest.create_branch(CombineOp::Additive, 0, None).unwrap();
        assert_eq!(
            forest.add_child(brush, orphan),
            Err(ForestError::BrushParent)
        );
        assert!(forest.check_consistency());
    }

    #[test]
    fn generation_safety_after_destroy() {
        let mut forest = Forest::new();
        let (tree, _branch, brush) = tree_with_branch_and_brush(&mut forest);

        forest.destroy_node(brush).unwrap();
        assert_eq!(forest.resolve(brush), Err(ForestError::InvalidHandle));
        assert_eq!(forest.parent(brush), Err(ForestError::InvalidHandle));
        assert_eq!(forest.destroy_node(brush), Err(ForestError::InvalidHandle));

        // Force slot reuse; the stale id must stay stale.
        let replacement = forest
            .create_brush(BrushId(8), Mat4::IDENTITY, CombineOp::Additive, 0, Some(tree))
            .unwrap();
        assert!(forest.is_alive(replacement));
        assert_eq!(forest.resolve(brush), Err(ForestError::InvalidHandle));
        assert!(forest.check_consistency());
    }

    #[test]
    fn destroy_subtree_invalidates_descendants() {
        // Mirrors the editor lifetime behavior: destroying an operation node
        // takes its whole subtree with it.
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let o1 = forest
            .create_branch(CombineOp::Additive, 0, Some(tree))
            .unwrap();
        let o2 = forest
            .create_branch(CombineOp::Subtractive, 0, Some(o1))
            .unwrap();
        let brush = forest
            .create_brush(BrushId(1), Mat4::IDENTITY, CombineOp::Additive, 0, Some(o2))
            .unwrap();
        assert_eq!(forest.node_count(), 5, "default root + 4 created nodes");

        forest.destroy_node(o2).unwrap();
        assert!(forest.is_alive(o1));
        assert_eq!(forest.child_count(o1).unwrap(), 0);
        assert!(!forest.is_alive(o2));
        assert!(!forest.is_alive(brush));
        assert!(forest.is_dirty(o1).unwrap(), "old parent is marked dirty");
        assert!(forest.check_consistency());
    }

    #[test]
    fn tree_and_brush_entry_counts() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let brush = forest
            .create_brush(BrushId(3), Mat4::IDENTITY, CombineOp::Additive, 0, Some(tree))
            .unwrap();
        let hierarchy = forest.hierarchy_of(tree).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![brush]);

        forest.destroy_node(brush).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![]);
        assert_eq!(forest.hierarchy_of(tree).unwrap(), hierarchy);
        assert!(!forest.is_alive(brush));
        assert!(forest.check_consistency());
    }

    #[test]
    fn add_child_same_hierarchy_reorders_to_end() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let b = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![a, b]);

        // Already-last append is a success no-op.
        forest.add_child(tree, b).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![a, b]);

        // Appending a non-last child moves it to the end.
        forest.add_child(tree, a).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![b, a]);
        assert!(forest.check_consistency());
    }

    #[test]
    fn cycle_prevention_leaves_state_unchanged() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let b = forest.create_branch(CombineOp::Additive, 0, Some(a)).unwrap();

        let before_a = forest.children(a).unwrap();
        let before_b = forest.children(b).unwrap();
        assert_eq!(forest.add_child(b, a), Err(ForestError::CycleDetected));
        assert_eq!(forest.add_child(a, a), Err(ForestError::SelfReference));
        assert_eq!(forest.children(a).unwrap(), before_a);
        assert_eq!(forest.children(b).unwrap(), before_b);
        assert_eq!(forest.parent(a).unwrap(), Some(tree));
        assert!(forest.check_consistency());
    }

    #[test]
    fn tree_root_cannot_become_a_child() {
        let mut forest = Forest::new();
        let t1 = forest.create_tree(0);
        let t2 = forest.create_tree(0);
        let branch = forest.create_branch(CombineOp::Additive, 0, Some(t1)).unwrap();
        assert_eq!(forest.add_child(branch, t2), Err(ForestError::TreeAsChild));
        assert_eq!(
            forest.insert_child_at(branch, 0, t2),
            Err(ForestError::TreeAsChild)
        );
        assert!(forest.check_consistency());
    }

    #[test]
    fn handle_stability_under_cross_hierarchy_move() {
        let mut forest = Forest::new();
        let (_t1, branch, brush) = tree_with_branch_and_brush(&mut forest);
        let t2 = forest.create_tree(0);

        let brush_transform = forest.transform(brush).unwrap();
        let brush_tag = forest.user_tag(brush).unwrap();
        forest.set_dirty(brush).unwrap();
        let was_dirty = forest.is_dirty(brush).unwrap();
        let old_compact = forest.resolve(brush).unwrap();

        forest.add_child(t2, branch).unwrap();

        // Externally observable identity and state survive the move.
        assert!(forest.is_alive(branch));
        assert!(forest.is_alive(brush));
        assert_eq!(forest.parent(brush).unwrap(), Some(branch));
        assert_eq!(forest.parent(branch).unwrap(), Some(t2));
        assert_eq!(forest.transform(brush).unwrap(), brush_transform);
        assert_eq!(forest.user_tag(brush).unwrap(), brush_tag);
        assert_eq!(forest.is_dirty(brush).unwrap(), was_dirty);
        assert_eq!(forest.operation(branch).unwrap(), CombineOp::Subtractive);

        // The compact location did change hierarchies.
        let new_compact = forest.resolve(brush).unwrap();
        assert_eq!(new_compact.hierarchy, forest.hierarchy_of(t2).unwrap());
        assert_ne!(old_compact.hierarchy, new_compact.hierarchy);
        assert!(forest.check_consistency());
    }

    #[test]
    fn cross_hierarchy_move_marks_both_roots() {
        let mut forest = Forest::new();
        let (t1, branch, _brush) = tree_with_branch_and_brush(&mut forest);
        let t2 = forest.create_tree(0);
        forest.clear_dirty(t1).unwrap();
        forest.clear_dirty(t2).unwrap();

        forest.add_child(t2, branch).unwrap();
        assert!(forest
            .flags(t1)
            .unwrap()
            .intersects(NodeFlags::DIRTY | NodeFlags::TREE_NEEDS_UPDATE));
        assert!(forest
            .flags(t2)
            .unwrap()
            .intersects(NodeFlags::DIRTY | NodeFlags::TREE_NEEDS_UPDATE));
    }

    #[test]
    fn set_children_preserves_exact_order() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let c1 = forest.create_branch(CombineOp::Additive, 0, None).unwrap();
        let c2 = forest.create_branch(CombineOp::Additive, 0, None).unwrap();
        let c3 = forest.create_branch(CombineOp::Additive, 0, None).unwrap();

        forest.set_children(tree, &[c1, c2, c3]).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![c1, c2, c3]);

        // Reorder through a second replace.
        forest.set_children(tree, &[c3, c1]).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![c3, c1]);
        // c2 is a live orphan now.
        assert!(forest.is_alive(c2));
        assert_eq!(forest.parent(c2).unwrap(), None);
        assert!(forest.check_consistency());
    }

    #[test]
    fn insert_children_batch_is_all_or_nothing() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let ok = forest.create_branch(CombineOp::Additive, 0, None).unwrap();

        // One bad member (duplicate in the batch) rejects the whole batch.
        assert_eq!(
            forest.insert_children(tree, 0, &[ok, ok]),
            Err(ForestError::DuplicateChild)
        );
        assert_eq!(forest.children(tree).unwrap(), vec![a]);
        assert_eq!(forest.parent(ok).unwrap(), None);

        // Already a child of the target parent: rejected for the indexed form.
        assert_eq!(
            forest.insert_children(tree, 0, &[ok, a]),
            Err(ForestError::DuplicateChild)
        );
        assert_eq!(forest.children(tree).unwrap(), vec![a]);

        // Out-of-range index is validated up front.
        assert_eq!(
            forest.insert_children(tree, 5, &[ok]),
            Err(ForestError::OutOfRange)
        );

        forest.insert_children(tree, 0, &[ok]).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![ok, a]);
        assert!(forest.check_consistency());
    }

    #[test]
    fn insert_children_splices_at_index_across_hierarchies() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let b = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();

        let other = forest.create_tree(0);
        let x = forest.create_branch(CombineOp::Additive, 0, Some(other)).unwrap();
        let y = forest
            .create_brush(BrushId(2), Mat4::IDENTITY, CombineOp::Additive, 0, Some(x))
            .unwrap();

        forest.insert_children(tree, 1, &[x]).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![a, x, b]);
        // The moved subtree came along and the ids survived.
        assert_eq!(forest.children(x).unwrap(), vec![y]);
        assert_eq!(forest.hierarchy_of(y).unwrap(), forest.hierarchy_of(tree).unwrap());
        assert_eq!(forest.child_count(other).unwrap(), 0);
        assert!(forest.check_consistency());
    }

    #[test]
    fn remove_children_detaches_without_deleting() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let b = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let c = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let d = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();

        forest.remove_child(tree, b).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![a, c, d]);
        assert!(forest.is_alive(b));
        assert_eq!(forest.parent(b).unwrap(), None);
        assert_eq!(forest.remove_child(tree, b), Err(ForestError::NotAChild));

        assert_eq!(forest.remove_child_at(tree, 1).unwrap(), c);
        assert_eq!(forest.children(tree).unwrap(), vec![a, d]);
        assert_eq!(
            forest.remove_child_at(tree, 9),
            Err(ForestError::OutOfRange)
        );

        assert_eq!(
            forest.remove_child_range(tree, 1, 5),
            Err(ForestError::OutOfRange)
        );
        forest.remove_child_range(tree, 0, 2).unwrap();
        assert_eq!(forest.child_count(tree).unwrap(), 0);

        // Orphans can be reattached.
        forest.add_child(tree, a).unwrap();
        assert_eq!(forest.children(tree).unwrap(), vec![a]);
        forest.clear_children(tree).unwrap();
        assert_eq!(forest.child_count(tree).unwrap(), 0);
        assert!(forest.check_consistency());
    }

    #[test]
    fn dirty_propagates_to_hierarchy_root() {
        let mut forest = Forest::new();
        let (tree, branch, brush) = tree_with_branch_and_brush(&mut forest);
        forest.clear_dirty(tree).unwrap();
        forest.clear_dirty(branch).unwrap();
        forest.clear_dirty(brush).unwrap();

        forest.set_dirty(brush).unwrap();
        assert!(forest.is_dirty(brush).unwrap());
        assert!(forest
            .flags(branch)
            .unwrap()
            .contains(NodeFlags::BRANCH_NEEDS_UPDATE));
        assert!(
            forest.is_dirty(tree).unwrap()
                || forest.flags(tree).unwrap().contains(NodeFlags::TREE_NEEDS_UPDATE),
            "root must learn that its tree needs an update"
        );
    }

    #[test]
    fn set_transform_fans_out_and_flags_root() {
        let mut forest = Forest::new();
        let (tree, branch, brush) = tree_with_branch_and_brush(&mut forest);
        forest.clear_dirty(tree).unwrap();
        forest.clear_dirty(branch).unwrap();
        forest.clear_dirty(brush).unwrap();

        let m = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        forest.set_transform(branch, m).unwrap();
        assert_eq!(forest.transform(branch).unwrap(), m);
        assert!(forest
            .flags(branch)
            .unwrap()
            .contains(NodeFlags::TRANSFORM_MODIFIED | NodeFlags::DIRTY));
        assert!(
            forest
                .flags(brush)
                .unwrap()
                .contains(NodeFlags::TRANSFORM_MODIFIED),
            "descendants are flagged eagerly"
        );
        assert!(forest
            .flags(tree)
            .unwrap()
            .contains(NodeFlags::TREE_NEEDS_UPDATE));

        forest.clear_dirty(brush).unwrap();
        assert!(forest.flags(brush).unwrap().is_empty());
    }

    #[test]
    fn set_operation_marks_dirty() {
        let mut forest = Forest::new();
        let (_tree, branch, _brush) = tree_with_branch_and_brush(&mut forest);
        forest.clear_dirty(branch).unwrap();
        forest.set_operation(branch, CombineOp::Intersecting).unwrap();
        assert_eq!(forest.operation(branch).unwrap(), CombineOp::Intersecting);
        assert!(forest.is_dirty(branch).unwrap());
    }

    #[test]
    fn root_destroy_reparents_children_into_default_hierarchy() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let a = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let b = forest.create_branch(CombineOp::Subtractive, 0, Some(tree)).unwrap();
        let a_brush = forest
            .create_brush(BrushId(1), Mat4::IDENTITY, CombineOp::Additive, 0, Some(a))
            .unwrap();
        let hierarchies_before = forest.hierarchy_count();

        forest.destroy_node(tree).unwrap();
        assert!(!forest.is_alive(tree));
        assert_eq!(forest.hierarchy_count(), hierarchies_before - 1);

        // Children moved under the default root, order preserved, subtrees
        // intact.
        let default_root = forest.root_of(forest.default_hierarchy()).unwrap();
        assert_eq!(forest.children(default_root).unwrap(), vec![a, b]);
        assert_eq!(forest.parent(a).unwrap(), Some(default_root));
        assert_eq!(forest.children(a).unwrap(), vec![a_brush]);
        assert_eq!(forest.operation(b).unwrap(), CombineOp::Subtractive);
        assert!(forest.check_consistency());
    }

    #[test]
    fn root_destroy_keeps_detached_orphans_alive() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let orphan = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let orphan_brush = forest
            .create_brush(BrushId(4), Mat4::IDENTITY, CombineOp::Additive, 0, Some(orphan))
            .unwrap();
        let attached = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        forest.remove_child(tree, orphan).unwrap();
        let count_before = forest.node_count();

        forest.destroy_node(tree).unwrap();

        // The detached subtree migrated to the default hierarchy, still an
        // orphan, structure intact.
        assert!(forest.is_alive(orphan));
        assert!(forest.is_alive(orphan_brush));
        assert_eq!(forest.parent(orphan).unwrap(), None);
        assert_eq!(forest.children(orphan).unwrap(), vec![orphan_brush]);
        assert_eq!(
            forest.hierarchy_of(orphan).unwrap(),
            forest.default_hierarchy()
        );

        // Attached children still land under the default root.
        let default_root = forest.root_of(forest.default_hierarchy()).unwrap();
        assert_eq!(forest.parent(attached).unwrap(), Some(default_root));

        assert_eq!(forest.node_count(), count_before - 1, "only the root died");
        assert!(forest.check_consistency());
    }

    #[test]
    fn default_root_cannot_be_destroyed() {
        let mut forest = Forest::new();
        let default_root = forest.root_of(forest.default_hierarchy()).unwrap();
        assert_eq!(
            forest.destroy_node(default_root),
            Err(ForestError::DefaultHierarchy)
        );
        assert!(forest.is_alive(default_root));
    }

    #[test]
    fn move_to_hierarchy_recursive() {
        let mut forest = Forest::new();
        let (t1, branch, brush) = tree_with_branch_and_brush(&mut forest);
        let t2 = forest.create_tree(0);
        let dest = forest.hierarchy_of(t2).unwrap();

        let compact = forest.move_to_hierarchy(branch, dest, true).unwrap();
        assert_eq!(compact.hierarchy, dest);
        assert_eq!(forest.resolve(branch).unwrap(), compact);
        assert_eq!(forest.parent(branch).unwrap(), Some(t2));
        assert_eq!(forest.children(branch).unwrap(), vec![brush]);
        assert_eq!(forest.hierarchy_of(brush).unwrap(), dest);
        assert_eq!(forest.child_count(t1).unwrap(), 0);

        // Moving to the hierarchy it is already in is a no-op.
        let again = forest.move_to_hierarchy(branch, dest, true).unwrap();
        assert_eq!(again, compact);
        assert!(forest.check_consistency());
    }

    #[test]
    fn move_to_hierarchy_non_recursive_leaves_children_behind() {
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let before = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let mover = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let after = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let kid1 = forest.create_branch(CombineOp::Additive, 0, Some(mover)).unwrap();
        let kid2 = forest.create_branch(CombineOp::Additive, 0, Some(mover)).unwrap();

        let t2 = forest.create_tree(0);
        let dest = forest.hierarchy_of(t2).unwrap();
        forest.move_to_hierarchy(mover, dest, false).unwrap();

        // The children were spliced into the mover's old position.
        assert_eq!(
            forest.children(tree).unwrap(),
            vec![before, kid1, kid2, after]
        );
        assert_eq!(forest.parent(mover).unwrap(), Some(t2));
        assert_eq!(forest.child_count(mover).unwrap(), 0);
        assert!(forest.check_consistency());
    }

    #[test]
    fn move_root_to_other_hierarchy_is_rejected() {
        let mut forest = Forest::new();
        let t1 = forest.create_tree(0);
        let t2 = forest.create_tree(0);
        let dest = forest.hierarchy_of(t2).unwrap();
        assert_eq!(
            forest.move_to_hierarchy(t1, dest, true),
            Err(ForestError::TreeAsChild)
        );
        assert!(forest.is_alive(t1));
    }

    #[test]
    fn deep_hierarchy_move_does_not_recurse() {
        // Work-stack traversal: a pathologically deep chain must survive a
        // cross-hierarchy move and a destroy.
        let mut forest = Forest::new();
        let tree = forest.create_tree(0);
        let top = forest.create_branch(CombineOp::Additive, 0, Some(tree)).unwrap();
        let mut cursor = top;
        let mut ids = vec![top];
        for _ in 0..10_000 {
            cursor = forest
                .create_branch(CombineOp::Additive, 0, Some(cursor))
                .unwrap();
            ids.push(cursor);
        }

        let t2 = forest.create_tree(0);
        forest.add_child(t2, top).unwrap();
        let dest = forest.hierarchy_of(t2).unwrap();
        for id in &ids {
            assert_eq!(forest.hierarchy_of(*id).unwrap(), dest);
        }

        forest.destroy_node(top).unwrap();
        for id in &ids {
            assert!(!forest.is_alive(*id));
        }
        assert!(forest.check_consistency());
    }

    #[test]
    fn consistency_audit_covers_every_live_handle() {
        let mut forest = Forest::new();
        let (_t, branch, _brush) = tree_with_branch_and_brush(&mut forest);
        let t2 = forest.create_tree(0);
        forest.add_child(t2, branch).unwrap();
        forest.destroy_node(branch).unwrap();
        assert!(forest.check_consistency());
        assert_eq!(forest.node_count(), 3, "default root + two tree roots");
    }
}
