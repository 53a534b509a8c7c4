// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type for forest operations.

/// Why a forest operation did not apply.
///
/// Two classes share this enum:
///
/// - [`InvalidHandle`](Self::InvalidHandle) means a stale or foreign handle
///   reached the forest. That is a caller bug (a destroyed node's id was
///   reused without re-resolving); treat it as fatal in debug builds.
/// - Every other variant is an expected, recoverable structural rejection
///   (for example a drag-and-drop reparent that would create a cycle). The
///   forest guarantees no state changed when one of these is returned.
///
/// [`ForestError::is_structural`] distinguishes the two.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ForestError {
    /// The handle is stale or was never issued by this forest.
    InvalidHandle,
    /// Attaching would make a node its own ancestor.
    CycleDetected,
    /// The child is already attached to the target parent, or appears twice
    /// in a batch.
    DuplicateChild,
    /// A hierarchy root cannot become a child.
    TreeAsChild,
    /// Brushes are leaves and cannot hold children.
    BrushParent,
    /// The named node is not a child of the given parent.
    NotAChild,
    /// A child index or range lies outside the parent's child list.
    OutOfRange,
    /// A node cannot be its own parent or child.
    SelfReference,
    /// The default hierarchy's root cannot be destroyed or moved; it is the
    /// destination for children of destroyed roots.
    DefaultHierarchy,
}

impl ForestError {
    /// Whether this is an expected structural rejection (state unchanged), as
    /// opposed to a stale-handle caller bug.
    pub const fn is_structural(self) -> bool {
        !matches!(self, Self::InvalidHandle)
    }
}

impl core::fmt::Display for ForestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::InvalidHandle => "stale or unknown handle",
            Self::CycleDetected => "attach would create a cycle",
            Self::DuplicateChild => "child already attached to this parent",
            Self::TreeAsChild => "a hierarchy root cannot become a child",
            Self::BrushParent => "brushes cannot hold children",
            Self::NotAChild => "node is not a child of the given parent",
            Self::OutOfRange => "child index out of range",
            Self::SelfReference => "a node cannot parent itself",
            Self::DefaultHierarchy => "the default hierarchy root is reserved",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for ForestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_is_not_structural() {
        assert!(!ForestError::InvalidHandle.is_structural());
        assert!(ForestError::CycleDetected.is_structural());
        assert!(ForestError::OutOfRange.is_structural());
    }
}
