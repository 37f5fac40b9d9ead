// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node identity types.

use core::fmt;

/// Sentinel value indicating "no slot" in index fields.
pub(crate) const INVALID: u32 = u32::MAX;

/// A handle to a logical node in a [`NodeStore`](super::NodeStore).
///
/// A node is backed by up to two slots (the current instance and the
/// work-in-progress instance). The handle names the node itself, so it stays
/// valid across commits. It contains an entity index and a generation
/// counter so that stale handles are detected after the node is deleted and
/// its entity reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    /// Entity index into the store's entity table.
    pub(crate) idx: u32,
    /// Generation counter. Must match the store's generation for this entity.
    pub(crate) generation: u32,
}

impl NodeId {
    /// Rebuilds a handle from its raw parts (for diagnostics and trace
    /// replay).
    #[inline]
    #[must_use]
    pub const fn from_raw_parts(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }

    /// Returns the raw entity index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}@gen{})", self.idx, self.generation)
    }
}
