// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree traversal utilities.

use super::id::{INVALID, NodeId};
use super::store::NodeStore;

/// An iterator over the committed children of a node.
///
/// Created by [`NodeStore::children`].
#[derive(Debug)]
pub struct Children<'a, S> {
    store: &'a NodeStore<S>,
    current: u32,
}

impl<'a, S> Children<'a, S> {
    pub(crate) fn new(store: &'a NodeStore<S>, first: u32) -> Self {
        Self {
            store,
            current: first,
        }
    }
}

impl<S> Iterator for Children<'_, S> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.current == INVALID {
            return None;
        }
        let slot = self.current;
        self.current = self.store.next_sibling[slot as usize];
        Some(self.store.node_id(slot))
    }
}
