// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed child reconciliation.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::component::{Element, Key};
use crate::root::RootId;
use crate::update_queue::MergeState;

use super::id::INVALID;
use super::store::{NodeFlags, NodeStore, PendingEffect};

/// Replaces the children of `wip` with instances for `elements`.
///
/// A child whose key matches a committed child of the same parent keeps its
/// entity and state; otherwise a new entity is mounted with the element's
/// initial state. Committed children left unmatched are queued as deletions
/// on `wip`. A kept child that moved before a sibling it used to follow is
/// flagged for placement.
pub(crate) fn reconcile_children<S: MergeState>(
    store: &mut NodeStore<S>,
    wip: u32,
    elements: Vec<Element<S>>,
    root: RootId,
    pass: u32,
    created: &mut Vec<u32>,
) {
    let mut old: BTreeMap<Key, u32> = BTreeMap::new();
    let current = store.alternate[wip as usize];
    if current != INVALID {
        let mut child = store.first_child[current as usize];
        while child != INVALID {
            if let Some(shadowed) = old.insert(store.key[child as usize], child) {
                store.effects[wip as usize].push(PendingEffect::Deletion(shadowed));
            }
            child = store.next_sibling[child as usize];
        }
    }

    let mut last_placed = 0_u32;
    let mut prev = INVALID;
    store.first_child[wip as usize] = INVALID;
    for (i, element) in elements.into_iter().enumerate() {
        let Element {
            key,
            component,
            initial_state,
        } = element;
        let slot = match old.remove(&key) {
            Some(old_slot) => {
                let slot = store.create_work_in_progress(old_slot, pass, created);
                store.component[slot as usize] = Some(component);
                let old_index = store.index[old_slot as usize];
                if old_index < last_placed {
                    store.flags[slot as usize].insert(NodeFlags::PLACEMENT);
                } else {
                    last_placed = old_index;
                }
                slot
            }
            None => {
                let entity = store.create_entity(root);
                let slot = store.alloc_slot(entity, key, component, initial_state);
                store.pass[slot as usize] = pass;
                store.flags[slot as usize].insert(NodeFlags::PLACEMENT);
                created.push(slot);
                slot
            }
        };

        #[expect(
            clippy::cast_possible_truncation,
            reason = "child count is bounded by u32 slot indices"
        )]
        let index = i as u32;
        store.parent[slot as usize] = wip;
        store.index[slot as usize] = index;
        store.next_sibling[slot as usize] = INVALID;
        if prev == INVALID {
            store.first_child[wip as usize] = slot;
        } else {
            store.next_sibling[prev as usize] = slot;
        }
        prev = slot;
    }

    for (_, orphan) in old {
        store.effects[wip as usize].push(PendingEffect::Deletion(orphan));
    }
}
