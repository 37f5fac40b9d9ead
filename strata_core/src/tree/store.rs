// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct-of-arrays node storage with entity and slot allocation.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::component::{Component, Key};
use crate::lane::{Lane, Lanes};
use crate::root::RootId;
use crate::update_queue::{MergeState, SharedQueue, UpdateQueue};

use super::id::{INVALID, NodeId};
use super::traverse::Children;

/// Per-slot work flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct NodeFlags(u16);

impl NodeFlags {
    pub(crate) const NONE: Self = Self(0);
    /// Newly inserted, or moved among its siblings.
    pub(crate) const PLACEMENT: Self = Self(1 << 0);
    /// Re-rendered while already mounted.
    pub(crate) const UPDATE: Self = Self(1 << 1);
    /// Has commit callbacks waiting in its queue.
    pub(crate) const CALLBACK: Self = Self(1 << 2);
    /// A descendant (or the node itself) threw; unwinding.
    pub(crate) const INCOMPLETE: Self = Self(1 << 3);
    /// Will capture on unwind.
    pub(crate) const SHOULD_CAPTURE: Self = Self(1 << 4);
    /// Captured this pass; re-entered to render its recovery.
    pub(crate) const DID_CAPTURE: Self = Self(1 << 5);
    /// The capture was a suspension; render the fallback.
    pub(crate) const SHOW_FALLBACK: Self = Self(1 << 6);

    /// Flags that put a node on its parent's effect list.
    pub(crate) const EFFECTS: Self = Self(Self::PLACEMENT.0 | Self::UPDATE.0 | Self::CALLBACK.0);

    #[inline]
    pub(crate) const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub(crate) const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeFlags({:#09b})", self.0)
    }
}

/// An entry in a node's effect list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PendingEffect {
    /// A work-in-progress slot with [`NodeFlags::EFFECTS`] set.
    Node(u32),
    /// A current slot whose subtree is removed at commit.
    Deletion(u32),
}

/// Struct-of-arrays storage for every node instance.
///
/// Logical nodes (*entities*) are addressed by [`NodeId`] handles. Each
/// entity is backed by at most two slots in parallel arrays: the current
/// instance and its work-in-progress alternate. Freed slots and entities are
/// recycled via free lists, and entity generation counters make old handles
/// stale.
pub struct NodeStore<S> {
    // -- Entities --
    pub(crate) entity_generation: Vec<u32>,
    pub(crate) entity_slot: Vec<u32>,
    pub(crate) entity_root: Vec<RootId>,
    pub(crate) entity_pending: Vec<SharedQueue<S>>,
    pub(crate) entity_alive: Vec<bool>,
    pub(crate) entity_free: Vec<u32>,

    // -- Topology --
    pub(crate) parent: Vec<u32>,
    pub(crate) first_child: Vec<u32>,
    pub(crate) next_sibling: Vec<u32>,
    pub(crate) index: Vec<u32>,
    pub(crate) alternate: Vec<u32>,
    pub(crate) entity: Vec<u32>,

    // -- Content --
    pub(crate) key: Vec<Key>,
    pub(crate) component: Vec<Option<Rc<dyn Component<S>>>>,
    pub(crate) state: Vec<Option<S>>,
    pub(crate) queue: Vec<Option<UpdateQueue<S>>>,

    // -- Work --
    pub(crate) lanes: Vec<Lanes>,
    pub(crate) child_lanes: Vec<Lanes>,
    pub(crate) flags: Vec<NodeFlags>,
    pub(crate) effects: Vec<Vec<PendingEffect>>,
    pub(crate) showing_fallback: Vec<bool>,
    pub(crate) pass: Vec<u32>,

    // -- Allocation --
    pub(crate) slot_alive: Vec<bool>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) len: u32,
}

impl<S> fmt::Debug for NodeStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStore")
            .field("entities", &self.entity_count())
            .field("slots", &self.slot_count())
            .finish_non_exhaustive()
    }
}

impl<S: MergeState> Default for NodeStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> NodeStore<S> {
    /// Returns the number of live nodes.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_alive.iter().filter(|alive| **alive).count()
    }

    /// Returns the number of live instances (at most two per node).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_alive.iter().filter(|alive| **alive).count()
    }

    /// Returns whether the handle refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: NodeId) -> bool {
        let e = id.idx as usize;
        e < self.entity_alive.len()
            && self.entity_alive[e]
            && self.entity_generation[e] == id.generation
    }

    #[inline]
    pub(crate) fn entity_id(&self, entity: u32) -> NodeId {
        NodeId {
            idx: entity,
            generation: self.entity_generation[entity as usize],
        }
    }

    #[inline]
    pub(crate) fn node_id(&self, slot: u32) -> NodeId {
        self.entity_id(self.entity[slot as usize])
    }

    /// The committed slot of a live node, if it has one.
    pub(crate) fn current_slot(&self, id: NodeId) -> Option<u32> {
        if !self.is_alive(id) {
            return None;
        }
        let slot = self.entity_slot[id.idx as usize];
        (slot != INVALID).then_some(slot)
    }

    fn validate(&self, id: NodeId) -> u32 {
        assert!(self.is_alive(id), "stale node handle");
        let slot = self.entity_slot[id.idx as usize];
        assert!(slot != INVALID, "node has not been committed");
        slot
    }

    /// Returns the committed state of a node.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn state(&self, id: NodeId) -> &S {
        let slot = self.validate(id);
        match &self.state[slot as usize] {
            Some(state) => state,
            None => unreachable!("live slot without state"),
        }
    }

    /// Returns an iterator over the committed children of a node.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Children<'_, S> {
        let slot = self.validate(id);
        Children::new(self, self.first_child[slot as usize])
    }

    /// Returns the parent of a node, if any.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let slot = self.validate(id);
        let p = self.parent[slot as usize];
        (p != INVALID).then(|| self.node_id(p))
    }

    /// Returns the key of a node.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn key(&self, id: NodeId) -> Key {
        let slot = self.validate(id);
        self.key[slot as usize]
    }

    /// Returns the lanes of the committed node's own pending updates.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn pending_lanes(&self, id: NodeId) -> Lanes {
        let slot = self.validate(id);
        self.lanes[slot as usize]
    }

    /// Returns the root a live node belongs to.
    #[must_use]
    pub fn root_of(&self, id: NodeId) -> Option<RootId> {
        self.is_alive(id).then(|| self.entity_root[id.idx as usize])
    }

    /// Returns the number of updates retained in the committed node's base
    /// list.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn base_len(&self, id: NodeId) -> usize
    where
        S: MergeState,
    {
        let slot = self.validate(id);
        self.queue[slot as usize]
            .as_ref()
            .map_or(0, UpdateQueue::base_len)
    }
}

impl<S: MergeState> NodeStore<S> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entity_generation: Vec::new(),
            entity_slot: Vec::new(),
            entity_root: Vec::new(),
            entity_pending: Vec::new(),
            entity_alive: Vec::new(),
            entity_free: Vec::new(),
            parent: Vec::new(),
            first_child: Vec::new(),
            next_sibling: Vec::new(),
            index: Vec::new(),
            alternate: Vec::new(),
            entity: Vec::new(),
            key: Vec::new(),
            component: Vec::new(),
            state: Vec::new(),
            queue: Vec::new(),
            lanes: Vec::new(),
            child_lanes: Vec::new(),
            flags: Vec::new(),
            effects: Vec::new(),
            showing_fallback: Vec::new(),
            pass: Vec::new(),
            slot_alive: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    // -- Allocation --

    /// Creates an entity with no slots yet.
    pub(crate) fn create_entity(&mut self, root: RootId) -> u32 {
        if let Some(e) = self.entity_free.pop() {
            let i = e as usize;
            self.entity_slot[i] = INVALID;
            self.entity_root[i] = root;
            self.entity_pending[i] = SharedQueue::new();
            self.entity_alive[i] = true;
            e
        } else {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "entity count is bounded by u32 handles"
            )]
            let e = self.entity_generation.len() as u32;
            self.entity_generation.push(0);
            self.entity_slot.push(INVALID);
            self.entity_root.push(root);
            self.entity_pending.push(SharedQueue::new());
            self.entity_alive.push(true);
            e
        }
    }

    /// Releases an entity. Its pending updates are dropped and its handles go
    /// stale.
    pub(crate) fn free_entity(&mut self, entity: u32) {
        let e = entity as usize;
        if !self.entity_alive[e] {
            return;
        }
        self.entity_generation[e] += 1;
        self.entity_alive[e] = false;
        self.entity_slot[e] = INVALID;
        self.entity_pending[e] = SharedQueue::new();
        self.entity_free.push(entity);
    }

    /// Allocates a blank slot for `entity`.
    fn alloc_raw(&mut self, entity: u32) -> u32 {
        let idx = if let Some(idx) = self.free_list.pop() {
            // Reuse a freed slot; free_slot already cleared it.
            idx
        } else {
            let idx = self.len;
            self.len += 1;
            self.parent.push(INVALID);
            self.first_child.push(INVALID);
            self.next_sibling.push(INVALID);
            self.index.push(0);
            self.alternate.push(INVALID);
            self.entity.push(INVALID);
            self.key.push(Key::default());
            self.component.push(None);
            self.state.push(None);
            self.queue.push(None);
            self.lanes.push(Lanes::NONE);
            self.child_lanes.push(Lanes::NONE);
            self.flags.push(NodeFlags::NONE);
            self.effects.push(Vec::new());
            self.showing_fallback.push(false);
            self.pass.push(0);
            self.slot_alive.push(false);
            idx
        };
        let i = idx as usize;
        self.entity[i] = entity;
        self.slot_alive[i] = true;
        idx
    }

    /// Allocates a slot for a node mounting with `state`.
    pub(crate) fn alloc_slot(
        &mut self,
        entity: u32,
        key: Key,
        component: Rc<dyn Component<S>>,
        state: S,
    ) -> u32 {
        let idx = self.alloc_raw(entity);
        let i = idx as usize;
        self.key[i] = key;
        self.component[i] = Some(component);
        self.queue[i] = Some(UpdateQueue::new(state.clone()));
        self.state[i] = Some(state);
        idx
    }

    /// Frees a slot. Freeing an already free slot does nothing.
    pub(crate) fn free_slot(&mut self, slot: u32) {
        let i = slot as usize;
        if !self.slot_alive[i] {
            return;
        }
        let alt = self.alternate[i];
        if alt != INVALID && self.alternate[alt as usize] == slot {
            self.alternate[alt as usize] = INVALID;
        }
        self.parent[i] = INVALID;
        self.first_child[i] = INVALID;
        self.next_sibling[i] = INVALID;
        self.alternate[i] = INVALID;
        self.entity[i] = INVALID;
        self.component[i] = None;
        self.state[i] = None;
        self.queue[i] = None;
        self.lanes[i] = Lanes::NONE;
        self.child_lanes[i] = Lanes::NONE;
        self.flags[i] = NodeFlags::NONE;
        self.effects[i].clear();
        self.showing_fallback[i] = false;
        self.slot_alive[i] = false;
        self.free_list.push(slot);
    }

    /// Frees every slot in `created` that did not become current, together
    /// with entities that never had a current slot.
    pub(crate) fn release_unadopted(&mut self, created: &[u32]) {
        for &slot in created {
            if !self.slot_alive[slot as usize] {
                continue;
            }
            let e = self.entity[slot as usize];
            let current = self.entity_slot[e as usize];
            if current == slot {
                continue;
            }
            self.free_slot(slot);
            if current == INVALID {
                self.free_entity(e);
            }
        }
    }

    /// Frees a committed subtree: every slot, its alternate, and its entity.
    pub(crate) fn free_subtree(&mut self, slot: u32) {
        let mut stack = vec![slot];
        while let Some(s) = stack.pop() {
            let mut child = self.first_child[s as usize];
            while child != INVALID {
                stack.push(child);
                child = self.next_sibling[child as usize];
            }
            let e = self.entity[s as usize];
            let alt = self.alternate[s as usize];
            if alt != INVALID {
                self.free_slot(alt);
            }
            self.free_slot(s);
            if e != INVALID {
                self.free_entity(e);
            }
        }
    }

    // -- Work-in-progress --

    /// Returns the work-in-progress instance for `current`, reusing its
    /// alternate if it has one. The instance starts as a copy of `current`
    /// with no flags and no effects.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: u32,
        pass: u32,
        created: &mut Vec<u32>,
    ) -> u32 {
        let c = current as usize;
        let mut wip = self.alternate[c];
        if wip == INVALID {
            wip = self.alloc_raw(self.entity[c]);
            self.alternate[wip as usize] = current;
            self.alternate[c] = wip;
            created.push(wip);
        }
        let w = wip as usize;
        self.key[w] = self.key[c];
        self.index[w] = self.index[c];
        self.parent[w] = self.parent[c];
        self.first_child[w] = self.first_child[c];
        self.next_sibling[w] = self.next_sibling[c];
        self.component[w] = self.component[c].clone();
        self.state[w] = self.state[c].clone();
        self.queue[w] = self.queue[c].as_ref().map(UpdateQueue::clone_for_work);
        self.lanes[w] = self.lanes[c];
        self.child_lanes[w] = self.child_lanes[c];
        self.flags[w] = NodeFlags::NONE;
        self.effects[w].clear();
        self.showing_fallback[w] = self.showing_fallback[c];
        self.pass[w] = pass;
        wip
    }

    /// Replaces the committed children of `wip` with work-in-progress copies.
    pub(crate) fn clone_children(&mut self, wip: u32, pass: u32, created: &mut Vec<u32>) {
        let mut child = self.first_child[wip as usize];
        let mut prev = INVALID;
        while child != INVALID {
            let next = self.next_sibling[child as usize];
            let w = self.create_work_in_progress(child, pass, created);
            self.parent[w as usize] = wip;
            self.next_sibling[w as usize] = INVALID;
            if prev == INVALID {
                self.first_child[wip as usize] = w;
            } else {
                self.next_sibling[prev as usize] = w;
            }
            prev = w;
            child = next;
        }
    }

    /// Marks `lane` on `slot` and as child work on every ancestor, on both
    /// instances of each.
    pub(crate) fn mark_update_lane(&mut self, slot: u32, lane: Lane) {
        self.lanes[slot as usize] |= lane;
        let alt = self.alternate[slot as usize];
        if alt != INVALID {
            self.lanes[alt as usize] |= lane;
        }
        let mut p = self.parent[slot as usize];
        while p != INVALID {
            self.child_lanes[p as usize] |= lane;
            let alt = self.alternate[p as usize];
            if alt != INVALID {
                self.child_lanes[alt as usize] |= lane;
            }
            p = self.parent[p as usize];
        }
    }

    /// Recomputes `child_lanes` of `slot` from its children.
    pub(crate) fn bubble_child_lanes(&mut self, slot: u32) {
        let mut lanes = Lanes::NONE;
        let mut child = self.first_child[slot as usize];
        while child != INVALID {
            lanes |= self.lanes[child as usize] | self.child_lanes[child as usize];
            child = self.next_sibling[child as usize];
        }
        self.child_lanes[slot as usize] = lanes;
    }

    /// Points every entity reached from `root_slot` through slots stamped
    /// with `pass` at that slot.
    pub(crate) fn adopt(&mut self, root_slot: u32, pass: u32) {
        let mut stack = vec![root_slot];
        while let Some(s) = stack.pop() {
            if self.pass[s as usize] != pass {
                continue;
            }
            let e = self.entity[s as usize];
            self.entity_slot[e as usize] = s;
            let mut child = self.first_child[s as usize];
            while child != INVALID {
                stack.push(child);
                child = self.next_sibling[child as usize];
            }
        }
    }

    /// Returns the component of a slot.
    pub(crate) fn component_at(&self, slot: u32) -> Option<Rc<dyn Component<S>>> {
        self.component[slot as usize].clone()
    }

    /// Returns the state of a slot.
    pub(crate) fn state_at(&self, slot: u32) -> Option<&S> {
        self.state[slot as usize].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::component::leaf;

    fn mount(store: &mut NodeStore<String>, parent: u32, key: u64) -> u32 {
        let e = store.create_entity(RootId(0));
        let slot = store.alloc_slot(e, Key(key), leaf(), String::new());
        store.entity_slot[e as usize] = slot;
        store.parent[slot as usize] = parent;
        if parent != INVALID {
            let mut last = store.first_child[parent as usize];
            if last == INVALID {
                store.first_child[parent as usize] = slot;
            } else {
                while store.next_sibling[last as usize] != INVALID {
                    last = store.next_sibling[last as usize];
                }
                store.next_sibling[last as usize] = slot;
            }
        }
        slot
    }

    #[test]
    fn wip_reuses_alternate() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let mut created = Vec::new();
        let wip = store.create_work_in_progress(root, 1, &mut created);
        assert_ne!(wip, root);
        assert_eq!(created, [wip]);
        let again = store.create_work_in_progress(root, 2, &mut created);
        assert_eq!(again, wip, "second pass reuses the alternate");
        assert_eq!(created.len(), 1);
        assert_eq!(store.alternate[wip as usize], root);
        assert_eq!(store.alternate[root as usize], wip);
    }

    #[test]
    fn clone_children_links_siblings() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let a = mount(&mut store, root, 1);
        let b = mount(&mut store, root, 2);
        let mut created = Vec::new();
        let wip = store.create_work_in_progress(root, 1, &mut created);
        store.clone_children(wip, 1, &mut created);

        let first = store.first_child[wip as usize];
        let second = store.next_sibling[first as usize];
        assert_eq!(store.alternate[first as usize], a);
        assert_eq!(store.alternate[second as usize], b);
        assert_eq!(store.parent[second as usize], wip);
        assert_eq!(store.first_child[root as usize], a, "current untouched");
    }

    #[test]
    fn mark_update_lane_reaches_root_on_both_instances() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let child = mount(&mut store, root, 1);
        let mut created = Vec::new();
        let wip_root = store.create_work_in_progress(root, 1, &mut created);

        store.mark_update_lane(child, Lane::SYNC);
        assert!(store.lanes[child as usize].contains(Lane::SYNC));
        assert!(store.child_lanes[root as usize].contains(Lane::SYNC));
        assert!(store.child_lanes[wip_root as usize].contains(Lane::SYNC));
    }

    #[test]
    fn discard_frees_fresh_entities_only() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let mut created = Vec::new();
        let wip = store.create_work_in_progress(root, 1, &mut created);
        let fresh_entity = store.create_entity(RootId(0));
        let fresh = store.alloc_slot(fresh_entity, Key(9), leaf(), String::new());
        created.push(fresh);
        let fresh_id = store.entity_id(fresh_entity);

        store.release_unadopted(&created);
        assert!(!store.slot_alive[wip as usize]);
        assert_eq!(store.alternate[root as usize], INVALID);
        assert!(!store.is_alive(fresh_id), "entity never committed");
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.slot_count(), 1);
    }

    #[test]
    fn adopt_then_sweep_keeps_reached() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let mut created = Vec::new();
        let wip = store.create_work_in_progress(root, 3, &mut created);
        let e = store.create_entity(RootId(0));
        let child = store.alloc_slot(e, Key(1), leaf(), String::new());
        store.pass[child as usize] = 3;
        store.parent[child as usize] = wip;
        store.first_child[wip as usize] = child;
        created.push(child);
        let orphan_e = store.create_entity(RootId(0));
        let orphan = store.alloc_slot(orphan_e, Key(2), leaf(), String::new());
        created.push(orphan);

        store.adopt(wip, 3);
        store.release_unadopted(&created);
        assert_eq!(store.entity_slot[e as usize], child);
        assert!(store.slot_alive[child as usize]);
        assert!(!store.slot_alive[orphan as usize]);
        assert!(!store.entity_alive[orphan_e as usize]);
    }

    #[test]
    fn free_subtree_releases_alternates_and_entities() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let child = mount(&mut store, root, 1);
        let grandchild = mount(&mut store, child, 2);
        let mut created = Vec::new();
        store.create_work_in_progress(grandchild, 1, &mut created);
        let id = store.node_id(grandchild);

        store.free_subtree(child);
        assert!(!store.is_alive(id));
        assert_eq!(store.slot_count(), 1, "only the root remains");
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn freed_entity_handle_goes_stale() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let id = store.node_id(root);
        store.free_subtree(root);
        let e = store.create_entity(RootId(0));
        assert_eq!(e, id.idx, "entity index recycled");
        assert!(!store.is_alive(id), "old generation is stale");
    }

    #[test]
    #[should_panic(expected = "stale node handle")]
    fn children_of_stale_handle_panics() {
        let mut store = NodeStore::new();
        let root = mount(&mut store, INVALID, 0);
        let id = store.node_id(root);
        store.free_subtree(root);
        let _ = store.children(id);
    }
}
