// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Applying finished work to the host.
//!
//! A commit walks the finished pass's effect list three times:
//!
//! 1. **Snapshot**: nodes about to update, before anything changes.
//! 2. **Mutation**: placements, updates, and deletions.
//! 3. **Layout**: commit callbacks, after the finished tree became current.
//!
//! Deferred callbacks are collected and drained later by a
//! [`Task::FlushPassive`] task, or at the start of the next render.

use crate::error::{InvariantViolation, ReconcileError};
use crate::host::{CommitPhase, Effect, EffectKind, Host, Task, TaskPriority};
use crate::lane::Lane;
use crate::root::RootId;
use crate::scheduler::SchedulerContext;
use crate::trace::{CommitSummaryBuilder, PhaseBeginEvent, PhaseEndEvent, PhaseKind};
use crate::tree::{INVALID, NodeFlags, NodeId, NodeStore, PendingEffect};
use crate::update_queue::{CallbackKind, MergeState, Updater};
use crate::work_loop::ExitStatus;

fn effect_parent<S>(store: &NodeStore<S>, slot: u32) -> Option<NodeId> {
    let parent = store.parent[slot as usize];
    (parent != INVALID).then(|| store.node_id(parent))
}

fn effect_at<S: MergeState>(
    store: &NodeStore<S>,
    slot: u32,
    kind: EffectKind,
    with_state: bool,
) -> Effect<'_, S> {
    Effect {
        kind,
        node: store.node_id(slot),
        key: store.key[slot as usize],
        parent: effect_parent(store, slot),
        state: if with_state { store.state_at(slot) } else { None },
    }
}

impl<S: MergeState, H: Host<S>> SchedulerContext<S, H> {
    fn phase_begin(&mut self, pass: u32, phase: PhaseKind, summary: Option<&mut CommitSummaryBuilder>) {
        let timestamp = self.host.now();
        if let Some(summary) = summary {
            summary.phase_begin(phase, timestamp);
        }
        self.tracer.phase_begin(&PhaseBeginEvent {
            pass,
            phase,
            timestamp,
        });
    }

    fn phase_end(&mut self, pass: u32, phase: PhaseKind, summary: Option<&mut CommitSummaryBuilder>) {
        let timestamp = self.host.now();
        if let Some(summary) = summary {
            summary.phase_end(phase, timestamp);
        }
        self.tracer.phase_end(&PhaseEndEvent {
            pass,
            phase,
            timestamp,
        });
    }

    /// Commits the root's finished work.
    pub(crate) fn commit_root(&mut self, root: RootId) -> Result<(), ReconcileError> {
        let idx = root.0 as usize;
        let r = &mut self.roots[idx];
        let Some(finished) = r.finished.take() else {
            return Err(InvariantViolation::AlreadyCommitted(root).into());
        };
        if finished.slot == r.current {
            return Err(InvariantViolation::CommitCurrentTree(root).into());
        }
        if let Some(handle) = r.timeout.take() {
            self.host.cancel(handle);
        }
        if let Some((handle, _)) = r.callback.take() {
            self.host.cancel(handle);
        }

        let now = self.host.now();
        let fs = finished.slot as usize;
        r.mark_finished(self.store.lanes[fs] | self.store.child_lanes[fs]);

        let pass = finished.pass;
        let mut summary = CommitSummaryBuilder::new(pass, root, finished.lanes, now);
        let mut effects = core::mem::take(&mut self.store.effects[fs]);
        if self.store.flags[fs].intersects(NodeFlags::EFFECTS) {
            effects.push(PendingEffect::Node(finished.slot));
        }

        // -- Snapshot --
        self.phase_begin(pass, PhaseKind::Snapshot, Some(&mut summary));
        for effect in &effects {
            let &PendingEffect::Node(slot) = effect else {
                continue;
            };
            let flags = self.store.flags[slot as usize];
            if flags.contains(NodeFlags::UPDATE) && !flags.contains(NodeFlags::PLACEMENT) {
                let current = self.store.alternate[slot as usize];
                let state_slot = if current == INVALID { slot } else { current };
                let mut e = effect_at(&self.store, slot, EffectKind::Update, false);
                e.state = self.store.state_at(state_slot);
                self.host.apply_effect(CommitPhase::Snapshot, &e);
            }
        }
        self.phase_end(pass, PhaseKind::Snapshot, Some(&mut summary));

        // -- Mutation --
        self.phase_begin(pass, PhaseKind::Mutation, Some(&mut summary));
        for effect in &effects {
            match *effect {
                PendingEffect::Node(slot) => {
                    let flags = self.store.flags[slot as usize];
                    if flags.contains(NodeFlags::PLACEMENT) {
                        let e = effect_at(&self.store, slot, EffectKind::Placement, true);
                        self.host.apply_effect(CommitPhase::Mutation, &e);
                        summary.count(EffectKind::Placement);
                    }
                    if flags.contains(NodeFlags::UPDATE) {
                        let e = effect_at(&self.store, slot, EffectKind::Update, true);
                        self.host.apply_effect(CommitPhase::Mutation, &e);
                        summary.count(EffectKind::Update);
                    }
                }
                PendingEffect::Deletion(slot) => {
                    if !self.store.slot_alive[slot as usize] {
                        continue;
                    }
                    let e = effect_at(&self.store, slot, EffectKind::Deletion, false);
                    self.host.apply_effect(CommitPhase::Mutation, &e);
                    summary.count(EffectKind::Deletion);
                    self.store.free_subtree(slot);
                }
            }
        }
        self.phase_end(pass, PhaseKind::Mutation, Some(&mut summary));

        let r = &mut self.roots[idx];
        r.current = finished.slot;
        r.mounted = true;
        self.store.adopt(finished.slot, pass);
        self.store.release_unadopted(&finished.created);
        let store = &self.store;
        self.waits.retain(|w| store.is_alive(w.boundary));

        // -- Layout --
        self.phase_begin(pass, PhaseKind::Layout, Some(&mut summary));
        let mut updater = Updater::new();
        for effect in &effects {
            let &PendingEffect::Node(slot) = effect else {
                continue;
            };
            let s = slot as usize;
            if !self.store.flags[s].contains(NodeFlags::CALLBACK) {
                continue;
            }
            let callbacks = self.store.queue[s]
                .as_mut()
                .map(|q| q.take_effects())
                .unwrap_or_default();
            let node = self.store.node_id(slot);
            for queued in callbacks {
                match queued.kind {
                    CallbackKind::Layout => {
                        if let Some(state) = self.store.state_at(slot) {
                            (queued.callback)(node, state, &mut updater);
                        }
                        let e = effect_at(&self.store, slot, EffectKind::Callback, true);
                        self.host.apply_effect(CommitPhase::Layout, &e);
                        summary.count(EffectKind::Callback);
                    }
                    CallbackKind::Passive => {
                        self.pending_passive.push((node, queued.callback));
                    }
                }
            }
        }
        self.phase_end(pass, PhaseKind::Layout, Some(&mut summary));

        if !self.pending_passive.is_empty() && self.passive_task.is_none() {
            self.passive_task = Some(self.host.schedule(TaskPriority::Normal, Task::FlushPassive));
        }
        if finished.status == ExitStatus::Suspended {
            self.last_fallback_time = Some(now);
        }
        summary.set_remaining(self.roots[idx].pending);
        self.tracer.commit_summary(&summary.finish());

        for (node, class, update) in updater.into_requests() {
            self.enqueue(node, class, update)?;
        }

        if self.roots[idx].pending.contains(Lane::SYNC) {
            if self.nested_root == Some(root) {
                self.nested_count += 1;
            } else {
                self.nested_count = 0;
                self.nested_root = Some(root);
            }
        } else {
            self.nested_count = 0;
        }

        self.ensure_scheduled(root);
        Ok(())
    }

    /// Runs every deferred commit callback, including ones scheduled by the
    /// callbacks themselves. Returns whether any ran.
    ///
    /// Callbacks for nodes deleted since their commit are dropped.
    pub fn flush_passive_effects(&mut self) -> Result<bool, ReconcileError> {
        if let Some(handle) = self.passive_task.take() {
            self.host.cancel(handle);
        }
        let mut ran = false;
        while !self.pending_passive.is_empty() {
            let batch = core::mem::take(&mut self.pending_passive);
            let pass = self.pass;
            self.phase_begin(pass, PhaseKind::Passive, None);
            let mut updater = Updater::new();
            for (node, callback) in batch {
                let Some(slot) = self.store.current_slot(node) else {
                    continue;
                };
                if let Some(state) = self.store.state_at(slot) {
                    callback(node, state, &mut updater);
                }
                let e = effect_at(&self.store, slot, EffectKind::Callback, true);
                self.host.apply_effect(CommitPhase::Passive, &e);
                ran = true;
            }
            self.phase_end(pass, PhaseKind::Passive, None);
            for (node, class, update) in updater.into_requests() {
                self.enqueue(node, class, update)?;
            }
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use crate::component::{Element, Key, RenderOutcome, component_fn, leaf};
    use crate::error::{InvariantViolation, ReconcileError};
    use crate::host::{CommitPhase, EffectKind, LoggedEffect, ManualHost, Task};
    use crate::lane::LaneClass;
    use crate::root::RootId;
    use crate::scheduler::{SchedulerConfig, SchedulerContext};
    use crate::tree::NodeId;
    use crate::update_queue::{Update, Updater};

    type Ctx = SchedulerContext<String, ManualHost>;

    fn mount_list(keys: Rc<RefCell<Vec<u64>>>) -> (Ctx, RootId, NodeId) {
        let child = leaf::<String>();
        let parent = component_fn(move |_: &String| {
            RenderOutcome::Ready(
                keys.borrow()
                    .iter()
                    .map(|&k| Element::new(Key(k), child.clone(), String::new()))
                    .collect(),
            )
        });
        let mut ctx = SchedulerContext::new(ManualHost::new(), SchedulerConfig::millis());
        let root = ctx
            .create_root(Element::new(Key(0), parent, String::new()), LaneClass::Sync)
            .unwrap();
        ctx.run_until_idle().unwrap();
        let node = ctx.root_node(root).unwrap();
        ctx.host_mut().take_effects();
        (ctx, root, node)
    }

    fn mutations(effects: &[LoggedEffect]) -> Vec<(EffectKind, u64)> {
        effects
            .iter()
            .filter(|e| e.phase == CommitPhase::Mutation && e.kind != EffectKind::Update)
            .map(|e| (e.kind, e.key.0))
            .collect()
    }

    #[test]
    fn reorder_places_only_moved_nodes() {
        let keys = Rc::new(RefCell::new(vec![1, 2, 3]));
        let (mut ctx, _, node) = mount_list(keys.clone());

        *keys.borrow_mut() = vec![3, 1, 4];
        ctx.enqueue(node, LaneClass::Sync, Update::force()).unwrap();
        ctx.run_until_idle().unwrap();

        let got = mutations(&ctx.host_mut().take_effects());
        assert!(got.contains(&(EffectKind::Deletion, 2)));
        assert!(got.contains(&(EffectKind::Placement, 1)));
        assert!(got.contains(&(EffectKind::Placement, 4)));
        assert!(!got.contains(&(EffectKind::Placement, 3)), "3 stayed in place");
    }

    #[test]
    fn snapshot_runs_before_mutation() {
        let (mut ctx, _, node) = mount_list(Rc::new(RefCell::new(vec![1])));
        ctx.enqueue(node, LaneClass::Sync, Update::replace(String::from("x")))
            .unwrap();
        ctx.run_until_idle().unwrap();

        let phases: Vec<_> = ctx
            .host()
            .effects()
            .iter()
            .filter(|e| e.node == node)
            .map(|e| e.phase)
            .collect();
        assert_eq!(phases, [CommitPhase::Snapshot, CommitPhase::Mutation]);
    }

    #[test]
    fn layout_callbacks_run_in_order_and_passive_later() {
        let (mut ctx, _, node) = mount_list(Rc::new(RefCell::new(Vec::new())));
        let log = Rc::new(RefCell::new(Vec::new()));

        let (l1, l2, p) = (log.clone(), log.clone(), log.clone());
        ctx.enqueue(
            node,
            LaneClass::Default,
            Update::replace(String::from("a")).on_commit(move |_, s: &String, _| {
                l1.borrow_mut().push(alloc::format!("layout1 {s}"));
            }),
        )
        .unwrap();
        ctx.enqueue(
            node,
            LaneClass::Default,
            Update::replace(String::from("b")).on_commit(move |_, s: &String, _| {
                l2.borrow_mut().push(alloc::format!("layout2 {s}"));
            }),
        )
        .unwrap();
        ctx.enqueue(
            node,
            LaneClass::Default,
            Update::force().after_commit(move |_, s: &String, _| {
                p.borrow_mut().push(alloc::format!("passive {s}"));
            }),
        )
        .unwrap();

        assert!(ctx.run_next().unwrap(), "render and commit");
        assert_eq!(*log.borrow(), ["layout1 b", "layout2 b"]);
        assert!(ctx.host().is_queued(Task::FlushPassive));

        ctx.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), ["layout1 b", "layout2 b", "passive b"]);
        assert!(ctx.is_idle());
    }

    #[test]
    fn passive_callbacks_drain_until_empty() {
        let (mut ctx, _, node) = mount_list(Rc::new(RefCell::new(Vec::new())));
        let count = Rc::new(RefCell::new(0_u32));

        fn chain(count: Rc<RefCell<u32>>, depth: u32) -> Update<String> {
            Update::force().after_commit(move |node, _: &String, updater: &mut Updater<String>| {
                *count.borrow_mut() += 1;
                if depth > 0 {
                    updater.enqueue(node, LaneClass::Sync, chain(count.clone(), depth - 1));
                }
            })
        }
        ctx.enqueue(node, LaneClass::Sync, chain(count.clone(), 3)).unwrap();
        ctx.run_until_idle().unwrap();
        assert_eq!(*count.borrow(), 4);
        assert!(ctx.is_idle());
    }

    #[test]
    fn committing_twice_is_an_invariant_violation() {
        let (mut ctx, root, _) = mount_list(Rc::new(RefCell::new(vec![1])));
        assert_eq!(
            ctx.commit_root(root),
            Err(ReconcileError::Invariant(InvariantViolation::AlreadyCommitted(root)))
        );
    }

    #[test]
    fn deleted_subtree_frees_every_handle() {
        let inner_keys = Rc::new(RefCell::new(vec![1, 2]));
        let inner = {
            let keys = inner_keys.clone();
            let child = leaf::<String>();
            component_fn(move |_: &String| {
                RenderOutcome::Ready(
                    keys.borrow()
                        .iter()
                        .map(|&k| Element::new(Key(k), child.clone(), String::new()))
                        .collect(),
                )
            })
        };
        let show = Rc::new(RefCell::new(true));
        let outer = {
            let show = show.clone();
            component_fn(move |_: &String| {
                RenderOutcome::Ready(if *show.borrow() {
                    vec![Element::new(Key(10), inner.clone(), String::new())]
                } else {
                    Vec::new()
                })
            })
        };
        let mut ctx = SchedulerContext::new(ManualHost::new(), SchedulerConfig::millis());
        let root = ctx
            .create_root(Element::new(Key(0), outer, String::new()), LaneClass::Sync)
            .unwrap();
        ctx.run_until_idle().unwrap();
        let node = ctx.root_node(root).unwrap();
        let middle = ctx.store().children(node).next().unwrap();
        let grandchildren: Vec<_> = ctx.store().children(middle).collect();
        assert_eq!(grandchildren.len(), 2);
        let entities = ctx.store().entity_count();

        *show.borrow_mut() = false;
        ctx.enqueue(node, LaneClass::Sync, Update::force()).unwrap();
        ctx.run_until_idle().unwrap();

        assert!(!ctx.store().is_alive(middle));
        assert!(grandchildren.iter().all(|&g| !ctx.store().is_alive(g)));
        assert_eq!(ctx.store().entity_count(), entities - 3);
        let deletions = ctx
            .host()
            .effects()
            .iter()
            .filter(|e| e.kind == EffectKind::Deletion)
            .count();
        assert_eq!(deletions, 1, "one effect per deleted subtree");
    }
}
