// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interruptible render loop.
//!
//! A pass builds the work-in-progress tree for one root at one set of lanes.
//! It walks depth first: [`begin`](RenderScope::begin_unit) processes a node's
//! queue, renders it, and reconciles its children, then descends;
//! [`complete`](RenderScope::complete_unit) bubbles child lanes and effect
//! lists upward, then moves to the next sibling or back to the parent.
//!
//! ```text
//!             begin            begin
//!   root ──────────────► a ──────────────► a1
//!                        ▲                  │ complete
//!                        │ complete         ▼
//!                        └──────────────── a2 (sibling)
//! ```
//!
//! A concurrent pass checks
//! [`should_yield`](crate::host::TaskScheduler::should_yield) between units
//! and keeps its cursor in [`WorkInProgress`], so the next slice continues
//! where the last one stopped.
//!
//! A component that fails or is pending *throws*: the loop looks for an
//! ancestor that can capture it, marks that ancestor, and unwinds. The
//! ancestor is entered again and renders its recovery (for errors) or its
//! fallback (for pending resources).

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::component::{RenderOutcome, WaitHandle};
use crate::error::RenderError;
use crate::host::Host;
use crate::lane::{Lane, LaneClass, Lanes};
use crate::root::RootId;
use crate::scheduler::SchedulerContext;
use crate::time::HostTime;
use crate::trace::{
    DiscardReason, PassBeginEvent, PassDiscardEvent, PassEndEvent, PassYieldEvent, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, Tracer,
};
use crate::tree::reconcile::reconcile_children;
use crate::tree::{INVALID, NodeFlags, NodeId, NodeStore, PendingEffect};
use crate::update_queue::{MergeState, Update};

#[cfg(feature = "trace-rich")]
use crate::trace::{UnitEvent, UnitKind};

/// How a render pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// The pass yielded and has more work.
    Incomplete,
    /// Every unit completed without throwing.
    Completed,
    /// An error was thrown and captured by an ancestor.
    Errored,
    /// An error was thrown and nothing captured it.
    FatalErrored,
    /// A resource was pending; a boundary rendered its fallback.
    Suspended,
    /// A resource was pending under a boundary that already shows content,
    /// in lanes that may keep showing it for a while.
    SuspendedWithDelay,
}

/// A registered wait on an external resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Wait {
    pub(crate) handle: WaitHandle,
    pub(crate) root: RootId,
    pub(crate) lanes: Lanes,
    pub(crate) boundary: NodeId,
}

/// The render pass in flight.
#[derive(Clone, Debug)]
pub(crate) struct WorkInProgress {
    pub(crate) root: RootId,
    pub(crate) root_slot: u32,
    /// Whether the root's current tree has ever been committed.
    pub(crate) root_mounted: bool,
    pub(crate) lanes: Lanes,
    pub(crate) cursor: u32,
    pub(crate) status: ExitStatus,
    pub(crate) fatal_error: Option<RenderError>,
    /// Lanes of updates enqueued on this root while the pass ran.
    pub(crate) updated_lanes: Lanes,
    /// Lanes pinged while the pass ran.
    pub(crate) pinged_lanes: Lanes,
    /// Latest event time among the updates the pass applied.
    pub(crate) latest_event_time: Option<HostTime>,
    pub(crate) created: Vec<u32>,
    pub(crate) pass: u32,
    pub(crate) units: u32,
}

impl WorkInProgress {
    fn mark_error(&mut self) {
        if self.status != ExitStatus::FatalErrored {
            self.status = ExitStatus::Errored;
        }
    }

    fn mark_suspended(&mut self) {
        if self.status == ExitStatus::Incomplete {
            self.status = ExitStatus::Suspended;
        }
    }

    fn mark_suspended_with_delay(&mut self) {
        if matches!(self.status, ExitStatus::Incomplete | ExitStatus::Suspended) {
            self.status = ExitStatus::SuspendedWithDelay;
        }
    }
}

/// Borrowed pieces of the context a pass mutates.
pub(crate) struct RenderScope<'a, S> {
    pub(crate) store: &'a mut NodeStore<S>,
    pub(crate) wip: &'a mut WorkInProgress,
    pub(crate) waits: &'a mut Vec<Wait>,
    #[cfg_attr(
        not(feature = "trace-rich"),
        expect(dead_code, reason = "only read by per-unit tracing")
    )]
    pub(crate) tracer: &'a mut Tracer,
}

impl<S: MergeState> RenderScope<'_, S> {
    /// Runs one unit at the cursor and advances it.
    pub(crate) fn perform_unit(&mut self) {
        let slot = self.wip.cursor;
        let next = self.begin_unit(slot);
        self.wip.units += 1;
        if self.wip.status == ExitStatus::FatalErrored {
            self.wip.cursor = INVALID;
        } else if next != INVALID {
            self.wip.cursor = next;
        } else {
            self.wip.cursor = self.complete_unit(slot);
        }
    }

    #[cfg(feature = "trace-rich")]
    fn trace_unit(&mut self, slot: u32, kind: UnitKind) {
        let e = UnitEvent {
            pass: self.wip.pass,
            node: self.store.node_id(slot),
            kind,
        };
        self.tracer.unit(&e);
    }

    fn same_component(&self, slot: u32, current: u32) -> bool {
        match (
            &self.store.component[slot as usize],
            &self.store.component[current as usize],
        ) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn bailout(&mut self, slot: u32) -> u32 {
        #[cfg(feature = "trace-rich")]
        self.trace_unit(slot, UnitKind::Bailout);
        if !self.store.child_lanes[slot as usize].intersects(self.wip.lanes) {
            return INVALID;
        }
        self.store
            .clone_children(slot, self.wip.pass, &mut self.wip.created);
        self.store.first_child[slot as usize]
    }

    /// Renders `slot` and returns its first child, or [`INVALID`] to complete
    /// it (no children, skipped subtree, or a throw).
    fn begin_unit(&mut self, slot: u32) -> u32 {
        let s = slot as usize;
        let render_lanes = self.wip.lanes;
        let current = self.store.alternate[s];
        let flags = self.store.flags[s];
        let captured = flags.contains(NodeFlags::DID_CAPTURE);
        self.store.effects[s].clear();

        #[cfg(feature = "trace-rich")]
        self.trace_unit(slot, UnitKind::Begin);

        if current != INVALID
            && !captured
            && !self.store.lanes[s].intersects(render_lanes)
            && self.same_component(slot, current)
        {
            return self.bailout(slot);
        }

        let Some(component) = self.store.component_at(slot) else {
            return INVALID;
        };

        // -- Process --
        self.store.lanes[s] = Lanes::NONE;
        let entity = self.store.entity[s] as usize;
        let mut queue = self.store.queue[s].take();
        let mut mirror = if current == INVALID {
            None
        } else {
            self.store.queue[current as usize].take()
        };
        let processed = queue.as_mut().map(|q| {
            q.process(
                &mut self.store.entity_pending[entity],
                mirror.as_mut(),
                render_lanes,
            )
        });
        let has_effects = queue.as_ref().is_some_and(|q| q.has_effects());
        self.store.queue[s] = queue;
        if current != INVALID {
            self.store.queue[current as usize] = mirror;
        }

        let (applied, forced) = match processed {
            Some(p) => {
                self.store.lanes[s] = p.remaining_lanes;
                self.store.state[s] = Some(p.state);
                if let Some(t) = p.latest_event_time {
                    self.wip.latest_event_time = Some(match self.wip.latest_event_time {
                        Some(latest) => latest.max(t),
                        None => t,
                    });
                }
                (p.applied, p.forced)
            }
            None => (false, false),
        };

        if current != INVALID
            && !applied
            && !forced
            && !captured
            && self.same_component(slot, current)
        {
            return self.bailout(slot);
        }

        // -- Render --
        let show_fallback = captured
            && flags.contains(NodeFlags::SHOW_FALLBACK)
            && component.is_suspense_boundary();
        let outcome = match self.store.state_at(slot) {
            Some(state) if show_fallback => RenderOutcome::Ready(component.fallback(state)),
            Some(state) => component.render(state),
            None => RenderOutcome::Ready(Vec::new()),
        };

        match outcome {
            RenderOutcome::Ready(children) => {
                self.store.showing_fallback[s] = show_fallback;
                reconcile_children(
                    self.store,
                    slot,
                    children,
                    self.wip.root,
                    self.wip.pass,
                    &mut self.wip.created,
                );
                if current != INVALID {
                    self.store.flags[s].insert(NodeFlags::UPDATE);
                }
                if has_effects {
                    self.store.flags[s].insert(NodeFlags::CALLBACK);
                }
                self.store.first_child[s]
            }
            RenderOutcome::Pending(handle) => {
                self.throw_pending(slot, handle);
                INVALID
            }
            RenderOutcome::Failed(error) => {
                self.throw_error(slot, error);
                INVALID
            }
        }
    }

    /// Completes `slot` and its finished ancestors. Returns the next unit to
    /// begin, or [`INVALID`] when the root completed.
    fn complete_unit(&mut self, slot: u32) -> u32 {
        let mut completed = slot;
        loop {
            let c = completed as usize;
            let parent = self.store.parent[c];
            let flags = self.store.flags[c];

            if !flags.contains(NodeFlags::INCOMPLETE) {
                self.store.bubble_child_lanes(completed);
                if parent != INVALID
                    && !self.store.flags[parent as usize].contains(NodeFlags::INCOMPLETE)
                {
                    let mut effects = core::mem::take(&mut self.store.effects[c]);
                    if flags.intersects(NodeFlags::EFFECTS) {
                        effects.push(PendingEffect::Node(completed));
                    }
                    self.store.effects[parent as usize].append(&mut effects);
                }
                #[cfg(feature = "trace-rich")]
                self.trace_unit(completed, UnitKind::Complete);
            } else if flags.contains(NodeFlags::SHOULD_CAPTURE) {
                let f = &mut self.store.flags[c];
                f.remove(NodeFlags::INCOMPLETE);
                f.remove(NodeFlags::SHOULD_CAPTURE);
                f.insert(NodeFlags::DID_CAPTURE);
                #[cfg(feature = "trace-rich")]
                self.trace_unit(completed, UnitKind::Unwind);
                return completed;
            } else {
                if parent != INVALID {
                    self.store.flags[parent as usize].insert(NodeFlags::INCOMPLETE);
                    self.store.effects[parent as usize].clear();
                }
                #[cfg(feature = "trace-rich")]
                self.trace_unit(completed, UnitKind::Unwind);
            }

            let sibling = self.store.next_sibling[c];
            if sibling != INVALID {
                return sibling;
            }
            if parent == INVALID {
                return INVALID;
            }
            completed = parent;
        }
    }

    fn nearest_ancestor(&self, slot: u32, accept: impl Fn(u32) -> bool) -> Option<u32> {
        let mut p = self.store.parent[slot as usize];
        while p != INVALID {
            if !self.store.flags[p as usize].contains(NodeFlags::DID_CAPTURE) && accept(p) {
                return Some(p);
            }
            p = self.store.parent[p as usize];
        }
        None
    }

    fn throw_error(&mut self, slot: u32, error: RenderError) {
        self.store.flags[slot as usize].insert(NodeFlags::INCOMPLETE);
        let store = &*self.store;
        let boundary = self.nearest_ancestor(slot, |p| {
            store.component[p as usize]
                .as_ref()
                .is_some_and(|c| c.captures_errors())
        });

        let Some(boundary) = boundary else {
            self.wip.status = ExitStatus::FatalErrored;
            self.wip.fatal_error = Some(error);
            self.wip.cursor = INVALID;
            return;
        };

        let b = boundary as usize;
        let Some(component) = self.store.component_at(boundary) else {
            return;
        };
        let lane = self.wip.lanes.least_urgent().unwrap_or(Lane::NONE);
        let mut update = Update::capture(Rc::new(move |state: &S| {
            component.recover(state, &error)
        }));
        update.lane = lane;
        if let Some(queue) = self.store.queue[b].as_mut() {
            queue.push_captured(update);
        }
        self.store.lanes[b] |= lane;
        self.store.flags[b].insert(NodeFlags::SHOULD_CAPTURE);
        self.wip.mark_error();
    }

    fn throw_pending(&mut self, slot: u32, handle: WaitHandle) {
        let store = &*self.store;
        let boundary = self.nearest_ancestor(slot, |p| {
            store.component[p as usize]
                .as_ref()
                .is_some_and(|c| c.is_suspense_boundary())
        });

        let Some(boundary) = boundary else {
            self.throw_error(slot, RenderError::missing_fallback());
            return;
        };

        self.store.flags[slot as usize].insert(NodeFlags::INCOMPLETE);
        let wait = Wait {
            handle,
            root: self.wip.root,
            lanes: self.wip.lanes,
            boundary: self.store.node_id(boundary),
        };
        if !self.waits.contains(&wait) {
            self.waits.push(wait);
        }

        let b = boundary as usize;
        self.store.flags[b].insert(NodeFlags::SHOULD_CAPTURE);
        self.store.flags[b].insert(NodeFlags::SHOW_FALLBACK);

        let current = self.store.alternate[b];
        let committed = boundary != self.wip.root_slot || self.wip.root_mounted;
        let showing_content = current != INVALID
            && committed
            && !self.store.showing_fallback[current as usize];
        if showing_content && !self.wip.lanes.intersects(LaneClass::Default.and_more_urgent()) {
            self.wip.mark_suspended_with_delay();
        } else {
            self.wip.mark_suspended();
        }
    }
}

impl<S: MergeState, H: Host<S>> SchedulerContext<S, H> {
    /// Throws away the pass in flight, freeing what it allocated.
    pub(crate) fn discard_work_in_progress(&mut self, reason: DiscardReason) {
        if let Some(wip) = self.wip.take() {
            self.release_pass(wip.root, wip.pass, &wip.created, reason);
        }
    }

    /// Throws away finished work that has not committed yet.
    pub(crate) fn discard_finished(&mut self, root: RootId, reason: DiscardReason) {
        let r = &mut self.roots[root.0 as usize];
        if let Some(handle) = r.timeout.take() {
            self.host.cancel(handle);
        }
        if let Some(finished) = r.finished.take() {
            self.release_pass(root, finished.pass, &finished.created, reason);
        }
    }

    fn release_pass(&mut self, root: RootId, pass: u32, created: &[u32], reason: DiscardReason) {
        self.tracer.pass_discard(&PassDiscardEvent {
            pass,
            root,
            reason,
            timestamp: self.host.now(),
        });
        self.store.release_unadopted(created);
    }

    fn prepare_fresh_stack(&mut self, root: RootId, lanes: Lanes, sync: bool) -> WorkInProgress {
        self.discard_finished(root, DiscardReason::Superseded);
        self.discard_work_in_progress(DiscardReason::Preempted);

        self.pass = self.pass.wrapping_add(1);
        let pass = self.pass;
        let current = self.roots[root.0 as usize].current;
        let root_mounted = self.roots[root.0 as usize].mounted;
        let mut created = Vec::new();
        let root_slot = self.store.create_work_in_progress(current, pass, &mut created);
        self.tracer.pass_begin(&PassBeginEvent {
            pass,
            root,
            lanes,
            sync,
            timestamp: self.host.now(),
        });
        WorkInProgress {
            root,
            root_slot,
            root_mounted,
            lanes,
            cursor: root_slot,
            status: ExitStatus::Incomplete,
            fatal_error: None,
            updated_lanes: Lanes::NONE,
            pinged_lanes: Lanes::NONE,
            latest_event_time: None,
            created,
            pass,
            units: 0,
        }
    }

    /// Renders `root` at `lanes`, continuing the pass in flight if it matches
    /// and starting fresh otherwise.
    ///
    /// A concurrent render returns [`ExitStatus::Incomplete`] when the host
    /// asks it to yield; the pass stays in flight.
    pub(crate) fn render_root(&mut self, root: RootId, lanes: Lanes, sync: bool) -> ExitStatus {
        let mut wip = match self.wip.take() {
            Some(wip) if wip.root == root && wip.lanes == lanes => wip,
            other => {
                self.wip = other;
                self.prepare_fresh_stack(root, lanes, sync)
            }
        };

        self.tracer.phase_begin(&PhaseBeginEvent {
            pass: wip.pass,
            phase: PhaseKind::Render,
            timestamp: self.host.now(),
        });
        let mut yielded = false;
        {
            let mut scope = RenderScope {
                store: &mut self.store,
                wip: &mut wip,
                waits: &mut self.waits,
                tracer: &mut self.tracer,
            };
            while scope.wip.cursor != INVALID {
                if !sync && self.host.should_yield() {
                    yielded = true;
                    break;
                }
                scope.perform_unit();
            }
        }
        let now = self.host.now();
        self.tracer.phase_end(&PhaseEndEvent {
            pass: wip.pass,
            phase: PhaseKind::Render,
            timestamp: now,
        });

        let status = if yielded {
            self.tracer.pass_yield(&PassYieldEvent {
                pass: wip.pass,
                root,
                units: wip.units,
                timestamp: now,
            });
            ExitStatus::Incomplete
        } else {
            if wip.status == ExitStatus::Incomplete {
                wip.status = ExitStatus::Completed;
            }
            self.tracer.pass_end(&PassEndEvent {
                pass: wip.pass,
                root,
                status: wip.status,
                units: wip.units,
                timestamp: now,
            });
            wip.status
        };
        self.wip = Some(wip);
        status
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::{String, ToString};
    use alloc::vec;

    use super::*;
    use crate::component::{Component, Element, Key, component_fn, leaf};
    use crate::root::RootState;
    use crate::update_queue::SharedQueue;

    /// A store holding a committed root with the given component.
    fn mounted(component: Rc<dyn Component<String>>) -> (NodeStore<String>, RootState) {
        let mut store = NodeStore::new();
        let e = store.create_entity(RootId(0));
        let slot = store.alloc_slot(e, Key(0), component, String::new());
        store.entity_slot[e as usize] = slot;
        (store, RootState::new(e, slot))
    }

    fn run(store: &mut NodeStore<String>, root: &RootState, lanes: Lanes) -> WorkInProgress {
        let mut created = Vec::new();
        let slot = store.create_work_in_progress(root.current, 1, &mut created);
        let mut wip = WorkInProgress {
            root: RootId(0),
            root_slot: slot,
            root_mounted: true,
            lanes,
            cursor: slot,
            status: ExitStatus::Incomplete,
            fatal_error: None,
            updated_lanes: Lanes::NONE,
            pinged_lanes: Lanes::NONE,
            latest_event_time: None,
            created,
            pass: 1,
            units: 0,
        };
        let mut waits = Vec::new();
        let mut tracer = Tracer::none();
        let mut scope = RenderScope {
            store,
            wip: &mut wip,
            waits: &mut waits,
            tracer: &mut tracer,
        };
        while scope.wip.cursor != INVALID {
            scope.perform_unit();
        }
        wip
    }

    fn force(store: &mut NodeStore<String>, root: &RootState) {
        store.entity_pending[root.entity as usize] = {
            let mut q = SharedQueue::new();
            q.enqueue(Update::force().with_lane(Lane::SYNC, HostTime(5)));
            q
        };
        store.mark_update_lane(root.current, Lane::SYNC);
    }

    #[test]
    fn untouched_root_bails_out() {
        let (mut store, root) = mounted(leaf());
        let wip = run(&mut store, &root, Lanes::from(Lane::SYNC));
        assert_eq!(wip.units, 1);
        assert!(
            !store.flags[wip.root_slot as usize].contains(NodeFlags::UPDATE),
            "bailout does not render"
        );
    }

    #[test]
    fn children_complete_into_root_effect_list() {
        let child = leaf::<String>();
        let parent = component_fn(move |_: &String| {
            RenderOutcome::Ready(vec![
                Element::new(Key(1), child.clone(), String::new()),
                Element::new(Key(2), child.clone(), String::new()),
            ])
        });
        let (mut store, root) = mounted(parent);
        force(&mut store, &root);
        let wip = run(&mut store, &root, Lanes::from(Lane::SYNC));

        assert_eq!(wip.status, ExitStatus::Incomplete, "caller sets Completed");
        assert_eq!(wip.units, 3);
        assert_eq!(wip.latest_event_time, Some(HostTime(5)));
        let effects = &store.effects[wip.root_slot as usize];
        assert_eq!(effects.len(), 2, "both placements");
        assert!(
            store.flags[wip.root_slot as usize].contains(NodeFlags::UPDATE),
            "re-rendered root"
        );
    }

    #[test]
    fn uncaptured_error_is_fatal() {
        let broken = component_fn(|_: &String| RenderOutcome::Failed(RenderError::new("boom")));
        let (mut store, root) = mounted(broken);
        force(&mut store, &root);
        let wip = run(&mut store, &root, Lanes::from(Lane::SYNC));
        assert_eq!(wip.status, ExitStatus::FatalErrored);
        assert_eq!(wip.fatal_error, Some(RenderError::new("boom")));
    }

    struct Catcher {
        child: Rc<dyn Component<String>>,
    }

    impl Component<String> for Catcher {
        fn render(&self, state: &String) -> RenderOutcome<Vec<Element<String>>> {
            if state.starts_with("recovered") {
                RenderOutcome::Ready(Vec::new())
            } else {
                RenderOutcome::Ready(vec![Element::new(Key(1), self.child.clone(), String::new())])
            }
        }

        fn captures_errors(&self) -> bool {
            true
        }

        fn recover(&self, _: &String, error: &RenderError) -> String {
            let mut s = "recovered: ".to_string();
            s.push_str(error.message());
            s
        }
    }

    #[test]
    fn captured_error_renders_recovery() {
        let broken = component_fn(|_: &String| RenderOutcome::Failed(RenderError::new("boom")));
        let (mut store, root) = mounted(Rc::new(Catcher { child: broken }));
        force(&mut store, &root);
        let wip = run(&mut store, &root, Lanes::from(Lane::SYNC));

        assert_eq!(wip.status, ExitStatus::Errored);
        assert_eq!(
            store.state[wip.root_slot as usize].as_deref(),
            Some("recovered: boom")
        );
        assert_eq!(
            store.first_child[wip.root_slot as usize],
            INVALID,
            "recovery rendered no children"
        );
    }
}
