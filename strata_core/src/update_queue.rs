// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-node update queues with rebase-on-skip replay.
//!
//! Producers append [`Update`]s to an entity's [`SharedQueue`]. The work loop
//! is the only consumer: [`UpdateQueue::process`] splices the shared list
//! onto the node's base list and replays it at a given set of render lanes.
//!
//! # Rebasing
//!
//! An update whose lane is not being rendered is *skipped*: it stays in the
//! base list, and the state just before it becomes the new base state. Every
//! update after the first skip also stays in the base list, even when it is
//! applied now, so that a later pass replays the full suffix in insertion
//! order from the rebased state:
//!
//! ```text
//!  base ""   A(1) B(2) C(1) D(2)
//!
//!  render {1}:  state "AC"   base "A"   kept [B(2), C(none), D(2)]
//!  render {2}:  state "ABCD" (same as applying all four at once)
//! ```
//!
//! A kept copy of an already-applied update carries [`Lane::NONE`], which is
//! included in every render set. It also loses its callback, so a callback
//! runs exactly once per update.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::lane::{Lane, LaneClass, Lanes};
use crate::time::HostTime;
use crate::tree::NodeId;

/// Node state that supports shallow merging.
pub trait MergeState: Clone + 'static {
    /// Returns `self` with `partial` merged over it.
    fn merge(&self, partial: &Self) -> Self;
}

impl MergeState for String {
    fn merge(&self, partial: &Self) -> Self {
        partial.clone()
    }
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> MergeState for BTreeMap<K, V> {
    fn merge(&self, partial: &Self) -> Self {
        let mut merged = self.clone();
        for (k, v) in partial {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// How an update combines with the previous state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateTag {
    /// The payload replaces the state.
    Replace,
    /// The payload is shallow-merged over the state.
    Merge,
    /// No state change, but the node re-renders.
    Force,
    /// A recovery produced by an error boundary. Merges like [`Merge`](Self::Merge).
    Capture,
}

/// Function from the previous state to a new (or partial) state.
pub type Reducer<S> = Rc<dyn Fn(&S) -> S>;

/// The data an update carries.
#[derive(Clone)]
pub enum Payload<S> {
    /// Nothing. A merge of an empty payload is a no-op.
    Empty,
    /// A literal value.
    Value(S),
    /// A value computed from the previous state.
    Reducer(Reducer<S>),
}

impl<S: Clone> Payload<S> {
    fn resolve(&self, prev: &S) -> Option<S> {
        match self {
            Self::Empty => None,
            Self::Value(v) => Some(v.clone()),
            Self::Reducer(f) => Some(f(prev)),
        }
    }
}

impl<S> fmt::Debug for Payload<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Reducer(_) => f.write_str("Reducer(..)"),
        }
    }
}

/// A commit callback. Receives the node, its committed state, and an
/// [`Updater`] for scheduling follow-up work.
pub type Callback<S> = Rc<dyn Fn(NodeId, &S, &mut Updater<S>)>;

/// When a callback runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// During the layout phase of the commit that applied the update.
    Layout,
    /// In the deferred drain after that commit.
    Passive,
}

/// A callback waiting for its update to commit.
#[derive(Clone)]
pub struct QueuedCallback<S> {
    pub(crate) kind: CallbackKind,
    pub(crate) callback: Callback<S>,
}

impl<S> QueuedCallback<S> {
    /// Returns when the callback runs.
    #[must_use]
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }
}

impl<S> fmt::Debug for QueuedCallback<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueuedCallback({:?})", self.kind)
    }
}

/// A pending state mutation.
///
/// Built with one of the constructors, optionally given a callback, then
/// handed to [`SchedulerContext::enqueue`](crate::scheduler::SchedulerContext::enqueue),
/// which assigns its lane and event time.
#[derive(Clone)]
pub struct Update<S> {
    pub(crate) lane: Lane,
    pub(crate) event_time: Option<HostTime>,
    pub(crate) tag: UpdateTag,
    pub(crate) payload: Payload<S>,
    pub(crate) callback: Option<QueuedCallback<S>>,
}

impl<S: MergeState> Update<S> {
    fn with_tag(tag: UpdateTag, payload: Payload<S>) -> Self {
        Self {
            lane: Lane::NONE,
            event_time: None,
            tag,
            payload,
            callback: None,
        }
    }

    /// Replaces the state with `state`.
    #[must_use]
    pub fn replace(state: S) -> Self {
        Self::with_tag(UpdateTag::Replace, Payload::Value(state))
    }

    /// Replaces the state with `f(previous)`.
    #[must_use]
    pub fn reduce(f: impl Fn(&S) -> S + 'static) -> Self {
        Self::with_tag(UpdateTag::Replace, Payload::Reducer(Rc::new(f)))
    }

    /// Merges `partial` over the state.
    #[must_use]
    pub fn merge(partial: S) -> Self {
        Self::with_tag(UpdateTag::Merge, Payload::Value(partial))
    }

    /// Merges `f(previous)` over the state.
    #[must_use]
    pub fn merge_with(f: impl Fn(&S) -> S + 'static) -> Self {
        Self::with_tag(UpdateTag::Merge, Payload::Reducer(Rc::new(f)))
    }

    /// Re-renders the node without changing its state.
    #[must_use]
    pub fn force() -> Self {
        Self::with_tag(UpdateTag::Force, Payload::Empty)
    }

    pub(crate) fn retry() -> Self {
        Self::with_tag(UpdateTag::Merge, Payload::Empty)
    }

    pub(crate) fn capture(recover: Reducer<S>) -> Self {
        Self::with_tag(UpdateTag::Capture, Payload::Reducer(recover))
    }

    /// Runs `callback` during the layout phase of the commit that applies
    /// this update.
    #[must_use]
    pub fn on_commit(mut self, callback: impl Fn(NodeId, &S, &mut Updater<S>) + 'static) -> Self {
        self.callback = Some(QueuedCallback {
            kind: CallbackKind::Layout,
            callback: Rc::new(callback),
        });
        self
    }

    /// Runs `callback` in the deferred drain after the commit that applies
    /// this update.
    #[must_use]
    pub fn after_commit(
        mut self,
        callback: impl Fn(NodeId, &S, &mut Updater<S>) + 'static,
    ) -> Self {
        self.callback = Some(QueuedCallback {
            kind: CallbackKind::Passive,
            callback: Rc::new(callback),
        });
        self
    }

    /// Assigns the lane and event time.
    ///
    /// [`SchedulerContext::enqueue`](crate::scheduler::SchedulerContext::enqueue)
    /// does this itself; call it directly only when driving an
    /// [`UpdateQueue`] by hand.
    #[must_use]
    pub fn with_lane(mut self, lane: Lane, event_time: HostTime) -> Self {
        self.lane = lane;
        self.event_time = Some(event_time);
        self
    }

    /// Returns the assigned lane.
    #[must_use]
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> UpdateTag {
        self.tag
    }

    /// Returns the event time, if one was assigned.
    #[must_use]
    pub fn event_time(&self) -> Option<HostTime> {
        self.event_time
    }

    fn apply(&self, prev: &S) -> S {
        match self.tag {
            UpdateTag::Replace => self.payload.resolve(prev).unwrap_or_else(|| prev.clone()),
            UpdateTag::Merge | UpdateTag::Capture => match self.payload.resolve(prev) {
                Some(partial) => prev.merge(&partial),
                None => prev.clone(),
            },
            UpdateTag::Force => prev.clone(),
        }
    }

    fn rebased(&self) -> Self {
        Self {
            lane: Lane::NONE,
            event_time: self.event_time,
            tag: self.tag,
            payload: self.payload.clone(),
            callback: None,
        }
    }
}

impl<S> fmt::Debug for Update<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("lane", &self.lane)
            .field("tag", &self.tag)
            .field("payload", &self.payload)
            .field("callback", &self.callback.as_ref().map(|c| c.kind))
            .finish()
    }
}

/// Collects updates requested from inside commit callbacks.
///
/// Requests are enqueued after the commit finishes, in request order.
pub struct Updater<S> {
    requests: Vec<(NodeId, LaneClass, Update<S>)>,
}

impl<S> Updater<S> {
    pub(crate) fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    /// Requests `update` on `node` in a lane of `class`.
    pub fn enqueue(&mut self, node: NodeId, class: LaneClass, update: Update<S>) {
        self.requests.push((node, class, update));
    }

    /// Returns the number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if nothing was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn into_requests(self) -> Vec<(NodeId, LaneClass, Update<S>)> {
        self.requests
    }
}

impl<S> fmt::Debug for Updater<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater")
            .field("requests", &self.requests.len())
            .finish()
    }
}

/// Producer side of a node's updates, shared by both instances of the node.
#[derive(Clone)]
pub struct SharedQueue<S> {
    pending: Vec<Update<S>>,
}

impl<S> Default for SharedQueue<S> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<S> SharedQueue<S> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an update.
    pub fn enqueue(&mut self, update: Update<S>) {
        self.pending.push(update);
    }

    /// Returns the number of updates not yet spliced into a base list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn take(&mut self) -> Vec<Update<S>> {
        core::mem::take(&mut self.pending)
    }
}

impl<S> fmt::Debug for SharedQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pending.iter()).finish()
    }
}

/// The result of [`UpdateQueue::process`].
#[derive(Clone, Debug)]
pub struct Processed<S> {
    /// State after applying every included update.
    pub state: S,
    /// Lanes of the updates that were skipped.
    pub remaining_lanes: Lanes,
    /// Whether at least one update was applied.
    pub applied: bool,
    /// Whether a [`Force`](UpdateTag::Force) update was applied.
    pub forced: bool,
    /// Latest event time among the applied updates.
    pub latest_event_time: Option<HostTime>,
}

/// Consumer side of a node's updates: base state, base list, and callbacks
/// waiting for commit.
#[derive(Clone)]
pub struct UpdateQueue<S> {
    base_state: S,
    base_updates: Vec<Update<S>>,
    effects: Vec<QueuedCallback<S>>,
}

impl<S: MergeState> UpdateQueue<S> {
    /// Creates a queue with the given base state and no updates.
    #[must_use]
    pub fn new(base_state: S) -> Self {
        Self {
            base_state,
            base_updates: Vec::new(),
            effects: Vec::new(),
        }
    }

    /// Returns the state the base list is replayed from.
    #[must_use]
    pub fn base_state(&self) -> &S {
        &self.base_state
    }

    /// Returns the number of updates retained in the base list.
    #[must_use]
    pub fn base_len(&self) -> usize {
        self.base_updates.len()
    }

    /// Returns the union of the lanes retained in the base list.
    #[must_use]
    pub fn base_lanes(&self) -> Lanes {
        self.base_updates.iter().map(|u| u.lane).collect()
    }

    /// Returns `true` if callbacks are waiting for commit.
    #[must_use]
    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    /// Takes the callbacks collected by [`process`](Self::process), in FIFO
    /// order.
    pub fn take_effects(&mut self) -> Vec<QueuedCallback<S>> {
        core::mem::take(&mut self.effects)
    }

    /// Copy for a new work-in-progress instance. Callbacks belong to the
    /// instance that collected them and are not copied.
    pub(crate) fn clone_for_work(&self) -> Self {
        Self {
            base_state: self.base_state.clone(),
            base_updates: self.base_updates.clone(),
            effects: Vec::new(),
        }
    }

    /// Appends a capture update directly to the base list.
    pub(crate) fn push_captured(&mut self, update: Update<S>) {
        self.base_updates.push(update);
    }

    /// Replays the base list plus everything pending in `shared` at
    /// `render_lanes`.
    ///
    /// Pending updates are also appended to `mirror` (the other instance's
    /// queue), so nothing is lost if this instance is thrown away.
    pub fn process(
        &mut self,
        shared: &mut SharedQueue<S>,
        mut mirror: Option<&mut Self>,
        render_lanes: Lanes,
    ) -> Processed<S> {
        let mut base = core::mem::take(&mut self.base_updates);
        let mut processed = Processed {
            state: self.base_state.clone(),
            remaining_lanes: Lanes::NONE,
            applied: false,
            forced: false,
            latest_event_time: None,
        };
        let mut new_base_state: Option<S> = None;
        let mut new_base: Vec<Update<S>> = Vec::new();
        let mut cursor = 0;

        loop {
            splice(shared, mirror.as_deref_mut(), &mut base);

            while cursor < base.len() {
                let update = &mut base[cursor];
                cursor += 1;

                if !render_lanes.contains(update.lane) {
                    if new_base_state.is_none() {
                        new_base_state = Some(processed.state.clone());
                    }
                    new_base.push(update.clone());
                    processed.remaining_lanes |= update.lane;
                    continue;
                }

                if new_base_state.is_some() {
                    new_base.push(update.rebased());
                }

                processed.state = update.apply(&processed.state);
                processed.applied = true;
                if update.tag == UpdateTag::Force {
                    processed.forced = true;
                }
                if let Some(t) = update.event_time {
                    processed.latest_event_time = Some(match processed.latest_event_time {
                        Some(latest) => latest.max(t),
                        None => t,
                    });
                }
                if let Some(callback) = update.callback.take() {
                    self.effects.push(callback);
                }
            }

            if shared.is_empty() {
                break;
            }
        }

        self.base_state = new_base_state.unwrap_or_else(|| processed.state.clone());
        self.base_updates = new_base;
        processed
    }
}

fn splice<S: Clone>(
    shared: &mut SharedQueue<S>,
    mirror: Option<&mut UpdateQueue<S>>,
    base: &mut Vec<Update<S>>,
) {
    let pending = shared.take();
    if pending.is_empty() {
        return;
    }
    if let Some(mirror) = mirror {
        mirror.base_updates.extend(pending.iter().cloned());
    }
    base.extend(pending);
}

impl<S> fmt::Debug for UpdateQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("base_updates", &self.base_updates)
            .field("effects", &self.effects.len())
            .finish_non_exhaustive()
    }
}
