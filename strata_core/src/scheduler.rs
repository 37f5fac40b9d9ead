// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Root scheduling: which root renders next, at which lanes, and when.
//!
//! [`SchedulerContext`] owns every root, the node store, and the host. The
//! host calls [`run_task`](SchedulerContext::run_task) for each task the
//! context scheduled; everything else (enqueueing updates, resolving
//! resources) is reachable from the outside or from commit callbacks.
//!
//! After any change to a root's lanes, the context re-evaluates it: the next
//! lanes pick a task priority, and an outstanding request at a different
//! priority is cancelled and replaced. A request at the same priority is
//! reused.
//!
//! # Finishing a concurrent pass
//!
//! | Exit status          | Action                                                        |
//! |----------------------|---------------------------------------------------------------|
//! | `Completed`          | Commit, unless a loading delay holds it back.                 |
//! | `Errored`            | Retry once synchronously over all non-offscreen lanes.        |
//! | `FatalErrored`       | Discard, suspend the lanes, report [`ReconcileError::Fatal`]. |
//! | `Suspended`          | Commit the fallback, throttled after a recent fallback.       |
//! | `SuspendedWithDelay` | Keep showing content for a while before committing.           |

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::component::{Element, WaitHandle};
use crate::error::{ReconcileError, RenderError};
use crate::host::{Host, Task, TaskHandle, TaskSource, TaskStatus};
use crate::lane::{ExpirationTimeouts, Lane, LaneClass, Lanes, allocate_lane};
use crate::root::{FinishedWork, RootId, RootState};
use crate::time::{Duration, HostTime, Timebase};
use crate::trace::{
    DiscardReason, LanesEvent, LanesEventKind, ScheduleAction, ScheduleEvent, TraceSink, Tracer,
    UpdateEvent,
};
use crate::tree::{NodeId, NodeStore};
use crate::update_queue::{Callback, MergeState, Update};
use crate::work_loop::{ExitStatus, Wait, WorkInProgress};

/// Holds back a completed commit so a busy indicator that has just appeared
/// does not flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadingDelay {
    /// How long after an event the indicator appears.
    pub busy_delay: Duration,
    /// Minimum time the indicator stays once shown.
    pub busy_min_duration: Duration,
}

/// Configuration for a [`SchedulerContext`].
///
/// All durations are in host ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick rate of the host clock.
    pub timebase: Timebase,
    /// Starvation timeout for sync and input lanes.
    pub blocking_expiration: Duration,
    /// Starvation timeout for default and transition lanes.
    pub normal_expiration: Duration,
    /// Minimum time between two committed fallbacks.
    pub fallback_throttle: Duration,
    /// Commits deferred by less than this run immediately.
    pub min_deferred_commit: Duration,
    /// Synchronous commits in a row that may schedule more synchronous work.
    pub nested_update_limit: u32,
    /// Optional loading delay for completed passes.
    pub loading_delay: Option<LoadingDelay>,
}

impl SchedulerConfig {
    /// Configuration for a millisecond host clock.
    #[must_use]
    pub const fn millis() -> Self {
        Self::for_timebase(Timebase::MILLIS)
    }

    /// Default timeouts expressed in `timebase` ticks.
    #[must_use]
    pub const fn for_timebase(timebase: Timebase) -> Self {
        Self {
            timebase,
            blocking_expiration: Duration::from_millis(1000, timebase),
            normal_expiration: Duration::from_millis(5000, timebase),
            fallback_throttle: Duration::from_millis(500, timebase),
            min_deferred_commit: Duration::from_millis(10, timebase),
            nested_update_limit: 50,
            loading_delay: None,
        }
    }

    /// Returns this configuration with a loading delay.
    #[must_use]
    pub const fn with_loading_delay(mut self, delay: LoadingDelay) -> Self {
        self.loading_delay = Some(delay);
        self
    }

    pub(crate) const fn expiration_timeouts(&self) -> ExpirationTimeouts {
        ExpirationTimeouts {
            blocking: self.blocking_expiration,
            normal: self.normal_expiration,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::millis()
    }
}

/// Rounds an elapsed wait up to the next step a user would notice.
fn just_noticeable(elapsed_ms: u64) -> u64 {
    match elapsed_ms {
        t if t < 120 => 120,
        t if t < 480 => 480,
        t if t < 1080 => 1080,
        t if t < 1920 => 1920,
        t if t < 3000 => 3000,
        t if t < 4320 => 4320,
        t => t.div_ceil(1960) * 1960,
    }
}

/// The reconciler: roots, nodes, and the host that drives them.
pub struct SchedulerContext<S, H> {
    pub(crate) host: H,
    pub(crate) config: SchedulerConfig,
    pub(crate) store: NodeStore<S>,
    pub(crate) roots: Vec<RootState>,

    // -- Render --
    pub(crate) wip: Option<WorkInProgress>,
    pub(crate) pass: u32,
    /// Lanes already handed out during the current host task.
    pub(crate) event_lanes: Option<Lanes>,
    pub(crate) waits: Vec<Wait>,

    // -- Commit --
    pub(crate) pending_passive: Vec<(NodeId, Callback<S>)>,
    pub(crate) passive_task: Option<TaskHandle>,
    pub(crate) nested_count: u32,
    pub(crate) nested_root: Option<RootId>,
    pub(crate) last_fallback_time: Option<HostTime>,

    pub(crate) tracer: Tracer,
}

impl<S, H: fmt::Debug> fmt::Debug for SchedulerContext<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("host", &self.host)
            .field("config", &self.config)
            .field("roots", &self.roots.len())
            .field("wip", &self.wip.as_ref().map(|w| (w.root, w.lanes)))
            .field("waits", &self.waits.len())
            .field("pending_passive", &self.pending_passive.len())
            .finish_non_exhaustive()
    }
}

impl<S: MergeState, H: Host<S>> SchedulerContext<S, H> {
    /// Creates an empty context.
    #[must_use]
    pub fn new(host: H, config: SchedulerConfig) -> Self {
        Self {
            host,
            config,
            store: NodeStore::new(),
            roots: Vec::new(),
            wip: None,
            pass: 0,
            event_lanes: None,
            waits: Vec::new(),
            pending_passive: Vec::new(),
            passive_task: None,
            nested_count: 0,
            nested_root: None,
            last_fallback_time: None,
            tracer: Tracer::none(),
        }
    }

    /// Routes trace events to `sink`.
    ///
    /// Events are only produced with the `trace` feature.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.tracer = Tracer::new(sink);
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The node store.
    #[must_use]
    pub fn store(&self) -> &NodeStore<S> {
        &self.store
    }

    /// The host.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Creates a root rendering `element` and schedules its first render in
    /// `class`.
    pub fn create_root(
        &mut self,
        element: Element<S>,
        class: LaneClass,
    ) -> Result<RootId, ReconcileError> {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "root count is bounded by the u32 slot space"
        )]
        let id = RootId(self.roots.len() as u32);
        let entity = self.store.create_entity(id);
        let slot = self.store.alloc_slot(
            entity,
            element.key,
            element.component,
            element.initial_state,
        );
        self.store.entity_slot[entity as usize] = slot;
        self.roots.push(RootState::new(entity, slot));
        let node = self.store.entity_id(entity);
        self.enqueue(node, class, Update::force())?;
        Ok(id)
    }

    /// The root node of `root`.
    pub fn root_node(&self, root: RootId) -> Result<NodeId, ReconcileError> {
        let r = self.roots.get(root.0 as usize).ok_or(ReconcileError::UnknownRoot(root))?;
        Ok(self.store.entity_id(r.entity))
    }

    /// Scheduling state of `root`.
    #[must_use]
    pub fn root_state(&self, root: RootId) -> Option<&RootState> {
        self.roots.get(root.0 as usize)
    }

    /// Whether nothing is rendering, waiting to commit, or scheduled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.wip.is_none()
            && self.pending_passive.is_empty()
            && self.passive_task.is_none()
            && self
                .roots
                .iter()
                .all(|r| r.callback.is_none() && r.timeout.is_none() && r.finished.is_none())
    }

    fn check_root(&self, root: RootId) -> Result<usize, ReconcileError> {
        let idx = root.0 as usize;
        if idx < self.roots.len() {
            Ok(idx)
        } else {
            Err(ReconcileError::UnknownRoot(root))
        }
    }

    fn is_current_callback(&self, root: RootId, handle: TaskHandle) -> bool {
        self.roots
            .get(root.0 as usize)
            .and_then(|r| r.callback)
            .is_some_and(|(h, _)| h == handle)
    }

    // -- Updates --

    /// Enqueues `update` on `node` in a lane of `class` and schedules its
    /// root. Returns the lane picked.
    ///
    /// Updates of one class enqueued during the same host task share a lane
    /// and render together.
    pub fn enqueue(
        &mut self,
        node: NodeId,
        class: LaneClass,
        update: Update<S>,
    ) -> Result<Lane, ReconcileError> {
        self.check_nested_updates()?;
        let (root, slot) = self.resolve_node(node)?;
        let lane = self.request_update_lane(class);
        let now = self.host.now();
        self.schedule_update(root, node, slot, class, update.with_lane(lane, now));
        Ok(lane)
    }

    fn check_nested_updates(&mut self) -> Result<(), ReconcileError> {
        if let Some(root) = self.nested_root
            && self.nested_count > self.config.nested_update_limit
        {
            self.nested_count = 0;
            self.nested_root = None;
            return Err(ReconcileError::NestedUpdateLimit {
                root,
                limit: self.config.nested_update_limit,
            });
        }
        Ok(())
    }

    fn resolve_node(&self, node: NodeId) -> Result<(RootId, u32), ReconcileError> {
        if !self.store.is_alive(node) {
            return Err(ReconcileError::StaleNode(node));
        }
        let slot = self
            .store
            .current_slot(node)
            .ok_or(ReconcileError::Detached(node))?;
        Ok((self.store.entity_root[node.index() as usize], slot))
    }

    fn request_update_lane(&mut self, class: LaneClass) -> Lane {
        let wip = &self.wip;
        let used = *self
            .event_lanes
            .get_or_insert_with(|| wip.as_ref().map_or(Lanes::NONE, |w| w.lanes));
        allocate_lane(class, used)
    }

    fn schedule_update(
        &mut self,
        root: RootId,
        node: NodeId,
        slot: u32,
        class: LaneClass,
        update: Update<S>,
    ) {
        let lane = update.lane;
        let now = self.host.now();
        self.store.entity_pending[node.index() as usize].enqueue(update);
        self.store.mark_update_lane(slot, lane);

        let r = &mut self.roots[root.0 as usize];
        r.mark_updated(lane, now);
        if let Some(wip) = self.wip.as_mut()
            && wip.root == root
        {
            wip.updated_lanes |= lane;
            if wip.status == ExitStatus::SuspendedWithDelay {
                // The pass can never commit; park it so the new update
                // renders first.
                r.mark_suspended(wip.lanes);
                self.tracer.lanes(&LanesEvent {
                    root,
                    kind: LanesEventKind::Suspended,
                    lanes: wip.lanes,
                    timestamp: now,
                });
            }
        }
        self.tracer.update(&UpdateEvent {
            root,
            node,
            lane,
            class,
            event_time: now,
        });
        self.ensure_scheduled(root);
    }

    /// Makes `lanes` of `root` always render together.
    pub fn entangle(&mut self, root: RootId, lanes: Lanes) -> Result<(), ReconcileError> {
        let idx = self.check_root(root)?;
        self.roots[idx].mark_entangled(lanes);
        self.ensure_scheduled(root);
        Ok(())
    }

    // -- Resources --

    /// Wakes `lanes` of `root` after a resource they waited on became ready.
    ///
    /// If the pass in flight rendered exactly those lanes and can only end
    /// in a fallback, it restarts.
    pub fn ping(&mut self, root: RootId, lanes: Lanes) -> Result<(), ReconcileError> {
        let idx = self.check_root(root)?;
        let now = self.host.now();
        let woken = self.roots[idx].mark_pinged(lanes);
        if !woken.is_empty() {
            self.tracer.lanes(&LanesEvent {
                root,
                kind: LanesEventKind::Pinged,
                lanes: woken,
                timestamp: now,
            });
        }

        let throttled = self
            .last_fallback_time
            .is_some_and(|t| now.saturating_duration_since(t) < self.config.fallback_throttle);
        let mut restart = false;
        if let Some(wip) = self.wip.as_mut()
            && wip.root == root
            && wip.lanes.is_subset_of(lanes)
        {
            restart = match wip.status {
                ExitStatus::SuspendedWithDelay => true,
                ExitStatus::Suspended => wip.latest_event_time.is_none() && throttled,
                _ => false,
            };
            if !restart {
                wip.pinged_lanes |= lanes;
            }
        }
        if restart {
            self.discard_work_in_progress(DiscardReason::Pinged);
        }
        self.ensure_scheduled(root);
        Ok(())
    }

    /// Reports that the resource behind `handle` is ready.
    ///
    /// Every pass that waited on it is pinged, and each boundary that showed
    /// a fallback for it gets a retry update.
    pub fn resolve(&mut self, handle: WaitHandle) -> Result<(), ReconcileError> {
        let (matched, rest): (Vec<Wait>, Vec<Wait>) =
            self.waits.drain(..).partition(|w| w.handle == handle);
        self.waits = rest;

        let mut retried: Vec<NodeId> = Vec::new();
        for wait in matched {
            self.ping(wait.root, wait.lanes)?;
            if retried.contains(&wait.boundary) {
                continue;
            }
            retried.push(wait.boundary);
            let Ok((root, slot)) = self.resolve_node(wait.boundary) else {
                continue;
            };
            let mut update = Update::retry();
            update.lane = allocate_lane(LaneClass::Retry, self.roots[root.0 as usize].pending);
            self.schedule_update(root, wait.boundary, slot, LaneClass::Retry, update);
        }
        Ok(())
    }

    // -- Root scheduling --

    /// Re-evaluates the host request for `root`.
    pub(crate) fn ensure_scheduled(&mut self, root: RootId) {
        let idx = root.0 as usize;
        let now = self.host.now();
        let timeouts = self.config.expiration_timeouts();
        let wip_lanes = match &self.wip {
            Some(w) if w.root == root => w.lanes,
            _ => Lanes::NONE,
        };

        let r = &mut self.roots[idx];
        let expired = r.mark_starved_lanes_as_expired(now, &timeouts);
        if !expired.is_empty() {
            self.tracer.lanes(&LanesEvent {
                root,
                kind: LanesEventKind::Expired,
                lanes: expired,
                timestamp: now,
            });
        }

        let Some((lanes, class)) = r.next_lanes(wip_lanes) else {
            if let Some((handle, priority)) = r.callback.take() {
                self.host.cancel(handle);
                self.tracer.schedule(&ScheduleEvent {
                    root,
                    handle,
                    priority,
                    lanes: Lanes::NONE,
                    action: ScheduleAction::Cancelled,
                    timestamp: now,
                });
            }
            return;
        };

        let priority = class.task_priority();
        if let Some((handle, existing)) = r.callback {
            if existing == priority {
                return;
            }
            r.callback = None;
            self.host.cancel(handle);
            self.tracer.schedule(&ScheduleEvent {
                root,
                handle,
                priority: existing,
                lanes,
                action: ScheduleAction::Cancelled,
                timestamp: now,
            });
        }

        let task = if class == LaneClass::Sync {
            Task::SyncWork(root)
        } else {
            Task::ConcurrentWork(root)
        };
        let handle = self.host.schedule(priority, task);
        r.callback = Some((handle, priority));
        self.tracer.schedule(&ScheduleEvent {
            root,
            handle,
            priority,
            lanes,
            action: ScheduleAction::Scheduled,
            timestamp: now,
        });
    }

    // -- Tasks --

    /// Runs a task previously handed to the host.
    ///
    /// A stale task (cancelled or replaced since) does nothing and reports
    /// [`TaskStatus::Done`].
    pub fn run_task(&mut self, handle: TaskHandle, task: Task) -> Result<TaskStatus, ReconcileError> {
        self.event_lanes = None;
        let result = match task {
            Task::SyncWork(root) => self.perform_sync_work(root, handle),
            Task::ConcurrentWork(root) => self.perform_concurrent_work(root, handle),
            Task::CommitFinished(root) => self.commit_finished(root, handle),
            Task::FlushPassive => {
                if self.passive_task == Some(handle) {
                    self.passive_task = None;
                }
                self.flush_passive_effects().map(|_| TaskStatus::Done)
            }
        };
        self.event_lanes = None;
        result
    }

    fn commit_finished(&mut self, root: RootId, handle: TaskHandle) -> Result<TaskStatus, ReconcileError> {
        let idx = self.check_root(root)?;
        if self.roots[idx].timeout != Some(handle) {
            return Ok(TaskStatus::Done);
        }
        self.roots[idx].timeout = None;
        self.commit_root(root)?;
        Ok(TaskStatus::Done)
    }

    fn perform_sync_work(&mut self, root: RootId, handle: TaskHandle) -> Result<TaskStatus, ReconcileError> {
        let idx = self.check_root(root)?;
        if !self.is_current_callback(root, handle) {
            return Ok(TaskStatus::Done);
        }
        self.flush_passive_effects()?;
        if !self.is_current_callback(root, handle) {
            return Ok(TaskStatus::Done);
        }

        let r = &self.roots[idx];
        let lanes = match &self.wip {
            Some(w) if w.root == root && w.lanes.intersects(r.expired) => w.lanes,
            _ => match r.next_lanes(Lanes::NONE) {
                Some((lanes, _)) => lanes,
                None => {
                    self.ensure_scheduled(root);
                    return Ok(TaskStatus::Done);
                }
            },
        };

        let mut status = self.render_root(root, lanes, true);
        if status == ExitStatus::Errored {
            status = self.retry_after_error(root, status);
        }
        if status == ExitStatus::FatalErrored {
            return Err(self.fail_root(root));
        }
        self.finish_work_in_progress(root, status);
        self.commit_root(root)?;
        Ok(TaskStatus::Done)
    }

    fn perform_concurrent_work(
        &mut self,
        root: RootId,
        handle: TaskHandle,
    ) -> Result<TaskStatus, ReconcileError> {
        let idx = self.check_root(root)?;
        if !self.is_current_callback(root, handle) {
            return Ok(TaskStatus::Done);
        }
        self.flush_passive_effects()?;
        if !self.is_current_callback(root, handle) {
            return Ok(TaskStatus::Done);
        }

        let wip_lanes = match &self.wip {
            Some(w) if w.root == root => w.lanes,
            _ => Lanes::NONE,
        };
        let Some((lanes, _)) = self.roots[idx].next_lanes(wip_lanes) else {
            self.ensure_scheduled(root);
            return Ok(TaskStatus::Done);
        };

        let mut status = self.render_root(root, lanes, false);
        if status != ExitStatus::Incomplete {
            let interleaved = self
                .wip
                .as_ref()
                .is_some_and(|w| w.updated_lanes.intersects(w.lanes));
            if interleaved {
                self.discard_work_in_progress(DiscardReason::Interleaved);
            } else {
                if status == ExitStatus::Errored {
                    status = self.retry_after_error(root, status);
                }
                if status == ExitStatus::FatalErrored {
                    return Err(self.fail_root(root));
                }
                self.finish_work_in_progress(root, status);
                self.finish_concurrent_render(root)?;
            }
        }

        self.ensure_scheduled(root);
        Ok(if self.is_current_callback(root, handle) {
            TaskStatus::Continue
        } else {
            TaskStatus::Done
        })
    }

    /// Renders once more, synchronously, over every non-offscreen lane.
    fn retry_after_error(&mut self, root: RootId, status: ExitStatus) -> ExitStatus {
        let retry = self.roots[root.0 as usize]
            .pending
            .difference(LaneClass::Offscreen.lanes());
        if retry.is_empty() {
            return status;
        }
        self.discard_work_in_progress(DiscardReason::Superseded);
        self.render_root(root, retry, true)
    }

    /// Discards a pass that failed without a boundary and parks its lanes.
    fn fail_root(&mut self, root: RootId) -> ReconcileError {
        let (lanes, error) = match self.wip.as_mut() {
            Some(wip) => (wip.lanes, wip.fatal_error.take()),
            None => (Lanes::NONE, None),
        };
        self.discard_work_in_progress(DiscardReason::Fatal);
        self.roots[root.0 as usize].mark_suspended(lanes);
        self.tracer.lanes(&LanesEvent {
            root,
            kind: LanesEventKind::Suspended,
            lanes,
            timestamp: self.host.now(),
        });
        self.ensure_scheduled(root);
        ReconcileError::Fatal {
            root,
            error: error.unwrap_or_else(|| RenderError::new("render failed")),
        }
    }

    /// Moves the pass in flight into the root's finished slot.
    fn finish_work_in_progress(&mut self, root: RootId, status: ExitStatus) {
        if let Some(wip) = self.wip.take() {
            self.roots[root.0 as usize].finished = Some(FinishedWork {
                slot: wip.root_slot,
                lanes: wip.lanes,
                status,
                pass: wip.pass,
                pinged_lanes: wip.pinged_lanes,
                latest_event_time: wip.latest_event_time,
                created: wip.created,
            });
        }
    }

    fn schedule_commit_timeout(&mut self, root: RootId, delay: Duration) {
        let handle = self.host.schedule_timeout(delay, Task::CommitFinished(root));
        self.roots[root.0 as usize].timeout = Some(handle);
    }

    fn suspend_lanes(&mut self, root: RootId, lanes: Lanes) {
        self.roots[root.0 as usize].mark_suspended(lanes);
        self.tracer.lanes(&LanesEvent {
            root,
            kind: LanesEventKind::Suspended,
            lanes,
            timestamp: self.host.now(),
        });
    }

    /// Decides whether finished concurrent work commits now, later, or not
    /// at all.
    fn finish_concurrent_render(&mut self, root: RootId) -> Result<(), ReconcileError> {
        let idx = root.0 as usize;
        let Some(finished) = &self.roots[idx].finished else {
            return Ok(());
        };
        let (status, lanes) = (finished.status, finished.lanes);
        let (pinged, latest) = (finished.pinged_lanes, finished.latest_event_time);
        let now = self.host.now();
        let min_deferred = self.config.min_deferred_commit;

        match status {
            ExitStatus::Suspended => {
                self.suspend_lanes(root, lanes.difference(pinged));
                if latest.is_none()
                    && let Some(last) = self.last_fallback_time
                {
                    let until = last.saturating_add(self.config.fallback_throttle);
                    let wait = until.saturating_duration_since(now);
                    if wait > min_deferred {
                        let r = &mut self.roots[idx];
                        if r.next_lanes(Lanes::NONE).is_some() {
                            return Ok(());
                        }
                        let suspended = r.suspended;
                        if !suspended.is_subset_of(lanes) {
                            r.mark_pinged(suspended);
                            return Ok(());
                        }
                        self.schedule_commit_timeout(root, wait);
                        return Ok(());
                    }
                }
                self.commit_root(root)
            }
            ExitStatus::SuspendedWithDelay => {
                self.suspend_lanes(root, lanes.difference(pinged));
                let r = &mut self.roots[idx];
                if r.next_lanes(Lanes::NONE).is_some() {
                    return Ok(());
                }
                let suspended = r.suspended;
                if !suspended.is_subset_of(lanes) {
                    r.mark_pinged(suspended);
                    return Ok(());
                }
                let tb = self.config.timebase;
                let wait_ms = r.latest_event_time(lanes).map_or(0, |t| {
                    let elapsed = now.saturating_duration_since(t).to_millis(tb);
                    just_noticeable(elapsed) - elapsed
                });
                let wait = Duration::from_millis(wait_ms, tb);
                if wait > min_deferred {
                    self.schedule_commit_timeout(root, wait);
                    return Ok(());
                }
                self.commit_root(root)
            }
            ExitStatus::Completed => {
                if let Some(delay) = self.config.loading_delay
                    && let Some(t) = latest
                {
                    let wait = loading_delay_remaining(delay, now.saturating_duration_since(t));
                    if wait > min_deferred {
                        self.suspend_lanes(root, lanes);
                        self.schedule_commit_timeout(root, wait);
                        return Ok(());
                    }
                }
                self.commit_root(root)
            }
            ExitStatus::Incomplete | ExitStatus::Errored | ExitStatus::FatalErrored => {
                self.commit_root(root)
            }
        }
    }

    // -- Driving --

    /// Runs the next task the host has ready. Returns `false` when none is.
    pub fn run_next(&mut self) -> Result<bool, ReconcileError>
    where
        H: TaskSource,
    {
        let Some((handle, task)) = self.host.next_task() else {
            return Ok(false);
        };
        if self.run_task(handle, task)? == TaskStatus::Continue {
            self.host.resume(handle, task);
        }
        Ok(true)
    }

    /// Runs ready tasks until the host has none left.
    ///
    /// Timeouts that are not due yet stay queued.
    pub fn run_until_idle(&mut self) -> Result<(), ReconcileError>
    where
        H: TaskSource,
    {
        while self.run_next()? {}
        Ok(())
    }
}

/// Time left before a busy indicator shown since `elapsed` may disappear.
fn loading_delay_remaining(delay: LoadingDelay, elapsed: Duration) -> Duration {
    if delay.busy_min_duration == Duration(0) || elapsed <= delay.busy_delay {
        return Duration(0);
    }
    delay
        .busy_delay
        .saturating_add(delay.busy_min_duration)
        .saturating_sub(elapsed)
}
