// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the scheduler context.
//!
//! This module provides a [`TraceSink`] trait with one method per event the
//! context emits: task scheduling, updates, render passes, lane transitions,
//! and commit phases. All method bodies default to no-ops, so implementing
//! only the events you care about is fine.
//!
//! [`Tracer`] owns an optional boxed sink. When the `trace` feature is
//! **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`CommitSummaryBuilder`] collects phase timestamps and effect counts during
//! a commit and produces a [`CommitSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates per-unit [`UnitEvent`]s and the
//!   corresponding `TraceSink` method.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::host::{EffectKind, TaskHandle, TaskPriority};
use crate::lane::{Lane, LaneClass, Lanes};
use crate::root::RootId;
use crate::time::HostTime;
use crate::tree::NodeId;
use crate::work_loop::ExitStatus;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of a render or commit is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// One slice of a render pass.
    Render,
    /// Pre-mutation reads of the old tree.
    Snapshot,
    /// Host insertions, updates, and deletions.
    Mutation,
    /// Tree swap and layout callbacks.
    Layout,
    /// Deferred callbacks.
    Passive,
}

/// Whether a host task was requested or withdrawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScheduleAction {
    /// A task was queued.
    Scheduled,
    /// A queued task was cancelled.
    Cancelled,
}

/// Why a render pass was thrown away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// A more urgent pass (or another root) took over.
    Preempted,
    /// An update landed in the lanes being rendered.
    Interleaved,
    /// A component failed with nothing to capture the error.
    Fatal,
    /// A ping made a restart worthwhile.
    Pinged,
    /// Finished work was replaced before it committed.
    Superseded,
}

/// A root-level lane transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LanesEventKind {
    /// Lanes waited past their expiration time.
    Expired,
    /// Suspended lanes were woken.
    Pinged,
    /// Lanes were parked until pinged or updated.
    Suspended,
}

/// What happened to a node during a render pass.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// The node began rendering.
    Begin,
    /// The node was skipped.
    Bailout,
    /// The node and its subtree completed.
    Complete,
    /// The node unwound after a throw.
    Unwind,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a root's host task is queued or cancelled.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleEvent {
    /// Root the task renders.
    pub root: RootId,
    /// Host task handle.
    pub handle: TaskHandle,
    /// Host priority.
    pub priority: TaskPriority,
    /// Lanes the task was scheduled for.
    pub lanes: Lanes,
    /// Queued or cancelled.
    pub action: ScheduleAction,
    /// Host time of the request.
    pub timestamp: HostTime,
}

/// Emitted when an update is enqueued.
#[derive(Clone, Copy, Debug)]
pub struct UpdateEvent {
    /// Root of the updated node.
    pub root: RootId,
    /// Updated node.
    pub node: NodeId,
    /// Lane the update was assigned.
    pub lane: Lane,
    /// Class the caller requested.
    pub class: LaneClass,
    /// Event time stamped on the update.
    pub event_time: HostTime,
}

/// Emitted when a render pass starts from a fresh stack.
#[derive(Clone, Copy, Debug)]
pub struct PassBeginEvent {
    /// Pass counter.
    pub pass: u32,
    /// Root being rendered.
    pub root: RootId,
    /// Lanes being rendered.
    pub lanes: Lanes,
    /// Whether the pass runs without yielding.
    pub sync: bool,
    /// Host time at the start of the pass.
    pub timestamp: HostTime,
}

/// Emitted when a concurrent pass yields to the host.
#[derive(Clone, Copy, Debug)]
pub struct PassYieldEvent {
    /// Pass counter.
    pub pass: u32,
    /// Root being rendered.
    pub root: RootId,
    /// Units of work done so far in this pass.
    pub units: u32,
    /// Host time of the yield.
    pub timestamp: HostTime,
}

/// Emitted when a render pass reaches an exit status.
#[derive(Clone, Copy, Debug)]
pub struct PassEndEvent {
    /// Pass counter.
    pub pass: u32,
    /// Root that was rendered.
    pub root: RootId,
    /// How the pass ended.
    pub status: ExitStatus,
    /// Units of work done in this pass.
    pub units: u32,
    /// Host time at the end of the pass.
    pub timestamp: HostTime,
}

/// Emitted when a pass (or held finished work) is thrown away.
#[derive(Clone, Copy, Debug)]
pub struct PassDiscardEvent {
    /// Pass counter.
    pub pass: u32,
    /// Root of the pass.
    pub root: RootId,
    /// Why it was thrown away.
    pub reason: DiscardReason,
    /// Host time of the discard.
    pub timestamp: HostTime,
}

/// Emitted when a root marks lanes expired, pinged, or suspended.
#[derive(Clone, Copy, Debug)]
pub struct LanesEvent {
    /// Root whose lanes changed.
    pub root: RootId,
    /// The transition.
    pub kind: LanesEventKind,
    /// Lanes affected.
    pub lanes: Lanes,
    /// Host time of the transition.
    pub timestamp: HostTime,
}

/// Marks the beginning of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Pass counter.
    pub pass: u32,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Pass counter.
    pub pass: u32,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Per-commit summary produced by [`CommitSummaryBuilder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Pass that produced the committed tree.
    pub pass: u32,
    /// Root that committed.
    pub root: RootId,
    /// Lanes the pass rendered.
    pub lanes: Lanes,
    /// Lanes still pending after the commit.
    pub remaining: Lanes,
    /// Host time the commit started.
    pub started: HostTime,
    /// Snapshot phase duration in ticks (0 if not measured).
    pub snapshot_ticks: u64,
    /// Mutation phase duration in ticks (0 if not measured).
    pub mutation_ticks: u64,
    /// Layout phase duration in ticks (0 if not measured).
    pub layout_ticks: u64,
    /// Placement effects applied.
    pub placements: u32,
    /// Update effects applied.
    pub updates: u32,
    /// Deletion effects applied.
    pub deletions: u32,
    /// Layout callbacks run.
    pub callbacks: u32,
}

/// A per-unit work record.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct UnitEvent {
    /// Pass counter.
    pub pass: u32,
    /// Node the unit belongs to.
    pub node: NodeId,
    /// What happened.
    pub kind: UnitKind,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the scheduler context.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a host task is queued or cancelled.
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        _ = e;
    }

    /// Called when an update is enqueued.
    fn on_update(&mut self, e: &UpdateEvent) {
        _ = e;
    }

    /// Called when a render pass starts.
    fn on_pass_begin(&mut self, e: &PassBeginEvent) {
        _ = e;
    }

    /// Called when a concurrent pass yields.
    fn on_pass_yield(&mut self, e: &PassYieldEvent) {
        _ = e;
    }

    /// Called when a render pass reaches an exit status.
    fn on_pass_end(&mut self, e: &PassEndEvent) {
        _ = e;
    }

    /// Called when a pass is thrown away.
    fn on_pass_discard(&mut self, e: &PassDiscardEvent) {
        _ = e;
    }

    /// Called on a root lane transition.
    fn on_lanes(&mut self, e: &LanesEvent) {
        _ = e;
    }

    /// Called at the beginning of a phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called with a per-commit summary.
    fn on_commit_summary(&mut self, s: &CommitSummary) {
        _ = s;
    }

    /// Called for each unit of work (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_unit(&mut self, e: &UnitEvent) {
        _ = e;
    }
}

/// Shares one sink between the context and the code that inspects it.
impl<T: TraceSink + ?Sized> TraceSink for Rc<RefCell<T>> {
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        self.borrow_mut().on_schedule(e);
    }

    fn on_update(&mut self, e: &UpdateEvent) {
        self.borrow_mut().on_update(e);
    }

    fn on_pass_begin(&mut self, e: &PassBeginEvent) {
        self.borrow_mut().on_pass_begin(e);
    }

    fn on_pass_yield(&mut self, e: &PassYieldEvent) {
        self.borrow_mut().on_pass_yield(e);
    }

    fn on_pass_end(&mut self, e: &PassEndEvent) {
        self.borrow_mut().on_pass_end(e);
    }

    fn on_pass_discard(&mut self, e: &PassDiscardEvent) {
        self.borrow_mut().on_pass_discard(e);
    }

    fn on_lanes(&mut self, e: &LanesEvent) {
        self.borrow_mut().on_lanes(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.borrow_mut().on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.borrow_mut().on_phase_end(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.borrow_mut().on_commit_summary(s);
    }

    #[cfg(feature = "trace-rich")]
    fn on_unit(&mut self, e: &UnitEvent) {
        self.borrow_mut().on_unit(e);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
#[derive(Default)]
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Box<dyn TraceSink>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident, $e:ident) => {{
        #[cfg(feature = "trace")]
        if let Some(s) = &mut $self.sink {
            s.$method($e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = $e;
        }
    }};
}

impl Tracer {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {}
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Emits a [`ScheduleEvent`].
    #[inline]
    pub fn schedule(&mut self, e: &ScheduleEvent) {
        dispatch!(self, on_schedule, e);
    }

    /// Emits an [`UpdateEvent`].
    #[inline]
    pub fn update(&mut self, e: &UpdateEvent) {
        dispatch!(self, on_update, e);
    }

    /// Emits a [`PassBeginEvent`].
    #[inline]
    pub fn pass_begin(&mut self, e: &PassBeginEvent) {
        dispatch!(self, on_pass_begin, e);
    }

    /// Emits a [`PassYieldEvent`].
    #[inline]
    pub fn pass_yield(&mut self, e: &PassYieldEvent) {
        dispatch!(self, on_pass_yield, e);
    }

    /// Emits a [`PassEndEvent`].
    #[inline]
    pub fn pass_end(&mut self, e: &PassEndEvent) {
        dispatch!(self, on_pass_end, e);
    }

    /// Emits a [`PassDiscardEvent`].
    #[inline]
    pub fn pass_discard(&mut self, e: &PassDiscardEvent) {
        dispatch!(self, on_pass_discard, e);
    }

    /// Emits a [`LanesEvent`].
    #[inline]
    pub fn lanes(&mut self, e: &LanesEvent) {
        dispatch!(self, on_lanes, e);
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        dispatch!(self, on_phase_begin, e);
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        dispatch!(self, on_phase_end, e);
    }

    /// Emits a [`CommitSummary`].
    #[inline]
    pub fn commit_summary(&mut self, s: &CommitSummary) {
        dispatch!(self, on_commit_summary, s);
    }

    /// Emits a unit record (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn unit(&mut self, e: &UnitEvent) {
        if let Some(s) = &mut self.sink {
            s.on_unit(e);
        }
    }
}

// ---------------------------------------------------------------------------
// CommitSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps and effect counts during a commit and produces
/// a [`CommitSummary`].
#[derive(Debug)]
pub struct CommitSummaryBuilder {
    summary: CommitSummary,
    phase_starts: [Option<HostTime>; 3],
    phase_ends: [Option<HostTime>; 3],
}

impl CommitSummaryBuilder {
    /// Starts building a summary for a commit of `lanes` from `pass`.
    #[must_use]
    pub fn new(pass: u32, root: RootId, lanes: Lanes, started: HostTime) -> Self {
        Self {
            summary: CommitSummary {
                pass,
                root,
                lanes,
                started,
                ..CommitSummary::default()
            },
            phase_starts: [None; 3],
            phase_ends: [None; 3],
        }
    }

    /// Records the start of a phase. Render and passive phases are not part
    /// of a commit summary and are ignored.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        if let Some(idx) = phase_index(phase) {
            self.phase_starts[idx] = Some(t);
        }
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        if let Some(idx) = phase_index(phase) {
            self.phase_ends[idx] = Some(t);
        }
    }

    /// Counts one applied effect.
    pub fn count(&mut self, kind: EffectKind) {
        let slot = match kind {
            EffectKind::Placement => &mut self.summary.placements,
            EffectKind::Update => &mut self.summary.updates,
            EffectKind::Deletion => &mut self.summary.deletions,
            EffectKind::Callback => &mut self.summary.callbacks,
        };
        *slot += 1;
    }

    /// Sets the lanes left pending after the commit.
    pub fn set_remaining(&mut self, remaining: Lanes) {
        self.summary.remaining = remaining;
    }

    /// Consumes the builder and produces the final [`CommitSummary`].
    #[must_use]
    pub fn finish(self) -> CommitSummary {
        CommitSummary {
            snapshot_ticks: self.phase_duration(PhaseKind::Snapshot),
            mutation_ticks: self.phase_duration(PhaseKind::Mutation),
            layout_ticks: self.phase_duration(PhaseKind::Layout),
            ..self.summary
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let Some(idx) = phase_index(phase) else {
            return 0;
        };
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).ticks(),
            _ => 0,
        }
    }
}

/// Maps a commit [`PhaseKind`] to an array index.
const fn phase_index(phase: PhaseKind) -> Option<usize> {
    match phase {
        PhaseKind::Snapshot => Some(0),
        PhaseKind::Mutation => Some(1),
        PhaseKind::Layout => Some(2),
        PhaseKind::Render | PhaseKind::Passive => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> UpdateEvent {
        UpdateEvent {
            root: RootId(0),
            node: NodeId::from_raw_parts(3, 1),
            lane: Lane::SYNC,
            class: LaneClass::Sync,
            event_time: HostTime(10),
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_update(&sample_update());
        sink.on_commit_summary(&CommitSummary::default());
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.update(&sample_update());
        tracer.commit_summary(&CommitSummary::default());
    }

    #[test]
    fn summary_builder_computes_durations_and_counts() {
        let lanes = Lanes::from(Lane::SYNC);
        let mut builder = CommitSummaryBuilder::new(4, RootId(1), lanes, HostTime(1_000));

        builder.phase_begin(PhaseKind::Snapshot, HostTime(1_000));
        builder.phase_end(PhaseKind::Snapshot, HostTime(1_010));
        builder.phase_begin(PhaseKind::Mutation, HostTime(1_010));
        builder.phase_end(PhaseKind::Mutation, HostTime(1_110));
        builder.phase_begin(PhaseKind::Layout, HostTime(1_110));
        builder.phase_end(PhaseKind::Layout, HostTime(1_150));
        builder.phase_begin(PhaseKind::Render, HostTime(0));
        builder.count(EffectKind::Placement);
        builder.count(EffectKind::Placement);
        builder.count(EffectKind::Deletion);

        let summary = builder.finish();
        assert_eq!(summary.snapshot_ticks, 10);
        assert_eq!(summary.mutation_ticks, 100);
        assert_eq!(summary.layout_ticks, 40);
        assert_eq!(summary.placements, 2);
        assert_eq!(summary.deletions, 1);
        assert_eq!(summary.updates, 0);
        assert_eq!(summary.pass, 4);
        assert_eq!(summary.lanes, lanes);
    }

    #[test]
    fn summary_builder_missing_phases_are_zero() {
        let summary = CommitSummaryBuilder::new(0, RootId(0), Lanes::NONE, HostTime(0)).finish();
        assert_eq!(summary.snapshot_ticks, 0);
        assert_eq!(summary.mutation_ticks, 0);
        assert_eq!(summary.layout_ticks, 0);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_shared_sink() {
        use alloc::vec::Vec;

        #[derive(Default)]
        struct RecordingSink {
            lanes: Vec<Lane>,
        }
        impl TraceSink for RecordingSink {
            fn on_update(&mut self, e: &UpdateEvent) {
                self.lanes.push(e.lane);
            }
        }

        let sink = Rc::new(RefCell::new(RecordingSink::default()));
        let mut tracer = Tracer::new(Box::new(sink.clone()));
        tracer.update(&sample_update());
        assert_eq!(sink.borrow().lanes, [Lane::SYNC]);
    }
}
