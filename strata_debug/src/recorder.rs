// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].

use strata_core::host::{TaskHandle, TaskPriority};
use strata_core::lane::{Lane, LaneClass, Lanes};
use strata_core::root::RootId;
use strata_core::time::HostTime;
use strata_core::trace::{
    CommitSummary, DiscardReason, LanesEvent, LanesEventKind, PassBeginEvent, PassDiscardEvent,
    PassEndEvent, PassYieldEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, ScheduleAction,
    ScheduleEvent, TraceSink, UnitEvent, UnitKind, UpdateEvent,
};
use strata_core::tree::NodeId;
use strata_core::work_loop::ExitStatus;

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_SCHEDULE: u8 = 1;
const TAG_UPDATE: u8 = 2;
const TAG_PASS_BEGIN: u8 = 3;
const TAG_PASS_YIELD: u8 = 4;
const TAG_PASS_END: u8 = 5;
const TAG_PASS_DISCARD: u8 = 6;
const TAG_LANES: u8 = 7;
const TAG_PHASE_BEGIN: u8 = 8;
const TAG_PHASE_END: u8 = 9;
const TAG_COMMIT_SUMMARY: u8 = 10;
const TAG_UNIT: u8 = 11;

const PRIORITIES: [TaskPriority; 5] = [
    TaskPriority::Immediate,
    TaskPriority::UserBlocking,
    TaskPriority::Normal,
    TaskPriority::Low,
    TaskPriority::Idle,
];

const STATUSES: [ExitStatus; 6] = [
    ExitStatus::Incomplete,
    ExitStatus::Completed,
    ExitStatus::Errored,
    ExitStatus::FatalErrored,
    ExitStatus::Suspended,
    ExitStatus::SuspendedWithDelay,
];

const REASONS: [DiscardReason; 5] = [
    DiscardReason::Preempted,
    DiscardReason::Interleaved,
    DiscardReason::Fatal,
    DiscardReason::Pinged,
    DiscardReason::Superseded,
];

const LANE_KINDS: [LanesEventKind; 3] = [
    LanesEventKind::Expired,
    LanesEventKind::Pinged,
    LanesEventKind::Suspended,
];

const PHASES: [PhaseKind; 5] = [
    PhaseKind::Render,
    PhaseKind::Snapshot,
    PhaseKind::Mutation,
    PhaseKind::Layout,
    PhaseKind::Passive,
];

const UNIT_KINDS: [UnitKind; 4] = [
    UnitKind::Begin,
    UnitKind::Bailout,
    UnitKind::Complete,
    UnitKind::Unwind,
];

/// Position of `value` in `table`, as written to the recording.
fn ordinal<T: PartialEq>(table: &[T], value: &T) -> u8 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "every table has fewer than 256 entries"
    )]
    table.iter().position(|v| v == value).map_or(u8::MAX, |i| i as u8)
}

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_node(&mut self, n: NodeId) {
        self.write_u32(n.index());
        self.write_u32(n.generation());
    }

    fn write_class(&mut self, c: LaneClass) {
        self.write_u8(ordinal(&LaneClass::ALL, &c));
    }
}

impl TraceSink for RecorderSink {
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        self.write_u8(TAG_SCHEDULE);
        self.write_u32(e.root.0);
        self.write_u64(e.handle.0);
        self.write_u8(ordinal(&PRIORITIES, &e.priority));
        self.write_u32(e.lanes.bits());
        self.write_u8(u8::from(e.action == ScheduleAction::Cancelled));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_update(&mut self, e: &UpdateEvent) {
        self.write_u8(TAG_UPDATE);
        self.write_u32(e.root.0);
        self.write_node(e.node);
        self.write_u32(e.lane.bits());
        self.write_class(e.class);
        self.write_u64(e.event_time.ticks());
    }

    fn on_pass_begin(&mut self, e: &PassBeginEvent) {
        self.write_u8(TAG_PASS_BEGIN);
        self.write_u32(e.pass);
        self.write_u32(e.root.0);
        self.write_u32(e.lanes.bits());
        self.write_u8(u8::from(e.sync));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_pass_yield(&mut self, e: &PassYieldEvent) {
        self.write_u8(TAG_PASS_YIELD);
        self.write_u32(e.pass);
        self.write_u32(e.root.0);
        self.write_u32(e.units);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_pass_end(&mut self, e: &PassEndEvent) {
        self.write_u8(TAG_PASS_END);
        self.write_u32(e.pass);
        self.write_u32(e.root.0);
        self.write_u8(ordinal(&STATUSES, &e.status));
        self.write_u32(e.units);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_pass_discard(&mut self, e: &PassDiscardEvent) {
        self.write_u8(TAG_PASS_DISCARD);
        self.write_u32(e.pass);
        self.write_u32(e.root.0);
        self.write_u8(ordinal(&REASONS, &e.reason));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_lanes(&mut self, e: &LanesEvent) {
        self.write_u8(TAG_LANES);
        self.write_u32(e.root.0);
        self.write_u8(ordinal(&LANE_KINDS, &e.kind));
        self.write_u32(e.lanes.bits());
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u32(e.pass);
        self.write_u8(ordinal(&PHASES, &e.phase));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u32(e.pass);
        self.write_u8(ordinal(&PHASES, &e.phase));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.write_u8(TAG_COMMIT_SUMMARY);
        self.write_u32(s.pass);
        self.write_u32(s.root.0);
        self.write_u32(s.lanes.bits());
        self.write_u32(s.remaining.bits());
        self.write_u64(s.started.ticks());
        self.write_u64(s.snapshot_ticks);
        self.write_u64(s.mutation_ticks);
        self.write_u64(s.layout_ticks);
        self.write_u32(s.placements);
        self.write_u32(s.updates);
        self.write_u32(s.deletions);
        self.write_u32(s.callbacks);
    }

    fn on_unit(&mut self, e: &UnitEvent) {
        self.write_u8(TAG_UNIT);
        self.write_u32(e.pass);
        self.write_node(e.node);
        self.write_u8(ordinal(&UNIT_KINDS, &e.kind));
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`ScheduleEvent`].
    Schedule(ScheduleEvent),
    /// An [`UpdateEvent`].
    Update(UpdateEvent),
    /// A [`PassBeginEvent`].
    PassBegin(PassBeginEvent),
    /// A [`PassYieldEvent`].
    PassYield(PassYieldEvent),
    /// A [`PassEndEvent`].
    PassEnd(PassEndEvent),
    /// A [`PassDiscardEvent`].
    PassDiscard(PassDiscardEvent),
    /// A [`LanesEvent`].
    Lanes(LanesEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`CommitSummary`].
    CommitSummary(CommitSummary),
    /// A [`UnitEvent`].
    Unit(UnitEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_from<T: Copy>(&mut self, table: &[T]) -> Option<T> {
        table.get(usize::from(self.read_u8()?)).copied()
    }

    fn read_time(&mut self) -> Option<HostTime> {
        self.read_u64().map(HostTime)
    }

    fn read_lanes(&mut self) -> Option<Lanes> {
        self.read_u32().map(Lanes::from_bits)
    }

    fn read_lane(&mut self) -> Option<Lane> {
        let lanes = self.read_lanes()?;
        Some(lanes.most_urgent().unwrap_or(Lane::NONE))
    }

    fn read_node(&mut self) -> Option<NodeId> {
        let idx = self.read_u32()?;
        let generation = self.read_u32()?;
        Some(NodeId::from_raw_parts(idx, generation))
    }

    fn decode_schedule(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Schedule(ScheduleEvent {
            root: RootId(self.read_u32()?),
            handle: TaskHandle(self.read_u64()?),
            priority: self.read_from(&PRIORITIES)?,
            lanes: self.read_lanes()?,
            action: if self.read_u8()? != 0 {
                ScheduleAction::Cancelled
            } else {
                ScheduleAction::Scheduled
            },
            timestamp: self.read_time()?,
        }))
    }

    fn decode_update(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Update(UpdateEvent {
            root: RootId(self.read_u32()?),
            node: self.read_node()?,
            lane: self.read_lane()?,
            class: self.read_from(&LaneClass::ALL)?,
            event_time: self.read_time()?,
        }))
    }

    fn decode_pass_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PassBegin(PassBeginEvent {
            pass: self.read_u32()?,
            root: RootId(self.read_u32()?),
            lanes: self.read_lanes()?,
            sync: self.read_u8()? != 0,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_pass_yield(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PassYield(PassYieldEvent {
            pass: self.read_u32()?,
            root: RootId(self.read_u32()?),
            units: self.read_u32()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_pass_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PassEnd(PassEndEvent {
            pass: self.read_u32()?,
            root: RootId(self.read_u32()?),
            status: self.read_from(&STATUSES)?,
            units: self.read_u32()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_pass_discard(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PassDiscard(PassDiscardEvent {
            pass: self.read_u32()?,
            root: RootId(self.read_u32()?),
            reason: self.read_from(&REASONS)?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_lanes(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Lanes(LanesEvent {
            root: RootId(self.read_u32()?),
            kind: self.read_from(&LANE_KINDS)?,
            lanes: self.read_lanes()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            pass: self.read_u32()?,
            phase: self.read_from(&PHASES)?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            pass: self.read_u32()?,
            phase: self.read_from(&PHASES)?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_commit_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CommitSummary(CommitSummary {
            pass: self.read_u32()?,
            root: RootId(self.read_u32()?),
            lanes: self.read_lanes()?,
            remaining: self.read_lanes()?,
            started: self.read_time()?,
            snapshot_ticks: self.read_u64()?,
            mutation_ticks: self.read_u64()?,
            layout_ticks: self.read_u64()?,
            placements: self.read_u32()?,
            updates: self.read_u32()?,
            deletions: self.read_u32()?,
            callbacks: self.read_u32()?,
        }))
    }

    fn decode_unit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Unit(UnitEvent {
            pass: self.read_u32()?,
            node: self.read_node()?,
            kind: self.read_from(&UNIT_KINDS)?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_SCHEDULE => self.decode_schedule(),
            TAG_UPDATE => self.decode_update(),
            TAG_PASS_BEGIN => self.decode_pass_begin(),
            TAG_PASS_YIELD => self.decode_pass_yield(),
            TAG_PASS_END => self.decode_pass_end(),
            TAG_PASS_DISCARD => self.decode_pass_discard(),
            TAG_LANES => self.decode_lanes(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_COMMIT_SUMMARY => self.decode_commit_summary(),
            TAG_UNIT => self.decode_unit(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use strata_core::component::{Element, Key, leaf};
    use strata_core::host::ManualHost;
    use strata_core::scheduler::{SchedulerConfig, SchedulerContext};

    use super::*;

    fn sample_summary() -> CommitSummary {
        CommitSummary {
            pass: 4,
            root: RootId(1),
            lanes: Lanes::from(LaneClass::Default.first_lane()),
            remaining: Lanes::NONE,
            started: HostTime(1_000),
            snapshot_ticks: 3,
            mutation_ticks: 40,
            layout_ticks: 12,
            placements: 2,
            updates: 1,
            deletions: 1,
            callbacks: 0,
        }
    }

    #[test]
    fn summary_survives_recording() {
        let mut rec = RecorderSink::new();
        rec.on_commit_summary(&sample_summary());
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::CommitSummary(s) => assert_eq!(*s, sample_summary()),
            other => panic!("expected a commit summary, got {other:?}"),
        }
    }

    #[test]
    fn update_keeps_lane_and_node() {
        let node = NodeId::from_raw_parts(5, 2);
        let lane = LaneClass::Transition.first_lane();
        let mut rec = RecorderSink::new();
        rec.on_update(&UpdateEvent {
            root: RootId(0),
            node,
            lane,
            class: LaneClass::Transition,
            event_time: HostTime(77),
        });
        match decode(rec.as_bytes()).next() {
            Some(RecordedEvent::Update(e)) => {
                assert_eq!(e.node, node);
                assert_eq!(e.lane, lane);
                assert_eq!(e.class, LaneClass::Transition);
            }
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[test]
    fn truncated_recording_stops_cleanly() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            pass: 1,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(10),
        });
        rec.on_phase_end(&PhaseEndEvent {
            pass: 1,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(11),
        });
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 3]).collect();
        assert_eq!(events.len(), 1, "partial trailing record is dropped");
    }

    #[test]
    fn records_a_whole_mount() {
        let rec = Rc::new(RefCell::new(RecorderSink::new()));
        let mut ctx = SchedulerContext::new(ManualHost::new(), SchedulerConfig::millis());
        ctx.set_trace_sink(Box::new(rec.clone()));
        ctx.create_root(Element::new(Key(0), leaf(), String::new()), LaneClass::Default)
            .unwrap();
        ctx.run_until_idle().unwrap();

        let rec = rec.borrow();
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert!(matches!(events[0], RecordedEvent::Update(_)), "got {:?}", events[0]);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RecordedEvent::PassEnd(p) if p.status == ExitStatus::Completed)),
            "pass completed"
        );
        assert!(
            events.iter().any(|e| matches!(e, RecordedEvent::CommitSummary(_))),
            "commit summarized"
        );
    }
}
