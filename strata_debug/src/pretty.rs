// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to microseconds using a [`Timebase`].

use std::io::Write;

use strata_core::time::{HostTime, Timebase};
use strata_core::trace::{
    CommitSummary, LanesEvent, PassBeginEvent, PassDiscardEvent, PassEndEvent, PassYieldEvent,
    PhaseBeginEvent, PhaseEndEvent, PhaseKind, ScheduleEvent, TraceSink, UnitEvent, UpdateEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }

    fn host_us(&self, t: HostTime) -> f64 {
        self.ticks_to_us(t.ticks())
    }
}

fn phase_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::Render => "render",
        PhaseKind::Snapshot => "snapshot",
        PhaseKind::Mutation => "mutation",
        PhaseKind::Layout => "layout",
        PhaseKind::Passive => "passive",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        let _ = writeln!(
            self.writer,
            "[schedule] {:?} {:?} {:?} at {:?} lanes={:?} {:.1}µs",
            e.action,
            e.handle,
            e.priority,
            e.root,
            e.lanes,
            self.host_us(e.timestamp),
        );
    }

    fn on_update(&mut self, e: &UpdateEvent) {
        let _ = writeln!(
            self.writer,
            "[update] {:?} {:?} {:?} ({:?}) {:.1}µs",
            e.root,
            e.node,
            e.lane,
            e.class,
            self.host_us(e.event_time),
        );
    }

    fn on_pass_begin(&mut self, e: &PassBeginEvent) {
        let mode = if e.sync { "sync" } else { "concurrent" };
        let _ = writeln!(
            self.writer,
            "[pass:begin] pass={} {:?} lanes={:?} {mode} at {:.1}µs",
            e.pass,
            e.root,
            e.lanes,
            self.host_us(e.timestamp),
        );
    }

    fn on_pass_yield(&mut self, e: &PassYieldEvent) {
        let _ = writeln!(
            self.writer,
            "[pass:yield] pass={} units={} at {:.1}µs",
            e.pass,
            e.units,
            self.host_us(e.timestamp),
        );
    }

    fn on_pass_end(&mut self, e: &PassEndEvent) {
        let _ = writeln!(
            self.writer,
            "[pass:end] pass={} {:?} units={} at {:.1}µs",
            e.pass,
            e.status,
            e.units,
            self.host_us(e.timestamp),
        );
    }

    fn on_pass_discard(&mut self, e: &PassDiscardEvent) {
        let _ = writeln!(
            self.writer,
            "[pass:discard] pass={} {:?} at {:.1}µs",
            e.pass,
            e.reason,
            self.host_us(e.timestamp),
        );
    }

    fn on_lanes(&mut self, e: &LanesEvent) {
        let _ = writeln!(
            self.writer,
            "[lanes] {:?} {:?} {:?} at {:.1}µs",
            e.root,
            e.kind,
            e.lanes,
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] pass={} {} at {:.1}µs",
            e.pass,
            phase_name(e.phase),
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] pass={} {} at {:.1}µs",
            e.pass,
            phase_name(e.phase),
            self.host_us(e.timestamp),
        );
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        let _ = writeln!(
            self.writer,
            "[commit] pass={} {:?} lanes={:?} remaining={:?} snapshot={:.1}µs \
             mutation={:.1}µs layout={:.1}µs +{} ~{} -{} cb={}",
            s.pass,
            s.root,
            s.lanes,
            s.remaining,
            self.ticks_to_us(s.snapshot_ticks),
            self.ticks_to_us(s.mutation_ticks),
            self.ticks_to_us(s.layout_ticks),
            s.placements,
            s.updates,
            s.deletions,
            s.callbacks,
        );
    }

    fn on_unit(&mut self, e: &UnitEvent) {
        let _ = writeln!(self.writer, "[unit] pass={} {:?} {:?}", e.pass, e.node, e.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::root::RootId;
    use strata_core::trace::DiscardReason;

    #[test]
    fn pretty_print_discard() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::MILLIS);
        sink.on_pass_discard(&PassDiscardEvent {
            pass: 9,
            root: RootId(0),
            reason: DiscardReason::Interleaved,
            timestamp: HostTime(2),
        });
        let output = String::from_utf8(sink.writer).unwrap();
        assert!(output.contains("[pass:discard]"), "got: {output}");
        assert!(output.contains("pass=9"), "got: {output}");
        assert!(output.contains("Interleaved"), "got: {output}");
    }
}
