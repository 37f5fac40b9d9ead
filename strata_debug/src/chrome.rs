// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each root gets its own process lane (`pid`); render passes and commit
//! phases are duration slices, everything else is an instant.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use strata_core::time::Timebase;

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Schedule(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.action),
                    "cat": "Scheduler",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "handle": e.handle.0,
                        "priority": format!("{:?}", e.priority),
                        "lanes": format!("{:?}", e.lanes),
                    }
                }));
            }
            RecordedEvent::Update(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Update",
                    "cat": "Scheduler",
                    "ts": ticks_to_us(e.event_time.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "node": format!("{:?}", e.node),
                        "lane": format!("{:?}", e.lane),
                        "class": format!("{:?}", e.class),
                    }
                }));
            }
            RecordedEvent::PassBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": "Pass",
                    "cat": "Render",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 1,
                    "args": {
                        "pass": e.pass,
                        "lanes": format!("{:?}", e.lanes),
                        "sync": e.sync,
                    }
                }));
            }
            RecordedEvent::PassYield(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Yield",
                    "cat": "Render",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 1,
                    "s": "t",
                    "args": {
                        "pass": e.pass,
                        "units": e.units,
                    }
                }));
            }
            RecordedEvent::PassEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": "Pass",
                    "cat": "Render",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 1,
                    "args": {
                        "pass": e.pass,
                        "status": format!("{:?}", e.status),
                        "units": e.units,
                    }
                }));
            }
            RecordedEvent::PassDiscard(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": "Pass",
                    "cat": "Render",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 1,
                    "args": {
                        "pass": e.pass,
                        "discarded": format!("{:?}", e.reason),
                    }
                }));
            }
            RecordedEvent::Lanes(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.kind),
                    "cat": "Lanes",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.root.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "lanes": format!("{:?}", e.lanes),
                    }
                }));
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": format!("{:?}", e.phase),
                    "cat": "Phase",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": 0,
                    "tid": 2,
                    "args": {
                        "pass": e.pass,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": format!("{:?}", e.phase),
                    "cat": "Phase",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": 0,
                    "tid": 2,
                    "args": {
                        "pass": e.pass,
                    }
                }));
            }
            RecordedEvent::CommitSummary(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "CommitSummary",
                    "cat": "Summary",
                    "ts": ticks_to_us(s.started.ticks(), timebase),
                    "pid": s.root.0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "pass": s.pass,
                        "lanes": format!("{:?}", s.lanes),
                        "remaining": format!("{:?}", s.remaining),
                        "snapshot_us": ticks_to_us(s.snapshot_ticks, timebase),
                        "mutation_us": ticks_to_us(s.mutation_ticks, timebase),
                        "layout_us": ticks_to_us(s.layout_ticks, timebase),
                        "placements": s.placements,
                        "updates": s.updates,
                        "deletions": s.deletions,
                        "callbacks": s.callbacks,
                    }
                }));
            }
            RecordedEvent::Unit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.kind),
                    "cat": "Rich",
                    "ts": 0,
                    "pid": 0,
                    "tid": 3,
                    "s": "t",
                    "args": {
                        "pass": e.pass,
                        "node": format!("{:?}", e.node),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use strata_core::root::RootId;
    use strata_core::time::HostTime;
    use strata_core::trace::{
        PassBeginEvent, PassEndEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, TraceSink,
    };
    use strata_core::work_loop::ExitStatus;
    use strata_core::{Lane, Lanes};

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_pass_begin(&PassBeginEvent {
            pass: 1,
            root: RootId(0),
            lanes: Lanes::from(Lane::SYNC),
            sync: true,
            timestamp: HostTime(1_000),
        });
        rec.on_pass_end(&PassEndEvent {
            pass: 1,
            root: RootId(0),
            status: ExitStatus::Completed,
            units: 3,
            timestamp: HostTime(1_004),
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            pass: 1,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(1_005),
        });
        rec.on_phase_end(&PhaseEndEvent {
            pass: 1,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(1_006),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::MILLIS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 4);

        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["name"], "Pass");
        assert_eq!(parsed[1]["ph"], "E");
        assert_eq!(parsed[1]["args"]["status"], "Completed");
        assert_eq!(parsed[2]["name"], "Mutation");
        assert_eq!(parsed[3]["ts"], 1_006_000.0);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::MILLIS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
