// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Priority-lane scheduling and interruptible reconciliation of node trees.
//!
//! `strata_core` keeps trees of stateful nodes, batches updates to them into
//! priority lanes, and renders each batch as a pass that can be paused and
//! resumed between nodes. A finished pass is committed to the host in
//! phases. It is `no_std` compatible (with `alloc`) and stores nodes in
//! struct-of-arrays form behind generational handles.
//!
//! # Architecture
//!
//! ```text
//!   enqueue(node, class, update)
//!       │  lane from class + event batching
//!       ▼
//!   RootState::mark_updated ──► ensure_scheduled ──► host.schedule(priority)
//!                                                          │
//!                 ┌────────────────────────────────────────┘
//!                 ▼
//!   run_task ──► render_root (yields via should_yield) ──► ExitStatus
//!                                                             │
//!                 ┌───────────────────────────────────────────┘
//!                 ▼
//!   finish rules ──► commit_root ──► HostMutation::apply_effect
//! ```
//!
//! **[`lane`]**: lanes, lane classes, and lane selection.
//!
//! **[`update_queue`]**: per-node update queues that rebase skipped updates
//! so the final state does not depend on which lanes rendered first.
//!
//! **[`tree`]**: the node store, keyed child reconciliation, and stable
//! [`NodeId`](tree::NodeId) handles.
//!
//! **[`root`]**: per-root lane bookkeeping: pending, suspended, pinged,
//! expired, and entangled lanes.
//!
//! **[`work_loop`]**: the render loop, error capture, and pending-resource
//! fallbacks.
//!
//! **[`scheduler`]**: [`SchedulerContext`](scheduler::SchedulerContext),
//! which owns roots, picks work, and drives the host.
//!
//! **[`host`]**: the traits a host implements, plus a deterministic
//! [`ManualHost`](host::ManualHost).
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! scheduler instrumentation, with a zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-node
//!   render events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

mod commit;
pub mod component;
pub mod error;
pub mod host;
pub mod lane;
pub mod root;
pub mod scheduler;
pub mod time;
pub mod trace;
pub mod tree;
pub mod update_queue;
pub mod work_loop;

pub use component::{Component, Element, Key, RenderOutcome, WaitHandle};
pub use error::{ReconcileError, RenderError};
pub use lane::{Lane, LaneClass, Lanes};
pub use root::RootId;
pub use scheduler::{SchedulerConfig, SchedulerContext};
pub use tree::NodeId;
pub use update_queue::{MergeState, Update};
