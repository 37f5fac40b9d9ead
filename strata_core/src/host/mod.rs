// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host contract: the clock, the task scheduler, and the mutation sink.
//!
//! The scheduler context never owns a thread or an event loop. A *host*
//! supplies the pieces it needs:
//!
//! - **Clock**: [`Clock::now`] reads a monotonic [`HostTime`].
//!
//! - **Tasks**: [`TaskScheduler`] queues [`Task`]s by [`TaskPriority`] or
//!   after a delay, cancels them by [`TaskHandle`], and answers
//!   [`should_yield`](TaskScheduler::should_yield) while a concurrent pass is
//!   running. When a queued task comes due, the host hands it back to
//!   [`SchedulerContext::run_task`](crate::scheduler::SchedulerContext::run_task).
//!
//! - **Mutations**: [`HostMutation`] receives every committed [`Effect`],
//!   phase by phase.
//!
//! [`ManualHost`] implements all three with a virtual clock and is what the
//! tests drive.

use core::fmt;

use crate::component::Key;
use crate::root::RootId;
use crate::time::{Duration, HostTime};
use crate::tree::NodeId;

mod manual;

pub use manual::{LoggedEffect, ManualHost};

/// Priority of a host task. Declared most to least urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Run before anything else.
    Immediate,
    /// Direct user input.
    UserBlocking,
    /// Ordinary work.
    Normal,
    /// Work that can wait.
    Low,
    /// Only when nothing else is queued.
    Idle,
}

/// Identifies a scheduled task so it can be cancelled.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.0)
    }
}

/// A unit of work the context asks the host to run later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    /// Render and commit a root synchronously.
    SyncWork(RootId),
    /// Render a root until the host asks to yield.
    ConcurrentWork(RootId),
    /// Commit work that finished earlier but was held back.
    CommitFinished(RootId),
    /// Run deferred commit callbacks.
    FlushPassive,
}

/// What a task asks of the host after running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Nothing more to do for this task.
    Done,
    /// Run the same task again under the same handle.
    Continue,
}

/// A monotonic time source.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> HostTime;
}

/// A priority task queue with cooperative yielding.
pub trait TaskScheduler {
    /// Queues `task` at `priority`.
    fn schedule(&mut self, priority: TaskPriority, task: Task) -> TaskHandle;

    /// Queues `task` to run once `delay` has elapsed.
    fn schedule_timeout(&mut self, delay: Duration, task: Task) -> TaskHandle;

    /// Removes a queued task. Cancelling a task that already ran does nothing.
    fn cancel(&mut self, handle: TaskHandle);

    /// Whether a running concurrent pass should stop at the next unit
    /// boundary.
    fn should_yield(&self) -> bool;
}

/// A commit phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// Before any mutation; sees the old tree.
    Snapshot,
    /// Insertions, updates, and deletions.
    Mutation,
    /// After the tree swap; commit callbacks run here.
    Layout,
    /// Deferred callbacks, after the commit returned.
    Passive,
}

/// The kind of a committed effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// A node was inserted or moved.
    Placement,
    /// A mounted node re-rendered.
    Update,
    /// A node and its subtree were removed.
    Deletion,
    /// A commit callback ran on a node.
    Callback,
}

/// A committed change handed to [`HostMutation::apply_effect`].
#[derive(Debug)]
pub struct Effect<'a, S> {
    /// What happened.
    pub kind: EffectKind,
    /// The node it happened to.
    pub node: NodeId,
    /// The node's key.
    pub key: Key,
    /// The node's parent, if it has one.
    pub parent: Option<NodeId>,
    /// The node's new state. `None` for deletions.
    pub state: Option<&'a S>,
}

/// Receives committed effects.
pub trait HostMutation<S> {
    /// Applies one effect. Called in tree order within each phase.
    fn apply_effect(&mut self, phase: CommitPhase, effect: &Effect<'_, S>);
}

/// Everything the scheduler context needs from its host.
pub trait Host<S>: Clock + TaskScheduler + HostMutation<S> {}

impl<S, T: Clock + TaskScheduler + HostMutation<S>> Host<S> for T {}

/// A host that can also hand back due tasks, for
/// [`SchedulerContext::run_until_idle`](crate::scheduler::SchedulerContext::run_until_idle).
pub trait TaskSource {
    /// Removes and returns the most urgent task that is due.
    fn next_task(&mut self) -> Option<(TaskHandle, Task)>;

    /// Requeues a task that returned [`TaskStatus::Continue`].
    fn resume(&mut self, handle: TaskHandle, task: Task);
}
