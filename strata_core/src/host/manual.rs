// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A deterministic host with a virtual clock.

use alloc::vec::Vec;
use core::cell::Cell;

use crate::component::Key;
use crate::time::{Duration, HostTime};
use crate::tree::NodeId;

use super::{
    Clock, CommitPhase, Effect, EffectKind, HostMutation, Task, TaskHandle, TaskPriority,
    TaskScheduler, TaskSource,
};

/// One effect recorded by [`ManualHost`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoggedEffect {
    /// Phase the effect was applied in.
    pub phase: CommitPhase,
    /// What happened.
    pub kind: EffectKind,
    /// Node it happened to.
    pub node: NodeId,
    /// The node's key.
    pub key: Key,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    handle: TaskHandle,
    priority: TaskPriority,
    seq: u64,
    ready_at: HostTime,
    task: Task,
}

/// A host driven entirely by the caller.
///
/// Time only moves on [`advance`](Self::advance). Tasks run in priority
/// order, FIFO within a priority, once their delay has elapsed. With a yield
/// budget of `n`, [`should_yield`](TaskScheduler::should_yield) starts
/// returning `true` after `n` units in one task slice.
#[derive(Debug, Default)]
pub struct ManualHost {
    now: HostTime,
    queue: Vec<Entry>,
    next_handle: u64,
    next_seq: u64,
    running: Option<(TaskHandle, TaskPriority)>,
    yield_after: Option<u32>,
    checks: Cell<u32>,
    effects: Vec<LoggedEffect>,
}

impl ManualHost {
    /// Creates a host at time zero with an empty queue and no yield budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now = self.now.saturating_add(by);
    }

    /// Moves the clock to the earliest pending delayed task. Returns `false`
    /// if every queued task is already due.
    pub fn advance_to_next_timer(&mut self) -> bool {
        let next = self
            .queue
            .iter()
            .filter(|e| e.ready_at > self.now)
            .map(|e| e.ready_at)
            .min();
        match next {
            Some(t) => {
                self.now = t;
                true
            }
            None => false,
        }
    }

    /// Makes every task slice yield after `units` units of work.
    ///
    /// # Panics
    ///
    /// Panics if `units` is zero, which would stop every pass before it
    /// starts.
    pub fn set_yield_after(&mut self, units: u32) {
        assert!(units > 0, "yield budget must allow at least one unit");
        self.yield_after = Some(units);
    }

    /// Removes the yield budget.
    pub fn clear_yield(&mut self) {
        self.yield_after = None;
    }

    /// Returns the queued tasks, most urgent first.
    #[must_use]
    pub fn queued(&self) -> Vec<(TaskHandle, Task)> {
        let mut entries = self.queue.clone();
        entries.sort_by_key(|e| (e.ready_at, e.priority, e.seq));
        entries.into_iter().map(|e| (e.handle, e.task)).collect()
    }

    /// Returns `true` if `task` is queued.
    #[must_use]
    pub fn is_queued(&self, task: Task) -> bool {
        self.queue.iter().any(|e| e.task == task)
    }

    /// Returns `true` if no task is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the effects recorded so far.
    #[must_use]
    pub fn effects(&self) -> &[LoggedEffect] {
        &self.effects
    }

    /// Takes the recorded effects.
    pub fn take_effects(&mut self) -> Vec<LoggedEffect> {
        core::mem::take(&mut self.effects)
    }

    fn push(&mut self, handle: TaskHandle, priority: TaskPriority, ready_at: HostTime, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            handle,
            priority,
            seq,
            ready_at,
            task,
        });
    }

    fn fresh_handle(&mut self) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl Clock for ManualHost {
    fn now(&self) -> HostTime {
        self.now
    }
}

impl TaskScheduler for ManualHost {
    fn schedule(&mut self, priority: TaskPriority, task: Task) -> TaskHandle {
        let handle = self.fresh_handle();
        self.push(handle, priority, self.now, task);
        handle
    }

    fn schedule_timeout(&mut self, delay: Duration, task: Task) -> TaskHandle {
        let handle = self.fresh_handle();
        let ready_at = self.now.saturating_add(delay);
        self.push(handle, TaskPriority::Normal, ready_at, task);
        handle
    }

    fn cancel(&mut self, handle: TaskHandle) {
        self.queue.retain(|e| e.handle != handle);
    }

    fn should_yield(&self) -> bool {
        let Some(budget) = self.yield_after else {
            return false;
        };
        let checks = self.checks.get() + 1;
        self.checks.set(checks);
        checks > budget
    }
}

impl<S> HostMutation<S> for ManualHost {
    fn apply_effect(&mut self, phase: CommitPhase, effect: &Effect<'_, S>) {
        self.effects.push(LoggedEffect {
            phase,
            kind: effect.kind,
            node: effect.node,
            key: effect.key,
        });
    }
}

impl TaskSource for ManualHost {
    fn next_task(&mut self) -> Option<(TaskHandle, Task)> {
        let now = self.now;
        let (pos, _) = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ready_at <= now)
            .min_by_key(|(_, e)| (e.priority, e.seq))?;
        let entry = self.queue.remove(pos);
        self.running = Some((entry.handle, entry.priority));
        self.checks.set(0);
        Some((entry.handle, entry.task))
    }

    fn resume(&mut self, handle: TaskHandle, task: Task) {
        let priority = match self.running {
            Some((running, priority)) if running == handle => priority,
            _ => TaskPriority::Normal,
        };
        self.push(handle, priority, self.now, task);
    }
}
