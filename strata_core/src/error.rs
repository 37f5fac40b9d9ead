// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types returned by components and by the scheduler context.
//!
//! A [`RenderError`] returned by a component that some ancestor can capture
//! never reaches the caller: it becomes a capture update on that ancestor and
//! only the recovered state commits. Everything else surfaces as a
//! [`ReconcileError`].

use alloc::string::String;

use thiserror::Error;

use crate::root::RootId;
use crate::tree::NodeId;

/// A failure reported by [`Component::render`](crate::component::Component::render).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("render failed: {message}")]
pub struct RenderError {
    message: String,
}

impl RenderError {
    /// Creates an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error raised when a component is pending and no ancestor is a
    /// suspense boundary.
    #[must_use]
    pub fn missing_fallback() -> Self {
        Self::new("a component is pending but no ancestor can show a fallback")
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Internal bookkeeping that should never be observable went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// The root has no finished work to commit.
    #[error("finished work for {0:?} was already committed")]
    AlreadyCommitted(RootId),
    /// The finished work is the tree that is already current.
    #[error("finished work for {0:?} is already the current tree")]
    CommitCurrentTree(RootId),
}

/// Errors returned by [`SchedulerContext`](crate::scheduler::SchedulerContext)
/// entry points.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A component failed and no ancestor captures errors. The pass was
    /// discarded and its lanes suspended until new updates arrive.
    #[error("unrecoverable render error in {root:?}: {error}")]
    Fatal {
        /// Root whose pass failed.
        root: RootId,
        /// The uncaptured error.
        error: RenderError,
    },
    /// Too many synchronous commits in a row scheduled more synchronous work.
    #[error("{root:?} exceeded {limit} nested synchronous updates")]
    NestedUpdateLimit {
        /// Root that kept scheduling itself.
        root: RootId,
        /// Configured limit.
        limit: u32,
    },
    /// The node handle refers to a deleted node.
    #[error("stale node handle {0:?}")]
    StaleNode(NodeId),
    /// The node exists but has never been committed.
    #[error("{0:?} has not been committed to any root")]
    Detached(NodeId),
    /// The root handle does not name a root of this context.
    #[error("unknown root {0:?}")]
    UnknownRoot(RootId),
    /// Internal state was corrupted.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
