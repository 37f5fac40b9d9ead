// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Components, elements, and render outcomes.
//!
//! A [`Component`] turns a node's state into child [`Element`]s. Identity is
//! the `Rc` allocation: a node whose parent hands it the same component `Rc`
//! again, and which has no pending work of its own, is not re-rendered.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::error::RenderError;
use crate::update_queue::MergeState;

/// Identifies a child among its siblings across renders.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(pub u64);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

/// Names an external resource a component is waiting for.
///
/// The host passes it back to
/// [`SchedulerContext::resolve`](crate::scheduler::SchedulerContext::resolve)
/// once the resource is ready.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitHandle(pub u64);

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitHandle({})", self.0)
    }
}

/// The result of rendering a component.
#[derive(Clone, Debug)]
pub enum RenderOutcome<T> {
    /// Rendering produced a value.
    Ready(T),
    /// A resource is not ready yet.
    Pending(WaitHandle),
    /// Rendering failed.
    Failed(RenderError),
}

/// A node's behavior.
pub trait Component<S> {
    /// Produces the node's children from its state.
    fn render(&self, state: &S) -> RenderOutcome<Vec<Element<S>>>;

    /// Whether this node captures render errors thrown below it.
    fn captures_errors(&self) -> bool {
        false
    }

    /// The state to render after capturing `error`. Merged over the current
    /// state.
    fn recover(&self, state: &S, error: &RenderError) -> S
    where
        S: Clone,
    {
        _ = error;
        state.clone()
    }

    /// Whether this node shows a fallback while something below it is
    /// pending.
    fn is_suspense_boundary(&self) -> bool {
        false
    }

    /// The children to show while something below is pending.
    fn fallback(&self, state: &S) -> Vec<Element<S>> {
        _ = state;
        Vec::new()
    }
}

/// A description of a child node: key, behavior, and the state it mounts with.
pub struct Element<S> {
    pub(crate) key: Key,
    pub(crate) component: Rc<dyn Component<S>>,
    pub(crate) initial_state: S,
}

impl<S: MergeState> Element<S> {
    /// Creates an element.
    ///
    /// `initial_state` is only used when the element mounts a new node; an
    /// existing node keeps its own state.
    #[must_use]
    pub fn new(key: Key, component: Rc<dyn Component<S>>, initial_state: S) -> Self {
        Self {
            key,
            component,
            initial_state,
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> Key {
        self.key
    }
}

impl<S> fmt::Debug for Element<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

struct FnComponent<F>(F);

impl<S, F> Component<S> for FnComponent<F>
where
    S: MergeState,
    F: Fn(&S) -> RenderOutcome<Vec<Element<S>>>,
{
    fn render(&self, state: &S) -> RenderOutcome<Vec<Element<S>>> {
        (self.0)(state)
    }
}

/// Wraps a render function as a component.
pub fn component_fn<S, F>(render: F) -> Rc<dyn Component<S>>
where
    S: MergeState,
    F: Fn(&S) -> RenderOutcome<Vec<Element<S>>> + 'static,
{
    Rc::new(FnComponent(render))
}

/// A component with no children.
#[must_use]
pub fn leaf<S: MergeState>() -> Rc<dyn Component<S>> {
    component_fn(|_| RenderOutcome::Ready(Vec::new()))
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test]
    fn fn_component_renders_children() {
        let child = leaf::<String>();
        let parent = component_fn(move |s: &String| {
            RenderOutcome::Ready(alloc::vec![Element::new(Key(1), child.clone(), s.clone())])
        });
        match parent.render(&String::from("x")) {
            RenderOutcome::Ready(children) => {
                assert_eq!(children.len(), 1);
                assert_eq!(children[0].key(), Key(1));
                assert_eq!(children[0].initial_state, "x");
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn defaults_neither_capture_nor_suspend() {
        let c = leaf::<String>();
        assert!(!c.captures_errors());
        assert!(!c.is_suspense_boundary());
        assert!(c.fallback(&String::new()).is_empty());
        assert_eq!(
            c.recover(&String::from("kept"), &RenderError::new("x")),
            "kept"
        );
    }
}
