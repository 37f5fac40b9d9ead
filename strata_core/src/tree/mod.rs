// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node storage and the double-buffered tree.
//!
//! Every logical node is an *entity* addressed by a generational [`NodeId`].
//! An entity owns up to two *slots* in [`NodeStore`]'s parallel arrays: the
//! committed instance and a work-in-progress alternate. Render passes build
//! the alternate tree; a commit swaps which slot is current.

mod id;
pub(crate) mod reconcile;
mod store;
mod traverse;

pub use id::NodeId;
pub(crate) use id::INVALID;
pub use store::NodeStore;
pub(crate) use store::{NodeFlags, PendingEffect};
pub use traverse::Children;
