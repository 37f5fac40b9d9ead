// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-root lane bookkeeping and next-lane selection.
//!
//! A root tracks which lanes have pending work, which of those are parked on
//! a suspension, which were pinged since, which waited too long, and which
//! are entangled so they always render together. [`RootState::next_lanes`]
//! turns that into the lanes of the next pass:
//!
//! ```text
//!  expired                       (treated as Sync)
//!   > non-idle, not suspended
//!   > non-idle, pinged
//!   > idle, not suspended
//!   > idle, pinged
//! ```

use alloc::vec::Vec;
use core::fmt;

use crate::host::{TaskHandle, TaskPriority};
use crate::lane::{
    ExpirationTimeouts, Lane, LaneClass, LaneMap, Lanes, compute_expiration,
    pick_highest_priority_lanes,
};
use crate::time::HostTime;
use crate::work_loop::ExitStatus;

/// Identifies a root created by
/// [`SchedulerContext::create_root`](crate::scheduler::SchedulerContext::create_root).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RootId(pub u32);

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({})", self.0)
    }
}

/// A render pass that finished but has not been committed yet.
#[derive(Clone, Debug)]
pub(crate) struct FinishedWork {
    pub(crate) slot: u32,
    pub(crate) lanes: Lanes,
    pub(crate) status: ExitStatus,
    pub(crate) pass: u32,
    pub(crate) pinged_lanes: Lanes,
    pub(crate) latest_event_time: Option<HostTime>,
    /// Slots allocated by the pass, swept or freed when it leaves.
    pub(crate) created: Vec<u32>,
}

/// Lane bookkeeping for one root.
pub struct RootState {
    // -- Tree --
    pub(crate) entity: u32,
    pub(crate) current: u32,
    /// Whether any pass has committed yet.
    pub(crate) mounted: bool,

    // -- Lanes --
    pub(crate) pending: Lanes,
    pub(crate) suspended: Lanes,
    pub(crate) pinged: Lanes,
    pub(crate) expired: Lanes,
    pub(crate) entangled: Lanes,
    pub(crate) event_times: LaneMap<Option<HostTime>>,
    pub(crate) expiration_times: LaneMap<Option<HostTime>>,
    pub(crate) entanglements: LaneMap<Lanes>,

    // -- Tasks --
    pub(crate) callback: Option<(TaskHandle, TaskPriority)>,
    pub(crate) timeout: Option<TaskHandle>,
    pub(crate) finished: Option<FinishedWork>,
}

impl fmt::Debug for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootState")
            .field("pending", &self.pending)
            .field("suspended", &self.suspended)
            .field("pinged", &self.pinged)
            .field("expired", &self.expired)
            .field("entangled", &self.entangled)
            .field("callback", &self.callback)
            .finish_non_exhaustive()
    }
}

impl RootState {
    pub(crate) fn new(entity: u32, current: u32) -> Self {
        Self {
            entity,
            current,
            mounted: false,
            pending: Lanes::NONE,
            suspended: Lanes::NONE,
            pinged: Lanes::NONE,
            expired: Lanes::NONE,
            entangled: Lanes::NONE,
            event_times: LaneMap::filled(None),
            expiration_times: LaneMap::filled(None),
            entanglements: LaneMap::filled(Lanes::NONE),
            callback: None,
            timeout: None,
            finished: None,
        }
    }

    /// Whether the root has committed at least once.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Lanes with uncommitted updates.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        self.pending
    }

    /// Pending lanes parked on a suspension.
    #[must_use]
    pub fn suspended_lanes(&self) -> Lanes {
        self.suspended
    }

    /// Suspended lanes that were pinged since they were parked.
    #[must_use]
    pub fn pinged_lanes(&self) -> Lanes {
        self.pinged
    }

    /// Pending lanes that waited past their expiration time.
    #[must_use]
    pub fn expired_lanes(&self) -> Lanes {
        self.expired
    }

    /// Lanes that render together with others.
    #[must_use]
    pub fn entangled_lanes(&self) -> Lanes {
        self.entangled
    }

    /// Host priority of the outstanding render task, if any.
    #[must_use]
    pub fn scheduled_priority(&self) -> Option<TaskPriority> {
        self.callback.map(|(_, priority)| priority)
    }

    /// Whether a finished pass is waiting to be committed.
    #[must_use]
    pub fn has_finished_work(&self) -> bool {
        self.finished.is_some()
    }

    /// Picks the lanes of the next pass.
    ///
    /// `wip_lanes` are the lanes of a pass already in flight on this root.
    /// That pass is kept when the best candidate is strictly less urgent and
    /// none of its lanes has been suspended since. Returns `None` when there
    /// is nothing to do; the class is what the host task is prioritized by.
    #[must_use]
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Option<(Lanes, LaneClass)> {
        let pending = self.pending;
        if pending.is_empty() {
            return None;
        }

        let (mut next, class) = if let Some(lowest) = self.expired.least_urgent() {
            (pending & lowest.and_more_urgent(), LaneClass::Sync)
        } else {
            let non_idle = pending & Lanes::NON_IDLE;
            let pool = if non_idle.is_empty() { pending } else { non_idle };
            let unblocked = pool.difference(self.suspended);
            let (picked, class) = if unblocked.is_empty() {
                pick_highest_priority_lanes(pool & self.pinged)?
            } else {
                pick_highest_priority_lanes(unblocked)?
            };
            // Parked siblings in the picked class stay out of the batch.
            (pending & picked.least_urgent()?.and_more_urgent(), class)
        };

        if !wip_lanes.is_empty()
            && wip_lanes != next
            && !wip_lanes.intersects(self.suspended)
        {
            if let Some(wip_class) = wip_lanes.most_urgent().and_then(Lane::class) {
                if class > wip_class {
                    return Some((wip_lanes, wip_class));
                }
            }
        }

        let tangled = next & self.entangled;
        for lane in tangled {
            next |= self.entanglements[lane];
        }
        Some((next, class))
    }

    /// Records a new update in `lane`.
    ///
    /// Parked lanes at least as urgent as `lane` stay parked; everything less
    /// urgent is unparked, since the new update may unblock it.
    pub fn mark_updated(&mut self, lane: Lane, event_time: HostTime) {
        self.pending |= lane;
        let more_urgent = Lanes::from_bits(lane.bits().wrapping_sub(1));
        self.suspended &= more_urgent;
        self.pinged &= more_urgent;
        self.event_times[lane] = Some(event_time);
    }

    /// Parks `lanes` until they are pinged or receive a new update.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        self.suspended |= lanes;
        self.pinged = self.pinged.difference(lanes);
        self.expiration_times.fill(lanes, None);
    }

    /// Wakes the suspended lanes among `lanes`. Returns the lanes woken.
    pub fn mark_pinged(&mut self, lanes: Lanes) -> Lanes {
        let woken = self.suspended & lanes;
        self.pinged |= woken;
        woken
    }

    /// Retires every lane not in `remaining` after a commit.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer = self.pending.difference(remaining);
        self.pending = remaining;
        self.suspended = Lanes::NONE;
        self.pinged = Lanes::NONE;
        self.expired &= remaining;
        self.entangled &= remaining;
        self.event_times.fill(no_longer, None);
        self.expiration_times.fill(no_longer, None);
        self.entanglements.fill(no_longer, Lanes::NONE);
    }

    /// Makes `lanes` always render together.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        self.entangled |= lanes;
        for lane in lanes {
            self.entanglements[lane] |= lanes;
        }
    }

    /// Stamps an expiration time on every pending lane that can make
    /// progress and lacks one, and moves lanes past theirs into the expired
    /// set. Returns the newly expired lanes.
    pub fn mark_starved_lanes_as_expired(
        &mut self,
        now: HostTime,
        timeouts: &ExpirationTimeouts,
    ) -> Lanes {
        let mut newly = Lanes::NONE;
        for lane in self.pending {
            match self.expiration_times[lane] {
                None => {
                    if !self.suspended.contains(lane) || self.pinged.contains(lane) {
                        self.expiration_times[lane] = compute_expiration(lane, now, timeouts);
                    }
                }
                Some(at) if at <= now => {
                    if !self.expired.contains(lane) {
                        newly |= lane;
                    }
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
        newly
    }

    /// Latest event time recorded for any of `lanes`.
    #[must_use]
    pub fn latest_event_time(&self, lanes: Lanes) -> Option<HostTime> {
        lanes.iter().filter_map(|lane| self.event_times[lane]).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;

    fn lane(i: usize) -> Lane {
        Lane::from_index(i)
    }

    fn root() -> RootState {
        RootState::new(0, 0)
    }

    fn timeouts() -> ExpirationTimeouts {
        ExpirationTimeouts {
            blocking: Duration(100),
            normal: Duration(500),
        }
    }

    #[test]
    fn nothing_pending_means_no_lanes() {
        assert_eq!(root().next_lanes(Lanes::NONE), None);
    }

    #[test]
    fn most_urgent_class_widens_to_more_urgent_pending() {
        let mut r = root();
        let default = LaneClass::Default.first_lane();
        let transition = LaneClass::Transition.first_lane();
        r.mark_updated(transition, HostTime(0));
        r.mark_updated(default, HostTime(0));
        let (next, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Default);
        assert_eq!(next, Lanes::from(default));
    }

    #[test]
    fn suspended_lanes_are_skipped_until_pinged() {
        let mut r = root();
        let default = LaneClass::Default.first_lane();
        let transition = LaneClass::Transition.first_lane();
        r.mark_updated(default, HostTime(0));
        r.mark_updated(transition, HostTime(0));
        r.mark_suspended(Lanes::from(default));

        let (_, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Transition);

        r.mark_suspended(Lanes::from(transition));
        assert_eq!(r.next_lanes(Lanes::NONE), None, "everything parked");

        assert_eq!(r.mark_pinged(Lanes::from(default)), Lanes::from(default));
        let (next, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Default);
        assert!(next.contains(default));
    }

    #[test]
    fn parked_lane_of_the_picked_class_stays_out() {
        let mut r = root();
        let first = LaneClass::Transition.first_lane();
        let second = Lane::from_index(first.index() + 1);
        r.mark_updated(first, HostTime(0));
        r.mark_updated(second, HostTime(0));
        r.mark_suspended(Lanes::from(second));

        let (next, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Transition);
        assert_eq!(next, Lanes::from(first), "parked sibling not pulled back in");
    }

    #[test]
    fn non_idle_beats_idle() {
        let mut r = root();
        let idle = LaneClass::Idle.first_lane();
        let retry = LaneClass::Retry.first_lane();
        r.mark_updated(idle, HostTime(0));
        r.mark_updated(retry, HostTime(0));
        r.mark_suspended(Lanes::from(retry));
        r.mark_pinged(Lanes::from(retry));
        let (_, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Retry, "pinged non-idle beats unblocked idle");
    }

    #[test]
    fn update_unparks_less_urgent_lanes() {
        let mut r = root();
        let transition = LaneClass::Transition.first_lane();
        r.mark_updated(transition, HostTime(0));
        r.mark_suspended(Lanes::from(transition));
        r.mark_updated(Lane::SYNC, HostTime(1));
        assert!(r.suspended_lanes().is_empty());

        r.mark_suspended(Lanes::from(Lane::SYNC));
        r.mark_updated(transition, HostTime(2));
        assert_eq!(
            r.suspended_lanes(),
            Lanes::from(Lane::SYNC),
            "more urgent parked lanes stay parked"
        );
    }

    #[test]
    fn in_flight_pass_survives_less_urgent_work() {
        let mut r = root();
        let default = LaneClass::Default.first_lane();
        let idle = LaneClass::Idle.first_lane();
        r.mark_updated(default, HostTime(0));
        let wip = Lanes::from(default);
        r.mark_updated(idle, HostTime(0));
        assert_eq!(r.next_lanes(wip), Some((wip, LaneClass::Default)));

        r.mark_updated(Lane::SYNC, HostTime(0));
        let (next, class) = r.next_lanes(wip).unwrap();
        assert_eq!(class, LaneClass::Sync, "more urgent work interrupts");
        assert_eq!(next, Lanes::from(Lane::SYNC));
    }

    #[test]
    fn starved_lanes_expire_and_render_as_sync() {
        let mut r = root();
        let transition = LaneClass::Transition.first_lane();
        let default = LaneClass::Default.first_lane();
        r.mark_updated(transition, HostTime(0));
        r.mark_updated(default, HostTime(0));
        assert!(r.mark_starved_lanes_as_expired(HostTime(0), &timeouts()).is_empty());
        assert_eq!(
            r.mark_starved_lanes_as_expired(HostTime(500), &timeouts()),
            Lanes::from(default) | transition
        );

        let (next, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Sync);
        assert_eq!(next, Lanes::from(default) | transition);
    }

    #[test]
    fn suspended_lanes_do_not_starve() {
        let mut r = root();
        let default = LaneClass::Default.first_lane();
        r.mark_updated(default, HostTime(0));
        r.mark_suspended(Lanes::from(default));
        r.mark_starved_lanes_as_expired(HostTime(0), &timeouts());
        assert!(
            r.mark_starved_lanes_as_expired(HostTime(10_000), &timeouts())
                .is_empty()
        );
    }

    #[test]
    fn entangled_lanes_render_together() {
        let mut r = root();
        let a = LaneClass::Default.first_lane();
        let b = LaneClass::Transition.first_lane();
        r.mark_updated(a, HostTime(0));
        r.mark_updated(b, HostTime(0));
        r.mark_entangled(Lanes::from(a) | b);
        let (next, class) = r.next_lanes(Lanes::NONE).unwrap();
        assert_eq!(class, LaneClass::Default);
        assert_eq!(next, Lanes::from(a) | b);
    }

    #[test]
    fn finish_clears_retired_lanes() {
        let mut r = root();
        let a = LaneClass::Default.first_lane();
        let b = LaneClass::Transition.first_lane();
        r.mark_updated(a, HostTime(3));
        r.mark_updated(b, HostTime(4));
        r.mark_entangled(Lanes::from(a));
        r.mark_suspended(Lanes::from(b));
        r.mark_finished(Lanes::from(b));

        assert_eq!(r.pending_lanes(), Lanes::from(b));
        assert!(r.suspended_lanes().is_empty());
        assert!(r.entangled_lanes().is_empty());
        assert_eq!(r.latest_event_time(Lanes::from(a)), None);
        assert_eq!(r.latest_event_time(Lanes::ALL), Some(HostTime(4)));
    }
}
