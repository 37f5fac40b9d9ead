// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests for update queue replay and lane selection.

#![allow(missing_docs, reason = "integration test crate")]

use proptest::prelude::*;

use strata_core::lane::{TOTAL_LANES, pick_highest_priority_lanes};
use strata_core::time::HostTime;
use strata_core::update_queue::{SharedQueue, UpdateQueue};
use strata_core::{Lane, Lanes, Update};

fn append(lane: Lane, ch: char) -> Update<String> {
    Update::reduce(move |s: &String| {
        let mut next = s.clone();
        next.push(ch);
        next
    })
    .with_lane(lane, HostTime(0))
}

/// Updates as (lane index, character), on a handful of lanes so passes
/// overlap often.
fn updates() -> impl Strategy<Value = Vec<(usize, char)>> {
    prop::collection::vec((0_usize..6, prop::char::range('a', 'z')), 1..24)
}

fn passes() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0_u32..(1 << 6), 0..6)
}

proptest! {
    #[test]
    fn each_pass_sees_everything_rendered_so_far(updates in updates(), passes in passes()) {
        let mut shared = SharedQueue::new();
        let mut queue = UpdateQueue::new(String::new());
        for &(lane, ch) in &updates {
            shared.enqueue(append(Lane::from_index(lane), ch));
        }

        let mut seen = Lanes::NONE;
        for bits in passes {
            let pass = Lanes::from_bits(bits);
            seen = seen | pass;
            let processed = queue.process(&mut shared, None, pass);

            let expected: String = updates
                .iter()
                .filter(|&&(lane, _)| seen.contains(Lane::from_index(lane)))
                .map(|&(_, ch)| ch)
                .collect();
            prop_assert_eq!(&processed.state, &expected);
            prop_assert!(!processed.remaining_lanes.intersects(pass));
        }

        let full = queue.process(&mut shared, None, Lanes::ALL);
        let expected: String = updates.iter().map(|&(_, ch)| ch).collect();
        prop_assert_eq!(&full.state, &expected);
        prop_assert!(full.remaining_lanes.is_empty());
        prop_assert_eq!(queue.base_len(), 0);
        prop_assert_eq!(queue.base_state(), &expected);
    }

    #[test]
    fn picked_lanes_are_the_most_urgent_class(bits in any::<u32>()) {
        let lanes = Lanes::from_bits(bits);
        match pick_highest_priority_lanes(lanes) {
            None => prop_assert!(lanes.is_empty()),
            Some((picked, class)) => {
                prop_assert!(picked.is_subset_of(lanes));
                prop_assert_eq!(picked, lanes & class.lanes());
                let more_urgent = Lanes::from_bits(class.first_lane().bits() - 1);
                prop_assert!(!lanes.intersects(more_urgent));
            }
        }
    }

    #[test]
    fn lane_indices_round_trip(index in 0..TOTAL_LANES) {
        let lane = Lane::from_index(index);
        prop_assert_eq!(lane.index(), index);
        prop_assert_eq!(lane.bits().count_ones(), 1);
    }
}
