// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests: whatever order lanes render in, the committed state is
//! every update applied in insertion order.

#![allow(missing_docs, reason = "integration test crate")]

use proptest::prelude::*;

use strata_core::component::{component_fn, leaf};
use strata_core::host::ManualHost;
use strata_core::time::Duration;
use strata_core::{
    Element, Key, LaneClass, NodeId, RenderOutcome, SchedulerConfig, SchedulerContext, Update,
};

const CLASSES: [LaneClass; 6] = [
    LaneClass::Sync,
    LaneClass::InputDiscrete,
    LaneClass::InputContinuous,
    LaneClass::Default,
    LaneClass::Transition,
    LaneClass::Idle,
];

#[derive(Clone, Debug)]
enum Op {
    Enqueue { class: usize, ch: char },
    Step,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..CLASSES.len(), prop::char::range('a', 'z'))
            .prop_map(|(class, ch)| Op::Enqueue { class, ch }),
        1 => Just(Op::Step),
    ]
}

const CHILDREN: u64 = 4;

#[derive(Clone, Debug)]
enum TreeOp {
    Enqueue { node: usize, class: usize, ch: char },
    Step,
    Advance(u64),
}

fn tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        4 => (0..=CHILDREN as usize, 0..CLASSES.len(), prop::char::range('a', 'z'))
            .prop_map(|(node, class, ch)| TreeOp::Enqueue { node, class, ch }),
        2 => Just(TreeOp::Step),
        1 => (0_u64..700).prop_map(TreeOp::Advance),
    ]
}

fn append(ch: char) -> Update<String> {
    Update::reduce(move |s: &String| {
        let mut s = s.clone();
        s.push(ch);
        s
    })
}

proptest! {
    #[test]
    fn final_state_is_insertion_order(
        ops in prop::collection::vec(op(), 1..30),
        yield_after in prop::option::of(1_u32..4),
    ) {
        let mut ctx = SchedulerContext::new(ManualHost::new(), SchedulerConfig::millis());
        let root = ctx
            .create_root(Element::new(Key(0), leaf(), String::new()), LaneClass::Default)
            .expect("create root");
        ctx.run_until_idle().expect("mount");
        let node = ctx.root_node(root).expect("root node");

        if let Some(units) = yield_after {
            ctx.host_mut().set_yield_after(units);
        }

        let mut expected = String::new();
        for op in ops {
            match op {
                Op::Enqueue { class, ch } => {
                    ctx.enqueue(node, CLASSES[class], append(ch)).expect("enqueue");
                    expected.push(ch);
                }
                Op::Step => {
                    ctx.run_next().expect("step");
                }
            }
        }
        ctx.run_until_idle().expect("drain");

        prop_assert_eq!(ctx.store().state(node), &expected);
        prop_assert!(ctx.is_idle());
        prop_assert!(ctx.root_state(root).expect("root").pending_lanes().is_empty());
    }

    #[test]
    fn class_lanes_stay_in_class(class in 0..CLASSES.len(), used in any::<u32>()) {
        let class = CLASSES[class];
        let lane = strata_core::lane::allocate_lane(class, strata_core::Lanes::from_bits(used));
        prop_assert_eq!(LaneClass::of(lane), Some(class));
    }

    #[test]
    fn every_node_sees_its_updates_in_order(
        ops in prop::collection::vec(tree_op(), 1..40),
        yield_after in prop::option::of(1_u32..4),
    ) {
        let child = leaf::<String>();
        let parent = component_fn(move |_: &String| {
            RenderOutcome::Ready(
                (1..=CHILDREN)
                    .map(|k| Element::new(Key(k), child.clone(), String::new()))
                    .collect(),
            )
        });
        let mut ctx = SchedulerContext::new(ManualHost::new(), SchedulerConfig::millis());
        let root = ctx
            .create_root(Element::new(Key(0), parent, String::new()), LaneClass::Default)
            .expect("create root");
        ctx.run_until_idle().expect("mount");
        let root_node = ctx.root_node(root).expect("root node");
        let mut nodes: Vec<NodeId> = vec![root_node];
        nodes.extend(ctx.store().children(root_node));
        prop_assert_eq!(nodes.len(), CHILDREN as usize + 1);

        if let Some(units) = yield_after {
            ctx.host_mut().set_yield_after(units);
        }

        let mut expected = vec![String::new(); nodes.len()];
        for op in ops {
            match op {
                TreeOp::Enqueue { node, class, ch } => {
                    ctx.enqueue(nodes[node], CLASSES[class], append(ch)).expect("enqueue");
                    expected[node].push(ch);
                }
                TreeOp::Step => {
                    ctx.run_next().expect("step");
                }
                TreeOp::Advance(ms) => ctx.host_mut().advance(Duration(ms)),
            }
        }
        ctx.run_until_idle().expect("drain");

        for (node, want) in nodes.iter().zip(&expected) {
            prop_assert!(ctx.store().is_alive(*node));
            prop_assert_eq!(ctx.store().state(*node), want);
        }
        prop_assert!(ctx.is_idle());
        prop_assert!(ctx.root_state(root).expect("root").pending_lanes().is_empty());
    }
}
