// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Priority lanes and their algebra.
//!
//! A [`Lane`] is one bit of a 32-bit mask; [`Lanes`] is any union of lanes.
//! Bits are grouped into contiguous [`LaneClass`] ranges. A lower bit index
//! means a more urgent lane, and every lane of a class is treated as part of
//! the same batch: the scheduler never orders bits within a class against each
//! other.
//!
//! ```text
//!  bit: 30 | 29..27 | 26..22 | 21..13     | 12..7   | 6..4       | 3..1          | 0
//!       Off| Idle   | Retry  | Transition | Default | InputCont. | InputDiscrete | Sync
//! ```
//!
//! The class of a lane is always derived from its bit position; it is never
//! stored next to the mask.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Index, IndexMut, Not};

use crate::host::TaskPriority;
use crate::time::{Duration, HostTime};

/// Number of usable lanes.
pub const TOTAL_LANES: usize = 31;

const ALL_BITS: u32 = (1 << TOTAL_LANES) - 1;

/// A single priority lane.
///
/// Always exactly one bit, except for [`Lane::NONE`], which marks updates that
/// were already applied and are only retained to preserve ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lane(u32);

impl Lane {
    /// The empty lane. A subset of every lane set.
    pub const NONE: Self = Self(0);
    /// The synchronous lane.
    pub const SYNC: Self = Self(1);

    /// Returns the lane at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`TOTAL_LANES`].
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        assert!(index < TOTAL_LANES, "lane index out of range");
        Self(1 << index)
    }

    /// Returns the raw bit.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the bit index of this lane.
    ///
    /// Meaningless for [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0.trailing_zeros() as usize
    }

    /// Returns `true` for [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns the class this lane belongs to, or `None` for [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn class(self) -> Option<LaneClass> {
        LaneClass::of(self)
    }

    /// Every lane at least as urgent as this one, this one included.
    #[inline]
    #[must_use]
    pub const fn and_more_urgent(self) -> Lanes {
        Lanes(self.0 | (self.0.wrapping_sub(1) & ALL_BITS))
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Lane(none)")
        } else {
            write!(f, "Lane({})", self.index())
        }
    }
}

/// A set of lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(u32);

impl Lanes {
    /// The empty set.
    pub const NONE: Self = Self(0);
    /// Every usable lane.
    pub const ALL: Self = Self(ALL_BITS);
    /// All lanes except the idle and offscreen bands.
    pub const NON_IDLE: Self = Self((1 << 27) - 1);

    /// Creates a set from raw bits. Bits above the usable range are dropped.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & ALL_BITS)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set union (`mergeLanes`).
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Lanes in `self` but not in `other` (`removeLanes`).
    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `true` if any lane is in both sets (`includesSomeLane`).
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if every lane of `self` is also in `set`.
    ///
    /// The empty set is a subset of everything.
    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, set: Self) -> bool {
        self.0 & set.0 == self.0
    }

    /// Returns `true` if `lane` is a member. [`Lane::NONE`] is always a
    /// member.
    #[inline]
    #[must_use]
    pub const fn contains(self, lane: Lane) -> bool {
        self.0 & lane.0 == lane.0
    }

    /// Returns the set with `lane` added.
    #[inline]
    #[must_use]
    pub const fn with(self, lane: Lane) -> Self {
        Self(self.0 | lane.0)
    }

    /// Returns the most urgent lane in the set.
    #[inline]
    #[must_use]
    pub const fn most_urgent(self) -> Option<Lane> {
        if self.0 == 0 {
            None
        } else {
            Some(Lane(self.0 & self.0.wrapping_neg()))
        }
    }

    /// Returns the least urgent lane in the set.
    #[inline]
    #[must_use]
    pub const fn least_urgent(self) -> Option<Lane> {
        if self.0 == 0 {
            None
        } else {
            Some(Lane(1 << (31 - self.0.leading_zeros())))
        }
    }

    /// Returns the number of lanes in the set.
    #[inline]
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the lanes of the set, most urgent first.
    #[inline]
    #[must_use]
    pub fn iter(self) -> LaneIter {
        LaneIter { rest: self.0 }
    }
}

impl From<Lane> for Lanes {
    #[inline]
    fn from(lane: Lane) -> Self {
        Self(lane.0)
    }
}

impl BitOr for Lanes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOr<Lane> for Lanes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Lane) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitOrAssign<Lane> for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Lane) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Lanes {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitAndAssign for Lanes {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Lanes {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0 & ALL_BITS)
    }
}

impl FromIterator<Lane> for Lanes {
    fn from_iter<I: IntoIterator<Item = Lane>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl IntoIterator for Lanes {
    type Item = Lane;
    type IntoIter = LaneIter;

    fn into_iter(self) -> LaneIter {
        self.iter()
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

/// Iterator over the lanes of a [`Lanes`] set, most urgent first.
#[derive(Clone, Debug)]
pub struct LaneIter {
    rest: u32,
}

impl Iterator for LaneIter {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.rest == 0 {
            return None;
        }
        let low = self.rest & self.rest.wrapping_neg();
        self.rest &= !low;
        Some(Lane(low))
    }
}

/// A named band of lanes sharing scheduling semantics.
///
/// Variants are declared from most to least urgent, and the derived `Ord`
/// follows declaration order: `a < b` means `a` is more urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneClass {
    /// Synchronous, non-yielding work.
    Sync,
    /// Discrete user input (clicks, key presses).
    InputDiscrete,
    /// Continuous user input (drags, scrolls).
    InputContinuous,
    /// Updates with no particular urgency.
    Default,
    /// Transitions that may keep showing old content while they render.
    Transition,
    /// Re-renders of boundaries whose pending data resolved.
    Retry,
    /// Work that only runs when nothing else is pending.
    Idle,
    /// Work for hidden subtrees.
    Offscreen,
}

/// How long a class may starve before being forced to sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expiry {
    Blocking,
    Normal,
    Never,
}

impl LaneClass {
    /// Every class, most urgent first.
    pub const ALL: [Self; 8] = [
        Self::Sync,
        Self::InputDiscrete,
        Self::InputContinuous,
        Self::Default,
        Self::Transition,
        Self::Retry,
        Self::Idle,
        Self::Offscreen,
    ];

    /// Half-open bit range `[start, end)` occupied by this class.
    #[must_use]
    pub const fn bit_range(self) -> (u32, u32) {
        match self {
            Self::Sync => (0, 1),
            Self::InputDiscrete => (1, 4),
            Self::InputContinuous => (4, 7),
            Self::Default => (7, 13),
            Self::Transition => (13, 22),
            Self::Retry => (22, 27),
            Self::Idle => (27, 30),
            Self::Offscreen => (30, 31),
        }
    }

    /// Every lane of this class.
    #[must_use]
    pub const fn lanes(self) -> Lanes {
        let (start, end) = self.bit_range();
        Lanes(((1_u32 << end) - 1) & !((1_u32 << start) - 1))
    }

    /// The first (lowest) lane of the class.
    #[must_use]
    pub const fn first_lane(self) -> Lane {
        Lane(1 << self.bit_range().0)
    }

    /// Every lane of this class and of all more urgent classes.
    #[must_use]
    pub const fn and_more_urgent(self) -> Lanes {
        Lanes((1_u32 << self.bit_range().1) - 1)
    }

    /// Returns the class containing `lane`, or `None` for [`Lane::NONE`].
    #[must_use]
    pub const fn of(lane: Lane) -> Option<Self> {
        if lane.is_none() {
            return None;
        }
        let index = lane.0.trailing_zeros();
        let mut i = 0;
        while i < Self::ALL.len() {
            let class = Self::ALL[i];
            if index < class.bit_range().1 {
                return Some(class);
            }
            i += 1;
        }
        None
    }

    /// Host task priority used when this class is dispatched.
    #[must_use]
    pub const fn task_priority(self) -> TaskPriority {
        match self {
            Self::Sync => TaskPriority::Immediate,
            Self::InputDiscrete | Self::InputContinuous => TaskPriority::UserBlocking,
            Self::Default | Self::Transition | Self::Retry => TaskPriority::Normal,
            Self::Idle | Self::Offscreen => TaskPriority::Idle,
        }
    }

    /// Returns `true` for the idle and offscreen bands.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Offscreen)
    }

    const fn expiry(self) -> Expiry {
        match self {
            Self::Sync | Self::InputDiscrete | Self::InputContinuous => Expiry::Blocking,
            Self::Default | Self::Transition => Expiry::Normal,
            Self::Retry | Self::Idle | Self::Offscreen => Expiry::Never,
        }
    }
}

/// Returns the lanes of the most urgent class present in `lanes`, together
/// with that class.
///
/// Returns `None` for an empty set.
#[must_use]
pub fn pick_highest_priority_lanes(lanes: Lanes) -> Option<(Lanes, LaneClass)> {
    let class = LaneClass::of(lanes.most_urgent()?)?;
    Some((lanes & class.lanes(), class))
}

/// Picks a lane of `class` for a new update.
///
/// Returns the lowest lane of the class not in `used`, so updates from
/// different sources within one event stay independently trackable. When
/// every lane of the class is taken, the class's first lane is reused: the
/// new update merges into an existing batch and can no longer be told apart
/// from it.
#[must_use]
pub fn allocate_lane(class: LaneClass, used: Lanes) -> Lane {
    class
        .lanes()
        .difference(used)
        .most_urgent()
        .unwrap_or(class.first_lane())
}

/// Starvation timeouts, per urgency band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpirationTimeouts {
    /// Timeout for sync and input lanes.
    pub blocking: Duration,
    /// Timeout for default and transition lanes.
    pub normal: Duration,
}

/// Computes the time at which a pending `lane` stops yielding to other work.
///
/// Retry, idle, and offscreen lanes never expire.
#[must_use]
pub fn compute_expiration(
    lane: Lane,
    now: HostTime,
    timeouts: &ExpirationTimeouts,
) -> Option<HostTime> {
    match LaneClass::of(lane)?.expiry() {
        Expiry::Blocking => Some(now.saturating_add(timeouts.blocking)),
        Expiry::Normal => Some(now.saturating_add(timeouts.normal)),
        Expiry::Never => None,
    }
}

/// A fixed table with one entry per lane.
#[derive(Clone, PartialEq, Eq)]
pub struct LaneMap<T>([T; TOTAL_LANES]);

impl<T: Copy> LaneMap<T> {
    /// Creates a map with every entry set to `value`.
    #[must_use]
    pub const fn filled(value: T) -> Self {
        Self([value; TOTAL_LANES])
    }

    /// Sets the entry of every lane in `lanes` to `value`.
    pub fn fill(&mut self, lanes: Lanes, value: T) {
        for lane in lanes {
            self.0[lane.index()] = value;
        }
    }
}

impl<T> Index<Lane> for LaneMap<T> {
    type Output = T;

    fn index(&self, lane: Lane) -> &T {
        &self.0[lane.index()]
    }
}

impl<T> IndexMut<Lane> for LaneMap<T> {
    fn index_mut(&mut self, lane: Lane) -> &mut T {
        &mut self.0[lane.index()]
    }
}

impl<T: fmt::Debug> fmt::Debug for LaneMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn lanes(indices: &[usize]) -> Lanes {
        indices.iter().map(|&i| Lane::from_index(i)).collect()
    }

    #[test]
    fn classes_tile_the_lane_space() {
        let mut seen = Lanes::NONE;
        for class in LaneClass::ALL {
            assert!(!seen.intersects(class.lanes()), "{class:?} overlaps");
            seen |= class.lanes();
        }
        assert_eq!(seen, Lanes::ALL);
        assert_eq!(
            Lanes::NON_IDLE,
            LaneClass::Retry.and_more_urgent(),
            "non-idle ends where idle begins"
        );
    }

    #[test]
    fn class_of_every_lane_round_trips() {
        for class in LaneClass::ALL {
            for lane in class.lanes() {
                assert_eq!(LaneClass::of(lane), Some(class));
            }
        }
        assert_eq!(LaneClass::of(Lane::NONE), None);
    }

    #[test]
    fn pick_highest_returns_whole_class() {
        let input = lanes(&[8, 10, 14, 28]);
        let (picked, class) = pick_highest_priority_lanes(input).unwrap();
        assert_eq!(class, LaneClass::Default);
        assert_eq!(picked, lanes(&[8, 10]));
    }

    #[test]
    fn pick_highest_of_empty_is_none() {
        assert!(pick_highest_priority_lanes(Lanes::NONE).is_none());
    }

    #[test]
    fn allocate_skips_used_lanes() {
        let first = allocate_lane(LaneClass::Default, Lanes::NONE);
        assert_eq!(first, LaneClass::Default.first_lane());
        let second = allocate_lane(LaneClass::Default, Lanes::from(first));
        assert_ne!(first, second);
        assert_eq!(LaneClass::of(second), Some(LaneClass::Default));
    }

    #[test]
    fn allocate_degrades_to_merge_when_class_is_full() {
        let used = LaneClass::InputDiscrete.lanes();
        let lane = allocate_lane(LaneClass::InputDiscrete, used);
        assert_eq!(lane, LaneClass::InputDiscrete.first_lane());
    }

    #[test]
    fn sync_class_has_one_lane() {
        assert_eq!(allocate_lane(LaneClass::Sync, Lanes::ALL), Lane::SYNC);
        assert_eq!(LaneClass::Sync.lanes().len(), 1);
    }

    #[test]
    fn expiration_per_class() {
        let timeouts = ExpirationTimeouts {
            blocking: Duration(250),
            normal: Duration(5000),
        };
        let now = HostTime(1000);
        assert_eq!(
            compute_expiration(Lane::SYNC, now, &timeouts),
            Some(HostTime(1250))
        );
        assert_eq!(
            compute_expiration(LaneClass::Transition.first_lane(), now, &timeouts),
            Some(HostTime(6000))
        );
        for class in [LaneClass::Retry, LaneClass::Idle, LaneClass::Offscreen] {
            assert_eq!(
                compute_expiration(class.first_lane(), now, &timeouts),
                None,
                "{class:?} never expires"
            );
        }
    }

    #[test]
    fn subset_and_none_lane() {
        let render = lanes(&[0, 1]);
        assert!(render.contains(Lane::NONE), "NONE is always included");
        assert!(lanes(&[1]).is_subset_of(render));
        assert!(!lanes(&[1, 2]).is_subset_of(render));
        assert!(Lanes::NONE.is_subset_of(Lanes::NONE));
    }

    #[test]
    fn most_and_least_urgent() {
        let set = lanes(&[3, 9, 30]);
        assert_eq!(set.most_urgent(), Some(Lane::from_index(3)));
        assert_eq!(set.least_urgent(), Some(Lane::from_index(30)));
        assert_eq!(
            Lane::from_index(2).and_more_urgent(),
            lanes(&[0, 1, 2]),
            "mask up to and including the lane"
        );
    }

    #[test]
    fn iteration_is_most_urgent_first() {
        let got: Vec<usize> = lanes(&[20, 0, 7]).iter().map(Lane::index).collect();
        assert_eq!(got, [0, 7, 20]);
    }

    #[test]
    fn not_stays_in_range() {
        assert_eq!(!Lanes::NONE, Lanes::ALL);
        assert_eq!(!Lanes::ALL, Lanes::NONE);
    }

    #[test]
    fn lane_map_fill_and_index() {
        let mut map = LaneMap::filled(None);
        map.fill(lanes(&[2, 5]), Some(HostTime(7)));
        assert_eq!(map[Lane::from_index(2)], Some(HostTime(7)));
        assert_eq!(map[Lane::from_index(3)], None);
    }
}
