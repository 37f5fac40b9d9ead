// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host time, durations, and timebase conversion.
//!
//! [`HostTime`] is a point on the host's monotonic clock in host-native
//! ticks. The context never reads a clock itself: it asks the injected
//! [`Clock`](crate::host::Clock) and stores the answer as event times,
//! expiration times, and fallback timestamps.
//!
//! Scheduling policy is written in milliseconds. [`Timebase`] converts those
//! to ticks once, when a [`SchedulerConfig`](crate::scheduler::SchedulerConfig)
//! is built, so the hot paths only compare and add ticks. All arithmetic
//! saturates: a lane that never expires is simply one whose expiration sits
//! at the end of the clock.

use core::fmt;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// A point in time expressed as host-native monotonic ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Adds a duration, clamping at the end of the clock.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Rational conversion factor from ticks to nanoseconds.
///
/// `nanoseconds = ticks * numer / denom`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// Ticks are nanoseconds.
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// One tick per millisecond, as reported by `performance.now()`-style
    /// clocks and by [`ManualHost`](crate::host::ManualHost).
    pub const MILLIS: Self = Self {
        numer: 1_000_000,
        denom: 1,
    };

    /// Creates a timebase.
    ///
    /// # Panics
    ///
    /// Panics if `numer` or `denom` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(numer != 0 && denom != 0, "timebase terms must be non-zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "clamped to u64::MAX before narrowing"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        let wide = ticks as u128 * self.numer as u128 / self.denom as u128;
        if wide > u64::MAX as u128 {
            u64::MAX
        } else {
            wide as u64
        }
    }

    /// Converts whole milliseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "clamped to u64::MAX before narrowing"
    )]
    pub const fn millis_to_ticks(self, millis: u64) -> u64 {
        let wide = millis as u128 * NANOS_PER_MILLI as u128 * self.denom as u128
            / self.numer as u128;
        if wide > u64::MAX as u128 {
            u64::MAX
        } else {
            wide as u64
        }
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A span of host-native ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// No time at all.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns `true` for a zero-length span.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// A span of `millis` milliseconds in `timebase` ticks.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64, timebase: Timebase) -> Self {
        Self(timebase.millis_to_ticks(millis))
    }

    /// This span in whole milliseconds, rounding down.
    #[inline]
    #[must_use]
    pub const fn to_millis(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0) / NANOS_PER_MILLI
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_timebase_is_one_tick_per_milli() {
        let tb = Timebase::MILLIS;
        assert_eq!(Duration::from_millis(5000, tb), Duration(5000));
        assert_eq!(Duration(1960).to_millis(tb), 1960);
    }

    #[test]
    fn high_resolution_clock_round_trips() {
        // 24 MHz tick source
        let tb = Timebase::new(125, 3);
        let d = Duration::from_millis(250, tb);
        assert_eq!(d.ticks(), 6_000_000, "250ms at 24 MHz");
        assert_eq!(d.to_millis(tb), 250);
    }

    #[test]
    fn never_expiring_deadlines_clamp() {
        let far = Duration::from_millis(u64::MAX, Timebase::NANOS);
        assert_eq!(far.ticks(), u64::MAX);
        assert_eq!(HostTime(10).saturating_add(far), HostTime(u64::MAX));
    }

    #[test]
    fn elapsed_time_never_goes_negative() {
        let t = HostTime(1000);
        assert_eq!(t.saturating_duration_since(HostTime(400)), Duration(600));
        assert_eq!(t.saturating_duration_since(HostTime(1500)), Duration::ZERO);
        assert!(Duration(100).saturating_sub(Duration(200)).is_zero());
        assert_eq!(Duration(100).saturating_add(Duration(30)), Duration(130));
    }
}
