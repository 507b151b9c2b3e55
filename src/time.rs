//! Monotonic time.
//!
//! The stack has exactly one clock: a 32-bit millisecond counter driven by
//! a periodic host timer hook (`Instant::advance`). It wraps every ~49.7
//! days. All comparisons between two `Instant`s use wrapping (modular)
//! subtraction so that a wraparound mid-connection still produces a correct
//! interval, matching the unsigned tick arithmetic the original stack
//! relied on (`Timer_diff` in the source this was distilled from).

use core::fmt;
use core::ops::{Add, Sub};

/// A point in time, expressed in milliseconds since the stack was
/// initialized.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Instant(u32);

impl Instant {
    pub const ZERO: Instant = Instant(0);

    pub const fn from_millis(millis: u32) -> Instant {
        Instant(millis)
    }

    pub const fn from_secs(secs: u32) -> Instant {
        Instant(secs.saturating_mul(1000))
    }

    pub const fn total_millis(&self) -> u32 {
        self.0
    }

    /// Signed, wraparound-correct distance from `earlier` to `self`.
    ///
    /// A positive result means `self` is after `earlier`; this stays
    /// correct across one 32-bit wrap of the underlying counter, same as
    /// `ack` comparisons in TCP sequence space.
    pub fn checked_duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0))
    }

    /// True if `self` is strictly after `other`, even across one wrap.
    pub fn after(&self, other: Instant) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// The current time, measured as milliseconds since this process
    /// started. Host-only: nothing in the `no_std`-capable core calls this,
    /// it exists for binaries/examples driving a real device.
    pub fn now() -> Instant {
        use std::sync::OnceLock;
        use std::time::Instant as StdInstant;

        static START: OnceLock<StdInstant> = OnceLock::new();
        let start = START.get_or_init(StdInstant::now);
        Instant(start.elapsed().as_millis() as u32)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1000, self.0 % 1000)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0.wrapping_add(rhs.0))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0.wrapping_sub(rhs.0))
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        self.checked_duration_since(rhs)
    }
}

/// A span of time, in milliseconds. Always non-negative by construction;
/// negative intervals show up as a very large `Duration` (same overflow
/// behavior a `uint32_t` tick subtraction has in C).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Duration(u32);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_millis(millis: u32) -> Duration {
        Duration(millis)
    }

    pub const fn from_secs(secs: u32) -> Duration {
        Duration(secs.saturating_mul(1000))
    }

    pub const fn total_millis(&self) -> u32 {
        self.0
    }

    pub fn saturating_mul(self, rhs: u32) -> Duration {
        Duration(self.0.saturating_mul(rhs))
    }

    pub const fn min(self, other: Duration) -> Duration {
        if self.0 < other.0 {
            self
        } else {
            other
        }
    }

    pub const fn max(self, other: Duration) -> Duration {
        if self.0 > other.0 {
            self
        } else {
            other
        }
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Coarse hardware tick counter, driven at the classic PC timer rate
/// (~18.2 Hz / 55ms per tick). Some close/retransmission constants in the
/// original stack were expressed in ticks rather than milliseconds; this
/// is kept only for documentation/compat constants, all internal timing
/// uses `Instant`/`Duration` in milliseconds.
pub const MS_PER_TICK: u32 = 55;

pub const fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_millis(ticks.saturating_mul(MS_PER_TICK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_since_is_wraparound_correct() {
        let a = Instant::from_millis(u32::MAX - 10);
        let b = Instant::from_millis(9); // wrapped around by 20ms
        assert_eq!(b.checked_duration_since(a), Duration::from_millis(20));
        assert!(b.after(a));
    }

    #[test]
    fn ordinary_subtraction() {
        let a = Instant::from_millis(100);
        let b = Instant::from_millis(150);
        assert_eq!(b - a, Duration::from_millis(50));
    }
}
