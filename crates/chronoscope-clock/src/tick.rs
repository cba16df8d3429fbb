use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::global_clock;

/// Selects the unit frame-time accessors report in (spec §6.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Ticks,
    Microseconds,
}

/// A monotonic clock tick. Never negative, never wraps on the same core
/// under normal operation (spec §4.1). Conversion to wall-clock units goes
/// through the process-wide [`global_clock::frequency`].
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    /// Reads the process-wide clock. Safe to call from any thread, never
    /// allocates.
    #[inline]
    pub fn now() -> Self {
        Tick(global_clock::global().raw())
    }

    /// Ticks per second of the process-wide clock (spec §4.1).
    #[inline]
    pub fn frequency() -> u64 {
        global_clock::frequency()
    }

    #[inline]
    pub fn to_nanoseconds(self) -> u64 {
        let freq = Self::frequency();
        if freq == 1_000_000_000 {
            return self.0;
        }
        (u128::from(self.0) * 1_000_000_000 / u128::from(freq.max(1))) as u64
    }

    #[inline]
    pub fn to_microseconds(self) -> u64 {
        self.to_nanoseconds() / 1_000
    }

    #[inline]
    pub fn in_unit(self, unit: TimeUnit) -> u64 {
        match unit {
            TimeUnit::Ticks => self.0,
            TimeUnit::Microseconds => self.to_microseconds(),
        }
    }

    #[inline]
    pub fn saturating_sub(self, other: Tick) -> Tick {
        Tick(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub fn elapsed(self) -> Tick {
        Tick::now().saturating_sub(self)
    }
}

impl Sub for Tick {
    type Output = Tick;

    fn sub(self, rhs: Tick) -> Tick {
        self.saturating_sub(rhs)
    }
}

impl Add for Tick {
    type Output = Tick;

    fn add(self, rhs: Tick) -> Tick {
        Tick(self.0 + rhs.0)
    }
}
