use std::ops::{Add, AddAssign, Div, Sub};

use crate::Tick;

/// A span between two [`Tick`]s. Frame-time aggregates (spec §4.5) are
/// expressed in this type before being converted to an output unit via
/// [`Duration::in_unit`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Duration(pub u64);

impl Duration {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    #[inline]
    pub fn between(begin: Tick, end: Tick) -> Self {
        Self(end.0.saturating_sub(begin.0))
    }

    #[inline]
    pub fn to_nanoseconds(self) -> u64 {
        Tick(self.0).to_nanoseconds()
    }

    #[inline]
    pub fn to_microseconds(self) -> u64 {
        Tick(self.0).to_microseconds()
    }

    #[inline]
    pub fn in_unit(self, unit: crate::TimeUnit) -> u64 {
        Tick(self.0).in_unit(unit)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl Div<u64> for Duration {
    type Output = Duration;

    fn div(self, rhs: u64) -> Duration {
        Duration(self.0 / rhs.max(1))
    }
}

impl From<u64> for Duration {
    fn from(value: u64) -> Self {
        Duration(value)
    }
}
