use std::sync::Arc;

use once_cell::sync::OnceCell;
use quanta::Mock;

/// Raw-tick span measured once over this many ticks of the real clock, used
/// to derive [`frequency`] without assuming TSC vs. coarse-monotonic.
const CALIBRATION_TICKS: u64 = 1 << 20;

static GLOBAL_CLOCK: OnceCell<quanta::Clock> = OnceCell::new();
static FREQUENCY: OnceCell<u64> = OnceCell::new();

/// The process-wide clock backing [`crate::Tick::now`].
#[inline]
pub(crate) fn global() -> &'static quanta::Clock {
    GLOBAL_CLOCK.get_or_init(quanta::Clock::new)
}

/// Ticks per second for the process-wide clock, established once on first
/// use (spec §4.1: "a one-shot `frequency()`"). If the platform's native
/// tick unit is already nanoseconds, this converges to exactly
/// `1_000_000_000`.
#[inline]
pub(crate) fn frequency() -> u64 {
    *FREQUENCY.get_or_init(|| {
        let nanos = global().delta_as_nanos(0, CALIBRATION_TICKS).max(1);
        (u128::from(CALIBRATION_TICKS) * 1_000_000_000 / u128::from(nanos)) as u64
    })
}

/// Installs a mocked clock as the process-wide clock and returns its
/// controller. For deterministic tests only; must be called before any call
/// to [`crate::Tick::now`] and at most once per process.
pub fn init_mock() -> Arc<Mock> {
    let (mock, controller) = quanta::Clock::mock();
    GLOBAL_CLOCK
        .set(mock)
        .unwrap_or_else(|_| panic!("chronoscope clock already initialised"));
    FREQUENCY.set(1_000_000_000).ok();
    controller
}
