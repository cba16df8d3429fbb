mod duration;
mod global_clock;
mod tick;

pub use duration::Duration;
pub use global_clock::init_mock;
pub use tick::{Tick, TimeUnit};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mocked_clock_is_nanosecond_granularity() {
        let controller = init_mock();
        controller.increment(500);
        assert_eq!(Tick::now().0, 500);
        assert_eq!(Tick::now().to_nanoseconds(), 500);
        assert_eq!(Tick::frequency(), 1_000_000_000);
    }

    #[test]
    fn duration_between_is_saturating() {
        let d = Duration::between(Tick(500), Tick(100));
        assert_eq!(d, Duration::ZERO);
        let d = Duration::between(Tick(100), Tick(500));
        assert_eq!(d.0, 400);
    }
}
