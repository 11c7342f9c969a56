//! Tick counter and frame-rate measurement.

use std::time::Instant;

/// High resolution tick source.
pub trait Clock {
    /// Ticks since an arbitrary origin. Never decreases.
    fn ticks(&self) -> u64;

    /// Ticks per second.
    fn frequency(&self) -> u64;
}

/// Nanosecond ticks from [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn frequency(&self) -> u64 {
        1_000_000_000
    }
}

/// Frames per second from the tick delta between consecutive calls.
#[derive(Debug, Clone, Copy)]
pub struct FpsCounter {
    previous: u64,
}

impl FpsCounter {
    pub fn new(clock: &impl Clock) -> Self {
        Self {
            previous: clock.ticks(),
        }
    }

    /// `frequency / (now - previous)`, then `previous = now`.
    ///
    /// A zero delta counts as one tick so the result stays finite.
    pub fn tick(&mut self, clock: &impl Clock) -> f64 {
        let now = clock.ticks();
        let delta = now.saturating_sub(self.previous).max(1);
        self.previous = now;
        clock.frequency() as f64 / delta as f64
    }

    /// Restart measurement from now, discarding the pending interval.
    pub fn rearm(&mut self, clock: &impl Clock) {
        self.previous = clock.ticks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct ManualClock {
        now: Cell<u64>,
        frequency: u64,
    }

    impl Clock for ManualClock {
        fn ticks(&self) -> u64 {
            self.now.get()
        }

        fn frequency(&self) -> u64 {
            self.frequency
        }
    }

    #[test]
    fn test_fps_from_tick_delta() {
        let clock = ManualClock {
            now: Cell::new(1_000),
            frequency: 1_000,
        };
        let mut fps = FpsCounter::new(&clock);

        clock.now.set(1_040);
        assert_eq!(fps.tick(&clock), 25.0);

        clock.now.set(1_050);
        assert_eq!(fps.tick(&clock), 100.0);
    }

    #[test]
    fn test_zero_delta_stays_finite() {
        let clock = ManualClock {
            now: Cell::new(7),
            frequency: 1_000,
        };
        let mut fps = FpsCounter::new(&clock);

        let value = fps.tick(&clock);
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn test_rearm_drops_stale_interval() {
        let clock = ManualClock {
            now: Cell::new(0),
            frequency: 1_000,
        };
        let mut fps = FpsCounter::new(&clock);

        clock.now.set(60_000);
        fps.rearm(&clock);
        clock.now.set(60_020);
        assert_eq!(fps.tick(&clock), 50.0);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.ticks();
        let second = clock.ticks();
        assert!(second >= first);
        assert_eq!(clock.frequency(), 1_000_000_000);
    }
}
