//! Time source for stage timestamps

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of stage timestamps. Only differences between readings matter.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Nanoseconds since the clock was created.
#[derive(Clone, Copy, Debug)]
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
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Advances by a fixed step on every reading.
///
/// Gives reproducible timestamps in tests.
#[derive(Debug)]
pub struct StepClock {
    next: AtomicU64,
    step: u64,
}

impl StepClock {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            step,
        }
    }
}

impl Default for StepClock {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl Clock for StepClock {
    fn now(&self) -> u64 {
        self.next.fetch_add(self.step, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_clock() {
        let clock = StepClock::new(10, 5);
        assert_eq!(clock.now(), 10);
        assert_eq!(clock.now(), 15);
        assert_eq!(clock.now(), 20);
    }

    #[test]
    fn test_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
