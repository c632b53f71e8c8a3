use std::time::Duration;

/// Explicit retry/back-off policy: an initial delay that doubles (or scales by
/// an arbitrary multiplier) on each subsequent attempt, capped at a maximum,
/// bounded by a maximum attempt count.
///
/// Replaces the hand-rolled nanosecond-sleep-and-double loop with a value the
/// caller can inspect, tune, and unit test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, multiplier: u32, cap: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            multiplier,
            cap,
            max_attempts,
        }
    }

    /// Delay to wait before retry attempt `attempt` (0-based: the delay
    /// before the first retry is `delay_for(0)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.multiplier);
            if delay > self.cap {
                delay = self.cap;
                break;
            }
        }
        delay.min(self.cap)
    }

    pub fn sleep(&self, attempt: u32) {
        std::thread::sleep(self.delay_for(attempt));
    }
}

impl Default for BackoffPolicy {
    /// Nanosecond-granularity initial delay, doubling, capped at 100ms.
    fn default() -> Self {
        Self {
            initial: Duration::from_nanos(1),
            multiplier: 2,
            cap: Duration::from_millis(100),
            max_attempts: 10,
        }
    }
}
