//! Submission retry policy.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Doubling delay that gives up once the next delay would reach the ceiling.
///
/// With an initial interval of 1s and a ceiling of 4s the delays are 1s, 2s and then
/// the policy is exhausted, so the third consecutive failure is final.
#[derive(Debug, Clone)]
pub struct CappedExponential {
    initial: Duration,
    ceiling: Duration,
    current: Duration,
}

impl CappedExponential {
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        Self {
            initial,
            ceiling,
            current: initial,
        }
    }
}

impl Backoff for CappedExponential {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.current >= self.ceiling {
            return None;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        Some(delay)
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
