use std::time::{Duration, Instant};

/// Fixed-interval reconnect gate.
///
/// After a failure, no new attempt is allowed until `interval` has passed.
/// There is no exponential growth: a device on a flaky link retries at a
/// steady pace.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReconnectTimer {
    interval: Duration,
    last_failure: Option<Instant>,
}

impl ReconnectTimer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_failure: None,
        }
    }

    pub(crate) fn should_attempt(&self, now: Instant) -> bool {
        match self.last_failure {
            Some(failed_at) => now.saturating_duration_since(failed_at) >= self.interval,
            None => true,
        }
    }

    pub(crate) fn record_failure(&mut self, now: Instant) {
        self.last_failure = Some(now);
    }

    pub(crate) fn record_success(&mut self) {
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_is_immediate() {
        let timer = ReconnectTimer::new(Duration::from_secs(5));
        assert!(timer.should_attempt(Instant::now()));
    }

    #[test]
    fn test_fixed_interval_after_failure() {
        let mut timer = ReconnectTimer::new(Duration::from_secs(5));
        let t0 = Instant::now();
        timer.record_failure(t0);

        assert!(!timer.should_attempt(t0 + Duration::from_millis(4_999)));
        assert!(timer.should_attempt(t0 + Duration::from_secs(5)));

        // repeated failures do not grow the delay
        let t1 = t0 + Duration::from_secs(5);
        timer.record_failure(t1);
        assert!(timer.should_attempt(t1 + Duration::from_secs(5)));

        timer.record_success();
        assert!(timer.should_attempt(t1));
    }
}
