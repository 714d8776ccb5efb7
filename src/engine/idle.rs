use std::time::{Duration, Instant};

/// Listener-side decision on when to abandon a gulper subscription.
///
/// What counts as a useful gulp is source specific, so the consumer reports
/// usefulness and the policy only judges elapsed idle time.
pub trait IdlePolicy: Send + Sync {
    fn should_kill(&self, idle_for: Duration) -> bool;
}

/// Kill after `timeout` without a useful gulp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeout {
    pub timeout: Duration,
}

impl IdleTimeout {
    /// Twice the inter-chunk delay
    pub fn for_delay(delay: Duration) -> Self {
        Self {
            timeout: delay * 2,
        }
    }
}

impl IdlePolicy for IdleTimeout {
    fn should_kill(&self, idle_for: Duration) -> bool {
        idle_for > self.timeout
    }
}

/// Never gives up; for views that must stay subscribed
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAlive;

impl IdlePolicy for KeepAlive {
    fn should_kill(&self, _idle_for: Duration) -> bool {
        false
    }
}

/// Tracks the last useful gulp seen by one listener
pub struct GulpWatchdog<P: IdlePolicy = IdleTimeout> {
    policy: P,
    last_useful: Instant,
}

impl<P: IdlePolicy> GulpWatchdog<P> {
    pub fn new(policy: P) -> Self {
        Self::starting_at(policy, Instant::now())
    }

    pub fn starting_at(policy: P, now: Instant) -> Self {
        Self {
            policy,
            last_useful: now,
        }
    }

    /// Record a gulp; only useful ones reset the idle clock
    pub fn observe(&mut self, useful: bool) {
        self.observe_at(useful, Instant::now());
    }

    pub fn observe_at(&mut self, useful: bool, now: Instant) {
        if useful {
            self.last_useful = now;
        }
    }

    pub fn should_kill(&self) -> bool {
        self.should_kill_at(Instant::now())
    }

    pub fn should_kill_at(&self, now: Instant) -> bool {
        self.policy
            .should_kill(now.saturating_duration_since(self.last_useful))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_twice_delay() {
        let policy = IdleTimeout::for_delay(Duration::from_millis(500));
        assert_eq!(policy.timeout, Duration::from_secs(1));
        assert!(!policy.should_kill(Duration::from_millis(900)));
        assert!(policy.should_kill(Duration::from_millis(1100)));
    }

    #[test]
    fn test_useless_gulps_do_not_reset_clock() {
        let t0 = Instant::now();
        let mut watchdog =
            GulpWatchdog::starting_at(IdleTimeout::for_delay(Duration::from_millis(100)), t0);

        watchdog.observe_at(false, t0 + Duration::from_millis(150));
        assert!(watchdog.should_kill_at(t0 + Duration::from_millis(250)));

        watchdog.observe_at(true, t0 + Duration::from_millis(250));
        assert!(!watchdog.should_kill_at(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn test_keep_alive_never_kills() {
        let t0 = Instant::now();
        let watchdog = GulpWatchdog::starting_at(KeepAlive, t0);
        assert!(!watchdog.should_kill_at(t0 + Duration::from_secs(3600)));
    }
}
