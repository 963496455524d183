//! Turns the stream of duration/participant readings into a single binary
//! call: is this meeting over for everyone but us?

use std::time::Duration;

/// Termination policy thresholds, built once from config.
#[derive(Debug, Clone)]
pub struct DisconnectPolicy {
    /// Grace period: never terminate a call younger than this.
    pub min_time: Duration,
    /// Hard ceiling: always terminate a call older than this.
    pub max_time: Duration,
    /// Absolute participant floor.
    pub min_participants: u32,
    /// Current participants divided by the running average must stay at or
    /// above this.
    pub min_ratio: f64,
    /// Window length N for the exponentially smoothed participant average.
    pub moving_avg_len: u32,
}

impl Default for DisconnectPolicy {
    fn default() -> Self {
        Self {
            min_time: Duration::from_secs(5 * 60),
            max_time: Duration::from_secs(60 * 60),
            min_participants: 2,
            min_ratio: 0.5,
            moving_avg_len: 10,
        }
    }
}

/// Owns the running participant average and applies the policy.
///
/// The average is seeded at zero and must be fed via [`observe`] before each
/// decision; a still-zero average disables the ratio test rather than
/// dividing by zero.
///
/// [`observe`]: DecisionEngine::observe
#[derive(Debug)]
pub struct DecisionEngine {
    policy: DisconnectPolicy,
    avg_participants: f64,
}

impl DecisionEngine {
    pub fn new(policy: DisconnectPolicy) -> Self {
        Self {
            policy,
            avg_participants: 0.0,
        }
    }

    /// Fold one participant reading into the running average:
    /// `avg <- (avg * (N - 1) + current) / N`.
    pub fn observe(&mut self, participants: u32) {
        let n = self.policy.moving_avg_len.max(1) as f64;
        self.avg_participants = (self.avg_participants * (n - 1.0) + participants as f64) / n;
    }

    pub fn average(&self) -> f64 {
        self.avg_participants
    }

    /// Policy, evaluated in order: grace period, hard ceiling, participant
    /// drop-off (ratio against the running average, or absolute floor).
    pub fn should_disconnect(&self, duration: Duration, participants: u32) -> bool {
        if duration < self.policy.min_time {
            return false;
        }
        if duration > self.policy.max_time {
            return true;
        }
        let ratio_dropped = self.avg_participants > 0.0
            && (participants as f64 / self.avg_participants) < self.policy.min_ratio;
        ratio_dropped || participants < self.policy.min_participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_average(avg_seed: &[u32]) -> DecisionEngine {
        let mut engine = DecisionEngine::new(DisconnectPolicy::default());
        for &v in avg_seed {
            engine.observe(v);
        }
        engine
    }

    fn engine_with_fixed_average(avg: f64) -> DecisionEngine {
        let mut engine = DecisionEngine::new(DisconnectPolicy::default());
        engine.avg_participants = avg;
        engine
    }

    #[test]
    fn grace_period_never_terminates() {
        let engine = engine_with_fixed_average(4.0);
        assert!(!engine.should_disconnect(Duration::from_secs(4 * 60), 0));
        assert!(!engine.should_disconnect(Duration::from_secs(4 * 60), 100));
    }

    #[test]
    fn hard_ceiling_always_terminates() {
        let engine = engine_with_fixed_average(4.0);
        assert!(engine.should_disconnect(Duration::from_secs(61 * 60), 100));
    }

    #[test]
    fn ratio_drop_terminates() {
        // 1 participant against an average of 4: ratio 0.25 < 0.5.
        let engine = engine_with_fixed_average(4.0);
        assert!(engine.should_disconnect(Duration::from_secs(30 * 60), 1));
    }

    #[test]
    fn healthy_ratio_and_count_continue() {
        // 3 against an average of 4: ratio 0.75, count above the floor.
        let engine = engine_with_fixed_average(4.0);
        assert!(!engine.should_disconnect(Duration::from_secs(30 * 60), 3));
    }

    #[test]
    fn absolute_floor_terminates_even_with_good_ratio() {
        let engine = engine_with_fixed_average(1.0);
        // Ratio is 1.0, but one participant is below the floor of two.
        assert!(engine.should_disconnect(Duration::from_secs(30 * 60), 1));
    }

    #[test]
    fn zero_average_disables_the_ratio_test() {
        let engine = engine_with_average(&[]);
        assert_eq!(engine.average(), 0.0);
        // Count is fine, ratio would divide by zero: do not terminate.
        assert!(!engine.should_disconnect(Duration::from_secs(30 * 60), 5));
    }

    #[test]
    fn average_converges_monotonically_toward_a_constant_stream() {
        let mut engine = DecisionEngine::new(DisconnectPolicy::default());
        let mut previous = engine.average();
        for _ in 0..50 {
            engine.observe(6);
            let now = engine.average();
            assert!(now > previous);
            assert!(now <= 6.0);
            previous = now;
        }
        assert!((engine.average() - 6.0).abs() < 0.1);
    }

    #[test]
    fn average_is_order_dependent() {
        let mut a = DecisionEngine::new(DisconnectPolicy::default());
        let mut b = DecisionEngine::new(DisconnectPolicy::default());
        for v in [8, 2] {
            a.observe(v);
        }
        for v in [2, 8] {
            b.observe(v);
        }
        assert_ne!(a.average(), b.average());
    }
}
