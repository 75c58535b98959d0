//! Reconnection policy: exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the computed delay by which jitter may move it either way.
pub const JITTER_FRACTION: f64 = 0.2;

/// Configuration for automatic reconnection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Whether unexpected closes trigger reconnection.
    pub enabled: bool,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
    /// Maximum number of consecutive attempts. `0` means unbounded.
    pub max_attempts: u32,
    /// Whether to randomize each delay by up to ±20%.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration with reconnection turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Enable or disable reconnection.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the maximum number of reconnection attempts (`0` = unbounded).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial delay between reconnection attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between reconnection attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier for exponential backoff.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The pre-jitter delay for a 1-based attempt number:
    /// `min(initial_delay * multiplier^(attempt - 1), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ns = self.initial_delay.as_nanos() as f64;
        let delay_ns = base_ns * self.backoff_multiplier.powi(exponent);
        let max_ns = self.max_delay.as_nanos() as f64;
        // `min` also absorbs an infinite product from large exponents.
        Duration::from_nanos(delay_ns.min(max_ns).round() as u64)
    }

    /// The delay actually waited before a 1-based attempt, including jitter
    /// when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            apply_jitter(delay, &mut rand::thread_rng())
        } else {
            delay
        }
    }
}

/// Move `delay` by a uniformly random amount within ±20%.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = 1.0 + rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Payload of the `reconnecting` notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// 1-based attempt number since the last successful open.
    pub attempt: u32,
    /// How long the client waits before this attempt.
    pub delay: Duration,
}

/// What the policy decided when asked for another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReconnectDecision {
    /// Reconnection is turned off.
    Disabled,
    /// Another attempt already scheduled; nothing to do.
    AlreadyScheduled,
    /// The attempt cap has been reached.
    Exhausted { attempts: u32 },
    /// Schedule an attempt after the given delay.
    Retry(ReconnectAttempt),
}

/// Runtime reconnection state owned by the connection manager.
#[derive(Debug)]
pub(crate) struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
    reconnecting: bool,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            reconnecting: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Decide on the next attempt, advancing the counter and taking the
    /// `reconnecting` guard when one is scheduled.
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if !self.config.enabled {
            return ReconnectDecision::Disabled;
        }
        if self.reconnecting {
            return ReconnectDecision::AlreadyScheduled;
        }
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;
        self.reconnecting = true;
        ReconnectDecision::Retry(ReconnectAttempt {
            attempt: self.attempt,
            delay: self.config.delay_for_attempt(self.attempt),
        })
    }

    /// The scheduled attempt is starting its handshake; release the guard.
    pub fn begin_attempt(&mut self) {
        self.reconnecting = false;
    }

    /// Drop a scheduled attempt without counting it against the cap
    /// (the owner connected manually or closed the client).
    pub fn cancel_pending(&mut self) {
        if self.reconnecting {
            self.reconnecting = false;
            self.attempt = self.attempt.saturating_sub(1);
        }
    }

    /// A connection opened; the counter starts over.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.reconnecting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig::new()
            .initial_delay(Duration::from_millis(100))
            .backoff_multiplier(2.0)
            .max_delay(Duration::from_millis(1000))
            .jitter(false)
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = no_jitter();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(60), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_with_fractional_multiplier() {
        let config = no_jitter()
            .backoff_multiplier(1.5)
            .max_delay(Duration::from_secs(10));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(150));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(225));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_millis(1000);
        for _ in 0..1000 {
            let jittered = apply_jitter(base, &mut rng);
            assert!(jittered >= Duration::from_millis(800), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(1200), "{jittered:?}");
        }
    }

    #[test]
    fn test_delay_for_attempt_without_jitter_is_exact() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(3), config.backoff_delay(3));
    }

    #[test]
    fn test_policy_counts_and_exhausts() {
        let mut policy = ReconnectPolicy::new(no_jitter().max_attempts(2));

        let first = policy.next_attempt();
        assert_eq!(
            first,
            ReconnectDecision::Retry(ReconnectAttempt {
                attempt: 1,
                delay: Duration::from_millis(100),
            })
        );
        assert_eq!(policy.next_attempt(), ReconnectDecision::AlreadyScheduled);

        policy.begin_attempt();
        let second = policy.next_attempt();
        assert!(matches!(second, ReconnectDecision::Retry(a) if a.attempt == 2));

        policy.begin_attempt();
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Exhausted { attempts: 2 }
        );
    }

    #[test]
    fn test_policy_unbounded_when_zero() {
        let mut policy = ReconnectPolicy::new(no_jitter().max_attempts(0));
        for expected in 1..=50 {
            match policy.next_attempt() {
                ReconnectDecision::Retry(attempt) => assert_eq!(attempt.attempt, expected),
                other => panic!("unexpected decision {other:?}"),
            }
            policy.begin_attempt();
        }
    }

    #[test]
    fn test_disabled_policy_never_schedules() {
        let mut policy = ReconnectPolicy::new(no_jitter().enabled(false));
        assert_eq!(policy.next_attempt(), ReconnectDecision::Disabled);
        assert_eq!(policy.attempt(), 0);
        assert!(!policy.is_reconnecting());
    }

    #[test]
    fn test_policy_reset_on_open() {
        let mut policy = ReconnectPolicy::new(no_jitter().max_attempts(3));
        policy.next_attempt();
        policy.begin_attempt();
        policy.next_attempt();
        assert_eq!(policy.attempt(), 2);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert!(!policy.is_reconnecting());
    }

    #[test]
    fn test_cancel_pending_does_not_consume_attempt() {
        let mut policy = ReconnectPolicy::new(no_jitter());
        policy.next_attempt();
        assert!(policy.is_reconnecting());
        policy.cancel_pending();
        assert!(!policy.is_reconnecting());
        assert_eq!(policy.attempt(), 0);
    }

    #[test]
    fn test_reconnect_config_builder() {
        let config = ReconnectConfig::new()
            .max_attempts(5)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(30))
            .backoff_multiplier(1.5)
            .jitter(false);

        assert!(config.enabled);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert!(!config.jitter);
        assert!(!ReconnectConfig::disabled().enabled);
    }
}
