//! Reconnect decisions: failure classes, exponential backoff, retry budget.

use std::time::Duration;

use serde::Serialize;

/// Why a connection attempt or a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    AuthFailure,
    /// Ended by an explicit `disconnect()`.
    Manual,
}

/// Outcome of evaluating the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl ReconnectDecision {
    pub fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }

    pub fn delay_ms(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Pure retry policy. Holds no state; see [`ReconnectCounter`] for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempts, max)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide whether to retry after a failure.
    ///
    /// `authenticated` is false once the session is gone; no retry is
    /// attempted against a dead session.
    pub fn decide(&self, attempts: u32, class: FailureClass, authenticated: bool) -> ReconnectDecision {
        match class {
            FailureClass::AuthFailure | FailureClass::Manual => ReconnectDecision::stop(),
            FailureClass::Transient if !authenticated => ReconnectDecision::stop(),
            FailureClass::Transient if attempts >= self.max_attempts => ReconnectDecision::stop(),
            FailureClass::Transient => ReconnectDecision::after(self.delay_for(attempts)),
        }
    }
}

/// Per-channel attempt bookkeeping.
///
/// Reset on success or manual reconnect, incremented per scheduled automatic
/// attempt, frozen once an auth failure is seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectCounter {
    attempts: u32,
    last_failure: Option<FailureClass>,
    frozen: bool,
}

impl ReconnectCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_failure(&self) -> Option<FailureClass> {
        self.last_failure
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.frozen = false;
    }

    /// Spend the whole budget so no automatic attempt is scheduled.
    pub fn exhaust(&mut self, policy: &ReconnectPolicy) {
        self.attempts = policy.max_attempts;
    }

    /// Record an explicit disconnect. An auth failure stays visible.
    pub fn note_manual_disconnect(&mut self) {
        if !self.frozen {
            self.last_failure = Some(FailureClass::Manual);
        }
    }

    /// Record a failure and decide on the next automatic attempt.
    pub fn on_failure(
        &mut self,
        policy: &ReconnectPolicy,
        class: FailureClass,
        authenticated: bool,
    ) -> ReconnectDecision {
        self.last_failure = Some(class);
        if class == FailureClass::AuthFailure {
            self.frozen = true;
        }
        if self.frozen {
            return ReconnectDecision::stop();
        }

        let decision = policy.decide(self.attempts, class, authenticated);
        if decision.retry {
            self.attempts += 1;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles_from_one_second() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();

        let delays: Vec<u64> = std::iter::from_fn(|| {
            let d = counter.on_failure(&policy, FailureClass::Transient, true);
            d.retry.then(|| d.delay_ms())
        })
        .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(counter.attempts(), 5);
    }

    #[test]
    fn no_sixth_attempt_after_five_failures() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();
        for _ in 0..5 {
            assert!(counter.on_failure(&policy, FailureClass::Transient, true).retry);
        }
        let sixth = counter.on_failure(&policy, FailureClass::Transient, true);
        assert!(!sixth.retry);
        assert_eq!(counter.attempts(), 5);
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(9), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(30_000));
    }

    #[test]
    fn auth_failure_never_retries() {
        let policy = ReconnectPolicy::default();
        for attempts in 0..=5 {
            let d = policy.decide(attempts, FailureClass::AuthFailure, true);
            assert!(!d.retry, "retried at attempt {attempts}");
        }
    }

    #[test]
    fn auth_failure_freezes_counter() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();
        counter.on_failure(&policy, FailureClass::Transient, true);
        assert_eq!(counter.attempts(), 1);

        let d = counter.on_failure(&policy, FailureClass::AuthFailure, true);
        assert!(!d.retry);
        assert!(counter.is_frozen());

        // Later transient failures stay suppressed and do not count.
        let d = counter.on_failure(&policy, FailureClass::Transient, true);
        assert!(!d.retry);
        assert_eq!(counter.attempts(), 1);
        assert_eq!(counter.last_failure(), Some(FailureClass::Transient));
    }

    #[test]
    fn unauthenticated_session_suppresses_retry() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();
        let d = counter.on_failure(&policy, FailureClass::Transient, false);
        assert!(!d.retry);
        assert_eq!(counter.attempts(), 0);
    }

    #[test]
    fn manual_class_does_not_retry() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.decide(0, FailureClass::Manual, true).retry);
    }

    #[test]
    fn reset_clears_attempts_and_freeze() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();
        counter.on_failure(&policy, FailureClass::Transient, true);
        counter.on_failure(&policy, FailureClass::AuthFailure, true);

        counter.reset();
        assert_eq!(counter.attempts(), 0);
        assert!(!counter.is_frozen());
        let d = counter.on_failure(&policy, FailureClass::Transient, true);
        assert!(d.retry);
        assert_eq!(d.delay_ms(), 1000);
    }

    #[test]
    fn exhaust_spends_budget_without_exceeding_it() {
        let policy = ReconnectPolicy::default();
        let mut counter = ReconnectCounter::new();
        counter.exhaust(&policy);
        assert_eq!(counter.attempts(), policy.max_attempts);
        assert!(!counter.on_failure(&policy, FailureClass::Transient, true).retry);
        assert_eq!(counter.attempts(), policy.max_attempts);
    }
}
