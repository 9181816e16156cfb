//! Reconnect delay policy.
//!
//! Delays grow geometrically from `initial` up to `max`, with symmetric
//! jitter. Retries are unbounded: the dashboard has no other data source, so
//! the loader never gives up on the upstream.

use std::time::Duration;

use rand::Rng;

use casestats_core::config::BackoffConfig;

use crate::error::SourceError;

/// How a failure is treated by the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Transport,
    Auth,
    Upstream,
}

impl RetryClass {
    pub fn of(err: &SourceError) -> Self {
        match err {
            SourceError::Unauthorized { .. } | SourceError::Token(_) => RetryClass::Auth,
            SourceError::Upstream(_) => RetryClass::Upstream,
            _ => RetryClass::Transport,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions.
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Every class is retried; kept as a predicate so a policy can be tightened
    /// per class without touching the reconnect loop.
    pub fn should_retry(&self, _class: RetryClass) -> bool {
        true
    }

    /// Delay before retry number `attempt` (0-based) with jitter drawn from `rng`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let unit = if self.jitter > 0.0 { rng.gen_range(-1.0..=1.0) } else { 0.0 };
        self.delay_with_jitter(attempt, unit)
    }

    /// Deterministic form of [`delay`](Self::delay); `unit` in `-1.0..=1.0`
    /// selects where in the jitter band the delay lands.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let factor = 1.0 + self.jitter * unit.clamp(-1.0, 1.0);
        let jittered = (base * factor).min(self.max.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Un-jittered delay: `initial * multiplier^attempt`, capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(64) as i32);
        let secs = self.initial.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(c: &BackoffConfig) -> Self {
        Self {
            initial: Duration::from_millis(c.initial_ms),
            max: Duration::from_millis(c.max_ms),
            multiplier: c.multiplier.max(1.0),
            jitter: c.jitter.clamp(0.0, 1.0),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

/// Attempt counter driving a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt, &mut rand::thread_rng());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Call after a connection that made progress.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
