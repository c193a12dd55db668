//! Circuit breaker for explorer endpoints, keyed by domain.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: domain assumed down, requests fail fast
//! - Half-Open: one trial request allowed through
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: first is_open check after the cool-down (count reset to 0)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (count = 1, fresh cool-down)
//! Half-Open → Open: trial never reached the domain (next check re-grants it)
//! ```
//!
//! A success decrements the failure count by one rather than zeroing it,
//! so a flapping domain decays toward closed instead of snapping shut.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open,
    /// Trial granted at the given instant and not yet resolved.
    HalfOpen(Instant),
}

/// Per-domain breaker state.
#[derive(Debug, Clone)]
struct CircuitState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    phase: Phase,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            phase: Phase::Closed,
        }
    }
}

/// Read-only view of one domain's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub domain: String,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub is_open: bool,
    pub next_attempt_at: Option<Instant>,
}

/// Registry of breakers, one per domain, created lazily on first failure.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    states: DashMap<String, CircuitState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    /// Whether requests to `domain` should be skipped right now.
    ///
    /// Once the cool-down has elapsed the first caller is granted a trial
    /// (gets `false`); others keep seeing `true` until the trial resolves.
    pub fn is_open(&self, domain: &str) -> bool {
        self.is_open_at(domain, Instant::now())
    }

    pub fn is_open_at(&self, domain: &str, now: Instant) -> bool {
        let Some(mut state) = self.states.get_mut(domain) else {
            return false;
        };

        match state.phase {
            Phase::Closed => false,
            Phase::Open => {
                let ready = state.next_attempt_at.map_or(true, |at| now >= at);
                if !ready {
                    return true;
                }
                state.phase = Phase::HalfOpen(now);
                state.failure_count = 0;
                tracing::info!(domain = %domain, "Circuit half-open, allowing trial request");
                false
            }
            Phase::HalfOpen(granted_at) => {
                // Re-grant a trial that never reported back
                if now.duration_since(granted_at) >= self.cooldown {
                    state.phase = Phase::HalfOpen(now);
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn record_failure(&self, domain: &str) {
        self.record_failure_at(domain, Instant::now());
    }

    pub fn record_failure_at(&self, domain: &str, now: Instant) {
        let mut state = self
            .states
            .entry(domain.to_string())
            .or_insert_with(CircuitState::new);

        state.last_failure_at = Some(now);
        match state.phase {
            Phase::HalfOpen(_) => {
                state.failure_count = 1;
                state.phase = Phase::Open;
                state.next_attempt_at = Some(now + self.cooldown);
                tracing::warn!(domain = %domain, "Trial request failed, circuit reopened");
                metrics::record_breaker_state(domain, true);
            }
            Phase::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.threshold {
                    state.phase = Phase::Open;
                    state.next_attempt_at = Some(now + self.cooldown);
                    tracing::warn!(
                        domain = %domain,
                        failures = state.failure_count,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    metrics::record_breaker_state(domain, true);
                }
            }
            Phase::Open => {
                state.failure_count += 1;
            }
        }
    }

    pub fn record_success(&self, domain: &str) {
        let Some(mut state) = self.states.get_mut(domain) else {
            return;
        };

        match state.phase {
            Phase::HalfOpen(_) => {
                state.phase = Phase::Closed;
                state.failure_count = 0;
                state.next_attempt_at = None;
                tracing::info!(domain = %domain, "Circuit closed after successful trial");
                metrics::record_breaker_state(domain, false);
            }
            Phase::Closed | Phase::Open => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
        }
    }

    /// Hand back a trial that was granted but never reached the domain,
    /// so the next `is_open` check can grant it again right away.
    pub fn release_trial(&self, domain: &str) {
        self.release_trial_at(domain, Instant::now());
    }

    pub fn release_trial_at(&self, domain: &str, now: Instant) {
        let Some(mut state) = self.states.get_mut(domain) else {
            return;
        };
        if let Phase::HalfOpen(_) = state.phase {
            state.phase = Phase::Open;
            state.next_attempt_at = Some(now);
            tracing::debug!(domain = %domain, "Trial request released unsent");
        }
    }

    /// Current state for a domain, if it has ever failed.
    pub fn snapshot(&self, domain: &str) -> Option<CircuitSnapshot> {
        self.states.get(domain).map(|state| CircuitSnapshot {
            domain: domain.to_string(),
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
            is_open: state.phase != Phase::Closed,
            next_attempt_at: state.next_attempt_at,
        })
    }
}
