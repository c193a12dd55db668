//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryPolicy;

/// Delay before retry number `retry` (0 = first retry).
///
/// `min(max_delay, base_delay * multiplier^retry)` plus up to 10% jitter,
/// never exceeding `max_delay`.
pub fn calculate_backoff(retry: u32, policy: &RetryPolicy) -> Duration {
    let capped = base_delay_ms(retry, policy);

    // Apply jitter (0 to 10% of the delay), staying under the cap
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped + jitter).min(policy.max_delay_ms.max(capped)))
}

/// Deterministic part of the delay, without jitter.
pub fn base_delay_ms(retry: u32, policy: &RetryPolicy) -> u64 {
    let factor = policy.multiplier.powi(retry.min(63) as i32);
    let delay = policy.base_delay_ms as f64 * factor;
    if !delay.is_finite() || delay >= policy.max_delay_ms as f64 {
        policy.max_delay_ms
    } else {
        delay as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let p = policy();
        assert_eq!(base_delay_ms(0, &p), 500);
        assert_eq!(base_delay_ms(1, &p), 1000);
        assert_eq!(base_delay_ms(3, &p), 4000);
        assert_eq!(base_delay_ms(10, &p), 8000);

        let b1 = calculate_backoff(1, &p);
        assert!(b1.as_millis() >= 1000);
        assert!(b1.as_millis() < 1100);

        let max = calculate_backoff(20, &p);
        assert_eq!(max.as_millis(), 8000);
    }
}
