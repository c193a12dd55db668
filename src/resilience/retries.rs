//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable or fail-fast
//! - Map request priority to its retry policy
//!
//! # Design Decisions
//! - 429 and 5xx are retried against the same endpoint; other 4xx move on
//! - Connection errors and timeouts are always retryable
//! - Higher priorities get a larger attempt budget and shorter base delay

use serde::{Deserialize, Serialize};

use crate::config::{RetryPolicy, RetryTable};

/// Request priority, lowest first so the derived `Ord` sorts naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RetryTable {
    /// Policy for a priority class.
    pub fn for_priority(&self, priority: Priority) -> &RetryPolicy {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }
}

/// How a single attempt ended, from the retry loop's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-2xx HTTP status.
    Status(u16),
    /// Connection refused, reset, DNS failure and the like.
    Network,
    /// Per-endpoint timeout elapsed.
    Timeout,
}

/// Whether another attempt against the same endpoint is worthwhile.
pub fn is_retryable(kind: FailureKind) -> bool {
    match kind {
        FailureKind::Status(status) => status == 429 || (500..600).contains(&status),
        FailureKind::Network | FailureKind::Timeout => true,
    }
}

/// Whether the failure says something about endpoint health.
///
/// Client errors (4xx other than 429) describe the request, not the
/// endpoint, so they do not count against the circuit breaker.
pub fn counts_against_endpoint(kind: FailureKind) -> bool {
    match kind {
        FailureKind::Status(status) => !(400..500).contains(&status) || status == 429,
        FailureKind::Network | FailureKind::Timeout => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(FailureKind::Status(429)));
        assert!(is_retryable(FailureKind::Status(500)));
        assert!(is_retryable(FailureKind::Status(503)));
        assert!(is_retryable(FailureKind::Network));
        assert!(is_retryable(FailureKind::Timeout));
        assert!(!is_retryable(FailureKind::Status(400)));
        assert!(!is_retryable(FailureKind::Status(404)));
    }

    #[test]
    fn test_client_errors_do_not_trip_breaker() {
        assert!(!counts_against_endpoint(FailureKind::Status(400)));
        assert!(counts_against_endpoint(FailureKind::Status(429)));
        assert!(counts_against_endpoint(FailureKind::Status(502)));
        assert!(counts_against_endpoint(FailureKind::Timeout));
    }

    #[test]
    fn test_priority_ordering_and_tables() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);

        let table = RetryTable::default();
        assert_eq!(table.for_priority(Priority::Critical).max_attempts, 5);
        assert_eq!(table.for_priority(Priority::Critical).base_delay_ms, 500);
        assert_eq!(table.for_priority(Priority::Low).max_attempts, 1);
        assert_eq!(table.for_priority(Priority::Low).base_delay_ms, 1000);
    }
}
