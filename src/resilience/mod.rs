//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to an explorer endpoint:
//!     → circuit_breaker.rs (skip the domain while its circuit is open)
//!     → rate_limit.rs (token bucket per domain, priority queue when empty)
//!     → On failure: retries.rs (retryable? which priority budget?)
//!         → backoff.rs (exponential delay with jitter)
//!     → circuit_breaker.rs (record success / failure)
//! ```
//!
//! # Design Decisions
//! - All state is keyed by domain and owned by explicit registries
//! - Mutation is serialized per domain; domains never contend with each other
//! - Only 429, 5xx and transport failures are retried
//! - A half-open breaker grants exactly one trial request

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retries;

pub use circuit_breaker::CircuitBreakerRegistry;
pub use rate_limit::{LimiterError, RateLimiterRegistry};
pub use retries::Priority;
