//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WalletConfig (validated, immutable)
//!     → handed to the explorer client and send orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    CacheConfig, CircuitBreakerConfig, EndpointConfig, NetworkKind, ObservabilityConfig,
    ProviderKind, RateLimitConfig, RetryPolicy, RetryTable, SendConfig, WalletConfig,
};
