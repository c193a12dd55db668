//! Block-explorer access subsystem.
//!
//! # Data Flow
//! ```text
//! api.rs (typed calls: utxos, txs, fees, broadcast)
//!     → client.rs (ResilientClient: cache, dedup, fallback, retries)
//!         → endpoints.rs (priority-ordered providers)
//!         → resilience::circuit_breaker / resilience::rate_limit (per domain)
//!         → cache.rs (TTL + stale fallback)
//!         → transport.rs (reqwest)
//! ```
//!
//! # Design Decisions
//! - One client for every network call; no parallel client variants
//! - Endpoint failures are absorbed here; callers see one final outcome
//! - Stale data is a degraded success, not an error

pub mod api;
pub mod cache;
pub mod client;
pub mod endpoints;
pub mod transport;
pub mod types;

pub use api::ExplorerApi;
pub use client::{ApiRequest, ResilientClient};
pub use types::{ClientError, ClientResult, FeeEstimates, FeeSource, FeeTarget};
