//! Bitcoin send wallet core: resilient block-explorer access, UTXO selection,
//! transaction building and the send pipeline.

pub mod config;
pub mod explorer;
pub mod observability;
pub mod resilience;
pub mod wallet;

pub use config::WalletConfig;
pub use explorer::{ExplorerApi, ResilientClient};
pub use wallet::{SendOrchestrator, SendRequest};
