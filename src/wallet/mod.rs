//! Send wallet subsystem.
//!
//! # Data Flow
//! ```text
//! orchestrator.rs (SendOrchestrator state machine)
//!     → validation.rs (address / amount / fee-rate checks)
//!     → explorer::ExplorerApi (UTXOs, tip height, fee estimates)
//!     → selection.rs (greedy UTXO selection, fees.rs for vsize)
//!     → reservation.rs (hold selected outpoints for the attempt)
//!     → builder.rs (UnsignedTransaction, optional PSBT)
//!     → signer.rs (external Signer, opaque KeyHandle)
//!     → explorer::ExplorerApi::broadcast
//! confirm.rs (post-broadcast confirmation polling)
//! ```
//!
//! # Design Decisions
//! - Selection never produces dust change or a partial spend
//! - Key material never enters this module; only a handle is passed through
//! - `retry` restarts from validation because UTXOs and fees may have moved

pub mod builder;
pub mod confirm;
pub mod fees;
pub mod orchestrator;
pub mod reservation;
pub mod selection;
pub mod signer;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use confirm::{ConfirmationMonitor, ConfirmationStatus};
pub use orchestrator::{FeeRateChoice, SendOrchestrator, SendReceipt, SendRequest, SendState};
pub use reservation::UtxoReservations;
pub use selection::{select_utxos, SelectionPolicy, SelectionResult};
pub use signer::{KeyHandle, Signer, SignerError};
pub use types::{
    AddressType, OutPoint, TxOutput, Utxo, ValidationError, WalletAddress, WalletError,
    WalletResult,
};
