//! Wallet types and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::explorer::types::ClientError;

/// Script family of a wallet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// P2PKH.
    Legacy,
    /// P2SH-wrapped P2WPKH.
    Segwit,
    /// P2WPKH.
    NativeSegwit,
}

impl AddressType {
    /// Output script produced when paying change to this address type.
    pub fn output_kind(self) -> OutputKind {
        match self {
            AddressType::Legacy => OutputKind::P2pkh,
            AddressType::Segwit => OutputKind::P2sh,
            AddressType::NativeSegwit => OutputKind::P2wpkh,
        }
    }

    pub fn has_witness(self) -> bool {
        !matches!(self, AddressType::Legacy)
    }
}

impl std::str::FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(AddressType::Legacy),
            "segwit" => Ok(AddressType::Segwit),
            "native_segwit" => Ok(AddressType::NativeSegwit),
            other => Err(format!("unknown address type '{}'", other)),
        }
    }
}

/// Output script kinds, used for size estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

/// Reference to a transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// An address owned by the wallet, as supplied by key management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub address: String,
    pub derivation_path: String,
    pub public_key: String,
    pub address_type: AddressType,
}

/// A spendable output, annotated with what the signer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
    pub confirmations: u32,
    pub address: String,
    pub derivation_path: String,
    pub address_type: AddressType,
    pub public_key: String,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid.clone(),
            vout: self.vout,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

/// A payment output requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub value_sats: u64,
}

/// Input problems the user can correct.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("address '{address}' is not valid on {network}")]
    WrongNetwork { address: String, network: String },

    #[error("amount {amount} sats must be above the dust threshold of {dust} sats")]
    AmountTooSmall { amount: u64, dust: u64 },

    #[error("amount {amount} sats exceeds the single-transaction limit of {max} sats")]
    AmountTooLarge { amount: u64, max: u64 },

    #[error("fee rate {rate} sat/vB must be a positive number")]
    InvalidFeeRate { rate: f64 },

    #[error("fee rate {rate} sat/vB exceeds the limit of {max} sat/vB")]
    FeeRateTooHigh { rate: f64, max: f64 },

    #[error("no source addresses to spend from")]
    NoSourceAddresses,

    #[error("a change address is required")]
    MissingChangeAddress,
}

/// Pipeline stage a build error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Build,
    Sign,
    Broadcast,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStage::Build => write!(f, "build"),
            BuildStage::Sign => write!(f, "signing"),
            BuildStage::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Errors that can occur while sending.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("no spendable outputs found for the source addresses")]
    NoUtxos,

    #[error("network error: {0}")]
    Network(String),

    #[error("service temporarily degraded ({domain}), try again shortly")]
    CircuitOpen { domain: String },

    #[error("too many pending requests to {domain}, try again shortly")]
    QueueFull { domain: String },

    #[error("signing unavailable: {0}")]
    Security(String),

    #[error("transaction {stage} failed: {message}")]
    Build { stage: BuildStage, message: String },

    #[error("send did not finish within {secs} seconds")]
    Timeout { secs: u64 },
}

impl WalletError {
    pub fn build(stage: BuildStage, message: impl Into<String>) -> Self {
        WalletError::Build {
            stage,
            message: message.into(),
        }
    }

    /// Whether re-running the pipeline may succeed without user changes.
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            WalletError::Network(_)
                | WalletError::CircuitOpen { .. }
                | WalletError::QueueFull { .. }
                | WalletError::Timeout { .. }
        )
    }

    /// Human-readable cause, suitable for showing to the user as-is.
    pub fn user_message(&self) -> String {
        match self {
            WalletError::Network(_) => {
                format!("{}. Check your connection and retry.", self)
            }
            WalletError::QueueFull { .. } => {
                format!("{}. Wait a moment before sending again.", self)
            }
            _ => self.to_string(),
        }
    }

    /// Short machine-readable tag for UI disambiguation.
    pub fn cause(&self) -> &'static str {
        match self {
            WalletError::Validation(_) => "validation",
            WalletError::InsufficientFunds { .. } => "insufficient_funds",
            WalletError::NoUtxos => "no_utxos",
            WalletError::Network(_) => "network",
            WalletError::CircuitOpen { .. } => "circuit_open",
            WalletError::QueueFull { .. } => "queue_full",
            WalletError::Security(_) => "security",
            WalletError::Build {
                stage: BuildStage::Build,
                ..
            } => "build",
            WalletError::Build {
                stage: BuildStage::Sign,
                ..
            } => "sign",
            WalletError::Build {
                stage: BuildStage::Broadcast,
                ..
            } => "broadcast",
            WalletError::Timeout { .. } => "timeout",
        }
    }
}

impl From<ClientError> for WalletError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::CircuitOpen { domain } => WalletError::CircuitOpen { domain },
            ClientError::QueueFull { domain } => WalletError::QueueFull { domain },
            other => WalletError::Network(other.to_string()),
        }
    }
}

/// Result type for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;
