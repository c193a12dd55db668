//! Boundary to the external signing subsystem.
//!
//! Only an opaque `KeyHandle` crosses this boundary; seed material stays
//! with the key-management collaborator.

use async_trait::async_trait;
use thiserror::Error;

use crate::wallet::builder::UnsignedTransaction;

/// Opaque reference to key material held elsewhere.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn reference(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyHandle(<redacted>)")
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// Keys are locked or the handle does not resolve.
    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),

    /// The signer refused or failed to sign this transaction.
    #[error("signer rejected the transaction: {0}")]
    Rejected(String),
}

/// Signs unsigned transactions, returning the raw signed transaction hex.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(
        &self,
        transaction: &UnsignedTransaction,
        key: &KeyHandle,
    ) -> Result<String, SignerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_handle_debug_redacted() {
        let handle = KeyHandle::new("keystore://wallet/0");
        assert_eq!(format!("{:?}", handle), "KeyHandle(<redacted>)");
        assert_eq!(handle.reference(), "keystore://wallet/0");
    }
}
