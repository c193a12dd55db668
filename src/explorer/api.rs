//! Typed block-explorer operations.
//!
//! Thin layer over `ResilientClient`: picks paths, priorities and cache
//! placement per call, and decodes the Esplora-compatible JSON.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::{CacheConfig, NetworkKind};
use crate::explorer::client::{ApiRequest, ResilientClient};
use crate::explorer::endpoints::FEE_ESTIMATES_PATH;
use crate::explorer::types::{
    is_valid_txid, ClientError, ClientResult, ExplorerTransaction, ExplorerUtxo, FeeEstimates,
    FeeSource, TxStatus,
};
use crate::resilience::retries::Priority;

const TIP_TTL: Duration = Duration::from_secs(10);

/// Block-explorer API bound to one network.
#[derive(Debug, Clone)]
pub struct ExplorerApi {
    client: ResilientClient,
    network: NetworkKind,
    cache: CacheConfig,
}

impl ExplorerApi {
    pub fn new(client: ResilientClient, network: NetworkKind, cache: CacheConfig) -> Self {
        Self {
            client,
            network,
            cache,
        }
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    pub fn network(&self) -> NetworkKind {
        self.network
    }

    /// Cache key used for an address's UTXO set.
    pub fn utxo_cache_key(address: &str) -> String {
        format!("utxo:{}", address)
    }

    /// Unspent outputs of an address (cached).
    pub async fn address_utxos(&self, address: &str) -> ClientResult<Vec<ExplorerUtxo>> {
        let request = ApiRequest::get(format!("/address/{}/utxo", address))
            .with_priority(Priority::High)
            .cached(
                Self::utxo_cache_key(address),
                Duration::from_secs(self.cache.utxo_ttl_secs),
            );
        self.get_json(request, "address utxos").await
    }

    /// Transaction history of an address (cached).
    pub async fn address_transactions(
        &self,
        address: &str,
    ) -> ClientResult<Vec<ExplorerTransaction>> {
        let request = ApiRequest::get(format!("/address/{}/txs", address)).cached(
            format!("txs:{}", address),
            Duration::from_secs(self.cache.history_ttl_secs),
        );
        self.get_json(request, "address transactions").await
    }

    /// A single transaction (cached briefly).
    pub async fn transaction(&self, txid: &str) -> ClientResult<ExplorerTransaction> {
        let request = ApiRequest::get(format!("/tx/{}", txid)).cached(
            format!("tx:{}", txid),
            Duration::from_secs(self.cache.tx_ttl_secs),
        );
        self.get_json(request, "transaction").await
    }

    /// Live confirmation status (never cached).
    pub async fn transaction_status(&self, txid: &str) -> ClientResult<TxStatus> {
        let request = ApiRequest::get(format!("/tx/{}/status", txid)).with_priority(Priority::Low);
        self.get_json(request, "transaction status").await
    }

    /// Current chain tip height.
    pub async fn tip_height(&self) -> ClientResult<u64> {
        let request = ApiRequest::get("/blocks/tip/height")
            .with_priority(Priority::High)
            .cached("tip:height", TIP_TTL)
            .checked(|body| parse_tip_height(body).map(drop));
        let body = self.client.request(request).await?;
        parse_tip_height(&body)
    }

    /// Normalized fee estimates, falling back to network defaults only when
    /// every endpoint failed.
    pub async fn fee_estimates(&self) -> (FeeEstimates, FeeSource) {
        let request = ApiRequest::get(FEE_ESTIMATES_PATH)
            .cached(
                "fees:recommended",
                Duration::from_secs(self.cache.fee_ttl_secs),
            )
            .checked(|body| FeeEstimates::from_provider_json(body).map(drop));

        let result = match self.client.request(request).await {
            Ok(body) => FeeEstimates::from_provider_json(&body),
            Err(e) => Err(e),
        };

        match result {
            Ok(fees) => (fees, FeeSource::Network),
            Err(e) => {
                let defaults = FeeEstimates::defaults_for(self.network);
                tracing::warn!(
                    network = %self.network,
                    error = %e,
                    "Fee estimates unavailable, using defaults"
                );
                (defaults, FeeSource::Default)
            }
        }
    }

    /// Broadcast a signed transaction; returns the txid reported by the network.
    ///
    /// Never cached and sent at CRITICAL priority. A txid that is not 64 hex
    /// characters is logged but still returned.
    pub async fn broadcast(&self, signed_hex: &str) -> ClientResult<String> {
        self.broadcast_with_priority(signed_hex, Priority::Critical)
            .await
    }

    pub async fn broadcast_with_priority(
        &self,
        signed_hex: &str,
        priority: Priority,
    ) -> ClientResult<String> {
        let request = ApiRequest::post("/tx", signed_hex.trim()).with_priority(priority);
        let body = self.client.request(request).await?;
        let txid = body.trim().to_string();

        if is_valid_txid(&txid) {
            tracing::info!(txid = %txid, "Transaction broadcast");
        } else {
            tracing::warn!(
                txid = %txid,
                length = txid.len(),
                "Broadcast returned a non-standard transaction id"
            );
        }
        Ok(txid)
    }

    /// Forget the cached UTXO set of an address.
    pub fn invalidate_utxos(&self, address: &str) {
        self.client.invalidate(&Self::utxo_cache_key(address));
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        context: &str,
    ) -> ClientResult<T> {
        let body = self
            .client
            .request(request.checked(decodes_as::<T>))
            .await?;
        serde_json::from_str(&body).map_err(|e| ClientError::decode(context, e))
    }
}

fn decodes_as<T: DeserializeOwned>(body: &str) -> ClientResult<()> {
    serde_json::from_str::<T>(body)
        .map(drop)
        .map_err(|e| ClientError::decode("response body", e))
}

fn parse_tip_height(body: &str) -> ClientResult<u64> {
    body.trim()
        .parse()
        .map_err(|e| ClientError::decode("tip height", e))
}
