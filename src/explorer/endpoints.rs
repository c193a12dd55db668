//! Ordered registry of equivalent block-explorer backends.

use std::time::Duration;

use url::Url;

use crate::config::{EndpointConfig, ProviderKind};
use crate::explorer::types::{ClientError, ClientResult};

/// Path used for fee estimates; rewritten for Esplora-style providers.
pub const FEE_ESTIMATES_PATH: &str = "/v1/fees/recommended";
const ESPLORA_FEE_ESTIMATES_PATH: &str = "/fee-estimates";

/// A single block-explorer backend.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub base_url: Url,
    pub timeout: Duration,
    pub priority: u32,
    pub provider: ProviderKind,
    domain: String,
}

impl Endpoint {
    pub fn from_config(config: &EndpointConfig) -> ClientResult<Self> {
        let base_url: Url = config.base_url.parse().map_err(|e| {
            ClientError::Config(format!("invalid endpoint URL '{}': {}", config.base_url, e))
        })?;
        let domain = base_url
            .host_str()
            .ok_or_else(|| ClientError::Config(format!("endpoint URL '{}' has no host", base_url)))?
            .to_string();
        let domain = match base_url.port() {
            Some(port) => format!("{}:{}", domain, port),
            None => domain,
        };

        Ok(Self {
            name: config.name.clone(),
            base_url,
            timeout: Duration::from_millis(config.timeout_ms),
            priority: config.priority,
            provider: config.provider,
            domain,
        })
    }

    /// Key for circuit breaker and rate limiter state.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Absolute URL for an API path on this endpoint.
    pub fn url_for(&self, path: &str) -> String {
        let path = match (self.provider, path) {
            (ProviderKind::Esplora, FEE_ESTIMATES_PATH) => ESPLORA_FEE_ESTIMATES_PATH,
            _ => path,
        };
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Endpoints sorted by ascending priority. Immutable once built.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    pub fn new(configs: &[EndpointConfig]) -> ClientResult<Self> {
        let mut endpoints = Vec::with_capacity(configs.len());
        for config in configs {
            endpoints.push(Endpoint::from_config(config)?);
        }
        if endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        // Stable sort keeps config order for equal priorities
        endpoints.sort_by_key(|e| e.priority);
        Ok(Self { endpoints })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, url: &str, priority: u32, provider: ProviderKind) -> EndpointConfig {
        EndpointConfig {
            name: name.into(),
            base_url: url.into(),
            timeout_ms: 1000,
            priority,
            provider,
        }
    }

    #[test]
    fn test_sorted_by_priority() {
        let registry = EndpointRegistry::new(&[
            endpoint("b", "https://blockstream.info/api", 2, ProviderKind::Esplora),
            endpoint("a", "https://mempool.space/api", 1, ProviderKind::Mempool),
        ])
        .unwrap();
        let names: Vec<_> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.iter().next().unwrap().domain(), "mempool.space");
    }

    #[test]
    fn test_url_building_and_fee_rewrite() {
        let mempool = Endpoint::from_config(&endpoint(
            "m",
            "https://mempool.space/api/",
            1,
            ProviderKind::Mempool,
        ))
        .unwrap();
        assert_eq!(
            mempool.url_for("/address/bc1q/utxo"),
            "https://mempool.space/api/address/bc1q/utxo"
        );
        assert_eq!(
            mempool.url_for(FEE_ESTIMATES_PATH),
            "https://mempool.space/api/v1/fees/recommended"
        );

        let esplora = Endpoint::from_config(&endpoint(
            "e",
            "http://127.0.0.1:3002",
            1,
            ProviderKind::Esplora,
        ))
        .unwrap();
        assert_eq!(esplora.domain(), "127.0.0.1:3002");
        assert_eq!(esplora.url_for(FEE_ESTIMATES_PATH), "http://127.0.0.1:3002/fee-estimates");
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(EndpointRegistry::new(&[]), Err(ClientError::NoEndpoints)));
    }
}
