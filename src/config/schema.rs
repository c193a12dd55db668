//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the wallet
//! send pipeline. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WalletConfig {
    /// Bitcoin network the wallet operates on.
    pub network: NetworkKind,

    /// Block-explorer endpoints. Empty means "use the network defaults".
    pub endpoints: Vec<EndpointConfig>,

    /// Per-domain token bucket settings.
    pub rate_limit: RateLimitConfig,

    /// Per-domain circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry tables, one per request priority.
    pub retries: RetryTable,

    /// Response cache TTLs.
    pub cache: CacheConfig,

    /// Send pipeline limits.
    pub send: SendConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl WalletConfig {
    /// Configured endpoints, or the network defaults when none are set.
    pub fn effective_endpoints(&self) -> Vec<EndpointConfig> {
        if self.endpoints.is_empty() {
            EndpointConfig::defaults_for(self.network)
        } else {
            self.endpoints.clone()
        }
    }
}

/// Supported networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkKind {
    /// The `bitcoin` crate network used for address checks.
    pub fn as_bitcoin(self) -> bitcoin::Network {
        match self {
            NetworkKind::Mainnet => bitcoin::Network::Bitcoin,
            NetworkKind::Testnet => bitcoin::Network::Testnet,
        }
    }
}

impl std::fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkKind::Mainnet => write!(f, "mainnet"),
            NetworkKind::Testnet => write!(f, "testnet"),
        }
    }
}

impl std::str::FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "bitcoin" => Ok(NetworkKind::Mainnet),
            "testnet" => Ok(NetworkKind::Testnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// API dialect spoken by an endpoint. Only the fee route differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// mempool.space style (`/v1/fees/recommended`).
    #[default]
    Mempool,
    /// Blockstream Esplora style (`/fee-estimates`).
    Esplora,
}

/// Block-explorer endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Endpoint identifier for logging/metrics.
    pub name: String,

    /// Base URL, including any API prefix (e.g. "https://mempool.space/api").
    pub base_url: String,

    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_endpoint_timeout_ms")]
    pub timeout_ms: u64,

    /// Ordering key, 1 is tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub provider: ProviderKind,
}

fn default_endpoint_timeout_ms() -> u64 {
    15_000
}

fn default_priority() -> u32 {
    1
}

impl EndpointConfig {
    /// Built-in provider list for a network.
    pub fn defaults_for(network: NetworkKind) -> Vec<EndpointConfig> {
        let (mempool, blockstream) = match network {
            NetworkKind::Mainnet => (
                "https://mempool.space/api",
                "https://blockstream.info/api",
            ),
            NetworkKind::Testnet => (
                "https://mempool.space/testnet/api",
                "https://blockstream.info/testnet/api",
            ),
        };
        vec![
            EndpointConfig {
                name: "mempool".to_string(),
                base_url: mempool.to_string(),
                timeout_ms: 15_000,
                priority: 1,
                provider: ProviderKind::Mempool,
            },
            EndpointConfig {
                name: "blockstream".to_string(),
                base_url: blockstream.to_string(),
                timeout_ms: 20_000,
                priority: 2,
                provider: ProviderKind::Esplora,
            },
        ]
    }
}

/// Token bucket configuration, applied per domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst capacity.
    pub capacity: u32,

    /// Tokens added per second.
    pub refill_per_second: f64,

    /// Maximum number of queued requests per domain.
    pub queue_limit: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 5.0,
            queue_limit: 100,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit stays open, in seconds.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 30,
        }
    }
}

/// Backoff parameters for one priority class.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Total attempts against one endpoint (1 = no retry).
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Exponential growth factor.
    pub multiplier: f64,
}

/// Retry policies by request priority.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryTable {
    pub critical: RetryPolicy,
    pub high: RetryPolicy,
    pub normal: RetryPolicy,
    pub low: RetryPolicy,
}

impl Default for RetryTable {
    fn default() -> Self {
        Self {
            critical: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 500,
                max_delay_ms: 8_000,
                multiplier: 2.0,
            },
            high: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 750,
                max_delay_ms: 6_000,
                multiplier: 2.0,
            },
            normal: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1_000,
                max_delay_ms: 5_000,
                multiplier: 2.0,
            },
            low: RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1_000,
                max_delay_ms: 1_000,
                multiplier: 2.0,
            },
        }
    }
}

/// Response cache TTLs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// UTXO set per address.
    pub utxo_ttl_secs: u64,

    /// Fee estimates.
    pub fee_ttl_secs: u64,

    /// Single transaction lookups.
    pub tx_ttl_secs: u64,

    /// Address history.
    pub history_ttl_secs: u64,

    /// When set, fresh entries older than `ratio * ttl` are refreshed in the
    /// background while still being served.
    pub refresh_ahead_ratio: Option<f64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            utxo_ttl_secs: 120,
            fee_ttl_secs: 60,
            tx_ttl_secs: 30,
            history_ttl_secs: 30,
            refresh_ahead_ratio: None,
        }
    }
}

/// Send pipeline limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SendConfig {
    /// Highest accepted fee rate in sat/vB.
    pub max_fee_rate: f64,

    /// Largest single send in satoshis.
    pub max_amount_sats: u64,

    /// Minimum output value; outputs must be strictly above it.
    pub dust_threshold: u64,

    /// Ceiling for one full validate..broadcast run.
    pub pipeline_timeout_secs: u64,

    /// How long broadcast outpoints stay reserved after success.
    pub spent_hold_secs: u64,

    /// Poll interval used by the confirmation monitor.
    pub confirmation_poll_secs: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_fee_rate: 1_000.0,
            max_amount_sats: 21_000_000 * 100_000_000,
            dust_threshold: 546,
            pipeline_timeout_secs: 60,
            spent_hold_secs: 600,
            confirmation_poll_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints_by_network() {
        let config = WalletConfig::default();
        let endpoints = config.effective_endpoints();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].priority, 1);
        assert!(endpoints[0].base_url.contains("mempool.space/api"));

        let testnet = WalletConfig {
            network: NetworkKind::Testnet,
            ..Default::default()
        };
        assert!(testnet
            .effective_endpoints()
            .iter()
            .all(|e| e.base_url.contains("testnet")));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: WalletConfig = toml::from_str(
            r#"
            network = "testnet"

            [[endpoints]]
            name = "local"
            base_url = "http://127.0.0.1:3002"
            provider = "esplora"

            [rate_limit]
            capacity = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.network, NetworkKind::Testnet);
        assert_eq!(config.endpoints[0].timeout_ms, 15_000);
        assert_eq!(config.endpoints[0].provider, ProviderKind::Esplora);
        assert_eq!(config.rate_limit.capacity, 2);
        assert_eq!(config.rate_limit.queue_limit, 100);
        assert_eq!(config.retries.critical.max_attempts, 5);
        assert_eq!(config.send.dust_threshold, 546);
    }
}
