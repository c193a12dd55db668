//! Explorer wire types and client errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NetworkKind;

/// Errors surfaced by the resilient client.
///
/// `Clone` because deduplicated callers all receive the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Endpoint answered with a non-2xx status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Connection-level failure.
    #[error("{endpoint} unreachable: {message}")]
    Transport { endpoint: String, message: String },

    /// Per-endpoint timeout elapsed.
    #[error("{endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Every endpoint for this request sits behind an open breaker.
    #[error("service temporarily degraded: circuit open for {domain}")]
    CircuitOpen { domain: String },

    /// Local backpressure from the rate limiter.
    #[error("too many pending requests for {domain}")]
    QueueFull { domain: String },

    /// Response body did not match the expected shape.
    #[error("unexpected response for {context}: {message}")]
    Decode { context: String, message: String },

    #[error("no explorer endpoints configured")]
    NoEndpoints,

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn decode(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ClientError::Decode {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for explorer operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP methods the explorer API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// Confirmation status as reported by Esplora-compatible APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_time: Option<u64>,
}

impl TxStatus {
    /// Confirmation depth given the current tip height.
    pub fn confirmations(&self, tip_height: u64) -> u32 {
        match (self.confirmed, self.block_height) {
            (true, Some(height)) if tip_height >= height => {
                u32::try_from(tip_height - height + 1).unwrap_or(u32::MAX)
            }
            (true, _) => 1,
            (false, _) => 0,
        }
    }
}

/// Entry of `GET /address/{addr}/utxo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: TxStatus,
}

/// Summary of `GET /tx/{txid}` and `GET /address/{addr}/txs` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerTransaction {
    pub txid: String,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub weight: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    pub status: TxStatus,
}

/// Normalized fee estimates in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimates {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    pub economy_fee: f64,
    pub minimum_fee: f64,
}

/// Which estimate a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTarget {
    Fastest,
    HalfHour,
    Hour,
    Economy,
    Minimum,
}

impl std::str::FromStr for FeeTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fastest" => Ok(FeeTarget::Fastest),
            "half_hour" | "halfhour" => Ok(FeeTarget::HalfHour),
            "hour" => Ok(FeeTarget::Hour),
            "economy" => Ok(FeeTarget::Economy),
            "minimum" => Ok(FeeTarget::Minimum),
            other => Err(format!("unknown fee target '{}'", other)),
        }
    }
}

/// Where fee estimates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSource {
    Network,
    Default,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    fastest_fee: f64,
    half_hour_fee: f64,
    hour_fee: f64,
    #[serde(default)]
    economy_fee: Option<f64>,
    #[serde(default)]
    minimum_fee: Option<f64>,
}

impl FeeEstimates {
    /// Last-resort values used only when every endpoint failed.
    pub fn defaults_for(network: NetworkKind) -> Self {
        match network {
            NetworkKind::Mainnet => Self::new(25.0, 15.0, 10.0, 5.0, 1.0),
            NetworkKind::Testnet => Self::new(2.0, 1.0, 1.0, 1.0, 1.0),
        }
    }

    fn new(fastest: f64, half_hour: f64, hour: f64, economy: f64, minimum: f64) -> Self {
        Self {
            fastest_fee: fastest,
            half_hour_fee: half_hour,
            hour_fee: hour,
            economy_fee: economy,
            minimum_fee: minimum,
        }
    }

    pub fn rate_for(&self, target: FeeTarget) -> f64 {
        match target {
            FeeTarget::Fastest => self.fastest_fee,
            FeeTarget::HalfHour => self.half_hour_fee,
            FeeTarget::Hour => self.hour_fee,
            FeeTarget::Economy => self.economy_fee,
            FeeTarget::Minimum => self.minimum_fee,
        }
    }

    /// Normalize either provider format.
    ///
    /// mempool.space returns named fields; Esplora returns a map of
    /// confirmation target (blocks) to sat/vB.
    pub fn from_provider_json(body: &str) -> ClientResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| ClientError::decode("fee estimates", e))?;

        let estimates = if value.get("fastestFee").is_some() {
            let fees: RecommendedFees = serde_json::from_value(value)
                .map_err(|e| ClientError::decode("fee estimates", e))?;
            let economy = fees.economy_fee.unwrap_or(fees.hour_fee);
            Self::new(
                fees.fastest_fee,
                fees.half_hour_fee,
                fees.hour_fee,
                economy,
                fees.minimum_fee.unwrap_or(economy),
            )
        } else {
            let by_target: BTreeMap<u32, f64> = value
                .as_object()
                .ok_or_else(|| ClientError::decode("fee estimates", "expected a JSON object"))?
                .iter()
                .filter_map(|(k, v)| Some((k.parse::<u32>().ok()?, v.as_f64()?)))
                .collect();
            if by_target.is_empty() {
                return Err(ClientError::decode("fee estimates", "no confirmation targets"));
            }
            Self::new(
                rate_at_target(&by_target, 1),
                rate_at_target(&by_target, 3),
                rate_at_target(&by_target, 6),
                rate_at_target(&by_target, 144),
                rate_at_target(&by_target, 1008),
            )
        };

        Ok(estimates.normalized())
    }

    /// Round up to whole sat/vB, floor at 1 and keep tiers non-increasing.
    fn normalized(self) -> Self {
        let minimum = self.minimum_fee.ceil().max(1.0);
        let economy = self.economy_fee.ceil().max(minimum);
        let hour = self.hour_fee.ceil().max(economy);
        let half_hour = self.half_hour_fee.ceil().max(hour);
        let fastest = self.fastest_fee.ceil().max(half_hour);
        Self::new(fastest, half_hour, hour, economy, minimum)
    }
}

/// Estimate for the nearest target at or above `blocks`, falling back to
/// the slowest target available.
fn rate_at_target(by_target: &BTreeMap<u32, f64>, blocks: u32) -> f64 {
    by_target
        .range(blocks..)
        .next()
        .or_else(|| by_target.iter().next_back())
        .map(|(_, rate)| *rate)
        .unwrap_or(1.0)
}

/// Whether a string looks like a transaction id (64 hex characters).
pub fn is_valid_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.bytes().all(|b| b.is_ascii_hexdigit())
}
