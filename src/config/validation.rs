//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, rates > 0)
//! - Detect duplicate endpoint names and malformed URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WalletConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use url::Url;

use crate::config::schema::{RetryPolicy, WalletConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted path to the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &WalletConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let field = format!("endpoints[{}]", i);
        if endpoint.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !names.insert(endpoint.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate endpoint name '{}'", endpoint.name),
            ));
        }
        match Url::parse(&endpoint.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{}.base_url", field),
                format!("unsupported URL '{}'", url),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("{}.base_url", field),
                format!("invalid URL '{}': {}", endpoint.base_url, e),
            )),
        }
        if endpoint.priority == 0 {
            errors.push(ValidationError::new(format!("{}.priority", field), "must be >= 1"));
        }
        if endpoint.timeout_ms == 0 {
            errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
        }
    }

    if config.rate_limit.capacity == 0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be >= 1"));
    }
    if !(config.rate_limit.refill_per_second > 0.0) {
        errors.push(ValidationError::new("rate_limit.refill_per_second", "must be > 0"));
    }
    if config.rate_limit.queue_limit == 0 {
        errors.push(ValidationError::new("rate_limit.queue_limit", "must be >= 1"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be >= 1"));
    }

    let retries = &config.retries;
    for (name, policy) in [
        ("critical", &retries.critical),
        ("high", &retries.high),
        ("normal", &retries.normal),
        ("low", &retries.low),
    ] {
        check_retry_policy(&format!("retries.{}", name), policy, &mut errors);
    }

    if let Some(ratio) = config.cache.refresh_ahead_ratio {
        if !(ratio > 0.0 && ratio < 1.0) {
            errors.push(ValidationError::new(
                "cache.refresh_ahead_ratio",
                "must be between 0 and 1 (exclusive)",
            ));
        }
    }

    if !(config.send.max_fee_rate > 0.0) {
        errors.push(ValidationError::new("send.max_fee_rate", "must be > 0"));
    }
    if config.send.max_amount_sats <= config.send.dust_threshold {
        errors.push(ValidationError::new(
            "send.max_amount_sats",
            "must be above the dust threshold",
        ));
    }
    if config.send.pipeline_timeout_secs == 0 {
        errors.push(ValidationError::new("send.pipeline_timeout_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_retry_policy(field: &str, policy: &RetryPolicy, errors: &mut Vec<ValidationError>) {
    if policy.max_attempts == 0 {
        errors.push(ValidationError::new(format!("{}.max_attempts", field), "must be >= 1"));
    }
    if !(policy.multiplier >= 1.0) {
        errors.push(ValidationError::new(format!("{}.multiplier", field), "must be >= 1"));
    }
    if policy.max_delay_ms < policy.base_delay_ms {
        errors.push(ValidationError::new(
            format!("{}.max_delay_ms", field),
            "must be >= base_delay_ms",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EndpointConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&WalletConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = WalletConfig::default();
        config.endpoints = vec![
            EndpointConfig {
                name: "a".into(),
                base_url: "not a url".into(),
                timeout_ms: 0,
                priority: 0,
                provider: Default::default(),
            },
            EndpointConfig {
                name: "a".into(),
                base_url: "ftp://example.com".into(),
                timeout_ms: 1000,
                priority: 2,
                provider: Default::default(),
            },
        ];
        config.rate_limit.refill_per_second = 0.0;
        config.cache.refresh_ahead_ratio = Some(1.5);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"endpoints[0].base_url"));
        assert!(fields.contains(&"endpoints[0].timeout_ms"));
        assert!(fields.contains(&"endpoints[0].priority"));
        assert!(fields.contains(&"endpoints[1].name"));
        assert!(fields.contains(&"endpoints[1].base_url"));
        assert!(fields.contains(&"rate_limit.refill_per_second"));
        assert!(fields.contains(&"cache.refresh_ahead_ratio"));
    }
}
