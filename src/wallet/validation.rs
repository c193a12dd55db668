//! Send request validation.

use std::str::FromStr;

use bitcoin::address::{Address, AddressType as ScriptType, NetworkUnchecked};

use crate::config::NetworkKind;
use crate::wallet::types::{OutputKind, ValidationError};

/// Parse `address` and require it to belong to `network`.
pub fn parse_address(address: &str, network: NetworkKind) -> Result<Address, ValidationError> {
    let trimmed = address.trim();
    let unchecked = Address::<NetworkUnchecked>::from_str(trimmed).map_err(|e| {
        ValidationError::InvalidAddress {
            address: trimmed.to_string(),
            reason: e.to_string(),
        }
    })?;

    unchecked
        .require_network(network.as_bitcoin())
        .map_err(|_| ValidationError::WrongNetwork {
            address: trimmed.to_string(),
            network: network.to_string(),
        })
}

/// Output script kind for a parsed address, used for size estimation.
pub fn output_kind_for(address: &Address) -> OutputKind {
    match address.address_type() {
        Some(ScriptType::P2pkh) => OutputKind::P2pkh,
        Some(ScriptType::P2sh) => OutputKind::P2sh,
        Some(ScriptType::P2wpkh) => OutputKind::P2wpkh,
        Some(ScriptType::P2wsh) => OutputKind::P2wsh,
        Some(ScriptType::P2tr) => OutputKind::P2tr,
        // Unknown witness versions are sized like the largest standard output
        _ => OutputKind::P2wsh,
    }
}

pub fn validate_amount(amount_sats: u64, dust: u64, max_sats: u64) -> Result<(), ValidationError> {
    if amount_sats <= dust {
        return Err(ValidationError::AmountTooSmall {
            amount: amount_sats,
            dust,
        });
    }
    if amount_sats > max_sats {
        return Err(ValidationError::AmountTooLarge {
            amount: amount_sats,
            max: max_sats,
        });
    }
    Ok(())
}

pub fn validate_fee_rate(rate: f64, max_rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ValidationError::InvalidFeeRate { rate });
    }
    if rate > max_rate {
        return Err(ValidationError::FeeRateTooHigh {
            rate,
            max: max_rate,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAINNET_P2WPKH: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
    const MAINNET_P2PKH: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
    const MAINNET_P2SH: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";
    const TESTNET_P2WPKH: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    #[test]
    fn test_parse_address_kinds() {
        let addr = parse_address(MAINNET_P2WPKH, NetworkKind::Mainnet).unwrap();
        assert_eq!(output_kind_for(&addr), OutputKind::P2wpkh);

        let addr = parse_address(MAINNET_P2PKH, NetworkKind::Mainnet).unwrap();
        assert_eq!(output_kind_for(&addr), OutputKind::P2pkh);

        let addr = parse_address(MAINNET_P2SH, NetworkKind::Mainnet).unwrap();
        assert_eq!(output_kind_for(&addr), OutputKind::P2sh);
    }

    #[test]
    fn test_wrong_network_rejected() {
        let err = parse_address(TESTNET_P2WPKH, NetworkKind::Mainnet).unwrap_err();
        assert!(matches!(err, ValidationError::WrongNetwork { .. }));

        assert!(parse_address(TESTNET_P2WPKH, NetworkKind::Testnet).is_ok());
    }

    #[test]
    fn test_garbage_address_rejected() {
        let err = parse_address("not-an-address", NetworkKind::Mainnet).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress { .. }));
    }

    #[test]
    fn test_amount_bounds() {
        assert!(validate_amount(546, 546, 1_000_000).is_err());
        assert!(validate_amount(547, 546, 1_000_000).is_ok());
        assert!(matches!(
            validate_amount(1_000_001, 546, 1_000_000),
            Err(ValidationError::AmountTooLarge { .. })
        ));
    }

    #[test]
    fn test_fee_rate_bounds() {
        assert!(validate_fee_rate(0.0, 1000.0).is_err());
        assert!(validate_fee_rate(-1.0, 1000.0).is_err());
        assert!(validate_fee_rate(f64::NAN, 1000.0).is_err());
        assert!(validate_fee_rate(1000.5, 1000.0).is_err());
        assert!(validate_fee_rate(12.5, 1000.0).is_ok());
    }
}
