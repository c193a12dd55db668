//! Greedy UTXO selection.
//!
//! Candidates are ordered preferred-address-type first, then by value
//! (largest first when minimizing input count) and accumulated until the
//! inputs cover the target plus the fee for the inputs chosen so far. The
//! change output is kept only when it would be at or above the dust
//! threshold; otherwise the remainder goes to the fee.

use std::cmp::Ordering;

use crate::wallet::fees::{estimate_virtual_bytes, fee_for, DUST_THRESHOLD};
use crate::wallet::types::{AddressType, OutputKind, Utxo};

/// Knobs for one selection run.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    pub prefer_address_type: Option<AddressType>,
    pub include_unconfirmed: bool,
    pub minimize_input_count: bool,
    /// Script kinds of the payment outputs, in order.
    pub recipient_outputs: Vec<OutputKind>,
    /// Script kind of the change output, should one be needed.
    pub change_output: OutputKind,
    pub dust_threshold: u64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            prefer_address_type: Some(AddressType::NativeSegwit),
            include_unconfirmed: false,
            minimize_input_count: true,
            recipient_outputs: vec![OutputKind::P2wpkh],
            change_output: OutputKind::P2wpkh,
            dust_threshold: DUST_THRESHOLD,
        }
    }
}

/// Inputs chosen for one send plus the resulting fee and change.
///
/// `total_input_sats == target + fee_sats + change_sats` always holds, and
/// `change_sats` is either zero or at least the dust threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub selected_utxos: Vec<Utxo>,
    pub total_input_sats: u64,
    pub change_sats: u64,
    pub fee_sats: u64,
    pub estimated_vbytes: u64,
}

impl SelectionResult {
    pub fn has_change(&self) -> bool {
        self.change_sats > 0
    }
}

fn candidate_order(a: &Utxo, b: &Utxo, policy: &SelectionPolicy) -> Ordering {
    let preferred = |u: &Utxo| policy.prefer_address_type == Some(u.address_type);
    let by_type = preferred(b).cmp(&preferred(a));
    let by_value = if policy.minimize_input_count {
        b.value_sats.cmp(&a.value_sats)
    } else {
        a.value_sats.cmp(&b.value_sats)
    };
    by_type
        .then(by_value)
        .then_with(|| a.txid.cmp(&b.txid))
        .then(a.vout.cmp(&b.vout))
}

fn eligible<'a>(utxos: &'a [Utxo], policy: &SelectionPolicy) -> Vec<&'a Utxo> {
    let mut candidates: Vec<&Utxo> = utxos
        .iter()
        .filter(|u| policy.include_unconfirmed || u.is_confirmed())
        .collect();
    candidates.sort_by(|a, b| candidate_order(a, b, policy));
    candidates
}

/// Select inputs paying `target_sats` at `fee_rate` sat/vB.
///
/// Returns `None` when the eligible outputs cannot cover the target plus
/// fee; a partial spend is never produced.
pub fn select_utxos(
    utxos: &[Utxo],
    target_sats: u64,
    fee_rate: f64,
    policy: &SelectionPolicy,
) -> Option<SelectionResult> {
    if target_sats == 0 || policy.recipient_outputs.is_empty() {
        return None;
    }

    let mut selected: Vec<Utxo> = Vec::new();
    let mut input_types: Vec<AddressType> = Vec::new();
    let mut total: u64 = 0;

    for utxo in eligible(utxos, policy) {
        selected.push(utxo.clone());
        input_types.push(utxo.address_type);
        total = total.saturating_add(utxo.value_sats);

        let bare_vbytes = estimate_virtual_bytes(&input_types, &policy.recipient_outputs, None);
        let bare_fee = fee_for(bare_vbytes, fee_rate);
        if total < target_sats.checked_add(bare_fee)? {
            continue;
        }

        let change_vbytes = estimate_virtual_bytes(
            &input_types,
            &policy.recipient_outputs,
            Some(policy.change_output),
        );
        let change_fee = fee_for(change_vbytes, fee_rate);
        let change = total
            .checked_sub(target_sats)
            .and_then(|rest| rest.checked_sub(change_fee))
            .unwrap_or(0);

        let result = if change >= policy.dust_threshold {
            SelectionResult {
                selected_utxos: selected,
                total_input_sats: total,
                change_sats: change,
                fee_sats: change_fee,
                estimated_vbytes: change_vbytes,
            }
        } else {
            // Dust remainder is absorbed by the fee
            SelectionResult {
                selected_utxos: selected,
                total_input_sats: total,
                change_sats: 0,
                fee_sats: total - target_sats,
                estimated_vbytes: bare_vbytes,
            }
        };
        return Some(result);
    }

    None
}

/// Required vs available amounts for an insufficient-funds report.
///
/// `required` assumes every eligible output is spent, which is the cheapest
/// possible transaction that could still have covered the target.
pub fn shortfall(
    utxos: &[Utxo],
    target_sats: u64,
    fee_rate: f64,
    policy: &SelectionPolicy,
) -> (u64, u64) {
    let candidates = eligible(utxos, policy);
    let available = candidates.iter().map(|u| u.value_sats).sum::<u64>();
    let input_types: Vec<AddressType> = candidates.iter().map(|u| u.address_type).collect();
    let input_types = if input_types.is_empty() {
        vec![policy.prefer_address_type.unwrap_or(AddressType::NativeSegwit)]
    } else {
        input_types
    };
    let vbytes = estimate_virtual_bytes(&input_types, &policy.recipient_outputs, None);
    (target_sats.saturating_add(fee_for(vbytes, fee_rate)), available)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(tag: &str, value: u64, address_type: AddressType, confirmations: u32) -> Utxo {
        Utxo {
            txid: format!("{:0>64}", tag),
            vout: 0,
            value_sats: value,
            confirmations,
            address: format!("addr-{}", tag),
            derivation_path: "m/84'/0'/0'/0/0".to_string(),
            address_type,
            public_key: "02aa".to_string(),
        }
    }

    fn assert_invariants(result: &SelectionResult, target: u64) {
        let sum: u64 = result.selected_utxos.iter().map(|u| u.value_sats).sum();
        assert_eq!(result.total_input_sats, sum);
        assert!(result.total_input_sats >= target + result.fee_sats);
        assert_eq!(
            result.total_input_sats,
            target + result.fee_sats + result.change_sats
        );
        assert!(result.change_sats == 0 || result.change_sats >= DUST_THRESHOLD);
    }

    #[test]
    fn test_single_input_with_change() {
        let utxos = vec![utxo("a", 100_000, AddressType::NativeSegwit, 3)];
        let result = select_utxos(&utxos, 60_000, 10.0, &SelectionPolicy::default()).unwrap();

        assert_eq!(result.selected_utxos.len(), 1);
        assert_eq!(result.estimated_vbytes, 141);
        assert_eq!(result.fee_sats, 1410);
        assert_eq!(result.change_sats, 38_590);
        assert_invariants(&result, 60_000);
    }

    #[test]
    fn test_exact_value_is_insufficient() {
        let utxos = vec![utxo("a", 8_000, AddressType::NativeSegwit, 1)];
        assert!(select_utxos(&utxos, 8_000, 10.0, &SelectionPolicy::default()).is_none());

        let (required, available) = shortfall(&utxos, 8_000, 10.0, &SelectionPolicy::default());
        assert_eq!(available, 8_000);
        assert_eq!(required, 8_000 + 1_100);
    }

    #[test]
    fn test_dust_change_swept_into_fee() {
        // 1 in / 1 out = 110 vB (1100 sats), with change 141 vB (1410 sats)
        let utxos = vec![utxo("a", 10_000, AddressType::NativeSegwit, 1)];
        let result = select_utxos(&utxos, 8_500, 10.0, &SelectionPolicy::default()).unwrap();

        assert_eq!(result.change_sats, 0);
        assert_eq!(result.fee_sats, 1_500);
        assert_eq!(result.estimated_vbytes, 110);
        assert_invariants(&result, 8_500);
    }

    #[test]
    fn test_unconfirmed_excluded_by_default() {
        let utxos = vec![
            utxo("a", 500_000, AddressType::NativeSegwit, 0),
            utxo("b", 50_000, AddressType::NativeSegwit, 2),
        ];
        let result = select_utxos(&utxos, 20_000, 5.0, &SelectionPolicy::default()).unwrap();
        assert_eq!(result.selected_utxos[0].value_sats, 50_000);

        let policy = SelectionPolicy {
            include_unconfirmed: true,
            ..SelectionPolicy::default()
        };
        let result = select_utxos(&utxos, 20_000, 5.0, &policy).unwrap();
        assert_eq!(result.selected_utxos[0].value_sats, 500_000);
    }

    #[test]
    fn test_preferred_type_first() {
        let utxos = vec![
            utxo("legacy", 900_000, AddressType::Legacy, 6),
            utxo("native", 100_000, AddressType::NativeSegwit, 6),
        ];
        let result = select_utxos(&utxos, 50_000, 2.0, &SelectionPolicy::default()).unwrap();
        assert_eq!(result.selected_utxos.len(), 1);
        assert_eq!(result.selected_utxos[0].address_type, AddressType::NativeSegwit);
    }

    #[test]
    fn test_accumulates_multiple_inputs() {
        let utxos = vec![
            utxo("a", 30_000, AddressType::NativeSegwit, 1),
            utxo("b", 40_000, AddressType::NativeSegwit, 1),
            utxo("c", 20_000, AddressType::Segwit, 1),
        ];
        let result = select_utxos(&utxos, 75_000, 3.0, &SelectionPolicy::default()).unwrap();

        let values: Vec<u64> = result.selected_utxos.iter().map(|u| u.value_sats).collect();
        assert_eq!(values, vec![40_000, 30_000, 20_000]);
        assert_invariants(&result, 75_000);
    }

    #[test]
    fn test_invariants_hold_across_targets() {
        let utxos = vec![
            utxo("a", 12_345, AddressType::NativeSegwit, 1),
            utxo("b", 67_890, AddressType::Segwit, 4),
            utxo("c", 5_000, AddressType::Legacy, 9),
            utxo("d", 250_000, AddressType::NativeSegwit, 2),
        ];
        for target in [1_000, 9_999, 60_000, 120_000, 300_000, 330_000] {
            for rate in [1.0, 2.5, 17.0] {
                if let Some(result) =
                    select_utxos(&utxos, target, rate, &SelectionPolicy::default())
                {
                    assert_invariants(&result, target);
                }
            }
        }
    }

    #[test]
    fn test_empty_set_and_zero_target() {
        assert!(select_utxos(&[], 1_000, 1.0, &SelectionPolicy::default()).is_none());
        let utxos = vec![utxo("a", 10_000, AddressType::NativeSegwit, 1)];
        assert!(select_utxos(&utxos, 0, 1.0, &SelectionPolicy::default()).is_none());
    }
}
