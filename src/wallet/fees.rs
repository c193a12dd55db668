//! Virtual size and fee estimation.
//!
//! Approximate vbytes per component:
//! - overhead: 10 (+0.5 segwit marker/flag when any input has a witness)
//! - inputs: legacy 148, nested segwit 91, native segwit 68
//! - outputs: P2PKH 34, P2SH 32, P2WPKH 31, P2WSH/P2TR 43

use crate::wallet::types::{AddressType, OutputKind};

/// Minimum non-dust output value in satoshis.
pub const DUST_THRESHOLD: u64 = 546;

const TX_OVERHEAD_VBYTES: f64 = 10.0;
const SEGWIT_MARKER_VBYTES: f64 = 0.5;

pub fn input_vbytes(address_type: AddressType) -> f64 {
    match address_type {
        AddressType::Legacy => 148.0,
        AddressType::Segwit => 91.0,
        AddressType::NativeSegwit => 68.0,
    }
}

pub fn output_vbytes(kind: OutputKind) -> f64 {
    match kind {
        OutputKind::P2pkh => 34.0,
        OutputKind::P2sh => 32.0,
        OutputKind::P2wpkh => 31.0,
        OutputKind::P2wsh | OutputKind::P2tr => 43.0,
    }
}

/// Extra bytes for a compact-size count beyond the single byte already in
/// the overhead.
fn varint_extra(count: usize) -> f64 {
    match count {
        0..=0xfc => 0.0,
        0xfd..=0xffff => 2.0,
        _ => 4.0,
    }
}

/// Estimated virtual size, rounded up to whole vbytes.
pub fn estimate_virtual_bytes(
    input_types: &[AddressType],
    outputs: &[OutputKind],
    change: Option<OutputKind>,
) -> u64 {
    let mut vbytes = TX_OVERHEAD_VBYTES;
    if input_types.iter().any(|t| t.has_witness()) {
        vbytes += SEGWIT_MARKER_VBYTES;
    }

    vbytes += varint_extra(input_types.len());
    vbytes += input_types.iter().map(|t| input_vbytes(*t)).sum::<f64>();

    let output_count = outputs.len() + usize::from(change.is_some());
    vbytes += varint_extra(output_count);
    vbytes += outputs.iter().chain(change.iter()).map(|k| output_vbytes(*k)).sum::<f64>();

    vbytes.ceil() as u64
}

/// Fee for `vbytes` at `fee_rate` sat/vB, rounded up.
pub fn fee_for(vbytes: u64, fee_rate: f64) -> u64 {
    // Tolerance keeps 141 * 1.1 from rounding up to 156
    (vbytes as f64 * fee_rate - 1e-9).ceil().max(0.0) as u64
}
