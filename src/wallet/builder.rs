//! Unsigned transaction construction.
//!
//! The builder turns a `SelectionResult` and the requested outputs into an
//! `UnsignedTransaction`: inputs carry the derivation path and public key the
//! external signer needs, outputs are checked against the dust threshold,
//! and the fee is re-derived from the final shape so an unbalanced or
//! under-paying transaction never leaves this module.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::Serialize;

use crate::config::NetworkKind;
use crate::wallet::fees::{estimate_virtual_bytes, fee_for};
use crate::wallet::selection::SelectionResult;
use crate::wallet::types::{
    AddressType, BuildStage, TxOutput, ValidationError, WalletError, WalletResult,
};
use crate::wallet::validation::{output_kind_for, parse_address};

/// Input as handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedInput {
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
    pub address: String,
    pub address_type: AddressType,
    pub derivation_path: String,
    pub public_key: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedOutput {
    pub address: String,
    pub value_sats: u64,
    pub is_change: bool,
}

/// A balanced, fee-correct transaction awaiting signatures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsignedTransaction {
    pub version: i32,
    pub lock_time: u32,
    pub inputs: Vec<UnsignedInput>,
    pub outputs: Vec<UnsignedOutput>,
    pub estimated_fee: u64,
    pub fee_rate: f64,
    pub estimated_vbytes: u64,
}

impl UnsignedTransaction {
    pub fn total_input_sats(&self) -> u64 {
        self.inputs.iter().map(|i| i.value_sats).sum()
    }

    pub fn total_output_sats(&self) -> u64 {
        self.outputs.iter().map(|o| o.value_sats).sum()
    }

    pub fn change_output(&self) -> Option<&UnsignedOutput> {
        self.outputs.iter().find(|o| o.is_change)
    }

    /// Render as a BIP-174 PSBT. Witness inputs carry their `witness_utxo`.
    pub fn to_psbt(&self, network: NetworkKind) -> WalletResult<Psbt> {
        let mut input = Vec::with_capacity(self.inputs.len());
        for i in &self.inputs {
            let txid = Txid::from_str(&i.txid).map_err(|e| {
                WalletError::build(BuildStage::Build, format!("invalid txid {}: {}", i.txid, e))
            })?;
            input.push(TxIn {
                previous_output: bitcoin::OutPoint::new(txid, i.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence(i.sequence),
                witness: Witness::new(),
            });
        }

        let mut output = Vec::with_capacity(self.outputs.len());
        for o in &self.outputs {
            output.push(TxOut {
                value: Amount::from_sat(o.value_sats),
                script_pubkey: parse_address(&o.address, network)?.script_pubkey(),
            });
        }

        let tx = Transaction {
            version: Version(self.version),
            lock_time: LockTime::from_consensus(self.lock_time),
            input,
            output,
        };

        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| WalletError::build(BuildStage::Build, e.to_string()))?;

        for (psbt_input, unsigned) in psbt.inputs.iter_mut().zip(&self.inputs) {
            if unsigned.address_type.has_witness() {
                let script_pubkey = parse_address(&unsigned.address, network)?.script_pubkey();
                psbt_input.witness_utxo = Some(TxOut {
                    value: Amount::from_sat(unsigned.value_sats),
                    script_pubkey,
                });
            }
        }

        Ok(psbt)
    }

    pub fn to_psbt_hex(&self, network: NetworkKind) -> WalletResult<String> {
        Ok(self.to_psbt(network)?.serialize_hex())
    }
}

/// Builds unsigned transactions for one network.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: NetworkKind,
    dust_threshold: u64,
}

impl TransactionBuilder {
    pub fn new(network: NetworkKind, dust_threshold: u64) -> Self {
        Self {
            network,
            dust_threshold,
        }
    }

    pub fn build(
        &self,
        selection: &SelectionResult,
        outputs: &[TxOutput],
        change_address: &str,
        fee_rate: f64,
    ) -> WalletResult<UnsignedTransaction> {
        if selection.selected_utxos.is_empty() {
            return Err(WalletError::build(BuildStage::Build, "transaction has no inputs"));
        }
        if outputs.is_empty() {
            return Err(WalletError::build(BuildStage::Build, "transaction has no outputs"));
        }
        if change_address.trim().is_empty() {
            return Err(ValidationError::MissingChangeAddress.into());
        }

        let mut output_kinds = Vec::with_capacity(outputs.len());
        for output in outputs {
            if output.value_sats <= self.dust_threshold {
                return Err(WalletError::build(
                    BuildStage::Build,
                    format!(
                        "output to {} of {} sats is at or below the dust threshold of {} sats",
                        output.address, output.value_sats, self.dust_threshold
                    ),
                ));
            }
            output_kinds.push(output_kind_for(&parse_address(&output.address, self.network)?));
        }

        let has_change = selection.change_sats > 0;
        let change_kind = if has_change {
            Some(output_kind_for(&parse_address(change_address, self.network)?))
        } else {
            None
        };

        let input_types: Vec<AddressType> = selection
            .selected_utxos
            .iter()
            .map(|u| u.address_type)
            .collect();
        let vbytes = estimate_virtual_bytes(&input_types, &output_kinds, change_kind);
        let minimum_fee = fee_for(vbytes, fee_rate);

        if selection.fee_sats < minimum_fee {
            return Err(WalletError::build(
                BuildStage::Build,
                format!(
                    "fee of {} sats is below {} sats required at {} sat/vB",
                    selection.fee_sats, minimum_fee, fee_rate
                ),
            ));
        }

        let paid: u64 = outputs.iter().map(|o| o.value_sats).sum();
        let spent = paid
            .checked_add(selection.fee_sats)
            .and_then(|v| v.checked_add(selection.change_sats));
        if spent != Some(selection.total_input_sats) {
            return Err(WalletError::build(
                BuildStage::Build,
                format!(
                    "inputs of {} sats do not balance outputs of {} sats, change {} and fee {}",
                    selection.total_input_sats, paid, selection.change_sats, selection.fee_sats
                ),
            ));
        }

        let inputs = selection
            .selected_utxos
            .iter()
            .map(|u| UnsignedInput {
                txid: u.txid.clone(),
                vout: u.vout,
                value_sats: u.value_sats,
                address: u.address.clone(),
                address_type: u.address_type,
                derivation_path: u.derivation_path.clone(),
                public_key: u.public_key.clone(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME.0,
            })
            .collect();

        let mut tx_outputs: Vec<UnsignedOutput> = outputs
            .iter()
            .map(|o| UnsignedOutput {
                address: o.address.trim().to_string(),
                value_sats: o.value_sats,
                is_change: false,
            })
            .collect();
        if has_change {
            tx_outputs.push(UnsignedOutput {
                address: change_address.trim().to_string(),
                value_sats: selection.change_sats,
                is_change: true,
            });
        }

        tracing::debug!(
            inputs = input_types.len(),
            outputs = tx_outputs.len(),
            vbytes,
            fee = selection.fee_sats,
            "Built unsigned transaction"
        );

        Ok(UnsignedTransaction {
            version: 2,
            lock_time: 0,
            inputs,
            outputs: tx_outputs,
            estimated_fee: selection.fee_sats,
            fee_rate,
            estimated_vbytes: vbytes,
        })
    }
}
