//! Send pipeline state machine.
//!
//! `idle → validating → building → signing → broadcasting → success`, with
//! `error` reachable from every non-idle state. At most one run is in flight
//! per orchestrator: a second `execute_transaction` while busy is a no-op.
//! `retry` re-runs the whole pipeline from validation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::try_join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::SendConfig;
use crate::explorer::types::{ClientError, ExplorerUtxo, FeeSource, FeeTarget};
use crate::explorer::ExplorerApi;
use crate::observability::metrics::record_send_outcome;
use crate::wallet::builder::{TransactionBuilder, UnsignedTransaction};
use crate::wallet::reservation::{ReservationGuard, UtxoReservations};
use crate::wallet::selection::{select_utxos, shortfall, SelectionPolicy, SelectionResult};
use crate::wallet::signer::{KeyHandle, Signer, SignerError};
use crate::wallet::types::{
    AddressType, BuildStage, OutPoint, TxOutput, Utxo, ValidationError, WalletAddress,
    WalletError, WalletResult,
};
use crate::wallet::validation::{
    output_kind_for, parse_address, validate_amount, validate_fee_rate,
};

/// Attempts at selecting and reserving before giving up on contention.
const RESERVE_ATTEMPTS: usize = 3;

/// How the fee rate for a send is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeRateChoice {
    /// Fixed sat/vB rate.
    Explicit(f64),
    /// Resolved from the current network estimates.
    Target(FeeTarget),
}

/// One send, as requested by the caller.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub recipient: String,
    pub amount_sats: u64,
    pub fee_rate: FeeRateChoice,
    /// Wallet addresses whose outputs may be spent.
    pub sources: Vec<WalletAddress>,
    pub change_address: String,
    pub key: KeyHandle,
    pub include_unconfirmed: bool,
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub txid: String,
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub fee_rate: f64,
    pub fee_source: Option<FeeSource>,
    pub estimated_vbytes: u64,
    pub change_sats: u64,
    pub inputs: Vec<OutPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Idle,
    Validating,
    Building,
    Signing,
    Broadcasting,
    Success { txid: String },
    Error { error: WalletError, can_retry: bool },
}

impl SendState {
    pub fn name(&self) -> &'static str {
        match self {
            SendState::Idle => "idle",
            SendState::Validating => "validating",
            SendState::Building => "building",
            SendState::Signing => "signing",
            SendState::Broadcasting => "broadcasting",
            SendState::Success { .. } => "success",
            SendState::Error { .. } => "error",
        }
    }

    /// A run is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SendState::Validating
                | SendState::Building
                | SendState::Signing
                | SendState::Broadcasting
        )
    }
}

/// Validated form of a request.
struct Prepared {
    outputs: Vec<TxOutput>,
    policy: SelectionPolicy,
    fee_rate: f64,
    fee_source: Option<FeeSource>,
}

/// Drives one wallet's sends through the pipeline.
pub struct SendOrchestrator {
    explorer: ExplorerApi,
    signer: Arc<dyn Signer>,
    builder: TransactionBuilder,
    reservations: UtxoReservations,
    config: SendConfig,
    state: watch::Sender<SendState>,
    last_request: Mutex<Option<SendRequest>>,
}

impl SendOrchestrator {
    pub fn new(explorer: ExplorerApi, signer: Arc<dyn Signer>, config: SendConfig) -> Self {
        let builder = TransactionBuilder::new(explorer.network(), config.dust_threshold);
        let (state, _) = watch::channel(SendState::Idle);
        Self {
            explorer,
            signer,
            builder,
            reservations: UtxoReservations::new(),
            config,
            state,
            last_request: Mutex::new(None),
        }
    }

    /// Share a reservation registry with other orchestrators of the same wallet.
    pub fn with_reservations(mut self, reservations: UtxoReservations) -> Self {
        self.reservations = reservations;
        self
    }

    pub fn state(&self) -> SendState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    pub fn reservations(&self) -> &UtxoReservations {
        &self.reservations
    }

    /// Run the full pipeline for `request`.
    ///
    /// Returns `Ok(None)` without doing anything when a run is already in flight.
    pub async fn execute_transaction(
        &self,
        request: SendRequest,
    ) -> WalletResult<Option<SendReceipt>> {
        if !self.try_begin() {
            tracing::debug!(state = self.state.borrow().name(), "Send already in flight, ignoring");
            return Ok(None);
        }

        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        let limit = Duration::from_secs(self.config.pipeline_timeout_secs);
        let outcome = match tokio::time::timeout(limit, self.run(&request)).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout {
                secs: self.config.pipeline_timeout_secs,
            }),
        };

        match outcome {
            Ok(receipt) => {
                record_send_outcome("success");
                tracing::info!(
                    txid = %receipt.txid,
                    fee = receipt.fee_sats,
                    amount = receipt.amount_sats,
                    "Send completed"
                );
                self.set_state(SendState::Success {
                    txid: receipt.txid.clone(),
                });
                Ok(Some(receipt))
            }
            Err(error) => {
                record_send_outcome(error.cause());
                let can_retry = error.can_retry();
                tracing::error!(
                    cause = error.cause(),
                    can_retry,
                    error = %error,
                    "Send failed"
                );
                self.set_state(SendState::Error {
                    error: error.clone(),
                    can_retry,
                });
                Err(error)
            }
        }
    }

    /// Re-run the last request from validation. Only valid in the error state.
    pub async fn retry(&self) -> WalletResult<Option<SendReceipt>> {
        if !matches!(*self.state.borrow(), SendState::Error { .. }) {
            return Ok(None);
        }
        let request = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match request {
            Some(request) => self.execute_transaction(request).await,
            None => Ok(None),
        }
    }

    /// Return to idle from a terminal state.
    pub fn reset(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, SendState::Success { .. } | SendState::Error { .. }) {
                *state = SendState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn try_begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_busy() {
                false
            } else {
                *state = SendState::Validating;
                true
            }
        })
    }

    fn set_state(&self, next: SendState) {
        tracing::info!(state = next.name(), "Send state changed");
        self.state.send_replace(next);
    }

    async fn run(&self, request: &SendRequest) -> WalletResult<SendReceipt> {
        let prepared = self.validate(request).await?;

        self.set_state(SendState::Building);
        let (selection, guard) = self.select_and_reserve(request, &prepared).await?;
        let unsigned = self.builder.build(
            &selection,
            &prepared.outputs,
            &request.change_address,
            prepared.fee_rate,
        )?;

        self.set_state(SendState::Signing);
        let signed = self.sign(&unsigned, &request.key).await?;

        self.set_state(SendState::Broadcasting);
        let txid = self.broadcast(&signed).await?;

        let inputs = guard.outpoints().to_vec();
        guard.hold_for(Duration::from_secs(self.config.spent_hold_secs));
        for source in &request.sources {
            self.explorer.invalidate_utxos(&source.address);
        }

        Ok(SendReceipt {
            txid,
            amount_sats: request.amount_sats,
            fee_sats: unsigned.estimated_fee,
            fee_rate: prepared.fee_rate,
            fee_source: prepared.fee_source,
            estimated_vbytes: unsigned.estimated_vbytes,
            change_sats: selection.change_sats,
            inputs,
        })
    }

    async fn validate(&self, request: &SendRequest) -> WalletResult<Prepared> {
        let network = self.explorer.network();
        let recipient = parse_address(&request.recipient, network)?;
        validate_amount(
            request.amount_sats,
            self.config.dust_threshold,
            self.config.max_amount_sats,
        )?;
        if request.sources.is_empty() {
            return Err(ValidationError::NoSourceAddresses.into());
        }
        if request.change_address.trim().is_empty() {
            return Err(ValidationError::MissingChangeAddress.into());
        }
        let change = parse_address(&request.change_address, network)?;

        let (fee_rate, fee_source) = match request.fee_rate {
            FeeRateChoice::Explicit(rate) => (rate, None),
            FeeRateChoice::Target(target) => {
                let (estimates, source) = self.explorer.fee_estimates().await;
                (estimates.rate_for(target), Some(source))
            }
        };
        validate_fee_rate(fee_rate, self.config.max_fee_rate)?;

        let prefer = request
            .sources
            .first()
            .map(|s| s.address_type)
            .unwrap_or(AddressType::NativeSegwit);

        Ok(Prepared {
            outputs: vec![TxOutput {
                address: request.recipient.trim().to_string(),
                value_sats: request.amount_sats,
            }],
            policy: SelectionPolicy {
                prefer_address_type: Some(prefer),
                include_unconfirmed: request.include_unconfirmed,
                minimize_input_count: true,
                recipient_outputs: vec![output_kind_for(&recipient)],
                change_output: output_kind_for(&change),
                dust_threshold: self.config.dust_threshold,
            },
            fee_rate,
            fee_source,
        })
    }

    async fn fetch_utxos(&self, sources: &[WalletAddress]) -> WalletResult<Vec<Utxo>> {
        let fetches = sources.iter().map(|s| self.explorer.address_utxos(&s.address));
        let (per_address, tip) = tokio::join!(try_join_all(fetches), self.explorer.tip_height());
        let per_address = per_address?;

        let tip = match tip {
            Ok(height) => Some(height),
            Err(e) => {
                tracing::warn!(error = %e, "Tip height unavailable, confirmations approximated");
                None
            }
        };

        let utxos = sources
            .iter()
            .zip(per_address)
            .flat_map(|(source, found)| {
                found
                    .into_iter()
                    .map(move |u| annotate(source, u, tip))
            })
            .collect();
        Ok(utxos)
    }

    async fn select_and_reserve(
        &self,
        request: &SendRequest,
        prepared: &Prepared,
    ) -> WalletResult<(SelectionResult, ReservationGuard)> {
        let snapshot = self.fetch_utxos(&request.sources).await?;
        if snapshot.is_empty() {
            return Err(WalletError::NoUtxos);
        }

        let mut candidates: Vec<Utxo> = snapshot
            .into_iter()
            .filter(|u| !self.reservations.is_reserved(&u.outpoint()))
            .collect();

        for _ in 0..RESERVE_ATTEMPTS {
            let Some(selection) = select_utxos(
                &candidates,
                request.amount_sats,
                prepared.fee_rate,
                &prepared.policy,
            ) else {
                let (required, available) = shortfall(
                    &candidates,
                    request.amount_sats,
                    prepared.fee_rate,
                    &prepared.policy,
                );
                return Err(WalletError::InsufficientFunds {
                    required,
                    available,
                });
            };

            let outpoints: Vec<OutPoint> =
                selection.selected_utxos.iter().map(Utxo::outpoint).collect();
            match self.reservations.reserve(&outpoints) {
                Ok(guard) => {
                    tracing::debug!(
                        attempt = %guard.attempt(),
                        inputs = outpoints.len(),
                        fee = selection.fee_sats,
                        change = selection.change_sats,
                        "Selected inputs"
                    );
                    return Ok((selection, guard));
                }
                Err(conflicts) => {
                    tracing::debug!(conflicts = conflicts.len(), "Inputs taken by a concurrent send, reselecting");
                    candidates.retain(|u| !conflicts.contains(&u.outpoint()));
                }
            }
        }

        Err(WalletError::build(
            BuildStage::Build,
            "could not reserve inputs; another send is using them",
        ))
    }

    async fn sign(&self, unsigned: &UnsignedTransaction, key: &KeyHandle) -> WalletResult<String> {
        let signed = self.signer.sign(unsigned, key).await.map_err(|e| match e {
            SignerError::KeyUnavailable(reason) => WalletError::Security(reason),
            SignerError::Rejected(reason) => WalletError::build(BuildStage::Sign, reason),
        })?;

        let signed = signed.trim().to_string();
        if signed.is_empty() || hex::decode(&signed).is_err() {
            return Err(WalletError::build(
                BuildStage::Sign,
                "signer returned an invalid transaction encoding",
            ));
        }
        Ok(signed)
    }

    async fn broadcast(&self, signed_hex: &str) -> WalletResult<String> {
        self.explorer
            .broadcast(signed_hex)
            .await
            .map_err(|e| match e {
                ClientError::Http { status, body, .. }
                    if (400..500).contains(&status) && status != 429 =>
                {
                    WalletError::build(BuildStage::Broadcast, format!("rejected by network: {}", body))
                }
                other => other.into(),
            })
    }
}

impl std::fmt::Debug for SendOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendOrchestrator")
            .field("network", &self.explorer.network())
            .field("state", &self.state.borrow().name())
            .finish_non_exhaustive()
    }
}

fn annotate(source: &WalletAddress, utxo: ExplorerUtxo, tip: Option<u64>) -> Utxo {
    let confirmations = match tip {
        Some(tip) => utxo.status.confirmations(tip),
        None => u32::from(utxo.status.confirmed),
    };
    Utxo {
        txid: utxo.txid,
        vout: utxo.vout,
        value_sats: utxo.value,
        confirmations,
        address: source.address.clone(),
        derivation_path: source.derivation_path.clone(),
        address_type: source.address_type,
        public_key: source.public_key.clone(),
    }
}
