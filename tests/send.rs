//! End-to-end send pipeline against a mock explorer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btc_send::config::ProviderKind;
use btc_send::wallet::{
    AddressType, FeeRateChoice, KeyHandle, SendOrchestrator, SendRequest, SendState, Signer,
    SignerError, UnsignedTransaction, WalletAddress, WalletError,
};

mod common;

const SOURCE: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
const RECIPIENT: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
const FUNDING_TXID: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Records what it was asked to sign and returns a fixed encoding.
#[derive(Default)]
struct RecordingSigner {
    seen: Mutex<Vec<UnsignedTransaction>>,
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn sign(
        &self,
        transaction: &UnsignedTransaction,
        key: &KeyHandle,
    ) -> Result<String, SignerError> {
        if key.reference() != "hot-wallet" {
            return Err(SignerError::KeyUnavailable("unknown key".into()));
        }
        self.seen.lock().unwrap().push(transaction.clone());
        Ok("0200000000010100ff".to_string())
    }
}

fn request(amount: u64) -> SendRequest {
    SendRequest {
        recipient: RECIPIENT.to_string(),
        amount_sats: amount,
        fee_rate: FeeRateChoice::Explicit(10.0),
        sources: vec![WalletAddress {
            address: SOURCE.to_string(),
            derivation_path: "m/84'/0'/0'/0/7".to_string(),
            public_key: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
                .to_string(),
            address_type: AddressType::NativeSegwit,
        }],
        change_address: SOURCE.to_string(),
        key: KeyHandle::new("hot-wallet"),
        include_unconfirmed: false,
    }
}

async fn start_node(broadcasts: Arc<Mutex<Vec<String>>>) -> std::net::SocketAddr {
    common::start_programmable_backend(move |request| {
        let broadcasts = broadcasts.clone();
        async move {
            match (request.method.as_str(), request.path.as_str()) {
                ("GET", "/api/blocks/tip/height") => (200, "800010".to_string()),
                ("GET", p) if p == format!("/api/address/{}/utxo", SOURCE) => (
                    200,
                    format!(
                        r#"[{{"txid":"{}","vout":0,"value":100000,"status":{{"confirmed":true,"block_height":800000}}}}]"#,
                        FUNDING_TXID
                    ),
                ),
                ("POST", "/api/tx") => {
                    broadcasts.lock().unwrap().push(request.body);
                    (200, "f".repeat(64))
                }
                _ => (404, "not found".to_string()),
            }
        }
    })
    .await
}

#[tokio::test]
async fn test_send_end_to_end() {
    let broadcasts = Arc::new(Mutex::new(Vec::new()));
    let node = start_node(broadcasts.clone()).await;
    let config = common::config_with(vec![common::endpoint(
        "node",
        node,
        1,
        ProviderKind::Mempool,
    )]);
    let signer = Arc::new(RecordingSigner::default());
    let orchestrator = SendOrchestrator::new(
        common::explorer_api(&config),
        signer.clone(),
        config.send.clone(),
    );

    let receipt = orchestrator
        .execute_transaction(request(60_000))
        .await
        .unwrap()
        .expect("send should run");

    assert_eq!(receipt.txid, "f".repeat(64));
    assert_eq!(receipt.fee_sats, 1410);
    assert_eq!(receipt.change_sats, 38_590);
    assert_eq!(
        orchestrator.state(),
        SendState::Success {
            txid: "f".repeat(64)
        }
    );
    assert_eq!(broadcasts.lock().unwrap().as_slice(), ["0200000000010100ff"]);

    let signed = signer.seen.lock().unwrap();
    assert_eq!(signed.len(), 1);
    assert_eq!(signed[0].inputs[0].derivation_path, "m/84'/0'/0'/0/7");
    assert!(signed[0].to_psbt_hex(config.network).is_ok());
}

#[tokio::test]
async fn test_send_insufficient_funds_end_to_end() {
    let broadcasts = Arc::new(Mutex::new(Vec::new()));
    let node = start_node(broadcasts.clone()).await;
    let config = common::config_with(vec![common::endpoint(
        "node",
        node,
        1,
        ProviderKind::Mempool,
    )]);
    let orchestrator = SendOrchestrator::new(
        common::explorer_api(&config),
        Arc::new(RecordingSigner::default()),
        config.send.clone(),
    );

    let err = orchestrator
        .execute_transaction(request(99_500))
        .await
        .unwrap_err();

    assert!(matches!(err, WalletError::InsufficientFunds { available: 100_000, .. }));
    assert!(err.user_message().contains("insufficient funds"));
    assert!(broadcasts.lock().unwrap().is_empty());
}
