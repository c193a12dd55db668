//! btc-send command line.
//!
//! Read-only explorer queries plus transaction planning and raw broadcast.
//! Signing stays outside this tool: `plan` prints an unsigned PSBT for an
//! external signer, and `broadcast` relays the signed hex it returns.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use btc_send::config::loader::load_config;
use btc_send::config::{NetworkKind, WalletConfig};
use btc_send::explorer::types::FeeTarget;
use btc_send::explorer::{ExplorerApi, ResilientClient};
use btc_send::observability::{logging, metrics};
use btc_send::wallet::confirm::ConfirmationMonitor;
use btc_send::wallet::selection::{select_utxos, shortfall, SelectionPolicy};
use btc_send::wallet::types::{AddressType, TxOutput, Utxo};
use btc_send::wallet::validation::{
    output_kind_for, parse_address, validate_amount, validate_fee_rate,
};
use btc_send::wallet::TransactionBuilder;

#[derive(Parser)]
#[command(name = "btc-send")]
#[command(about = "Bitcoin send wallet tooling over public block explorers", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured network
    #[arg(short, long)]
    network: Option<NetworkKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show endpoint and circuit breaker state
    Status,
    /// Show normalized fee estimates
    Fees,
    /// List unspent outputs of an address
    Utxos { address: String },
    /// List transactions of an address
    Txs { address: String },
    /// Show a transaction and its confirmation status
    Tx {
        txid: String,
        /// Wait up to this many seconds for confirmation
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Select inputs and print the unsigned transaction and PSBT
    Plan {
        /// Address to spend from
        #[arg(long)]
        from: String,
        #[arg(long, default_value = "native_segwit")]
        address_type: AddressType,
        #[arg(long)]
        to: String,
        /// Amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Explicit fee rate in sat/vB
        #[arg(long, conflicts_with = "target")]
        fee_rate: Option<f64>,
        /// Fee target: fastest, half_hour, hour, economy, minimum
        #[arg(long, default_value = "half_hour")]
        target: FeeTarget,
        /// Change address, defaults to the source address
        #[arg(long)]
        change: Option<String>,
        #[arg(long)]
        include_unconfirmed: bool,
    },
    /// Broadcast a signed raw transaction
    Broadcast { hex: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WalletConfig::default(),
    };
    if let Some(network) = cli.network {
        config.network = network;
    }

    if let Err(e) = logging::init_logging(&config.observability.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    tracing::info!(
        network = %config.network,
        endpoints = config.effective_endpoints().len(),
        "btc-send v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let client = ResilientClient::from_config(&config)?;
    let api = ExplorerApi::new(client, config.network, config.cache.clone());

    match cli.command {
        Commands::Status => {
            match api.tip_height().await {
                Ok(height) => println!("tip height: {}", height),
                Err(e) => println!("tip height: unavailable ({})", e),
            }
            for health in api.client().endpoint_health() {
                let (open, failures) = health
                    .circuit
                    .as_ref()
                    .map(|c| (c.is_open, c.failure_count))
                    .unwrap_or((false, 0));
                println!(
                    "{:<12} priority={} domain={} circuit={} failures={} queued={}",
                    health.name,
                    health.priority,
                    health.domain,
                    if open { "open" } else { "closed" },
                    failures,
                    health.queued
                );
            }
        }
        Commands::Fees => {
            let (fees, source) = api.fee_estimates().await;
            print_json(&serde_json::json!({ "source": source, "estimates": fees }))?;
        }
        Commands::Utxos { address } => {
            parse_address(&address, config.network)?;
            print_json(&api.address_utxos(&address).await?)?;
        }
        Commands::Txs { address } => {
            parse_address(&address, config.network)?;
            print_json(&api.address_transactions(&address).await?)?;
        }
        Commands::Tx { txid, wait } => {
            print_json(&api.transaction(&txid).await?)?;
            let monitor = ConfirmationMonitor::new(
                api.clone(),
                1,
                Duration::from_secs(config.send.confirmation_poll_secs),
            );
            let status = match wait {
                Some(secs) => {
                    monitor
                        .wait_for_confirmation(&txid, Duration::from_secs(secs))
                        .await
                }
                None => monitor.check(&txid).await?,
            };
            print_json(&status)?;
        }
        Commands::Plan {
            from,
            address_type,
            to,
            amount,
            fee_rate,
            target,
            change,
            include_unconfirmed,
        } => {
            let recipient = parse_address(&to, config.network)?;
            parse_address(&from, config.network)?;
            let change = change.unwrap_or_else(|| from.clone());
            let change_kind = output_kind_for(&parse_address(&change, config.network)?);
            validate_amount(amount, config.send.dust_threshold, config.send.max_amount_sats)?;

            let rate = match fee_rate {
                Some(rate) => rate,
                None => api.fee_estimates().await.0.rate_for(target),
            };
            validate_fee_rate(rate, config.send.max_fee_rate)?;

            let tip = api.tip_height().await.ok();
            let utxos: Vec<Utxo> = api
                .address_utxos(&from)
                .await?
                .into_iter()
                .map(|u| Utxo {
                    confirmations: match tip {
                        Some(tip) => u.status.confirmations(tip),
                        None => u32::from(u.status.confirmed),
                    },
                    txid: u.txid,
                    vout: u.vout,
                    value_sats: u.value,
                    address: from.clone(),
                    derivation_path: String::new(),
                    address_type,
                    public_key: String::new(),
                })
                .collect();

            let policy = SelectionPolicy {
                prefer_address_type: Some(address_type),
                include_unconfirmed,
                minimize_input_count: true,
                recipient_outputs: vec![output_kind_for(&recipient)],
                change_output: change_kind,
                dust_threshold: config.send.dust_threshold,
            };
            let Some(selection) = select_utxos(&utxos, amount, rate, &policy) else {
                let (required, available) = shortfall(&utxos, amount, rate, &policy);
                return Err(format!(
                    "insufficient funds: need {} sats, have {} sats",
                    required, available
                )
                .into());
            };

            let outputs = vec![TxOutput {
                address: to.clone(),
                value_sats: amount,
            }];
            let unsigned = TransactionBuilder::new(config.network, config.send.dust_threshold)
                .build(&selection, &outputs, &change, rate)?;

            print_json(&serde_json::json!({
                "transaction": unsigned,
                "psbt": unsigned.to_psbt_hex(config.network)?,
            }))?;
        }
        Commands::Broadcast { hex } => {
            let txid = api.broadcast(&hex).await?;
            println!("{}", txid);
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
