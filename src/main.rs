//! Seismic Treasure Hunt listener
//!
//! Watches game contracts for mining attempts, proves each one against the
//! secret treasure seed and credits the player on-chain with a `SeismicCall`.

mod config;
mod error;
mod gateway;
#[cfg(test)]
mod mock;
mod prover;
mod reconciler;
mod rpc;
mod seed;
mod signer;
mod store;
mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::Filter;

use crate::config::Config;
use crate::prover::SnarkjsProver;
use crate::reconciler::{Reconciler, ReconcilerStats};
use crate::rpc::{RpcClient, RpcGateway, RpcGatewayOptions};
use crate::seed::SeedRecord;
use crate::signer::TransactionSigner;
use crate::store::ClaimStore;

type Listener = Reconciler<SnarkjsProver, RpcGateway>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "listener.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new treasure seed and its commitment
    GenerateSeed {
        /// Output file; defaults to SEED_FILE_PATH, then seed.json
        #[arg(short, long)]
        out: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    #[serde(flatten)]
    stats: ReconcilerStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if let Some(Command::GenerateSeed { out }) = args.command {
        return generate_seed(out);
    }

    info!("Starting Seismic Treasure Hunt listener");

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    info!("Configuration loaded successfully");

    let policy = config.claim_policy()?;
    let store = Arc::new(ClaimStore::from_seed_file(&config.seed_file_path)?);
    let prover = SnarkjsProver::new(
        config.snarkjs_bin.clone(),
        config.circuit_wasm_path.clone(),
        config.circuit_zkey_path.clone(),
    );

    let client = RpcClient::new(&config.rpc_url, config.request_timeout())?;
    let chain_id = match config.chain_id {
        Some(chain_id) => chain_id,
        None => client.chain_id().await.context("Failed to query chain id")?,
    };
    let signer = TransactionSigner::new(&config.private_key, chain_id)?;

    let discovery_contract = config.discovery_contract()?;
    if discovery_contract.is_none() {
        warn!("No discovery contract configured; accepting NewExtension from any emitter");
    }
    let gateway = RpcGateway::new(
        client,
        signer,
        RpcGatewayOptions {
            discovery_contract,
            mine_event: policy.mine_event(),
            poll_interval: config.poll_interval(),
            receipt_timeout: config.receipt_timeout(),
        },
    );

    let initial_contracts = config.game_contracts()?;
    let reconciler = Arc::new(Reconciler::new(policy, store, prover, gateway));
    info!("All components initialized successfully");

    let health_server = warp::serve(health_route(Arc::clone(&reconciler), Utc::now()))
        .run(([0, 0, 0, 0], config.health_port));
    info!("Health check server started on port {}", config.health_port);

    tokio::select! {
        _ = health_server => {
            error!("Health server stopped unexpectedly");
        }
        result = reconciler.run(initial_contracts) => {
            if let Err(e) = result {
                error!("Discovery stopped: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn health_route(
    reconciler: Arc<Listener>,
    started_at: DateTime<Utc>,
) -> impl Filter<Extract = (warp::reply::Json,), Error = warp::Rejection> + Clone {
    warp::path!("health").and(warp::get()).map(move || {
        warp::reply::json(&HealthResponse {
            status: "ok",
            started_at,
            stats: reconciler.stats(),
        })
    })
}

fn generate_seed(out: Option<String>) -> Result<()> {
    let path = out
        .or_else(|| std::env::var("SEED_FILE_PATH").ok())
        .unwrap_or_else(|| "seed.json".to_string());

    let record = SeedRecord::generate()?;
    record
        .save(&path)
        .with_context(|| format!("Failed to write seed file {}", path))?;

    info!("Wrote seed to {}", path);
    info!("Seed commitment: {}", record.seed_commitment());
    Ok(())
}
