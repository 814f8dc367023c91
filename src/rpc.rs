//! Ethereum JSON-RPC implementation of the chain gateway

use alloy_primitives::{Address, Bytes, LogData, B256, U256, U64};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::ChainError;
use crate::gateway::{
    ChainGateway, ChainLog, ContractCall, EventFilter, LogStream, NewExtension,
    PreparedTransaction, TransactionReceipt,
};
use crate::signer::{TransactionRequest, TransactionSigner};

/// Batches buffered per subscription before the poller waits on the consumer
const STREAM_BUFFER: usize = 64;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<B256>,
    #[serde(default)]
    removed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: Option<U64>,
    status: Option<U64>,
}

/// Minimal JSON-RPC client over HTTP
#[derive(Clone)]
pub struct RpcClient {
    endpoint: String,
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
    max_retries: u32,
    retry_delay: Duration,
}

impl RpcClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::builder().timeout(request_timeout).build()?,
            next_id: Arc::new(AtomicU64::new(1)),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Execute a read with retry on transport failures. Errors reported by
    /// the node itself are returned immediately.
    async fn request_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.request::<T>(method, params.clone()).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", method, attempt);
                    }
                    return Ok(result);
                }
                Err(e @ ChainError::Rpc(_)) => {
                    warn!("{} failed on attempt {}: {}", method, attempt, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < self.max_retries {
                let delay = self.retry_delay * attempt;
                debug!("Waiting {:?} before retry...", delay);
                sleep(delay).await;
            }
        }

        error!("{} failed after {} attempts", method, self.max_retries);
        Err(last_error.unwrap_or_else(|| ChainError::Rpc("All retry attempts failed".to_string())))
    }

    /// Execute a single JSON-RPC call
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChainError::Rpc(format!("HTTP error ({}): {}", status, error_text)));
        }

        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            let message = match error.data {
                Some(data) => format!("{} ({})", error.message, data),
                None => error.message,
            };
            return Err(ChainError::Node {
                code: error.code,
                message,
            });
        }

        Ok(serde_json::from_value(response.result)?)
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let id: U64 = self.request_with_retry("eth_chainId", serde_json::json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let number: U64 = self
            .request_with_retry("eth_blockNumber", serde_json::json!([]))
            .await?;
        Ok(number.to::<u64>())
    }

    async fn get_logs(
        &self,
        address: Option<Address>,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RpcLog>, ChainError> {
        let mut filter = serde_json::json!({
            "fromBlock": U64::from(from_block),
            "toBlock": U64::from(to_block),
            "topics": [topic],
        });
        if let Some(address) = address {
            filter["address"] = serde_json::json!(address);
        }
        self.request_with_retry("eth_getLogs", serde_json::json!([filter]))
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RpcGatewayOptions {
    /// Only accept discovery events from this contract; any emitter if unset
    pub discovery_contract: Option<Address>,
    pub mine_event: EventFilter,
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
}

pub struct RpcGateway {
    client: RpcClient,
    signer: TransactionSigner,
    options: RpcGatewayOptions,
    // Held from nonce lookup until broadcast
    nonce_lock: Mutex<()>,
}

impl RpcGateway {
    pub fn new(client: RpcClient, signer: TransactionSigner, options: RpcGatewayOptions) -> Self {
        info!(
            "RPC gateway for {} (sender {}, chain {})",
            client.endpoint,
            signer.address(),
            signer.chain_id()
        );
        Self {
            client,
            signer,
            options,
            nonce_lock: Mutex::new(()),
        }
    }

    async fn watch(
        &self,
        address: Option<Address>,
        event: EventFilter,
    ) -> Result<LogStream, ChainError> {
        let start_block = self
            .client
            .block_number()
            .await
            .map_err(|e| ChainError::Watch(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(poll_logs(
            self.client.clone(),
            address,
            event,
            start_block,
            self.options.poll_interval,
            tx,
        ));

        info!(
            "Watching {} from block {} on {}",
            event.signature,
            start_block,
            address.map_or_else(|| "any contract".to_string(), |a| a.to_string())
        );
        Ok(rx)
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt, ChainError> {
        loop {
            let params = serde_json::json!([hash]);
            let receipt = self
                .client
                .request::<Option<RpcReceipt>>("eth_getTransactionReceipt", params)
                .await;
            match receipt {
                Ok(Some(receipt)) => {
                    let block_number = receipt.block_number.map(|n| n.to::<u64>());
                    if receipt.status == Some(U64::from(1)) {
                        return Ok(TransactionReceipt {
                            transaction_hash: receipt.transaction_hash,
                            block_number,
                        });
                    }
                    return Err(ChainError::Submission(format!(
                        "transaction {} reverted in block {:?}",
                        hash, block_number
                    )));
                }
                Ok(None) => debug!("Transaction {} pending", hash),
                Err(e) => warn!("Failed to fetch receipt for {}: {}", hash, e),
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    async fn watch_discovery_events(&self) -> Result<LogStream, ChainError> {
        self.watch(self.options.discovery_contract, EventFilter::of::<NewExtension>())
            .await
    }

    async fn watch_mine_events(&self, contract: Address) -> Result<LogStream, ChainError> {
        self.watch(Some(contract), self.options.mine_event).await
    }

    async fn prepare_transaction(
        &self,
        call: ContractCall,
    ) -> Result<PreparedTransaction, ChainError> {
        let simulation = |e: ChainError| ChainError::Simulation(e.to_string());
        let params = serde_json::json!({
            "from": self.signer.address(),
            "to": call.contract,
            "data": call.calldata,
        });

        let _: Bytes = self
            .client
            .request("eth_call", serde_json::json!([params, "latest"]))
            .await
            .map_err(simulation)?;
        let gas: U64 = self
            .client
            .request("eth_estimateGas", serde_json::json!([params]))
            .await
            .map_err(simulation)?;
        let gas_price: U256 = self
            .client
            .request_with_retry("eth_gasPrice", serde_json::json!([]))
            .await
            .map_err(simulation)?;

        let gas_limit = gas.to::<u64>().saturating_mul(6) / 5;
        debug!(
            "Simulated {} on {}: gas {} (limit {})",
            call.function_name, call.contract, gas, gas_limit
        );

        Ok(PreparedTransaction {
            call,
            gas_limit,
            gas_price: gas_price.saturating_to::<u128>(),
        })
    }

    async fn submit_transaction(
        &self,
        tx: PreparedTransaction,
    ) -> Result<TransactionReceipt, ChainError> {
        let submission = |e: ChainError| ChainError::Submission(e.to_string());

        let hash = {
            let _guard = self.nonce_lock.lock().await;
            let nonce: U64 = self
                .client
                .request_with_retry(
                    "eth_getTransactionCount",
                    serde_json::json!([self.signer.address(), "pending"]),
                )
                .await
                .map_err(submission)?;

            let raw = self
                .signer
                .sign_transaction(&TransactionRequest {
                    nonce: nonce.to::<u64>(),
                    gas_price: tx.gas_price,
                    gas_limit: tx.gas_limit,
                    to: tx.call.contract,
                    input: tx.call.calldata.clone(),
                })
                .map_err(submission)?;

            // Broadcasts are never retried
            self.client
                .request::<B256>("eth_sendRawTransaction", serde_json::json!([raw]))
                .await
                .map_err(submission)?
        };

        info!("Broadcast {} as {}", tx.call.function_name, hash);

        timeout(self.options.receipt_timeout, self.wait_for_receipt(hash))
            .await
            .map_err(|_| {
                ChainError::Submission(format!(
                    "timed out after {:?} waiting for {}",
                    self.options.receipt_timeout, hash
                ))
            })?
    }
}

/// Poll `eth_getLogs` from `from_block` onwards and forward batches until
/// the receiver goes away
async fn poll_logs(
    client: RpcClient,
    address: Option<Address>,
    event: EventFilter,
    from_block: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<Vec<ChainLog>>,
) {
    let mut next_block = from_block;
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            debug!("Stopping {} watcher, receiver dropped", event.signature);
            return;
        }

        let latest = match client.block_number().await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("Failed to fetch block number: {}", e);
                continue;
            }
        };
        if latest < next_block {
            continue;
        }

        let logs = match client.get_logs(address, event.topic, next_block, latest).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(
                    "Failed to fetch {} logs for blocks {}..={}: {}",
                    event.signature, next_block, latest, e
                );
                continue;
            }
        };
        next_block = latest + 1;

        let batch: Vec<ChainLog> = logs
            .into_iter()
            .filter(|log| !log.removed)
            .map(|log| ChainLog {
                address: log.address,
                block_number: log.block_number.map(|n| n.to::<u64>()),
                transaction_hash: log.transaction_hash,
                data: LogData::new_unchecked(log.topics, log.data),
            })
            .collect();

        if batch.is_empty() {
            continue;
        }
        debug!("Delivering {} {} logs", batch.len(), event.signature);
        if tx.send(batch).await.is_err() {
            return;
        }
    }
}
