//! In-memory prover and gateway for exercising the reconciler without a
//! chain or a circuit.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{ChainError, ProofGenerationError};
use crate::gateway::{
    ChainGateway, ChainLog, ContractCall, LogStream, PreparedTransaction, TransactionReceipt,
};
use crate::prover::ProofGenerator;
use crate::types::{CircuitInputs, Groth16ProofCalldata};

/// Canned proof whose first public signal (the score) is 9
pub fn canned_proof() -> Groth16ProofCalldata {
    let raw: Vec<U256> = (1u64..=9).map(U256::from).collect();
    Groth16ProofCalldata::from_raw(&raw)
}

#[derive(Default)]
struct MockProverState {
    calls: Mutex<Vec<CircuitInputs>>,
    fail: AtomicBool,
    truncated: AtomicBool,
}

/// Records every request and returns [`canned_proof`], or fails on demand.
/// In truncated mode it hands back calldata too short for a proof, which
/// panics the way a broken adapter would.
/// Each call yields once so concurrent attempts interleave.
#[derive(Clone, Default)]
pub struct MockProver {
    inner: Arc<MockProverState>,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let prover = Self::default();
        prover.set_failing(true);
        prover
    }

    pub fn set_failing(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_truncated(&self, truncated: bool) {
        self.inner.truncated.store(truncated, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CircuitInputs> {
        self.inner.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofGenerator for MockProver {
    async fn generate_proof(
        &self,
        inputs: &CircuitInputs,
    ) -> Result<Groth16ProofCalldata, ProofGenerationError> {
        self.inner.calls.lock().unwrap().push(inputs.clone());
        tokio::task::yield_now().await;

        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(ProofGenerationError::ProverFailed {
                status: "exit status: 1".to_string(),
                stderr: "constraint doesn't match".to_string(),
            });
        }
        if self.inner.truncated.load(Ordering::SeqCst) {
            return Ok(Groth16ProofCalldata::from_raw(&[U256::from(1u64); 7]));
        }
        Ok(canned_proof())
    }
}

#[derive(Default)]
struct MockGatewayState {
    discovery: Mutex<Option<mpsc::Sender<Vec<ChainLog>>>>,
    mine: Mutex<HashMap<Address, mpsc::Sender<Vec<ChainLog>>>>,
    prepared: Mutex<Vec<ContractCall>>,
    submitted: Mutex<Vec<PreparedTransaction>>,
    fail_watch: AtomicBool,
    fail_simulation: AtomicBool,
    fail_submission: AtomicBool,
}

/// Gateway whose event streams are fed by the test and which records every
/// simulated and submitted call
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<MockGatewayState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_watch(&self) {
        self.inner.fail_watch.store(true, Ordering::SeqCst);
    }

    pub fn fail_simulation(&self) {
        self.inner.fail_simulation.store(true, Ordering::SeqCst);
    }

    pub fn fail_submission(&self) {
        self.inner.fail_submission.store(true, Ordering::SeqCst);
    }

    pub fn prepared(&self) -> Vec<ContractCall> {
        self.inner.prepared.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<PreparedTransaction> {
        self.inner.submitted.lock().unwrap().clone()
    }

    pub fn is_watching(&self, contract: &Address) -> bool {
        self.inner.mine.lock().unwrap().contains_key(contract)
    }

    pub fn has_discovery_subscriber(&self) -> bool {
        self.inner.discovery.lock().unwrap().is_some()
    }

    pub async fn emit_discovery(&self, batch: Vec<ChainLog>) {
        let sender = self.inner.discovery.lock().unwrap().clone();
        sender
            .expect("no discovery subscriber")
            .send(batch)
            .await
            .expect("discovery receiver dropped");
    }

    pub async fn emit_mine(&self, contract: Address, batch: Vec<ChainLog>) {
        let sender = self.inner.mine.lock().unwrap().get(&contract).cloned();
        sender
            .expect("no mine subscriber")
            .send(batch)
            .await
            .expect("mine receiver dropped");
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn watch_discovery_events(&self) -> Result<LogStream, ChainError> {
        let (tx, rx) = mpsc::channel(16);
        *self.inner.discovery.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn watch_mine_events(&self, contract: Address) -> Result<LogStream, ChainError> {
        if self.inner.fail_watch.load(Ordering::SeqCst) {
            return Err(ChainError::Watch("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.inner.mine.lock().unwrap().insert(contract, tx);
        Ok(rx)
    }

    async fn prepare_transaction(
        &self,
        call: ContractCall,
    ) -> Result<PreparedTransaction, ChainError> {
        self.inner.prepared.lock().unwrap().push(call.clone());
        if self.inner.fail_simulation.load(Ordering::SeqCst) {
            return Err(ChainError::Simulation("execution reverted".to_string()));
        }
        Ok(PreparedTransaction {
            call,
            gas_limit: 500_000,
            gas_price: 1,
        })
    }

    async fn submit_transaction(
        &self,
        tx: PreparedTransaction,
    ) -> Result<TransactionReceipt, ChainError> {
        tokio::task::yield_now().await;
        if self.inner.fail_submission.load(Ordering::SeqCst) {
            return Err(ChainError::Submission("nonce too low".to_string()));
        }
        let mut submitted = self.inner.submitted.lock().unwrap();
        submitted.push(tx);
        Ok(TransactionReceipt {
            transaction_hash: B256::with_last_byte(submitted.len() as u8),
            block_number: Some(100 + submitted.len() as u64),
        })
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
