//! Mine-event reconciliation pipeline
//!
//! Turns mining attempts observed on-chain into proof-backed `SeismicCall`
//! transactions. Each attempt moves through
//! `Observed → Validated → Proved → Submitted → Completed` and can drop out
//! at any stage; a dropped attempt never takes its stream down with it.

use alloy_primitives::{Address, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ChainError, ExtractError, ProofGenerationError};
use crate::gateway::{
    area, fixed, ChainGateway, ChainLog, ContractCall, EventFilter, NewExtension,
};
use crate::prover::ProofGenerator;
use crate::store::ClaimStore;
use crate::types::{CircuitInputs, Groth16ProofCalldata, VoxelArea, VoxelPosition};

/// What "claimed" means for this deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// One static map region. Positions are checked against the box, proven
    /// relative to its corner and deduplicated locally.
    FixedBounds {
        corner: VoxelPosition,
        extent: VoxelArea,
    },
    /// Each game contract reports its own area with every event. The
    /// contract is the only duplicate authority.
    PerGameArea,
}

impl ClaimPolicy {
    /// Mine event emitted by game contracts under this policy
    pub fn mine_event(&self) -> EventFilter {
        match self {
            ClaimPolicy::FixedBounds { .. } => EventFilter::of::<fixed::Mine>(),
            ClaimPolicy::PerGameArea => EventFilter::of::<area::Mine>(),
        }
    }

    /// Offset of `position` from the corner, or `None` when it lies outside
    /// the box. Bounds are inclusive of the corner and exclusive of
    /// `corner + extent`.
    fn offset_within(
        corner: VoxelPosition,
        extent: VoxelArea,
        position: VoxelPosition,
    ) -> Option<VoxelPosition> {
        let axis = |p: i32, c: i32, size: u32| -> Option<i32> {
            let offset = i64::from(p) - i64::from(c);
            if offset >= 0 && offset < i64::from(size) {
                i32::try_from(offset).ok()
            } else {
                None
            }
        };

        Some(VoxelPosition::new(
            axis(position.x, corner.x, extent.size_x)?,
            axis(position.y, corner.y, extent.size_y)?,
            axis(position.z, corner.z, extent.size_z)?,
        ))
    }
}

/// Fields pulled out of a mine event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MineAttempt {
    pub player: Address,
    pub position: VoxelPosition,
    pub area: Option<(VoxelArea, U256)>,
}

impl MineAttempt {
    pub fn extract(log: &ChainLog, policy: &ClaimPolicy) -> Result<Self, ExtractError> {
        match policy {
            ClaimPolicy::FixedBounds { .. } => {
                let event: fixed::Mine = log.decode()?;
                Ok(Self {
                    player: event.player,
                    position: VoxelPosition::new(event.x, event.y, event.z),
                    area: None,
                })
            }
            ClaimPolicy::PerGameArea => {
                let event: area::Mine = log.decode()?;
                Ok(Self {
                    player: event.player,
                    position: VoxelPosition::new(event.x, event.y, event.z),
                    area: Some((
                        VoxelArea::new(event.sizeX, event.sizeY, event.sizeZ),
                        event.gameStartBlock,
                    )),
                })
            }
        }
    }
}

/// Why an attempt left the pipeline early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingField,
    OutOfBounds,
    AlreadyClaimed,
    ProofFailed,
    SimulationFailed,
    SubmissionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { score: Option<String> },
    Dropped(DropReason),
}

#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    observed: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    proofs_failed: AtomicU64,
    chain_failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerStats {
    pub watched_contracts: usize,
    pub claimed_positions: usize,
    pub observed: u64,
    pub completed: u64,
    pub rejected: u64,
    pub proofs_failed: u64,
    pub chain_failed: u64,
}

/// Game contracts with a live mine watcher
#[derive(Default)]
pub struct ContractRegistry {
    watchers: Mutex<HashMap<Address, JoinHandle<()>>>,
}

impl ContractRegistry {
    /// Track a watcher for `contract`. Returns false, leaving the existing
    /// watcher in place, if the contract is already registered.
    pub fn register(&self, contract: Address, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut watchers = self.lock();
        if watchers.contains_key(&contract) {
            return false;
        }
        watchers.insert(contract, spawn());
        true
    }

    /// Stop watching `contract`
    pub fn remove(&self, contract: &Address) -> bool {
        match self.lock().remove(contract) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, contract: &Address) -> bool {
        self.lock().contains_key(contract)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Address, JoinHandle<()>>> {
        self.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Reconciler<P, G> {
    policy: ClaimPolicy,
    store: Arc<ClaimStore>,
    prover: P,
    gateway: G,
    registry: ContractRegistry,
    metrics: ReconcileMetrics,
}

impl<P: ProofGenerator, G: ChainGateway> Reconciler<P, G> {
    pub fn new(policy: ClaimPolicy, store: Arc<ClaimStore>, prover: P, gateway: G) -> Self {
        info!("Reconciler running with {:?}", policy);
        Self {
            policy,
            store,
            prover,
            gateway,
            registry: ContractRegistry::default(),
            metrics: ReconcileMetrics::default(),
        }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            watched_contracts: self.registry.len(),
            claimed_positions: self.store.mined_count(),
            observed: self.metrics.observed.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            proofs_failed: self.metrics.proofs_failed.load(Ordering::Relaxed),
            chain_failed: self.metrics.chain_failed.load(Ordering::Relaxed),
        }
    }

    /// Register the known game contracts, then follow discovery events for
    /// the life of the process. Only returns if the discovery stream cannot
    /// be opened or closes.
    pub async fn run(self: Arc<Self>, initial_contracts: Vec<Address>) -> Result<(), ChainError> {
        for contract in initial_contracts {
            self.register_contract(contract);
        }

        let mut discovery = self.gateway.watch_discovery_events().await?;
        info!("Listening for new game contracts");

        while let Some(batch) = discovery.recv().await {
            for log in batch {
                match log.decode::<NewExtension>() {
                    Ok(event) => {
                        info!("New game contract {}", event.contractAddress);
                        self.register_contract(event.contractAddress);
                    }
                    Err(e) => error!("Dropping discovery log from {}: {}", log.address, e),
                }
            }
        }

        Err(ChainError::Watch("discovery stream closed".to_string()))
    }

    /// Start watching mine events on `contract`. Returns false if it is
    /// already watched.
    pub fn register_contract(self: &Arc<Self>, contract: Address) -> bool {
        let this = Arc::clone(self);
        let added = self
            .registry
            .register(contract, || tokio::spawn(this.watch_contract(contract)));
        if !added {
            debug!("Contract {} already watched", contract);
        }
        added
    }

    async fn watch_contract(self: Arc<Self>, contract: Address) {
        let mut stream = match self.gateway.watch_mine_events(contract).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to watch mine events on {}: {}", contract, e);
                return;
            }
        };

        info!("Watching mine events on {}", contract);
        while let Some(batch) = stream.recv().await {
            for log in batch {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.handle_mine_log(contract, log).await;
                });
            }
        }
        warn!("Mine event stream for {} closed", contract);
    }

    /// Run one mining attempt through the whole pipeline
    pub async fn handle_mine_log(&self, contract: Address, log: ChainLog) -> Outcome {
        self.metrics.observed.fetch_add(1, Ordering::Relaxed);

        let attempt = match MineAttempt::extract(&log, &self.policy) {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(
                    "Dropping mine event on {} (tx {:?}): {}",
                    contract, log.transaction_hash, e
                );
                return self.reject(DropReason::MissingField);
            }
        };

        let outcome = self.process(contract, &attempt).await;
        if let Outcome::Completed { score } = &outcome {
            info!(
                "Player {} mined at {}, received {} points",
                attempt.player,
                attempt.position,
                score.as_deref().unwrap_or("no")
            );
        }
        outcome
    }

    async fn process(&self, contract: Address, attempt: &MineAttempt) -> Outcome {
        let seed = self.store.seed();
        // Fixed-bounds attempts prove and claim the offset from the corner
        let (inputs, reservation) = match (self.policy, attempt.area) {
            (ClaimPolicy::FixedBounds { corner, extent }, _) => {
                let Some(offset) = ClaimPolicy::offset_within(corner, extent, attempt.position)
                else {
                    debug!("Position {} outside map bounds", attempt.position);
                    return self.reject(DropReason::OutOfBounds);
                };
                let Some(reservation) = self.store.begin_claim(&offset) else {
                    debug!("Position {} already claimed", attempt.position);
                    return self.reject(DropReason::AlreadyClaimed);
                };
                let inputs = CircuitInputs::new(offset, seed.seed(), seed.seed_commitment());
                (inputs, Some(reservation))
            }
            (ClaimPolicy::PerGameArea, Some((area, game_start_block))) => {
                let inputs =
                    CircuitInputs::new(attempt.position, seed.seed(), seed.seed_commitment())
                        .with_area(area, game_start_block);
                (inputs, None)
            }
            (ClaimPolicy::PerGameArea, None) => return self.reject(DropReason::MissingField),
        };
        let position = reservation
            .as_ref()
            .map_or(attempt.position, |reservation| reservation.position());

        // An unfinished reservation is released when it goes out of scope
        let proof = match self.prover.generate_proof(&inputs).await {
            Ok(proof) => proof,
            Err(e) => return self.proof_failed(attempt, &inputs, e),
        };

        // Marked before submission; a failed transaction leaves it marked.
        if let Some(reservation) = reservation {
            reservation.commit();
        }

        match self.submit(contract, attempt.player, position, &proof).await {
            Ok(()) => {
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
                Outcome::Completed {
                    score: proof.score().map(str::to_string),
                }
            }
            Err((reason, e)) => {
                self.metrics.chain_failed.fetch_add(1, Ordering::Relaxed);
                error!("Error calling SeismicCall on {}: {}", contract, e);
                error!(
                    "Function inputs: player {}, position {}, proof {:?}, public signals {:?}",
                    attempt.player, position, proof.proof, proof.public_signals
                );
                Outcome::Dropped(reason)
            }
        }
    }

    async fn submit(
        &self,
        contract: Address,
        player: Address,
        position: VoxelPosition,
        proof: &Groth16ProofCalldata,
    ) -> Result<(), (DropReason, ChainError)> {
        let call = ContractCall::seismic_call(contract, player, position, proof)
            .map_err(|e| (DropReason::SimulationFailed, e))?;

        let prepared = self
            .gateway
            .prepare_transaction(call)
            .await
            .map_err(|e| (DropReason::SimulationFailed, e))?;

        let receipt = self
            .gateway
            .submit_transaction(prepared)
            .await
            .map_err(|e| (DropReason::SubmissionFailed, e))?;

        debug!(
            "SeismicCall {} included in block {:?}",
            receipt.transaction_hash, receipt.block_number
        );
        Ok(())
    }

    fn proof_failed(
        &self,
        attempt: &MineAttempt,
        inputs: &CircuitInputs,
        e: ProofGenerationError,
    ) -> Outcome {
        self.metrics.proofs_failed.fetch_add(1, Ordering::Relaxed);
        error!(
            "Error proving circuit for player {} at {}: {}; inputs {:?}",
            attempt.player,
            attempt.position,
            e,
            inputs.redacted()
        );
        Outcome::Dropped(DropReason::ProofFailed)
    }

    fn reject(&self, reason: DropReason) -> Outcome {
        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        Outcome::Dropped(reason)
    }
}
