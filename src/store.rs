//! In-memory record of mined treasure positions

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::SeedError;
use crate::seed::SeedRecord;
use crate::types::VoxelPosition;

#[derive(Default)]
struct ClaimState {
    mined: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Positions already claimed, plus the seed the claims are proven against.
///
/// Nothing here is persisted; a restart forgets every claim.
// TODO: back mined positions with a durable store so restarts keep dedup state
pub struct ClaimStore {
    seed: SeedRecord,
    state: Mutex<ClaimState>,
}

impl ClaimStore {
    pub fn new(seed: SeedRecord) -> Self {
        Self {
            seed,
            state: Mutex::new(ClaimState::default()),
        }
    }

    /// Open a store backed by the seed file at `path`
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        Ok(Self::new(SeedRecord::load(path)?))
    }

    pub fn seed(&self) -> &SeedRecord {
        &self.seed
    }

    pub fn is_already_mined(&self, position: &VoxelPosition) -> bool {
        self.lock().mined.contains(&position.canonical_key())
    }

    /// Record a successful claim. Adding a position twice is a no-op.
    pub fn add_mined_position(&self, position: &VoxelPosition) {
        let key = position.canonical_key();
        let mut state = self.lock();
        state.in_flight.remove(&key);
        if state.mined.insert(key) {
            debug!("Marked {} as mined", position);
        }
    }

    /// Admit a position for proving. Returns `None` if it is already mined
    /// or another attempt holds it. Check and reservation happen under one
    /// lock.
    pub fn begin_claim(&self, position: &VoxelPosition) -> Option<ClaimReservation<'_>> {
        let key = position.canonical_key();
        let mut state = self.lock();
        if state.mined.contains(&key) || state.in_flight.contains(&key) {
            return None;
        }
        state.in_flight.insert(key);
        Some(ClaimReservation {
            store: self,
            position: *position,
            committed: false,
        })
    }

    fn release(&self, position: &VoxelPosition) {
        self.lock().in_flight.remove(&position.canonical_key());
    }

    pub fn mined_count(&self) -> usize {
        self.lock().mined.len()
    }

    fn lock(&self) -> MutexGuard<'_, ClaimState> {
        // No critical section can panic halfway, so a poisoned lock still
        // holds consistent sets.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An admitted position. Dropping it without [`ClaimReservation::commit`],
/// including while a panic unwinds, hands the position back.
pub struct ClaimReservation<'a> {
    store: &'a ClaimStore,
    position: VoxelPosition,
    committed: bool,
}

impl ClaimReservation<'_> {
    pub fn position(&self) -> VoxelPosition {
        self.position
    }

    /// Mark the position mined
    pub fn commit(mut self) {
        self.store.add_mined_position(&self.position);
        self.committed = true;
    }
}

impl Drop for ClaimReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Released claim on {}", self.position);
            self.store.release(&self.position);
        }
    }
}
