//! Treasure map seed and its Poseidon commitment

use alloy_primitives::U256;
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::SeedError;

/// On-disk seed file. Older tools only wrote the seed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedFile {
    seed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed_commitment: Option<String>,
}

/// The secret seed and the commitment published on-chain
#[derive(Clone)]
pub struct SeedRecord {
    seed: U256,
    seed_commitment: String,
}

impl std::fmt::Debug for SeedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedRecord")
            .field("seed", &"<redacted>")
            .field("seed_commitment", &self.seed_commitment)
            .finish()
    }
}

impl SeedRecord {
    /// Build a record, deriving the commitment from the seed
    pub fn from_seed(seed: U256) -> Result<Self, SeedError> {
        let seed_commitment = commit(seed)?;
        Ok(Self { seed, seed_commitment })
    }

    /// Load a seed file. A commitment stored in the file must match the one
    /// derived from the seed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: SeedFile = serde_json::from_str(&contents)?;

        let seed = U256::from_str(file.seed.trim())
            .map_err(|e| SeedError::InvalidSeed(format!("{}: {}", file.seed, e)))?;
        let record = Self::from_seed(seed)?;

        if let Some(stored) = file.seed_commitment {
            if stored.trim() != record.seed_commitment {
                return Err(SeedError::CommitmentMismatch {
                    stored,
                    derived: record.seed_commitment,
                });
            }
        }

        info!("Loaded seed with commitment {}", record.seed_commitment);
        Ok(record)
    }

    /// Sample a fresh 256-bit seed
    pub fn generate() -> Result<Self, SeedError> {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        Self::from_seed(U256::from_be_bytes(bytes))
    }

    /// Write the record in the full seed file shape
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SeedError> {
        let path = path.as_ref();
        let file = SeedFile {
            seed: self.seed.to_string(),
            seed_commitment: Some(self.seed_commitment.clone()),
        };
        std::fs::write(path, serde_json::to_string(&file)?).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn seed(&self) -> U256 {
        self.seed
    }

    pub fn seed_commitment(&self) -> &str {
        &self.seed_commitment
    }
}

/// Circom-compatible Poseidon hash of a single input, as a decimal string.
/// The seed is reduced into the BN254 scalar field first.
pub fn commit(seed: U256) -> Result<String, SeedError> {
    let input = Fr::from_be_bytes_mod_order(&seed.to_be_bytes::<32>());
    let mut poseidon =
        Poseidon::<Fr>::new_circom(1).map_err(|e| SeedError::Hash(e.to_string()))?;
    let hash = poseidon
        .hash(&[input])
        .map_err(|e| SeedError::Hash(e.to_string()))?;

    let commitment = U256::from_be_slice(&hash.into_bigint().to_bytes_be()).to_string();
    debug!("Derived seed commitment {}", commitment);
    Ok(commitment)
}
