//! Type definitions for the treasure listener

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute or offset coordinate of a single map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Key used by the claim store. Field order is fixed, so structurally
    /// equal positions always share a key.
    pub fn canonical_key(&self) -> String {
        format!("{{\"x\":{},\"y\":{},\"z\":{}}}", self.x, self.y, self.z)
    }
}

impl fmt::Display for VoxelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Extent of a claimable region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoxelArea {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
}

impl VoxelArea {
    pub fn new(size_x: u32, size_y: u32, size_z: u32) -> Self {
        Self { size_x, size_y, size_z }
    }
}

/// Inputs handed to the circuit. Every number is a decimal string since the
/// circuit works over field elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitInputs {
    pub x: String,
    pub y: String,
    pub z: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_z: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_start_block: Option<String>,
    pub seed: String,
    pub seed_commitment: String,
}

impl CircuitInputs {
    pub fn new(position: VoxelPosition, seed: U256, seed_commitment: &str) -> Self {
        Self {
            x: position.x.to_string(),
            y: position.y.to_string(),
            z: position.z.to_string(),
            size_x: None,
            size_y: None,
            size_z: None,
            game_start_block: None,
            seed: seed.to_string(),
            seed_commitment: seed_commitment.to_string(),
        }
    }

    pub fn with_area(mut self, area: VoxelArea, game_start_block: U256) -> Self {
        self.size_x = Some(area.size_x.to_string());
        self.size_y = Some(area.size_y.to_string());
        self.size_z = Some(area.size_z.to_string());
        self.game_start_block = Some(game_start_block.to_string());
        self
    }

    /// Copy safe to write to logs
    pub fn redacted(&self) -> Self {
        Self {
            seed: "<redacted>".to_string(),
            ..self.clone()
        }
    }
}

/// Groth16 proof points in on-chain calldata order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub a: [String; 2],
    pub b: [[String; 2]; 2],
    pub c: [String; 2],
}

/// Proof plus public signals, ready to be passed to the game contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Groth16ProofCalldata {
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
}

impl Groth16ProofCalldata {
    /// Number of leading values taken by the proof points
    pub const PROOF_ELEMENTS: usize = 8;

    /// Partition a flat prover output into `a`, `b`, `c` and the public
    /// signals, rendering each value as a decimal string.
    ///
    /// # Panics
    ///
    /// Panics if `raw` holds fewer than [`Self::PROOF_ELEMENTS`] values. The
    /// prover always emits a complete proof, so a short list is a broken
    /// adapter, not bad input.
    pub fn from_raw(raw: &[U256]) -> Self {
        assert!(
            raw.len() >= Self::PROOF_ELEMENTS,
            "groth16 calldata needs at least {} elements, got {}",
            Self::PROOF_ELEMENTS,
            raw.len()
        );

        let dec = |i: usize| raw[i].to_string();
        Self {
            proof: Groth16Proof {
                a: [dec(0), dec(1)],
                b: [[dec(2), dec(3)], [dec(4), dec(5)]],
                c: [dec(6), dec(7)],
            },
            public_signals: raw[Self::PROOF_ELEMENTS..]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    /// Points awarded for the claim, by convention the first public signal
    pub fn score(&self) -> Option<&str> {
        self.public_signals.first().map(String::as_str)
    }
}
