//! Groth16 proof generation through snarkjs

use alloy_primitives::U256;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ProofGenerationError;
use crate::types::{CircuitInputs, Groth16ProofCalldata};

/// Anything that can turn circuit inputs into on-chain calldata.
///
/// Implementations return either a complete proof or an error, never a
/// partial result, and never touch the chain.
#[async_trait]
pub trait ProofGenerator: Send + Sync + 'static {
    async fn generate_proof(
        &self,
        inputs: &CircuitInputs,
    ) -> Result<Groth16ProofCalldata, ProofGenerationError>;
}

/// Runs the snarkjs CLI against a compiled circuit and proving key
pub struct SnarkjsProver {
    snarkjs_bin: String,
    wasm_path: PathBuf,
    zkey_path: PathBuf,
}

impl SnarkjsProver {
    pub fn new(
        snarkjs_bin: impl Into<String>,
        wasm_path: impl Into<PathBuf>,
        zkey_path: impl Into<PathBuf>,
    ) -> Self {
        let prover = Self {
            snarkjs_bin: snarkjs_bin.into(),
            wasm_path: wasm_path.into(),
            zkey_path: zkey_path.into(),
        };
        info!(
            "Initialized snarkjs prover (wasm: {}, zkey: {})",
            prover.wasm_path.display(),
            prover.zkey_path.display()
        );
        prover
    }

    async fn snarkjs(&self, args: &[&OsStr]) -> Result<String, ProofGenerationError> {
        let output = Command::new(&self.snarkjs_bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProofGenerationError::ProverFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| ProofGenerationError::MalformedOutput(format!("non UTF-8 stdout: {}", e)))
    }
}

#[async_trait]
impl ProofGenerator for SnarkjsProver {
    async fn generate_proof(
        &self,
        inputs: &CircuitInputs,
    ) -> Result<Groth16ProofCalldata, ProofGenerationError> {
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("input.json");
        let proof_path = workdir.path().join("proof.json");
        let public_path = workdir.path().join("public.json");

        tokio::fs::write(&input_path, serde_json::to_vec(inputs)?).await?;

        debug!("Running groth16 fullprove in {}", workdir.path().display());
        self.snarkjs(&[
            OsStr::new("groth16"),
            OsStr::new("fullprove"),
            input_path.as_os_str(),
            self.wasm_path.as_os_str(),
            self.zkey_path.as_os_str(),
            proof_path.as_os_str(),
            public_path.as_os_str(),
        ])
        .await?;

        let calldata = self
            .snarkjs(&[
                OsStr::new("zkey"),
                OsStr::new("export"),
                OsStr::new("soliditycalldata"),
                public_path.as_os_str(),
                proof_path.as_os_str(),
            ])
            .await?;

        let raw = parse_calldata(&calldata)?;
        Ok(Groth16ProofCalldata::from_raw(&raw))
    }
}

/// Parse the text snarkjs prints for solidity calldata, e.g.
/// `["0x01", "0x02"],[["0x03", ...]],[...],["0x0a"]`, into a flat list.
pub fn parse_calldata(raw: &str) -> Result<Vec<U256>, ProofGenerationError> {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '[' | ']') && !c.is_whitespace())
        .collect::<String>()
        .split(',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            U256::from_str(token).map_err(|e| {
                let reason = format!("bad calldata value {}: {}", token, e);
                ProofGenerationError::MalformedOutput(reason)
            })
        })
        .collect()
}
