//! Error types for the listener service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Seed file I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid seed value: {0}")]
    InvalidSeed(String),

    #[error("Seed commitment mismatch: file has {stored}, derived {derived}")]
    CommitmentMismatch { stored: String, derived: String },

    #[error("Poseidon hash error: {0}")]
    Hash(String),
}

#[derive(Error, Debug)]
pub enum ProofGenerationError {
    #[error("Failed to stage prover files: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode circuit inputs: {0}")]
    Inputs(#[from] serde_json::Error),

    #[error("Prover exited with {status}: {stderr}")]
    ProverFailed { status: String, stderr: String },

    #[error("Malformed prover output: {0}")]
    MalformedOutput(String),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Rpc(String),

    #[error("Node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Failed to watch events: {0}")]
    Watch(String),

    #[error("Transaction simulation failed: {0}")]
    Simulation(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Failed to encode call: {0}")]
    Encoding(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::Rpc(e.to_string())
    }
}

/// A log did not decode as the event the pipeline expected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Malformed {event} log: {reason}")]
    Malformed { event: &'static str, reason: String },
}
