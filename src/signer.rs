//! Transaction signing with ECDSA

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::RlpEncodable;
use k256::{ecdsa::SigningKey, SecretKey};
use sha3::{Digest, Keccak256};

use crate::error::ChainError;

pub fn keccak256(data: impl AsRef<[u8]>) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    B256::from_slice(&hasher.finalize())
}

/// EIP-155 signing payload of a legacy transaction
#[derive(RlpEncodable)]
struct UnsignedLegacyTx {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Address,
    value: U256,
    input: Bytes,
    chain_id: u64,
    empty_r: u8,
    empty_s: u8,
}

#[derive(RlpEncodable)]
struct SignedLegacyTx {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Address,
    value: U256,
    input: Bytes,
    v: u64,
    r: U256,
    s: U256,
}

/// Fields of a contract call transaction, before signing
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub input: Bytes,
}

pub struct TransactionSigner {
    signing_key: SigningKey,
    address: Address,
    chain_id: u64,
}

impl TransactionSigner {
    /// Create a new signer from private key hex
    pub fn new(private_key_hex: &str, chain_id: u64) -> Result<Self, ChainError> {
        let private_key_hex = private_key_hex.trim().trim_start_matches("0x");
        let private_key_bytes = hex::decode(private_key_hex)
            .map_err(|e| ChainError::Signing(format!("Invalid private key hex: {}", e)))?;

        let secret_key = SecretKey::from_slice(&private_key_bytes)
            .map_err(|e| ChainError::Signing(format!("Invalid private key: {}", e)))?;

        let signing_key = SigningKey::from(secret_key);

        // Derive Ethereum address from public key
        let public_key = signing_key.verifying_key();
        let public_key_bytes = public_key.to_encoded_point(false);
        let public_key_bytes = &public_key_bytes.as_bytes()[1..]; // Skip the 0x04 prefix

        let hash = keccak256(public_key_bytes);
        let address = Address::from_slice(&hash[12..]);

        Ok(Self {
            signing_key,
            address,
            chain_id,
        })
    }

    /// Get the signer's Ethereum address
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign a legacy transaction with EIP-155 replay protection, returning
    /// the raw RLP bytes ready for `eth_sendRawTransaction`
    pub fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        let unsigned = UnsignedLegacyTx {
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to,
            value: U256::ZERO,
            input: tx.input.clone(),
            chain_id: self.chain_id,
            empty_r: 0,
            empty_s: 0,
        };
        let signing_hash = keccak256(alloy_rlp::encode(&unsigned));

        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(signing_hash.as_slice())
            .map_err(|e| ChainError::Signing(format!("Failed to sign: {}", e)))?;

        let signature_bytes = signature.to_bytes();
        let signed = SignedLegacyTx {
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to,
            value: U256::ZERO,
            input: tx.input.clone(),
            v: self.chain_id * 2 + 35 + u64::from(recovery_id.to_byte()),
            r: U256::from_be_slice(&signature_bytes[..32]),
            s: U256::from_be_slice(&signature_bytes[32..]),
        };

        Ok(alloy_rlp::encode(&signed).into())
    }
}
