//! Configuration management for the listener

use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

use crate::reconciler::ClaimPolicy;
use crate::types::{VoxelArea, VoxelPosition};

/// Which claim policy a deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    PerGameArea,
    FixedBounds,
}

impl std::str::FromStr for PolicyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-game-area" | "area" => Ok(Self::PerGameArea),
            "fixed-bounds" | "fixed" => Ok(Self::FixedBounds),
            other => Err(anyhow!("Unknown claim policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON file holding the secret seed and its commitment
    pub seed_file_path: String,

    /// Hex private key of the account that sends SeismicCall transactions
    pub private_key: String,

    /// JSON-RPC endpoint of the chain
    pub rpc_url: String,

    /// Chain id for transaction signing; asked from the node when unset
    pub chain_id: Option<u64>,

    /// Contract emitting NewExtension events
    pub discovery_contract_address: Option<String>,

    /// Game contracts to watch from startup
    pub game_contract_addresses: Vec<String>,

    pub claim_policy: PolicyMode,

    /// Lowest corner of the static map, fixed-bounds only
    pub bounds_corner: [i32; 3],

    /// Map extent along x, y and z, fixed-bounds only
    pub bounds_size: Option<[u32; 3]>,

    /// Log polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// How long to wait for a transaction to be included
    pub receipt_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    pub snarkjs_bin: String,
    pub circuit_wasm_path: String,
    pub circuit_zkey_path: String,

    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed_file_path: "seed.json".to_string(),
            private_key: String::new(),
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: None,
            discovery_contract_address: None,
            game_contract_addresses: vec![],
            claim_policy: PolicyMode::PerGameArea,
            bounds_corner: [0, 0, 0],
            bounds_size: None,
            poll_interval_ms: 2000,
            receipt_timeout_secs: 120,
            request_timeout_secs: 30,
            snarkjs_bin: "snarkjs".to_string(),
            circuit_wasm_path: "circuits/treasure.wasm".to_string(),
            circuit_zkey_path: "circuits/treasure_final.zkey".to_string(),
            health_port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("SEED_FILE_PATH") {
            self.seed_file_path = path;
        }

        if let Some(key) = lookup("PRIVATE_KEY") {
            self.private_key = key;
        }

        if let Some(url) = lookup("RPC_URL") {
            self.rpc_url = url;
        }

        if let Some(chain_id) = lookup("CHAIN_ID") {
            self.chain_id = Some(parse_number("CHAIN_ID", &chain_id)?);
        }

        if let Some(address) = lookup("DISCOVERY_CONTRACT_ADDRESS") {
            self.discovery_contract_address = Some(address).filter(|a| !a.trim().is_empty());
        }

        if let Some(addresses) = lookup("GAME_CONTRACT_ADDRESSES") {
            self.game_contract_addresses = addresses
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(policy) = lookup("CLAIM_POLICY") {
            self.claim_policy = policy.parse()?;
        }

        for (axis, key) in ["BOUNDS_CORNER_X", "BOUNDS_CORNER_Y", "BOUNDS_CORNER_Z"]
            .into_iter()
            .enumerate()
        {
            if let Some(value) = lookup(key) {
                self.bounds_corner[axis] = parse_number(key, &value)?;
            }
        }

        for (axis, key) in ["BOUNDS_SIZE_X", "BOUNDS_SIZE_Y", "BOUNDS_SIZE_Z"]
            .into_iter()
            .enumerate()
        {
            if let Some(value) = lookup(key) {
                self.bounds_size.get_or_insert([0; 3])[axis] = parse_number(key, &value)?;
            }
        }

        if let Some(value) = lookup("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = lookup("RECEIPT_TIMEOUT_SECS") {
            self.receipt_timeout_secs = parse_number("RECEIPT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(bin) = lookup("SNARKJS_BIN") {
            self.snarkjs_bin = bin;
        }

        if let Some(path) = lookup("CIRCUIT_WASM_PATH") {
            self.circuit_wasm_path = path;
        }

        if let Some(path) = lookup("CIRCUIT_ZKEY_PATH") {
            self.circuit_zkey_path = path;
        }

        if let Some(port) = lookup("HEALTH_PORT") {
            self.health_port = parse_number("HEALTH_PORT", &port)?;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.private_key.trim().is_empty() {
            return Err(anyhow!("Private key is required"));
        }

        if self.seed_file_path.trim().is_empty() {
            return Err(anyhow!("Seed file path is required"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow!("Poll interval must be positive"));
        }

        self.claim_policy()?;
        self.discovery_contract()?;
        self.game_contracts()?;

        Ok(())
    }

    pub fn claim_policy(&self) -> Result<ClaimPolicy> {
        match self.claim_policy {
            PolicyMode::PerGameArea => Ok(ClaimPolicy::PerGameArea),
            PolicyMode::FixedBounds => {
                let [size_x, size_y, size_z] = self
                    .bounds_size
                    .ok_or_else(|| anyhow!("Fixed-bounds policy requires bounds_size"))?;
                if size_x == 0 || size_y == 0 || size_z == 0 {
                    return Err(anyhow!("Map bounds must be non-empty on every axis"));
                }
                let [x, y, z] = self.bounds_corner;
                Ok(ClaimPolicy::FixedBounds {
                    corner: VoxelPosition::new(x, y, z),
                    extent: VoxelArea::new(size_x, size_y, size_z),
                })
            }
        }
    }

    pub fn discovery_contract(&self) -> Result<Option<Address>> {
        self.discovery_contract_address
            .as_deref()
            .map(|address| parse_address("discovery contract", address))
            .transpose()
    }

    pub fn game_contracts(&self) -> Result<Vec<Address>> {
        self.game_contract_addresses
            .iter()
            .map(|address| parse_address("game contract", address))
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_address(what: &str, address: &str) -> Result<Address> {
    address
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} address: {}", what, address))
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} is not a valid number: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn overridden(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_to_area_policy() {
        let config = overridden(&[("PRIVATE_KEY", KEY)]).unwrap();
        assert_eq!(config.claim_policy().unwrap(), ClaimPolicy::PerGameArea);
        assert_eq!(config.seed_file_path, "seed.json");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.discovery_contract().unwrap().is_none());
    }

    #[test]
    fn test_private_key_required() {
        let err = overridden(&[]).unwrap_err();
        assert!(err.to_string().contains("Private key"));
    }

    #[test]
    fn test_fixed_bounds_from_env() {
        let config = overridden(&[
            ("PRIVATE_KEY", KEY),
            ("CLAIM_POLICY", "fixed"),
            ("BOUNDS_CORNER_X", "-8"),
            ("BOUNDS_SIZE_X", "16"),
            ("BOUNDS_SIZE_Y", "4"),
            ("BOUNDS_SIZE_Z", "16"),
        ])
        .unwrap();

        assert_eq!(
            config.claim_policy().unwrap(),
            ClaimPolicy::FixedBounds {
                corner: VoxelPosition::new(-8, 0, 0),
                extent: VoxelArea::new(16, 4, 16),
            }
        );
    }

    #[test]
    fn test_fixed_bounds_needs_extent() {
        assert!(overridden(&[("PRIVATE_KEY", KEY), ("CLAIM_POLICY", "fixed-bounds")]).is_err());
        assert!(overridden(&[
            ("PRIVATE_KEY", KEY),
            ("CLAIM_POLICY", "fixed-bounds"),
            ("BOUNDS_SIZE_X", "10"),
        ])
        .is_err());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(overridden(&[("PRIVATE_KEY", KEY), ("CLAIM_POLICY", "everything")]).is_err());
    }

    #[test]
    fn test_contract_addresses() {
        let config = overridden(&[
            ("PRIVATE_KEY", KEY),
            ("DISCOVERY_CONTRACT_ADDRESS", "0x1111111111111111111111111111111111111111"),
            (
                "GAME_CONTRACT_ADDRESSES",
                "0x2222222222222222222222222222222222222222, ,0x3333333333333333333333333333333333333333",
            ),
        ])
        .unwrap();

        assert_eq!(
            config.discovery_contract().unwrap(),
            Some(Address::repeat_byte(0x11))
        );
        assert_eq!(
            config.game_contracts().unwrap(),
            vec![Address::repeat_byte(0x22), Address::repeat_byte(0x33)]
        );

        let bad_address = [("PRIVATE_KEY", KEY), ("GAME_CONTRACT_ADDRESSES", "0xnope")];
        assert!(overridden(&bad_address).is_err());
    }

    #[test]
    fn test_numeric_overrides() {
        let config = overridden(&[
            ("PRIVATE_KEY", KEY),
            ("CHAIN_ID", "31337"),
            ("HEALTH_PORT", "9090"),
        ])
        .unwrap();
        assert_eq!(config.chain_id, Some(31337));
        assert_eq!(config.health_port, 9090);
    }

    #[test]
    fn test_malformed_numbers_are_fatal() {
        let fixed = [
            ("PRIVATE_KEY", KEY),
            ("CLAIM_POLICY", "fixed"),
            ("BOUNDS_SIZE_X", "10"),
            ("BOUNDS_SIZE_Y", "10"),
            ("BOUNDS_SIZE_Z", "10"),
        ];

        let mut vars = fixed.to_vec();
        vars.push(("BOUNDS_CORNER_X", "1O0"));
        let err = overridden(&vars).unwrap_err();
        assert!(err.to_string().contains("BOUNDS_CORNER_X"));

        let mut vars = fixed.to_vec();
        vars[2] = ("BOUNDS_SIZE_X", "-10");
        assert!(overridden(&vars).is_err());

        assert!(overridden(&[("PRIVATE_KEY", KEY), ("CHAIN_ID", "mainnet")]).is_err());
        assert!(overridden(&[("PRIVATE_KEY", KEY), ("POLL_INTERVAL_MS", "soon")]).is_err());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listener.toml");
        fs::write(
            &path,
            r#"
private_key = "0x01"
seed_file_path = "/var/lib/listener/seed.json"
claim_policy = "fixed-bounds"
bounds_corner = [100, 0, 50]
bounds_size = [10, 10, 10]
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.seed_file_path, "/var/lib/listener/seed.json");
        assert!(matches!(
            config.claim_policy().unwrap(),
            ClaimPolicy::FixedBounds { corner, .. } if corner == VoxelPosition::new(100, 0, 50)
        ));
    }
}
