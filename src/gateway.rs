//! Chain gateway abstraction consumed by the reconciler

use alloy_primitives::{Address, Bytes, LogData, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::error::{ChainError, ExtractError};
use crate::types::{Groth16ProofCalldata, VoxelPosition};

sol! {
    struct VoxelCoord {
        int32 x;
        int32 y;
        int32 z;
    }

    function SeismicCall(
        address player,
        VoxelCoord position,
        uint256[2] a,
        uint256[2][2] b,
        uint256[2] c,
        uint256[] publicSignals
    );

    event NewExtension(address contractAddress);
}

/// Mine event of deployments with one static map
pub mod fixed {
    alloy_sol_types::sol! {
        event Mine(address player, int32 x, int32 y, int32 z);
    }
}

/// Mine event of deployments where every game reports its own area
pub mod area {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        event Mine(
            address player,
            int32 x,
            int32 y,
            int32 z,
            uint32 sizeX,
            uint32 sizeY,
            uint32 sizeZ,
            uint256 gameStartBlock
        );
    }
}

/// Batches of logs, in the order the chain delivered them
pub type LogStream = mpsc::Receiver<Vec<ChainLog>>;

/// Capabilities the reconciler needs from the chain. Each call can fail on
/// its own and may be slow.
#[async_trait]
pub trait ChainGateway: Send + Sync + 'static {
    /// Stream of newly deployed game contracts
    async fn watch_discovery_events(&self) -> Result<LogStream, ChainError>;

    /// Stream of mining attempts emitted by one game contract
    async fn watch_mine_events(&self, contract: Address) -> Result<LogStream, ChainError>;

    /// Simulate a call against current state without committing it
    async fn prepare_transaction(&self, call: ContractCall)
        -> Result<PreparedTransaction, ChainError>;

    /// Broadcast a prepared call and wait until it is included
    async fn submit_transaction(
        &self,
        tx: PreparedTransaction,
    ) -> Result<TransactionReceipt, ChainError>;
}

/// A log as delivered by the chain, still ABI-encoded
#[derive(Debug, Clone)]
pub struct ChainLog {
    /// Contract that emitted the log
    pub address: Address,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub data: LogData,
}

impl ChainLog {
    /// Decode as event `E`. The signature topic and every data word are
    /// checked, so a log of another shape or a truncated log is an error.
    pub fn decode<E: SolEvent>(&self) -> Result<E, ExtractError> {
        let malformed = |reason: String| ExtractError::Malformed {
            event: E::SIGNATURE,
            reason,
        };
        match self.data.topics().first() {
            Some(topic) if *topic == E::SIGNATURE_HASH => {}
            Some(topic) => return Err(malformed(format!("unexpected topic {}", topic))),
            None => return Err(malformed("no topics".to_string())),
        }
        E::decode_log_data(&self.data, true).map_err(|e| malformed(e.to_string()))
    }
}

/// Which event a subscription follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub signature: &'static str,
    pub topic: B256,
}

impl EventFilter {
    pub fn of<E: SolEvent>() -> Self {
        Self {
            signature: E::SIGNATURE,
            topic: E::SIGNATURE_HASH,
        }
    }
}

/// A contract function invocation, ABI-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub contract: Address,
    pub function_name: &'static str,
    pub calldata: Bytes,
}

impl ContractCall {
    /// Credit `player` for a proven claim at `position`
    pub fn seismic_call(
        contract: Address,
        player: Address,
        position: VoxelPosition,
        calldata: &Groth16ProofCalldata,
    ) -> Result<Self, ChainError> {
        let proof = &calldata.proof;
        let call = SeismicCallCall {
            player,
            position: VoxelCoord {
                x: position.x,
                y: position.y,
                z: position.z,
            },
            a: [parse_u256(&proof.a[0])?, parse_u256(&proof.a[1])?],
            b: [
                [parse_u256(&proof.b[0][0])?, parse_u256(&proof.b[0][1])?],
                [parse_u256(&proof.b[1][0])?, parse_u256(&proof.b[1][1])?],
            ],
            c: [parse_u256(&proof.c[0])?, parse_u256(&proof.c[1])?],
            publicSignals: calldata
                .public_signals
                .iter()
                .map(|s| parse_u256(s))
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            contract,
            function_name: SeismicCallCall::SIGNATURE,
            calldata: call.abi_encode().into(),
        })
    }
}

fn parse_u256(value: &str) -> Result<U256, ChainError> {
    U256::from_str(value).map_err(|e| ChainError::Encoding(format!("{}: {}", value, e)))
}

/// A simulated call, ready to be signed and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub call: ContractCall,
    pub gas_limit: u64,
    pub gas_price: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_log(data: LogData) -> ChainLog {
        ChainLog {
            address: Address::repeat_byte(0x99),
            block_number: Some(1),
            transaction_hash: None,
            data,
        }
    }

    fn fixed_mine(player: Address) -> LogData {
        fixed::Mine {
            player,
            x: 2,
            y: -3,
            z: 4,
        }
        .encode_log_data()
    }

    #[test]
    fn test_decode_mine_log() {
        let player = Address::repeat_byte(0x11);
        let event: fixed::Mine = chain_log(fixed_mine(player)).decode().unwrap();

        assert_eq!(event.player, player);
        assert_eq!((event.x, event.y, event.z), (2, -3, 4));
    }

    #[test]
    fn test_decode_truncated_log_fails() {
        let full = area::Mine {
            player: Address::repeat_byte(0x22),
            x: 1,
            y: 1,
            z: 1,
            sizeX: 10,
            sizeY: 10,
            sizeZ: 10,
            gameStartBlock: U256::from(5u64),
        }
        .encode_log_data();
        let truncated = LogData::new_unchecked(
            full.topics().to_vec(),
            Bytes::from(full.data[..5 * 32].to_vec()),
        );

        let err = chain_log(truncated).decode::<area::Mine>().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Malformed { event, .. } if event == area::Mine::SIGNATURE
        ));
    }

    #[test]
    fn test_decode_rejects_other_event_shape() {
        let log = chain_log(fixed_mine(Address::repeat_byte(0x33)));
        assert!(log.decode::<area::Mine>().is_err());
        assert!(log.decode::<NewExtension>().is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_topic() {
        let mine = fixed_mine(Address::repeat_byte(0x33));
        let foreign = LogData::new_unchecked(vec![B256::repeat_byte(0x01)], mine.data.clone());
        let bare = LogData::new_unchecked(vec![], mine.data);

        assert!(chain_log(foreign).decode::<fixed::Mine>().is_err());
        assert!(chain_log(bare).decode::<fixed::Mine>().is_err());
    }

    #[test]
    fn test_decode_rejects_dirty_address_word() {
        let clean = NewExtension {
            contractAddress: Address::repeat_byte(0x44),
        }
        .encode_log_data();
        let mut data = clean.data.to_vec();
        data[0] = 1;
        let dirty = LogData::new_unchecked(clean.topics().to_vec(), Bytes::from(data));

        assert!(chain_log(dirty).decode::<NewExtension>().is_err());
    }

    #[test]
    fn test_event_filters() {
        let fixed_filter = EventFilter::of::<fixed::Mine>();
        let area_filter = EventFilter::of::<area::Mine>();

        assert_eq!(fixed_filter.signature, "Mine(address,int32,int32,int32)");
        assert_eq!(
            area_filter.signature,
            "Mine(address,int32,int32,int32,uint32,uint32,uint32,uint256)"
        );
        assert_ne!(fixed_filter.topic, area_filter.topic);
        assert_eq!(
            EventFilter::of::<NewExtension>().topic,
            crate::signer::keccak256(b"NewExtension(address)")
        );
    }

    #[test]
    fn test_seismic_call_encoding() {
        let raw: Vec<U256> = (1u64..=9).map(U256::from).collect();
        let proof = Groth16ProofCalldata::from_raw(&raw);
        let player = Address::repeat_byte(0x44);

        let call = ContractCall::seismic_call(
            Address::repeat_byte(0x55),
            player,
            VoxelPosition::new(2, -3, 4),
            &proof,
        )
        .unwrap();

        assert!(call.function_name.starts_with("SeismicCall("));
        let decoded = SeismicCallCall::abi_decode(&call.calldata, true).unwrap();
        assert_eq!(decoded.player, player);
        assert_eq!(decoded.position.y, -3);
        assert_eq!(decoded.b[1][0], U256::from(5u64));
        assert_eq!(decoded.publicSignals, vec![U256::from(9u64)]);
    }
}
