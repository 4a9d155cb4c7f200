//! The JSON-RPC surface the engine depends on.
//!
//! Everything above this module talks to nodes through [`EthRpc`], so the
//! transport can be swapped for an in-memory node in tests.
use std::fmt::Debug;

use async_trait::async_trait;
use ethers::types::Address;
use ethers::types::Bloom;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::H64;
use ethers::types::U256;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use thiserror::Error;
use xchain_messages::types::BlockRef;

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod pool;

pub use http::HttpRpc;
pub use pool::Connector;
pub use pool::HttpConnector;
pub use pool::RpcPool;

/// JSON-RPC error code used by most providers for rate limiting.
pub const LIMIT_EXCEEDED: i64 = -32005;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("cannot decode response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Classifies a JSON-RPC error object returned by a node.
    pub fn from_response(
        code: i64,
        message: &str,
    ) -> Self {
        let lowered = message.to_ascii_lowercase();
        if code == LIMIT_EXCEEDED || lowered.contains("rate limit") {
            RpcError::RateLimited(message.to_string())
        } else if code == 3 || lowered.contains("revert") || lowered.contains("invalid opcode") {
            RpcError::Reverted(message.to_string())
        } else {
            RpcError::Node {
                code,
                message: message.to_string(),
            }
        }
    }

    /// The call executed and the contract refused it or answered with data
    /// of the wrong shape.
    pub fn is_contract_refusal(&self) -> bool {
        matches!(self, RpcError::Reverted(_) | RpcError::Decode(_))
    }
}

/// The subset of an `eth_getBlockBy*` response needed to rebuild the header.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    /// `None` for pending blocks.
    pub hash: Option<H256>,
    pub parent_hash: H256,
    pub sha3_uncles: H256,
    pub miner: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    /// `None` for pending blocks.
    pub number: Option<U256>,
    pub gas_limit: U256,
    pub gas_used: U256,
    pub timestamp: U256,
    pub extra_data: Bytes,
    pub mix_hash: Option<H256>,
    pub nonce: Option<H64>,
    pub base_fee_per_gas: Option<U256>,
    pub withdrawals_root: Option<H256>,
    pub blob_gas_used: Option<U256>,
    pub excess_blob_gas: Option<U256>,
    pub parent_beacon_block_root: Option<H256>,
    pub requests_hash: Option<H256>,
}

/// An `eth_getProof` response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub address: Address,
    pub account_proof: Vec<Bytes>,
    #[serde(default)]
    pub storage_proof: Vec<StorageProofEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageProofEntry {
    /// Nodes disagree on whether keys are zero padded, so both are accepted.
    pub key: U256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

#[async_trait]
pub trait EthRpc: Send + Sync + Debug {
    /// `eth_getBlockByHash` / `eth_getBlockByNumber` without transactions.
    async fn block(
        &self,
        block: BlockRef,
    ) -> Result<Option<RpcBlock>, RpcError>;

    /// `eth_getStorageAt`.
    async fn storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockRef,
    ) -> Result<H256, RpcError>;

    /// `eth_getProof`. An empty key set yields only the account proof.
    async fn proof(
        &self,
        address: Address,
        keys: &[H256],
        block: BlockRef,
    ) -> Result<ProofResponse, RpcError>;

    /// `eth_call` returning the raw return data.
    async fn call(
        &self,
        to: Address,
        data: Bytes,
        block: BlockRef,
    ) -> Result<Bytes, RpcError>;
}
