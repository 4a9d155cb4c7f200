use ethers::types::H256;
use ethers::types::U256;
use thiserror::Error;
use xchain_messages::types::BlockRef;
use xchain_messages::types::ContractKind;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;

use crate::rpc::RpcError;

pub type Result<T> = std::result::Result<T, ProofError>;

#[derive(Error, Debug)]
pub enum ProofError {
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),

    #[error("chain {0} cannot produce storage proofs")]
    UnprovableChain(ChainId),

    #[error("chain {0} has no RPC endpoint")]
    NoRpcEndpoint(ChainId),

    #[error("unknown hardfork for chain {chain_id} at block {block:?}")]
    UnknownHardfork {
        chain_id: ChainId,
        block: Option<BlockNr>,
    },

    #[error("either a block hash or a block number is required")]
    MissingBlock,

    #[error("block {0} not found")]
    BlockNotFound(BlockRef),

    #[error("block is missing header field `{0}`")]
    MissingHeaderField(&'static str),

    #[error("block number {0} does not fit in 64 bits")]
    BlockNumberOverflow(U256),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("header hash mismatch: expected {expected:#x}, computed {computed:#x}")]
    HeaderHashMismatch { expected: H256, computed: H256 },

    #[error("malformed proof node #{index}: {reason}")]
    MalformedProofNode { index: usize, reason: String },

    #[error("node returned no storage proof for key {0:#x}")]
    MissingStorageProof(H256),

    #[error("inconsistent proof response: {0}")]
    InconsistentProof(String),

    #[error("{0} contracts are not supported yet")]
    NotImplemented(ContractKind),

    #[error("cannot format balance: {0}")]
    Format(String),
}

impl ProofError {
    /// Whether the failure came from the node or the network and the same
    /// request may succeed later.
    pub fn is_rpc(&self) -> bool {
        matches!(self, ProofError::Rpc(_))
    }

    /// Configuration errors are permanent for the given request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProofError::UnknownChain(_)
                | ProofError::UnprovableChain(_)
                | ProofError::NoRpcEndpoint(_)
                | ProofError::UnknownHardfork { .. }
                | ProofError::MissingBlock
        )
    }

    /// A short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProofError::UnknownChain(_) => "unknown_chain",
            ProofError::UnprovableChain(_) => "unprovable_chain",
            ProofError::NoRpcEndpoint(_) => "no_rpc_endpoint",
            ProofError::UnknownHardfork { .. } => "unknown_hardfork",
            ProofError::MissingBlock => "missing_block",
            ProofError::BlockNotFound(_) => "block_not_found",
            ProofError::MissingHeaderField(_) => "missing_header_field",
            ProofError::BlockNumberOverflow(_) => "block_number_overflow",
            ProofError::Rpc(_) => "rpc",
            ProofError::HeaderHashMismatch { .. } => "header_hash_mismatch",
            ProofError::MalformedProofNode { .. } => "malformed_proof_node",
            ProofError::MissingStorageProof(_) => "missing_storage_proof",
            ProofError::InconsistentProof(_) => "inconsistent_proof",
            ProofError::NotImplemented(_) => "not_implemented",
            ProofError::Format(_) => "format",
        }
    }
}
