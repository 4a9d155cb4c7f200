//! Canonical block header reconstruction.
//!
//! The engine never trusts its own encoding: the keccak of the produced RLP
//! must equal the hash the node reported for the block.
use std::sync::Arc;

use derive_debug_plus::Dbg;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use serde_derive::Serialize;
use tracing::debug;
use tracing::warn;
use xchain_messages::types::BlockRef;
use xchain_messages::types::BlockSummary;
use xchain_messages::types::Hardfork;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;

use crate::error::ProofError;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::rpc::EthRpc;
use crate::rpc::RpcBlock;
use crate::rpc::RpcPool;

/// A header field, in the encoding the consensus layer hashes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeaderField {
    ParentHash,
    UncleHash,
    Coinbase,
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    LogsBloom,
    Difficulty,
    Number,
    GasLimit,
    GasUsed,
    Timestamp,
    ExtraData,
    MixHash,
    Nonce,
    BaseFeePerGas,
    WithdrawalsRoot,
    BlobGasUsed,
    ExcessBlobGas,
    ParentBeaconBlockRoot,
    RequestsHash,
}

/// Fields every header carries, in order.
const BASE_FIELDS: [HeaderField; 15] = [
    HeaderField::ParentHash,
    HeaderField::UncleHash,
    HeaderField::Coinbase,
    HeaderField::StateRoot,
    HeaderField::TransactionsRoot,
    HeaderField::ReceiptsRoot,
    HeaderField::LogsBloom,
    HeaderField::Difficulty,
    HeaderField::Number,
    HeaderField::GasLimit,
    HeaderField::GasUsed,
    HeaderField::Timestamp,
    HeaderField::ExtraData,
    HeaderField::MixHash,
    HeaderField::Nonce,
];

/// Fields appended by each hardfork, in activation order.
const FORK_FIELDS: [(Hardfork, &[HeaderField]); 4] = [
    (Hardfork::London, &[HeaderField::BaseFeePerGas]),
    (Hardfork::Shanghai, &[HeaderField::WithdrawalsRoot]),
    (
        Hardfork::Cancun,
        &[
            HeaderField::BlobGasUsed,
            HeaderField::ExcessBlobGas,
            HeaderField::ParentBeaconBlockRoot,
        ],
    ),
    (Hardfork::Prague, &[HeaderField::RequestsHash]),
];

/// The ordered header layout for blocks produced under `hardfork`.
pub fn header_fields(hardfork: Hardfork) -> Vec<HeaderField> {
    let mut fields = BASE_FIELDS.to_vec();
    for (fork, added) in FORK_FIELDS {
        if fork <= hardfork {
            fields.extend_from_slice(added);
        }
    }
    fields
}

/// Big-endian bytes without leading zeros; zero is the empty string.
pub fn unpadded(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let start = buf.iter().position(|b| *b != 0).unwrap_or(buf.len());
    buf[start..].to_vec()
}

fn required<T>(
    value: Option<T>,
    name: &'static str,
) -> Result<T> {
    value.ok_or(ProofError::MissingHeaderField(name))
}

impl HeaderField {
    /// The JSON-RPC name of the field.
    pub fn name(&self) -> &'static str {
        match self {
            HeaderField::ParentHash => "parentHash",
            HeaderField::UncleHash => "sha3Uncles",
            HeaderField::Coinbase => "miner",
            HeaderField::StateRoot => "stateRoot",
            HeaderField::TransactionsRoot => "transactionsRoot",
            HeaderField::ReceiptsRoot => "receiptsRoot",
            HeaderField::LogsBloom => "logsBloom",
            HeaderField::Difficulty => "difficulty",
            HeaderField::Number => "number",
            HeaderField::GasLimit => "gasLimit",
            HeaderField::GasUsed => "gasUsed",
            HeaderField::Timestamp => "timestamp",
            HeaderField::ExtraData => "extraData",
            HeaderField::MixHash => "mixHash",
            HeaderField::Nonce => "nonce",
            HeaderField::BaseFeePerGas => "baseFeePerGas",
            HeaderField::WithdrawalsRoot => "withdrawalsRoot",
            HeaderField::BlobGasUsed => "blobGasUsed",
            HeaderField::ExcessBlobGas => "excessBlobGas",
            HeaderField::ParentBeaconBlockRoot => "parentBeaconBlockRoot",
            HeaderField::RequestsHash => "requestsHash",
        }
    }

    /// The RLP string payload of this field. Hashes, addresses and blooms
    /// keep their fixed width, quantities are unpadded.
    pub fn extract(
        &self,
        block: &RpcBlock,
    ) -> Result<Vec<u8>> {
        let name = self.name();
        let hash = |h: H256| h.as_bytes().to_vec();
        Ok(match self {
            HeaderField::ParentHash => hash(block.parent_hash),
            HeaderField::UncleHash => hash(block.sha3_uncles),
            HeaderField::Coinbase => block.miner.as_bytes().to_vec(),
            HeaderField::StateRoot => hash(block.state_root),
            HeaderField::TransactionsRoot => hash(block.transactions_root),
            HeaderField::ReceiptsRoot => hash(block.receipts_root),
            HeaderField::LogsBloom => block.logs_bloom.as_bytes().to_vec(),
            HeaderField::Difficulty => unpadded(block.difficulty),
            HeaderField::Number => unpadded(required(block.number, name)?),
            HeaderField::GasLimit => unpadded(block.gas_limit),
            HeaderField::GasUsed => unpadded(block.gas_used),
            HeaderField::Timestamp => unpadded(block.timestamp),
            HeaderField::ExtraData => block.extra_data.to_vec(),
            HeaderField::MixHash => hash(required(block.mix_hash, name)?),
            HeaderField::Nonce => required(block.nonce, name)?.as_bytes().to_vec(),
            HeaderField::BaseFeePerGas => unpadded(required(block.base_fee_per_gas, name)?),
            HeaderField::WithdrawalsRoot => hash(required(block.withdrawals_root, name)?),
            HeaderField::BlobGasUsed => unpadded(required(block.blob_gas_used, name)?),
            HeaderField::ExcessBlobGas => unpadded(required(block.excess_blob_gas, name)?),
            HeaderField::ParentBeaconBlockRoot => {
                hash(required(block.parent_beacon_block_root, name)?)
            },
            HeaderField::RequestsHash => hash(required(block.requests_hash, name)?),
        })
    }
}

/// RLP encodes the header of `block` with the layout of `hardfork`.
pub fn encode_header(
    block: &RpcBlock,
    hardfork: Hardfork,
) -> Result<Vec<u8>> {
    let fields = header_fields(hardfork);
    let mut stream = RlpStream::new_list(fields.len());
    for field in &fields {
        stream.append(&field.extract(block)?);
    }
    Ok(stream.out().to_vec())
}

/// Checks that `rlp` hashes to the block hash reported by the node.
pub fn verify_header(
    block: &RpcBlock,
    rlp: &[u8],
) -> Result<H256> {
    let expected = required(block.hash, "hash")?;
    let computed = H256(keccak256(rlp));
    if computed != expected {
        return Err(ProofError::HeaderHashMismatch { expected, computed });
    }
    Ok(computed)
}

/// A verified header encoding.
#[derive(Clone, Dbg, PartialEq, Eq, Serialize)]
pub struct EncodedHeader {
    pub hash: H256,
    pub number: BlockNr,
    pub hardfork: Hardfork,
    #[dbg(placeholder = "...")]
    pub rlp: Bytes,
}

/// Fetches a block header, failing when the node does not know the block.
pub async fn fetch_block(
    rpc: &dyn EthRpc,
    block: BlockRef,
) -> Result<RpcBlock> {
    rpc.block(block)
        .await?
        .ok_or(ProofError::BlockNotFound(block))
}

pub fn block_number_of(block: &RpcBlock) -> Result<BlockNr> {
    let number = required(block.number, "number")?;
    if number.bits() > 64 {
        return Err(ProofError::BlockNumberOverflow(number));
    }
    Ok(number.as_u64())
}

/// Resolves `block` to a number, asking the node unless it already is one.
pub async fn block_number(
    rpc: &dyn EthRpc,
    block: BlockRef,
) -> Result<BlockNr> {
    match block {
        BlockRef::Number(number) => Ok(number),
        BlockRef::Hash(_) | BlockRef::Latest => block_number_of(&fetch_block(rpc, block).await?),
    }
}

pub struct HeaderCodec {
    pool: Arc<RpcPool>,
    metrics: Metrics,
}

impl HeaderCodec {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self {
            pool,
            metrics: Metrics::new(),
        }
    }

    /// Hash and number of a block, typically `latest`.
    pub async fn summary(
        &self,
        chain_id: ChainId,
        block: BlockRef,
    ) -> Result<BlockSummary> {
        let rpc = self.pool.connection(chain_id)?;
        let fetched = fetch_block(rpc.as_ref(), block).await?;
        Ok(BlockSummary {
            hash: required(fetched.hash, "hash")?,
            number: block_number_of(&fetched)?,
        })
    }

    /// Fetches `block` and returns its verified header RLP.
    #[tracing::instrument(skip(self), err(Debug))]
    pub async fn encode(
        &self,
        chain_id: ChainId,
        block: BlockRef,
    ) -> Result<EncodedHeader> {
        let chain = self.pool.registry().get(chain_id)?;
        if !chain.knows_hardfork() {
            return Err(ProofError::UnknownHardfork {
                chain_id,
                block: None,
            });
        }

        let rpc = self.pool.connection(chain_id)?;
        let fetched = fetch_block(rpc.as_ref(), block).await?;
        let number = block_number_of(&fetched)?;
        let hardfork = chain
            .hardfork_at(number)
            .ok_or(ProofError::UnknownHardfork {
                chain_id,
                block: Some(number),
            })?;

        let rlp = encode_header(&fetched, hardfork)?;
        let hash = match verify_header(&fetched, &rlp) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(chain_id, number, %hardfork, "reconstructed header does not match block hash");
                self.metrics.increment_header_hash_mismatch(chain_id);
                return Err(err);
            },
        };
        debug!(number, %hardfork, len = rlp.len(), "header encoded");

        Ok(EncodedHeader {
            hash,
            number,
            hardfork,
            rlp: rlp.into(),
        })
    }
}
