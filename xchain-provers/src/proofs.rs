//! `eth_getProof` retrieval and the flattening of proof node lists into the
//! single RLP list the on-chain verifier walks.
use std::sync::Arc;

use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::utils::rlp::Rlp;
use ethers::utils::rlp::RlpStream;
use tracing::debug;
use xchain_messages::types::BlockRef;
use xchain_messages::ChainId;
use xchain_messages::SlotIndex;

use crate::error::ProofError;
use crate::error::Result;
use crate::rpc::RpcPool;
use crate::rpc::StorageProofEntry;
use crate::slots::balance_slot;
use crate::slots::word;

/// Combines the nodes of one proof into a single RLP list.
///
/// Every node must be exactly one well-formed RLP item; it is embedded as is,
/// so decoding the result gives back the original nodes.
pub fn reencode_proof_nodes(nodes: &[Bytes]) -> Result<Bytes> {
    let mut stream = RlpStream::new_list(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let info = Rlp::new(node)
            .payload_info()
            .map_err(|e| ProofError::MalformedProofNode {
                index,
                reason: e.to_string(),
            })?;
        if info.total() != node.len() {
            return Err(ProofError::MalformedProofNode {
                index,
                reason: format!("item spans {} bytes, node has {}", info.total(), node.len()),
            });
        }
        stream.append_raw(node, 1);
    }
    Ok(stream.out().to_vec().into())
}

/// Splits a blob produced by [`reencode_proof_nodes`] back into nodes.
pub fn decode_proof_blob(blob: &[u8]) -> Result<Vec<Bytes>> {
    let rlp = Rlp::new(blob);
    if !rlp.is_list() {
        return Err(ProofError::MalformedProofNode {
            index: 0,
            reason: "proof blob is not a list".to_string(),
        });
    }
    Ok(rlp
        .iter()
        .map(|node| Bytes::from(node.as_raw().to_vec()))
        .collect())
}

pub struct ProofFetcher {
    pool: Arc<RpcPool>,
}

impl ProofFetcher {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }

    /// The contract's account proof, flattened.
    #[tracing::instrument(skip(self), err(Debug))]
    pub async fn fetch_account_proof(
        &self,
        chain_id: ChainId,
        block: BlockRef,
        contract: Address,
    ) -> Result<Bytes> {
        let rpc = self.pool.connection(chain_id)?;
        let response = rpc.proof(contract, &[], block).await?;
        debug!(nodes = response.account_proof.len(), "account proof fetched");
        reencode_proof_nodes(&response.account_proof)
    }

    /// Proof of `holder`'s entry in the balance mapping at `slot_index`,
    /// flattened.
    #[tracing::instrument(skip(self), err(Debug))]
    pub async fn fetch_storage_proof(
        &self,
        chain_id: ChainId,
        block: BlockRef,
        contract: Address,
        slot_index: SlotIndex,
        holder: Address,
    ) -> Result<Bytes> {
        let slot = balance_slot(holder, slot_index);
        let mut entries = self
            .fetch_storage_proofs(chain_id, block, contract, &[slot])
            .await?;
        let entry = entries.pop().ok_or(ProofError::MissingStorageProof(slot))?;
        reencode_proof_nodes(&entry.proof)
    }

    /// Plain read of `holder`'s entry in the mapping at `slot_index`, used to
    /// skip proofs for zero balances.
    pub async fn fetch_storage_value(
        &self,
        chain_id: ChainId,
        block: BlockRef,
        contract: Address,
        slot_index: SlotIndex,
        holder: Address,
    ) -> Result<H256> {
        let rpc = self.pool.connection(chain_id)?;
        let value = rpc
            .storage_at(contract, balance_slot(holder, slot_index), block)
            .await?;
        Ok(value)
    }

    /// Storage proofs for `keys` in one `eth_getProof` call, in the order of
    /// `keys`.
    pub async fn fetch_storage_proofs(
        &self,
        chain_id: ChainId,
        block: BlockRef,
        contract: Address,
        keys: &[H256],
    ) -> Result<Vec<StorageProofEntry>> {
        let rpc = self.pool.connection(chain_id)?;
        let response = rpc.proof(contract, keys, block).await?;
        order_storage_proofs(keys, response.storage_proof)
    }
}

/// Matches returned entries to the requested keys, since nodes may reorder
/// them and print keys without padding.
pub(crate) fn order_storage_proofs(
    keys: &[H256],
    mut entries: Vec<StorageProofEntry>,
) -> Result<Vec<StorageProofEntry>> {
    let mut ordered = Vec::with_capacity(keys.len());
    for key in keys {
        let position = entries
            .iter()
            .position(|entry| word(entry.key) == *key)
            .ok_or(ProofError::MissingStorageProof(*key))?;
        ordered.push(entries.swap_remove(position));
    }
    Ok(ordered)
}
