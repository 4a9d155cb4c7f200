//! Balances of MiniMe tokens, which keep `Checkpoint[]` per holder instead of
//! a single balance word.
//!
//! A checkpoint occupies one storage word, `fromBlock` in the low 128 bits
//! and the balance in the high 128 bits. Storage reads are pinned to the
//! queried block, so the last array element is the checkpoint in force at
//! that block.
use std::sync::Arc;

use derive_debug_plus::Dbg;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use serde_derive::Serialize;
use tracing::debug;
use xchain_messages::types::BlockRef;
use xchain_messages::types::MiniMeVoteData;
use xchain_messages::ChainId;
use xchain_messages::SlotIndex;

use crate::error::ProofError;
use crate::error::Result;
use crate::header::block_number;
use crate::proofs::reencode_proof_nodes;
use crate::proofs::ProofFetcher;
use crate::rpc::RpcPool;
use crate::slots::array_element_slot;
use crate::slots::balance_slot;
use crate::slots::format_balance;
use crate::slots::word_value;

/// Slot of the last element of the checkpoint array at `base`.
pub fn last_checkpoint_slot(
    base: H256,
    length: U256,
) -> H256 {
    array_element_slot(base, length.saturating_sub(U256::one()))
}

pub fn checkpoint_balance(checkpoint: H256) -> U256 {
    word_value(checkpoint) >> 128
}

pub fn checkpoint_from_block(checkpoint: H256) -> U256 {
    word_value(checkpoint) & ((U256::one() << 128) - 1)
}

/// A holder's MiniMe balance with the storage proofs backing it.
#[derive(Clone, Dbg, PartialEq, Eq, Serialize)]
pub struct MiniMeResolution {
    pub balance: U256,
    pub balance_decimal: String,
    /// Length of the holder's checkpoint array.
    pub checkpoints: U256,
    /// `fromBlock` of the checkpoint the balance was read from.
    pub from_block: Option<U256>,
    /// The flattened length proof, followed by the checkpoint proof when the
    /// array is not empty.
    #[dbg(formatter = xchain_messages::types::bundle::proofs_pretty)]
    pub proofs: Vec<Bytes>,
}

impl MiniMeResolution {
    pub fn vote_data(&self) -> MiniMeVoteData {
        MiniMeVoteData {
            proofs: self.proofs.clone(),
        }
    }
}

/// A balance read with plain storage reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MiniMeBalance {
    pub balance: U256,
    pub balance_decimal: String,
    pub checkpoints: U256,
}

pub struct MiniMeResolver {
    pool: Arc<RpcPool>,
    fetcher: ProofFetcher,
}

impl MiniMeResolver {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self {
            fetcher: ProofFetcher::new(pool.clone()),
            pool,
        }
    }

    /// `latest` would let the two proof requests see different blocks.
    async fn pin(
        &self,
        chain_id: ChainId,
        block: BlockRef,
    ) -> Result<BlockRef> {
        match block {
            BlockRef::Latest => {
                let rpc = self.pool.connection(chain_id)?;
                Ok(BlockRef::Number(block_number(rpc.as_ref(), block).await?))
            },
            pinned => Ok(pinned),
        }
    }

    /// Proves the holder's checkpoint array length and, when non-empty, its
    /// last checkpoint. Any failure aborts the whole resolution.
    #[tracing::instrument(skip(self), err(Debug))]
    pub async fn resolve(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        slot_index: SlotIndex,
        block: BlockRef,
        decimals: u8,
    ) -> Result<MiniMeResolution> {
        let block = self.pin(chain_id, block).await?;
        let base = balance_slot(holder, slot_index);

        let mut length_phase = self
            .fetcher
            .fetch_storage_proofs(chain_id, block, contract, &[base])
            .await?;
        let length_entry = length_phase
            .pop()
            .ok_or(ProofError::MissingStorageProof(base))?;
        let length = length_entry.value;

        if length.is_zero() {
            debug!("holder has no checkpoints");
            return Ok(MiniMeResolution {
                balance: U256::zero(),
                balance_decimal: format_balance(U256::zero(), decimals)?,
                checkpoints: length,
                from_block: None,
                proofs: vec![reencode_proof_nodes(&length_entry.proof)?],
            });
        }

        let checkpoint = last_checkpoint_slot(base, length);
        let entries = self
            .fetcher
            .fetch_storage_proofs(chain_id, block, contract, &[base, checkpoint])
            .await?;
        let [length_entry, checkpoint_entry]: [_; 2] = entries
            .try_into()
            .map_err(|_| ProofError::InconsistentProof("expected two storage proofs".to_string()))?;
        check_length(length, length_entry.value)?;

        let word = crate::slots::word(checkpoint_entry.value);
        let balance = checkpoint_balance(word);
        debug!(%length, %balance, "last checkpoint resolved");

        Ok(MiniMeResolution {
            balance,
            balance_decimal: format_balance(balance, decimals)?,
            checkpoints: length,
            from_block: Some(checkpoint_from_block(word)),
            proofs: vec![
                reencode_proof_nodes(&length_entry.proof)?,
                reencode_proof_nodes(&checkpoint_entry.proof)?,
            ],
        })
    }

    /// The holder's balance without proofs.
    pub async fn balance(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        slot_index: SlotIndex,
        block: BlockRef,
        decimals: u8,
    ) -> Result<MiniMeBalance> {
        let block = self.pin(chain_id, block).await?;
        let rpc = self.pool.connection(chain_id)?;
        let base = balance_slot(holder, slot_index);

        let length = word_value(rpc.storage_at(contract, base, block).await?);
        let balance = if length.is_zero() {
            U256::zero()
        } else {
            let checkpoint = last_checkpoint_slot(base, length);
            checkpoint_balance(rpc.storage_at(contract, checkpoint, block).await?)
        };

        Ok(MiniMeBalance {
            balance,
            balance_decimal: format_balance(balance, decimals)?,
            checkpoints: length,
        })
    }
}

/// Both proof requests must have seen the same array.
fn check_length(
    first: U256,
    second: U256,
) -> Result<()> {
    if first != second {
        return Err(ProofError::InconsistentProof(format!(
            "checkpoint count changed from {first} to {second} between requests"
        )));
    }
    Ok(())
}
