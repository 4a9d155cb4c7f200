//! The entry points used by poll configuration and voting.
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use derive_debug_plus::Dbg;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use serde_derive::Serialize;
use tracing::info;
use tracing::warn;
use xchain_messages::types::BalanceLayout;
use xchain_messages::types::BlockRef;
use xchain_messages::types::BlockSummary;
use xchain_messages::types::ContractKind;
use xchain_messages::types::ContractType;
use xchain_messages::types::PollConfig;
use xchain_messages::types::StorageSlotProof;
use xchain_messages::types::TokenInfo;
use xchain_messages::types::VoteProofBundle;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;
use xchain_messages::SlotIndex;

use crate::chains::ChainDefinition;
use crate::chains::ChainRegistry;
use crate::detect::ContractDetector;
use crate::error::ProofError;
use crate::error::Result;
use crate::header::EncodedHeader;
use crate::header::HeaderCodec;
use crate::metrics::Metrics;
use crate::minime::MiniMeBalance;
use crate::minime::MiniMeResolution;
use crate::minime::MiniMeResolver;
use crate::proofs::ProofFetcher;
use crate::rpc::Connector;
use crate::rpc::HttpConnector;
use crate::rpc::RpcPool;
use crate::slots::word_value;
use crate::slots::ScanObserver;
use crate::slots::SlotLocator;
use crate::slots::SlotSearch;

/// A block given either by hash or by number; the hash wins when both are
/// present.
pub fn block_ref(
    hash: Option<H256>,
    number: Option<BlockNr>,
) -> Result<BlockRef> {
    match (hash, number) {
        (Some(hash), _) => Ok(BlockRef::Hash(hash)),
        (None, Some(number)) => Ok(BlockRef::Number(number)),
        (None, None) => Err(ProofError::MissingBlock),
    }
}

/// Everything needed to create a storage-proof poll for one holder.
#[derive(Clone, Dbg, PartialEq, Eq, Serialize)]
pub struct BalanceProof {
    pub contract_type: ContractType,
    pub slot: StorageSlotProof,
    pub header: EncodedHeader,
    pub bundle: VoteProofBundle,
    /// `bundle`, ABI encoded for the ACL.
    #[dbg(placeholder = "...")]
    pub options: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ProveOutcome {
    Proven(Box<BalanceProof>),
    /// The holder has no balance, so there is nothing to prove.
    NotFound,
    Cancelled,
}

/// What a voter submits alongside their vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VoteProof {
    /// A zero balance never needs a proof.
    ZeroBalance,
    Proof { balance: U256, data: Bytes },
}

pub struct ProofEngine {
    pool: Arc<RpcPool>,
    detector: ContractDetector,
    locator: SlotLocator,
    headers: HeaderCodec,
    proofs: ProofFetcher,
    minime: MiniMeResolver,
    metrics: Metrics,
}

impl ProofEngine {
    /// An engine talking to the registry's endpoints over HTTP.
    pub fn new(registry: ChainRegistry) -> Self {
        Self::with_connector(Arc::new(registry), Arc::new(HttpConnector))
    }

    pub fn with_connector(
        registry: Arc<ChainRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::from_pool(Arc::new(RpcPool::new(registry, connector)))
    }

    pub fn from_pool(pool: Arc<RpcPool>) -> Self {
        Self {
            detector: ContractDetector::new(pool.clone()),
            locator: SlotLocator::new(pool.clone()),
            headers: HeaderCodec::new(pool.clone()),
            proofs: ProofFetcher::new(pool.clone()),
            minime: MiniMeResolver::new(pool.clone()),
            pool,
            metrics: Metrics::new(),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        self.pool.registry()
    }

    /// Rejects requests that cannot succeed before any RPC is made.
    fn provable_chain(
        &self,
        chain_id: ChainId,
    ) -> Result<&ChainDefinition> {
        let chain = self.registry().get(chain_id)?;
        if chain.cannot_make_storage_proofs {
            return Err(ProofError::UnprovableChain(chain_id));
        }
        if !chain.knows_hardfork() {
            return Err(ProofError::UnknownHardfork {
                chain_id,
                block: None,
            });
        }
        Ok(chain)
    }

    async fn measured<T, F>(
        &self,
        kind: &str,
        operation: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = operation.await;
        match &result {
            Ok(_) => {
                self.metrics.increment_proofs_generated(kind);
                self.metrics
                    .observe_proof_duration(kind, start.elapsed().as_secs_f64());
            },
            Err(err) => {
                warn!(kind, %err, "proof request failed");
                self.metrics.increment_proof_failures(kind, err.label());
            },
        }
        result
    }

    pub async fn latest_block(
        &self,
        chain_id: ChainId,
    ) -> Result<BlockSummary> {
        self.registry().get(chain_id)?;
        self.headers.summary(chain_id, BlockRef::Latest).await
    }

    pub async fn classify_contract(
        &self,
        chain_id: ChainId,
        contract: Address,
    ) -> Result<ContractType> {
        self.provable_chain(chain_id)?;
        self.detector.classify(chain_id, contract).await
    }

    /// Name, symbol, decimals and supply of a token contract, from the
    /// classification cache. `None` when the contract is not a known token.
    pub async fn token_details(
        &self,
        chain_id: ChainId,
        contract: Address,
    ) -> Result<Option<TokenInfo>> {
        let contract_type = self.classify_contract(chain_id, contract).await?;
        Ok(contract_type.info().cloned())
    }

    pub async fn locate_slot(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        block: BlockRef,
        observer: &dyn ScanObserver,
    ) -> Result<SlotSearch> {
        self.provable_chain(chain_id)?;
        let contract_type = self.detector.classify(chain_id, contract).await?;
        self.locator
            .locate(chain_id, contract, &contract_type, holder, block, observer)
            .await
    }

    pub async fn encode_header(
        &self,
        chain_id: ChainId,
        block: BlockRef,
    ) -> Result<EncodedHeader> {
        self.headers.encode(chain_id, block).await
    }

    pub async fn fetch_account_proof(
        &self,
        chain_id: ChainId,
        block_hash: H256,
        contract: Address,
    ) -> Result<Bytes> {
        self.provable_chain(chain_id)?;
        self.proofs
            .fetch_account_proof(chain_id, BlockRef::Hash(block_hash), contract)
            .await
    }

    pub async fn fetch_storage_proof(
        &self,
        chain_id: ChainId,
        block_hash: H256,
        contract: Address,
        slot_index: SlotIndex,
        holder: Address,
    ) -> Result<Bytes> {
        self.provable_chain(chain_id)?;
        self.proofs
            .fetch_storage_proof(
                chain_id,
                BlockRef::Hash(block_hash),
                contract,
                slot_index,
                holder,
            )
            .await
    }

    pub async fn fetch_storage_value(
        &self,
        chain_id: ChainId,
        block_hash: H256,
        contract: Address,
        slot_index: SlotIndex,
        holder: Address,
    ) -> Result<H256> {
        self.provable_chain(chain_id)?;
        self.proofs
            .fetch_storage_value(
                chain_id,
                BlockRef::Hash(block_hash),
                contract,
                slot_index,
                holder,
            )
            .await
    }

    /// Builds the poll options proving `holder`'s balance of `contract` at
    /// `block_hash`, or at the latest block when no hash is given.
    #[tracing::instrument(skip(self, observer), err(Debug))]
    pub async fn prove_balance(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        block_hash: Option<H256>,
        observer: &dyn ScanObserver,
    ) -> Result<ProveOutcome> {
        self.provable_chain(chain_id)?;
        self.measured("balance", async {
            let block_hash = match block_hash {
                Some(hash) => hash,
                None => self.latest_block(chain_id).await?.hash,
            };
            let block = BlockRef::Hash(block_hash);

            let contract_type = self.detector.classify(chain_id, contract).await?;
            let slot = match self
                .locator
                .locate(chain_id, contract, &contract_type, holder, block, observer)
                .await?
            {
                SlotSearch::Found(slot) => slot,
                SlotSearch::NotFound => return Ok(ProveOutcome::NotFound),
                SlotSearch::Cancelled => return Ok(ProveOutcome::Cancelled),
            };

            let header = self.headers.encode(chain_id, block).await?;
            let account_proof = self
                .proofs
                .fetch_account_proof(chain_id, block, contract)
                .await?;

            let layout = match contract_type.kind() {
                ContractKind::MiniMe => BalanceLayout::CheckpointArray,
                _ => BalanceLayout::Mapping,
            };
            let bundle = VoteProofBundle {
                config: PollConfig {
                    block_hash,
                    contract,
                    slot: slot.slot_index,
                    layout,
                },
                header_rlp: header.rlp.clone(),
                account_proof_rlp: account_proof,
            };
            info!(slot = slot.slot_index, balance = %slot.balance_decimal, "balance proof built");

            Ok(ProveOutcome::Proven(Box::new(BalanceProof {
                contract_type,
                slot,
                options: bundle.abi_encode(),
                header,
                bundle,
            })))
        })
        .await
    }

    /// The voter's proof for a poll created with `config`.
    ///
    /// The balance is read first so that holders without one never pay for a
    /// proof.
    #[tracing::instrument(skip(self), err(Debug))]
    pub async fn vote_proof(
        &self,
        chain_id: ChainId,
        config: &PollConfig,
        holder: Address,
    ) -> Result<VoteProof> {
        self.provable_chain(chain_id)?;
        self.measured("vote", async {
            let block = BlockRef::Hash(config.block_hash);
            match config.layout {
                BalanceLayout::Mapping => {
                    let value = self
                        .proofs
                        .fetch_storage_value(chain_id, block, config.contract, config.slot, holder)
                        .await?;
                    if value.is_zero() {
                        return Ok(VoteProof::ZeroBalance);
                    }
                    let data = self
                        .proofs
                        .fetch_storage_proof(chain_id, block, config.contract, config.slot, holder)
                        .await?;
                    Ok(VoteProof::Proof {
                        balance: word_value(value),
                        data,
                    })
                },
                BalanceLayout::CheckpointArray => {
                    let read = self
                        .minime
                        .balance(chain_id, config.contract, holder, config.slot, block, 0)
                        .await?;
                    if read.balance.is_zero() {
                        return Ok(VoteProof::ZeroBalance);
                    }
                    let resolution = self
                        .minime
                        .resolve(chain_id, config.contract, holder, config.slot, block, 0)
                        .await?;
                    Ok(VoteProof::Proof {
                        balance: resolution.balance,
                        data: resolution.vote_data().abi_encode(),
                    })
                },
            }
        })
        .await
    }

    /// Resolves a MiniMe balance with its storage proofs.
    pub async fn prove_minime(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        slot_index: SlotIndex,
        block: BlockRef,
    ) -> Result<MiniMeResolution> {
        self.provable_chain(chain_id)?;
        self.measured("minime", async {
            let decimals = self
                .detector
                .classify(chain_id, contract)
                .await?
                .display_decimals();
            self.minime
                .resolve(chain_id, contract, holder, slot_index, block, decimals)
                .await
        })
        .await
    }

    /// Reads a MiniMe balance without proofs.
    pub async fn minime_balance(
        &self,
        chain_id: ChainId,
        contract: Address,
        holder: Address,
        slot_index: SlotIndex,
        block: BlockRef,
    ) -> Result<MiniMeBalance> {
        self.provable_chain(chain_id)?;
        let decimals = self
            .detector
            .classify(chain_id, contract)
            .await?
            .display_decimals();
        self.minime
            .balance(chain_id, contract, holder, slot_index, block, decimals)
            .await
    }
}
