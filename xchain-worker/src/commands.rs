use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use clap::Subcommand;
use ethers::types::Address;
use ethers::types::H256;
use serde_json::json;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use xchain_messages::types::BalanceLayout;
use xchain_messages::types::BlockRef;
use xchain_messages::types::PollConfig;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;
use xchain_messages::SlotIndex;
use xchain_provers::chains::ChainRegistry;
use xchain_provers::engine::block_ref;
use xchain_provers::slots::ScanObserver;
use xchain_provers::slots::ScanStep;
use xchain_provers::slots::MINIME_SLOT_SHORTLIST;
use xchain_provers::ProofEngine;

#[derive(Subcommand, Clone, Debug)]
pub(crate) enum Command {
    /// List the known chains and whether their state can be proven.
    Chains,

    /// Print the verified RLP encoded header of a block.
    Header {
        /// Chain id or chain name.
        #[clap(long)]
        chain: String,

        #[clap(flatten)]
        block: BlockArgs,
    },

    /// Classify a contract as ERC-20, ERC-721, ERC-1155 or MiniMe.
    Classify {
        #[clap(flatten)]
        target: Target,
    },

    /// Find the storage slot holding a holder's balance.
    LocateSlot {
        #[clap(flatten)]
        target: Target,

        #[clap(long)]
        holder: Address,

        #[clap(flatten)]
        block: BlockArgs,
    },

    /// Build the poll options proving a holder's balance.
    Prove {
        #[clap(flatten)]
        target: Target,

        #[clap(long)]
        holder: Address,

        /// Defaults to the latest block.
        #[clap(long)]
        block_hash: Option<H256>,
    },

    /// Build a voter's storage proof for an existing poll.
    Vote {
        #[clap(flatten)]
        target: Target,

        #[clap(long)]
        holder: Address,

        /// The block the poll was created at.
        #[clap(long)]
        block_hash: H256,

        #[clap(long)]
        slot: SlotIndex,

        /// The token is a MiniMe token.
        #[clap(long, action)]
        checkpoint_array: bool,
    },

    /// Resolve a MiniMe balance from its checkpoints.
    Minime {
        #[clap(flatten)]
        target: Target,

        #[clap(long)]
        holder: Address,

        #[clap(long, default_value_t = MINIME_SLOT_SHORTLIST[0])]
        slot: SlotIndex,

        #[clap(flatten)]
        block: BlockArgs,

        /// Only read the balance, without storage proofs.
        #[clap(long, action)]
        balance_only: bool,
    },
}

#[derive(Args, Clone, Debug)]
pub(crate) struct Target {
    /// Chain id or chain name.
    #[clap(long)]
    chain: String,

    #[clap(long)]
    contract: Address,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct BlockArgs {
    #[clap(long)]
    block_hash: Option<H256>,

    #[clap(long, conflicts_with = "block_hash")]
    block_number: Option<BlockNr>,
}

impl BlockArgs {
    /// The requested block, `latest` when none is given.
    fn block(&self) -> anyhow::Result<BlockRef> {
        match (self.block_hash, self.block_number) {
            (None, None) => Ok(BlockRef::Latest),
            (hash, number) => Ok(block_ref(hash, number)?),
        }
    }
}

impl Target {
    fn chain_id(
        &self,
        registry: &ChainRegistry,
    ) -> anyhow::Result<ChainId> {
        resolve_chain(registry, &self.chain)
    }
}

/// Accepts a numeric chain id or a chain name.
pub(crate) fn resolve_chain(
    registry: &ChainRegistry,
    chain: &str,
) -> anyhow::Result<ChainId> {
    if let Ok(chain_id) = chain.trim().parse::<ChainId>() {
        return Ok(chain_id);
    }
    match registry.chain_by_name(chain) {
        Some(chain_id) => Ok(chain_id),
        None => bail!("unknown chain `{chain}`"),
    }
}

/// Reports scan progress and stops the scan on Ctrl-C.
struct CliObserver {
    cancelled: Arc<AtomicBool>,
}

impl CliObserver {
    fn new() -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping the slot scan");
                flag.store(true, Ordering::SeqCst);
            }
        });
        Self { cancelled }
    }
}

impl ScanObserver for CliObserver {
    fn is_fresh(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    fn on_progress(
        &self,
        step: &ScanStep,
    ) {
        if step.position % 32 == 0 {
            info!("{step}");
        } else {
            debug!("{step}");
        }
    }
}

impl Command {
    pub(crate) async fn execute(
        &self,
        engine: &ProofEngine,
    ) -> anyhow::Result<Value> {
        let registry = engine.registry();
        let output = match self {
            Command::Chains => {
                let chains: Vec<Value> = registry
                    .iter()
                    .map(|chain| {
                        json!({
                            "chain_id": chain.chain_id,
                            "name": chain.name,
                            "hardfork": chain.hardfork,
                            "currency": chain.native_currency.symbol,
                            "provable": !chain.cannot_make_storage_proofs,
                        })
                    })
                    .collect();
                Value::Array(chains)
            },
            Command::Header { chain, block } => {
                let header = engine
                    .encode_header(resolve_chain(registry, chain)?, block.block()?)
                    .await?;
                serde_json::to_value(header)?
            },
            Command::Classify { target } => {
                let contract_type = engine
                    .classify_contract(target.chain_id(registry)?, target.contract)
                    .await?;
                serde_json::to_value(contract_type)?
            },
            Command::LocateSlot {
                target,
                holder,
                block,
            } => {
                let search = engine
                    .locate_slot(
                        target.chain_id(registry)?,
                        target.contract,
                        *holder,
                        block.block()?,
                        &CliObserver::new(),
                    )
                    .await?;
                serde_json::to_value(search)?
            },
            Command::Prove {
                target,
                holder,
                block_hash,
            } => {
                let outcome = engine
                    .prove_balance(
                        target.chain_id(registry)?,
                        target.contract,
                        *holder,
                        *block_hash,
                        &CliObserver::new(),
                    )
                    .await?;
                serde_json::to_value(outcome)?
            },
            Command::Vote {
                target,
                holder,
                block_hash,
                slot,
                checkpoint_array,
            } => {
                let config = PollConfig {
                    block_hash: *block_hash,
                    contract: target.contract,
                    slot: *slot,
                    layout: if *checkpoint_array {
                        BalanceLayout::CheckpointArray
                    } else {
                        BalanceLayout::Mapping
                    },
                };
                let proof = engine
                    .vote_proof(target.chain_id(registry)?, &config, *holder)
                    .await?;
                serde_json::to_value(proof)?
            },
            Command::Minime {
                target,
                holder,
                slot,
                block,
                balance_only,
            } => {
                let chain_id = target.chain_id(registry)?;
                let contract = target.contract;
                if *balance_only {
                    let read = engine
                        .minime_balance(chain_id, contract, *holder, *slot, block.block()?)
                        .await?;
                    serde_json::to_value(read)?
                } else {
                    let resolution = engine
                        .prove_minime(chain_id, contract, *holder, *slot, block.block()?)
                        .await?;
                    let vote_data = resolution.vote_data().abi_encode();
                    json!({
                        "resolution": resolution,
                        "vote_data": vote_data,
                    })
                }
            },
        };
        Ok(output)
    }
}
