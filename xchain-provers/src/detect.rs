//! Classification of token contracts by probing the functions they answer.
use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::Address;
use ethers::types::H160;
use tracing::debug;
use tracing::info;
use xchain_messages::types::BlockRef;
use xchain_messages::types::ContractType;
use xchain_messages::types::TokenInfo;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;

use crate::calls::TokenReader;
use crate::calls::ERC1155_INTERFACE_ID;
use crate::calls::ERC721_INTERFACE_ID;
use crate::error::Result;
use crate::rpc::RpcError;
use crate::rpc::RpcPool;

/// Lido DAO token (LDO) on Ethereum mainnet.
pub const LDO_TOKEN: H160 = H160([
    0x5a, 0x98, 0xfc, 0xbe, 0xa5, 0x16, 0xcf, 0x06, 0x85, 0x72, 0x15, 0x77, 0x9f, 0xd8, 0x12, 0xca,
    0x3b, 0xef, 0x1b, 0x32,
]);

/// An LDO holder; `balanceOfAt` for this pair succeeds on any MiniMe token.
pub const MINIME_PROBE_OWNER: H160 = H160([
    0x3e, 0x40, 0xd7, 0x3e, 0xb9, 0x77, 0xdc, 0x6a, 0x53, 0x7a, 0xf5, 0x87, 0xd4, 0x83, 0x16, 0xfe,
    0xe6, 0x6e, 0x9c, 0x8c,
]);

pub const MINIME_PROBE_BLOCK: BlockNr = 21_672_028;

/// Turns a probe result into "answered" or "did not answer". Only a
/// refusal by the contract itself counts as not answering; node and
/// connectivity failures say nothing about the contract and are propagated.
fn answered<T>(result: std::result::Result<T, RpcError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_contract_refusal() => {
            debug!(%err, "probe not answered");
            Ok(None)
        },
        Err(err) => Err(err.into()),
    }
}

/// Classifies contracts and caches the result per chain and address.
pub struct ContractDetector {
    pool: Arc<RpcPool>,
    cache: DashMap<(ChainId, Address), ContractType>,
    known_minime: Vec<(ChainId, Address)>,
}

impl ContractDetector {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
            known_minime: vec![(1, LDO_TOKEN)],
        }
    }

    /// The cached classification, probing the contract on first use.
    ///
    /// Classifications that failed on an RPC error are not cached.
    pub async fn classify(
        &self,
        chain_id: ChainId,
        contract: Address,
    ) -> Result<ContractType> {
        if let Some(cached) = self.cache.get(&(chain_id, contract)) {
            return Ok(cached.value().clone());
        }

        let detected = self.detect(chain_id, contract).await?;
        info!(chain_id, ?contract, kind = %detected.kind(), "contract classified");
        self.cache.insert((chain_id, contract), detected.clone());
        Ok(detected)
    }

    /// Probes in a fixed order: ERC-165 NFT interfaces, MiniMe, ERC-20
    /// metadata, then the ERC-721 functions for NFTs without ERC-165.
    #[tracing::instrument(skip(self), err(Debug))]
    async fn detect(
        &self,
        chain_id: ChainId,
        contract: Address,
    ) -> Result<ContractType> {
        let rpc = self.pool.connection(chain_id)?;
        let reader = TokenReader::new(rpc.as_ref(), contract, BlockRef::Latest);

        if answered(reader.supports_interface(ERC721_INTERFACE_ID).await)? == Some(true) {
            return Ok(ContractType::Erc721(nft_info(&reader).await?));
        }
        if answered(reader.supports_interface(ERC1155_INTERFACE_ID).await)? == Some(true) {
            return Ok(ContractType::Erc1155(nft_info(&reader).await?));
        }

        if self.is_minime(chain_id, contract, &reader).await? {
            if let Some(info) = fungible_info(&reader).await? {
                return Ok(ContractType::MiniMe(info));
            }
        }

        if let Some(info) = fungible_info(&reader).await? {
            return Ok(ContractType::Erc20(info));
        }

        let holder_count = answered(reader.balance_of(MINIME_PROBE_OWNER).await)?;
        let approvals = answered(
            reader
                .is_approved_for_all(MINIME_PROBE_OWNER, contract)
                .await,
        )?;
        if holder_count.is_some() && approvals.is_some() {
            return Ok(ContractType::Erc721(nft_info(&reader).await?));
        }

        Ok(ContractType::Unknown)
    }

    async fn is_minime(
        &self,
        chain_id: ChainId,
        contract: Address,
        reader: &TokenReader<'_>,
    ) -> Result<bool> {
        if self.known_minime.contains(&(chain_id, contract)) {
            return Ok(true);
        }
        let probe = reader
            .balance_of_at(MINIME_PROBE_OWNER, MINIME_PROBE_BLOCK)
            .await;
        Ok(answered(probe)?.is_some())
    }
}

/// Name, symbol, decimals and total supply; `None` unless all four answer.
async fn fungible_info(reader: &TokenReader<'_>) -> Result<Option<TokenInfo>> {
    let Some(name) = answered(reader.name().await)? else {
        return Ok(None);
    };
    let Some(symbol) = answered(reader.symbol().await)? else {
        return Ok(None);
    };
    let Some(decimals) = answered(reader.decimals().await)? else {
        return Ok(None);
    };
    let Some(total_supply) = answered(reader.total_supply().await)? else {
        return Ok(None);
    };
    Ok(Some(TokenInfo {
        name: Some(name),
        symbol: Some(symbol),
        decimals: Some(decimals),
        total_supply: Some(total_supply),
    }))
}

/// Optional NFT metadata; collections often omit it.
async fn nft_info(reader: &TokenReader<'_>) -> Result<TokenInfo> {
    Ok(TokenInfo {
        name: answered(reader.name().await)?,
        symbol: answered(reader.symbol().await)?,
        decimals: None,
        total_supply: answered(reader.total_supply().await)?,
    })
}
