use std::fmt::Debug;

use async_trait::async_trait;
use ethers::providers::Http;
use ethers::providers::Provider;
use ethers::providers::ProviderError;
use ethers::providers::RpcError as _;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use tracing::trace;
use xchain_messages::types::BlockRef;

use super::EthRpc;
use super::ProofResponse;
use super::RpcBlock;
use super::RpcError;
use crate::slots::word;

/// An [`EthRpc`] backed by an `ethers` HTTP provider.
#[derive(Debug)]
pub struct HttpRpc {
    provider: Provider<Http>,
}

impl HttpRpc {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| RpcError::Transport(format!("invalid RPC URL: {e}")))?;
        Ok(Self { provider })
    }

    async fn request<R>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcError>
    where
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        trace!(method, %params, "JSON-RPC request");
        self.provider
            .request(method, params)
            .await
            .map_err(RpcError::from)
    }
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            return RpcError::from_response(response.code, &response.message);
        }

        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("429") || lowered.contains("too many requests") {
            RpcError::RateLimited(message)
        } else if err.as_serde_error().is_some() {
            RpcError::Decode(message)
        } else {
            RpcError::Transport(message)
        }
    }
}

#[async_trait]
impl EthRpc for HttpRpc {
    async fn block(
        &self,
        block: BlockRef,
    ) -> Result<Option<RpcBlock>, RpcError> {
        let method = match block {
            BlockRef::Hash(_) => "eth_getBlockByHash",
            BlockRef::Number(_) | BlockRef::Latest => "eth_getBlockByNumber",
        };
        self.request(method, json!([block.to_rpc_param(), false]))
            .await
    }

    async fn storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockRef,
    ) -> Result<H256, RpcError> {
        let value: U256 = self
            .request(
                "eth_getStorageAt",
                json!([address, slot, block.to_rpc_param()]),
            )
            .await?;
        Ok(word(value))
    }

    async fn proof(
        &self,
        address: Address,
        keys: &[H256],
        block: BlockRef,
    ) -> Result<ProofResponse, RpcError> {
        self.request(
            "eth_getProof",
            json!([address, keys, block.to_rpc_param()]),
        )
        .await
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        block: BlockRef,
    ) -> Result<Bytes, RpcError> {
        self.request(
            "eth_call",
            json!([{ "to": to, "data": data }, block.to_rpc_param()]),
        )
        .await
    }
}
