//! Read-only contract calls used for classification and balance lookups.
use ethers::abi::ParamType;
use ethers::abi::Token;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::U256;
use ethers::utils::id;
use xchain_messages::types::BlockRef;
use xchain_messages::BlockNr;

use crate::rpc::EthRpc;
use crate::rpc::RpcError;

pub const ERC721_INTERFACE_ID: [u8; 4] = [0x80, 0xac, 0x58, 0xcd];
pub const ERC1155_INTERFACE_ID: [u8; 4] = [0xd9, 0xb6, 0x7a, 0x26];

/// Selector of `signature` followed by the ABI encoded arguments.
pub fn calldata(
    signature: &str,
    args: &[Token],
) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(ethers::abi::encode(args));
    data.into()
}

/// Decodes a single return value. Empty return data, as produced by calls to
/// accounts without code, is a failure rather than a default value.
pub fn decode_return(
    kind: ParamType,
    data: &[u8],
) -> Result<Token, RpcError> {
    if data.is_empty() {
        return Err(RpcError::Decode("empty return data".to_string()));
    }
    ethers::abi::decode(&[kind], data)
        .map_err(|e| RpcError::Decode(e.to_string()))?
        .pop()
        .ok_or(RpcError::Decode("missing return value".to_string()))
}

/// Typed getters on a contract, all pinned to one block.
pub struct TokenReader<'a> {
    rpc: &'a dyn EthRpc,
    contract: Address,
    block: BlockRef,
}

impl<'a> TokenReader<'a> {
    pub fn new(
        rpc: &'a dyn EthRpc,
        contract: Address,
        block: BlockRef,
    ) -> Self {
        Self {
            rpc,
            contract,
            block,
        }
    }

    async fn read(
        &self,
        signature: &str,
        args: &[Token],
        kind: ParamType,
    ) -> Result<Token, RpcError> {
        let output = self
            .rpc
            .call(self.contract, calldata(signature, args), self.block)
            .await?;
        decode_return(kind, &output)
    }

    async fn read_uint(
        &self,
        signature: &str,
        args: &[Token],
    ) -> Result<U256, RpcError> {
        self.read(signature, args, ParamType::Uint(256))
            .await?
            .into_uint()
            .ok_or_else(|| RpcError::Decode(format!("{signature} did not return a uint")))
    }

    async fn read_string(
        &self,
        signature: &str,
    ) -> Result<String, RpcError> {
        self.read(signature, &[], ParamType::String)
            .await?
            .into_string()
            .ok_or_else(|| RpcError::Decode(format!("{signature} did not return a string")))
    }

    async fn read_bool(
        &self,
        signature: &str,
        args: &[Token],
    ) -> Result<bool, RpcError> {
        self.read(signature, args, ParamType::Bool)
            .await?
            .into_bool()
            .ok_or_else(|| RpcError::Decode(format!("{signature} did not return a bool")))
    }

    pub async fn name(&self) -> Result<String, RpcError> {
        self.read_string("name()").await
    }

    pub async fn symbol(&self) -> Result<String, RpcError> {
        self.read_string("symbol()").await
    }

    pub async fn decimals(&self) -> Result<u8, RpcError> {
        let decimals = self.read_uint("decimals()", &[]).await?;
        if decimals > U256::from(u8::MAX) {
            return Err(RpcError::Decode(format!(
                "decimals() out of range: {decimals}"
            )));
        }
        Ok(decimals.as_u32() as u8)
    }

    pub async fn total_supply(&self) -> Result<U256, RpcError> {
        self.read_uint("totalSupply()", &[]).await
    }

    pub async fn balance_of(
        &self,
        holder: Address,
    ) -> Result<U256, RpcError> {
        self.read_uint("balanceOf(address)", &[Token::Address(holder)])
            .await
    }

    /// MiniMe's historical balance getter.
    pub async fn balance_of_at(
        &self,
        holder: Address,
        block: BlockNr,
    ) -> Result<U256, RpcError> {
        self.read_uint(
            "balanceOfAt(address,uint256)",
            &[Token::Address(holder), Token::Uint(U256::from(block))],
        )
        .await
    }

    /// ERC-165 `supportsInterface(bytes4)`.
    pub async fn supports_interface(
        &self,
        interface_id: [u8; 4],
    ) -> Result<bool, RpcError> {
        self.read_bool(
            "supportsInterface(bytes4)",
            &[Token::FixedBytes(interface_id.to_vec())],
        )
        .await
    }

    pub async fn is_approved_for_all(
        &self,
        owner: Address,
        operator: Address,
    ) -> Result<bool, RpcError> {
        self.read_bool(
            "isApprovedForAll(address,address)",
            &[Token::Address(owner), Token::Address(operator)],
        )
        .await
    }
}
