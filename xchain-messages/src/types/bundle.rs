//! Call-data consumed by the on-chain storage-proof ACL.
//!
//! The tuple shapes below are decoded by deployed contracts and must stay
//! bit-for-bit stable.
use derive_debug_plus::Dbg;
use ethers::abi::ParamType;
use ethers::abi::Token;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use thiserror::Error;

use crate::SlotIndex;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("ABI decoding failed: {0}")]
    Abi(#[from] ethers::abi::Error),

    #[error("unexpected ABI layout: {0}")]
    Layout(&'static str),
}

/// How a token stores per-holder balances.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceLayout {
    /// `mapping(address => uint256)`, one word per holder.
    Mapping,
    /// MiniMe `mapping(address => Checkpoint[])`.
    CheckpointArray,
}

/// The poll parameters the ACL pins at creation time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollConfig {
    pub block_hash: H256,
    pub contract: Address,
    pub slot: SlotIndex,
    pub layout: BalanceLayout,
}

impl PollConfig {
    fn param_type(layout: BalanceLayout) -> ParamType {
        let mut fields = vec![
            ParamType::FixedBytes(32),
            ParamType::Address,
            ParamType::Uint(256),
        ];
        if layout == BalanceLayout::CheckpointArray {
            fields.push(ParamType::Bool);
        }
        ParamType::Tuple(fields)
    }

    fn to_token(&self) -> Token {
        let mut fields = vec![
            Token::FixedBytes(self.block_hash.as_bytes().to_vec()),
            Token::Address(self.contract),
            Token::Uint(U256::from(self.slot)),
        ];
        if self.layout == BalanceLayout::CheckpointArray {
            fields.push(Token::Bool(true));
        }
        Token::Tuple(fields)
    }

    fn from_token(
        token: Token,
        layout: BalanceLayout,
    ) -> Result<Self, BundleError> {
        let mut fields = token
            .into_tuple()
            .ok_or(BundleError::Layout("poll config is not a tuple"))?
            .into_iter();
        let block_hash = fields
            .next()
            .and_then(Token::into_fixed_bytes)
            .filter(|b| b.len() == 32)
            .map(|b| H256::from_slice(&b))
            .ok_or(BundleError::Layout("block hash"))?;
        let contract = fields
            .next()
            .and_then(Token::into_address)
            .ok_or(BundleError::Layout("contract address"))?;
        let slot = fields
            .next()
            .and_then(Token::into_uint)
            .filter(|s| s.bits() <= 64)
            .map(|s| s.as_u64())
            .ok_or(BundleError::Layout("slot number"))?;
        if layout == BalanceLayout::CheckpointArray {
            let flag = fields
                .next()
                .and_then(Token::into_bool)
                .ok_or(BundleError::Layout("checkpoint array flag"))?;
            if !flag {
                return Err(BundleError::Layout("checkpoint array flag is not set"));
            }
        }
        Ok(Self {
            block_hash,
            contract,
            slot,
            layout,
        })
    }
}

/// Poll creation data: `tuple(tuple(bytes32,address,uint256[,bool]),bytes,bytes)`.
#[derive(Clone, Dbg, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoteProofBundle {
    pub config: PollConfig,

    /// RLP of the header whose hash is `config.block_hash`.
    #[dbg(placeholder = "...")]
    pub header_rlp: Bytes,

    /// The contract's account proof as one RLP list of trie nodes.
    #[dbg(placeholder = "...")]
    pub account_proof_rlp: Bytes,
}

impl VoteProofBundle {
    fn param_types(layout: BalanceLayout) -> Vec<ParamType> {
        vec![ParamType::Tuple(vec![
            PollConfig::param_type(layout),
            ParamType::Bytes,
            ParamType::Bytes,
        ])]
    }

    pub fn abi_encode(&self) -> Bytes {
        ethers::abi::encode(&[Token::Tuple(vec![
            self.config.to_token(),
            Token::Bytes(self.header_rlp.to_vec()),
            Token::Bytes(self.account_proof_rlp.to_vec()),
        ])])
        .into()
    }

    pub fn abi_decode(
        data: &[u8],
        layout: BalanceLayout,
    ) -> Result<Self, BundleError> {
        let mut tokens = ethers::abi::decode(&Self::param_types(layout), data)?;
        let outer = tokens
            .pop()
            .and_then(Token::into_tuple)
            .ok_or(BundleError::Layout("bundle is not a tuple"))?;
        let [config, header, account]: [Token; 3] = outer
            .try_into()
            .map_err(|_| BundleError::Layout("bundle must have three fields"))?;
        Ok(Self {
            config: PollConfig::from_token(config, layout)?,
            header_rlp: header
                .into_bytes()
                .ok_or(BundleError::Layout("header"))?
                .into(),
            account_proof_rlp: account
                .into_bytes()
                .ok_or(BundleError::Layout("account proof"))?
                .into(),
        })
    }
}

/// MiniMe vote data: `bytes[]` holding the length proof and, when the holder
/// has checkpoints, the last checkpoint's proof.
#[derive(Clone, Dbg, PartialEq, Eq, Deserialize, Serialize)]
pub struct MiniMeVoteData {
    #[dbg(formatter = crate::types::bundle::proofs_pretty)]
    pub proofs: Vec<Bytes>,
}

pub fn proofs_pretty(proofs: &[Bytes]) -> String {
    format!("{} proof(s)", proofs.len())
}

impl MiniMeVoteData {
    pub fn abi_encode(&self) -> Bytes {
        let proofs = self
            .proofs
            .iter()
            .map(|p| Token::Bytes(p.to_vec()))
            .collect();
        ethers::abi::encode(&[Token::Array(proofs)]).into()
    }

    pub fn abi_decode(data: &[u8]) -> Result<Self, BundleError> {
        let param = ParamType::Array(Box::new(ParamType::Bytes));
        let proofs = ethers::abi::decode(&[param], data)?
            .pop()
            .and_then(Token::into_array)
            .ok_or(BundleError::Layout("vote data is not an array"))?
            .into_iter()
            .map(|t| t.into_bytes().map(Bytes::from))
            .collect::<Option<Vec<_>>>()
            .ok_or(BundleError::Layout("vote data entry is not bytes"))?;
        Ok(Self { proofs })
    }
}
