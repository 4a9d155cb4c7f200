use std::fmt::Display;
use std::fmt::Formatter;

use ethers::types::H256;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::BlockNr;

pub mod bundle;
pub mod contract;
pub mod hardfork;
pub mod slot;

pub use bundle::BalanceLayout;
pub use bundle::BundleError;
pub use bundle::MiniMeVoteData;
pub use bundle::PollConfig;
pub use bundle::VoteProofBundle;
pub use contract::ContractKind;
pub use contract::ContractType;
pub use contract::TokenInfo;
pub use hardfork::Hardfork;
pub use slot::StorageSlotProof;

/// Identifies the block a read is pinned to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRef {
    Hash(H256),
    Number(BlockNr),
    Latest,
}

impl BlockRef {
    /// The JSON-RPC block parameter for this reference.
    ///
    /// Hashes are passed as plain strings, which nodes accept wherever a
    /// block number is expected.
    pub fn to_rpc_param(&self) -> String {
        match self {
            BlockRef::Hash(hash) => format!("{hash:#x}"),
            BlockRef::Number(number) => format!("{number:#x}"),
            BlockRef::Latest => "latest".to_string(),
        }
    }
}

impl Display for BlockRef {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            BlockRef::Hash(hash) => write!(f, "{hash:#x}"),
            BlockRef::Number(number) => write!(f, "#{number}"),
            BlockRef::Latest => write!(f, "latest"),
        }
    }
}

/// The identity of a fetched block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockSummary {
    pub hash: H256,
    pub number: BlockNr,
}
