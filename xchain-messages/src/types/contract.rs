use std::fmt::Display;
use std::fmt::Formatter;

use derive_debug_plus::Dbg;
use ethers::types::U256;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Decimals assumed for fungible tokens that do not report their own.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Metadata read from a token contract's optional getters.
#[derive(Clone, Default, Dbg, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenInfo {
    pub name: Option<String>,

    pub symbol: Option<String>,

    /// Only present for fungible tokens.
    pub decimals: Option<u8>,

    #[dbg(formatter = crate::types::contract::supply_pretty)]
    pub total_supply: Option<U256>,
}

pub fn supply_pretty(supply: &Option<U256>) -> String {
    supply
        .map(|s| s.to_string())
        .unwrap_or("unknown".to_string())
}

/// A token standard, without its metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ContractKind {
    #[serde(rename = "ERC-20")]
    Erc20,
    #[serde(rename = "ERC-721")]
    Erc721,
    #[serde(rename = "ERC-1155")]
    Erc1155,
    MiniMe,
    Unknown,
}

impl Display for ContractKind {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        let label = match self {
            ContractKind::Erc20 => "ERC-20",
            ContractKind::Erc721 => "ERC-721",
            ContractKind::Erc1155 => "ERC-1155",
            ContractKind::MiniMe => "MiniMe",
            ContractKind::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// The classification of a contract address.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", content = "info")]
pub enum ContractType {
    #[serde(rename = "ERC-20")]
    Erc20(TokenInfo),
    #[serde(rename = "ERC-721")]
    Erc721(TokenInfo),
    #[serde(rename = "ERC-1155")]
    Erc1155(TokenInfo),
    MiniMe(TokenInfo),
    Unknown,
}

impl ContractType {
    pub fn kind(&self) -> ContractKind {
        match self {
            ContractType::Erc20(_) => ContractKind::Erc20,
            ContractType::Erc721(_) => ContractKind::Erc721,
            ContractType::Erc1155(_) => ContractKind::Erc1155,
            ContractType::MiniMe(_) => ContractKind::MiniMe,
            ContractType::Unknown => ContractKind::Unknown,
        }
    }

    pub fn info(&self) -> Option<&TokenInfo> {
        match self {
            ContractType::Erc20(info)
            | ContractType::Erc721(info)
            | ContractType::Erc1155(info)
            | ContractType::MiniMe(info) => Some(info),
            ContractType::Unknown => None,
        }
    }

    /// The number of decimals balances should be rendered with.
    ///
    /// NFT balances are item counts and always use zero.
    pub fn display_decimals(&self) -> u8 {
        match self {
            ContractType::Erc20(info) | ContractType::MiniMe(info) => {
                info.decimals.unwrap_or(DEFAULT_DECIMALS)
            },
            ContractType::Erc721(_) | ContractType::Erc1155(_) | ContractType::Unknown => 0,
        }
    }
}

impl Display for ContractType {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self.info().and_then(|info| info.symbol.as_ref()) {
            Some(symbol) => write!(f, "{} ({symbol})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenInfo {
        TokenInfo {
            name: Some("USD Coin".to_string()),
            symbol: Some("USDC".to_string()),
            decimals: Some(6),
            total_supply: Some(U256::from(1_000_000u64)),
        }
    }

    #[test]
    fn nft_balances_have_no_decimals() {
        assert_eq!(ContractType::Erc20(usdc()).display_decimals(), 6);
        assert_eq!(ContractType::Erc721(TokenInfo::default()).display_decimals(), 0);
        assert_eq!(
            ContractType::MiniMe(TokenInfo::default()).display_decimals(),
            DEFAULT_DECIMALS
        );
    }

    #[test]
    fn serializes_with_standard_labels() {
        let json = serde_json::to_value(ContractType::Erc20(usdc())).unwrap();
        assert_eq!(json["type"], "ERC-20");
        assert_eq!(json["info"]["symbol"], "USDC");

        let json = serde_json::to_value(ContractType::Unknown).unwrap();
        assert_eq!(json["type"], "Unknown");
    }

    #[test]
    fn display_includes_symbol() {
        assert_eq!(ContractType::Erc20(usdc()).to_string(), "ERC-20 (USDC)");
        assert_eq!(ContractType::Unknown.to_string(), "Unknown");
    }
}
