use std::collections::BTreeMap;

use serde_derive::Serialize;
use xchain_messages::types::Hardfork;
use xchain_messages::BlockNr;
use xchain_messages::ChainId;

use crate::error::ProofError;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Explorer {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainDefinition {
    pub chain_id: ChainId,

    pub name: String,

    /// One is picked at random for every new connection.
    pub rpc_urls: Vec<String>,

    /// Header layout of recent blocks, used when `hardfork_schedule` does
    /// not cover the block.
    pub hardfork: Option<Hardfork>,

    /// Activation blocks in ascending order.
    pub hardfork_schedule: Vec<(BlockNr, Hardfork)>,

    pub native_currency: NativeCurrency,

    pub explorers: Vec<Explorer>,

    /// The chain's state cannot be proven with `eth_getProof`.
    pub cannot_make_storage_proofs: bool,
}

impl ChainDefinition {
    /// The header layout in force at `block`.
    pub fn hardfork_at(
        &self,
        block: BlockNr,
    ) -> Option<Hardfork> {
        self.hardfork_schedule
            .iter()
            .rev()
            .find(|(activation, _)| *activation <= block)
            .map(|(_, fork)| *fork)
            .or(self.hardfork)
    }

    pub fn knows_hardfork(&self) -> bool {
        self.hardfork.is_some() || !self.hardfork_schedule.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainDefinition>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainDefinition>) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|chain| (chain.chain_id, chain))
                .collect(),
        }
    }

    /// The chains known out of the box.
    pub fn builtin() -> Self {
        Self::new(builtin_chains())
    }

    /// Replaces the RPC URLs of the given chains.
    pub fn with_rpc_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (ChainId, Vec<String>)>,
    ) -> Result<Self> {
        for (chain_id, urls) in overrides {
            let chain = self
                .chains
                .get_mut(&chain_id)
                .ok_or(ProofError::UnknownChain(chain_id))?;
            chain.rpc_urls = urls;
        }
        Ok(self)
    }

    pub fn get(
        &self,
        chain_id: ChainId,
    ) -> Result<&ChainDefinition> {
        self.chains
            .get(&chain_id)
            .ok_or(ProofError::UnknownChain(chain_id))
    }

    /// Looks a chain up by its display name, ignoring case.
    pub fn chain_by_name(
        &self,
        name: &str,
    ) -> Option<ChainId> {
        self.chains
            .values()
            .find(|chain| chain.name.eq_ignore_ascii_case(name.trim()))
            .map(|chain| chain.chain_id)
    }

    /// Chains whose state can be proven, as `(id, name)` pairs.
    pub fn chains_for_xchain(&self) -> Vec<(ChainId, &str)> {
        self.chains
            .values()
            .filter(|chain| !chain.cannot_make_storage_proofs)
            .map(|chain| (chain.chain_id, chain.name.as_str()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDefinition> {
        self.chains.values()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

const MAINNET_SCHEDULE: [(BlockNr, Hardfork); 5] = [
    (0, Hardfork::PreLondon),
    (12_965_000, Hardfork::London),
    (17_034_870, Hardfork::Shanghai),
    (19_426_587, Hardfork::Cancun),
    (22_431_084, Hardfork::Prague),
];

/// Sepolia started with London active at genesis.
const SEPOLIA_SCHEDULE: [(BlockNr, Hardfork); 4] = [
    (0, Hardfork::London),
    (2_990_908, Hardfork::Shanghai),
    (5_187_023, Hardfork::Cancun),
    (7_836_331, Hardfork::Prague),
];

fn currency(
    name: &str,
    symbol: &str,
) -> NativeCurrency {
    NativeCurrency {
        name: name.to_string(),
        symbol: symbol.to_string(),
        decimals: 18,
    }
}

fn chain(
    chain_id: ChainId,
    name: &str,
    rpc_urls: &[&str],
    hardfork: Option<Hardfork>,
    native_currency: NativeCurrency,
    explorer: (&str, &str),
) -> ChainDefinition {
    ChainDefinition {
        chain_id,
        name: name.to_string(),
        rpc_urls: rpc_urls.iter().map(|url| url.to_string()).collect(),
        hardfork,
        hardfork_schedule: Vec::new(),
        native_currency,
        explorers: vec![Explorer {
            name: explorer.0.to_string(),
            url: explorer.1.to_string(),
        }],
        cannot_make_storage_proofs: false,
    }
}

fn builtin_chains() -> Vec<ChainDefinition> {
    let mut mainnet = chain(
        1,
        "Ethereum Mainnet",
        &[
            "https://ethereum-rpc.publicnode.com",
            "https://eth.llamarpc.com",
        ],
        Some(Hardfork::Prague),
        currency("Ether", "ETH"),
        ("Etherscan", "https://etherscan.io"),
    );
    mainnet.hardfork_schedule = MAINNET_SCHEDULE.to_vec();

    let mut sepolia = chain(
        11155111,
        "Sepolia",
        &["https://ethereum-sepolia-rpc.publicnode.com"],
        Some(Hardfork::Prague),
        currency("Sepolia Ether", "ETH"),
        ("Etherscan", "https://sepolia.etherscan.io"),
    );
    sepolia.hardfork_schedule = SEPOLIA_SCHEDULE.to_vec();

    let mut sapphire = chain(
        23294,
        "Oasis Sapphire",
        &["https://sapphire.oasis.io"],
        None,
        currency("Rose", "ROSE"),
        ("Oasis Explorer", "https://explorer.oasis.io/mainnet/sapphire"),
    );
    sapphire.cannot_make_storage_proofs = true;

    let mut sapphire_testnet = chain(
        23295,
        "Oasis Sapphire Testnet",
        &["https://testnet.sapphire.oasis.io"],
        None,
        currency("Test Rose", "TEST"),
        ("Oasis Explorer", "https://explorer.oasis.io/testnet/sapphire"),
    );
    sapphire_testnet.cannot_make_storage_proofs = true;

    vec![
        mainnet,
        sepolia,
        chain(
            137,
            "Polygon Mainnet",
            &[
                "https://polygon-rpc.com",
                "https://polygon-bor-rpc.publicnode.com",
            ],
            Some(Hardfork::London),
            currency("POL", "POL"),
            ("PolygonScan", "https://polygonscan.com"),
        ),
        chain(
            56,
            "BNB Smart Chain Mainnet",
            &["https://bsc-dataseed.bnbchain.org"],
            None,
            currency("BNB", "BNB"),
            ("BscScan", "https://bscscan.com"),
        ),
        chain(
            8453,
            "Base",
            &["https://mainnet.base.org"],
            None,
            currency("Ether", "ETH"),
            ("Basescan", "https://basescan.org"),
        ),
        chain(
            10,
            "OP Mainnet",
            &["https://mainnet.optimism.io"],
            None,
            currency("Ether", "ETH"),
            ("Optimistic Etherscan", "https://optimistic.etherscan.io"),
        ),
        chain(
            42161,
            "Arbitrum One",
            &["https://arb1.arbitrum.io/rpc"],
            None,
            currency("Ether", "ETH"),
            ("Arbiscan", "https://arbiscan.io"),
        ),
        chain(
            43114,
            "Avalanche C-Chain",
            &["https://api.avax.network/ext/bc/C/rpc"],
            None,
            currency("Avalanche", "AVAX"),
            ("SnowTrace", "https://snowtrace.io"),
        ),
        sapphire,
        sapphire_testnet,
    ]
}
