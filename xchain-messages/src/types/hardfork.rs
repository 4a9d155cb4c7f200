use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use thiserror::Error;

/// Execution-layer upgrades that changed the block header layout.
///
/// The declaration order is the activation order; `Ord` relies on it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hardfork {
    /// Frontier through Berlin: the 15 original header fields.
    PreLondon,
    /// EIP-1559 base fee.
    London,
    /// EIP-4895 withdrawals.
    Shanghai,
    /// EIP-4844 blobs and EIP-4788 beacon root.
    Cancun,
    /// EIP-7685 execution requests.
    Prague,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("unknown hardfork name: {0}")]
pub struct UnknownHardforkName(pub String);

impl Hardfork {
    pub const ALL: [Hardfork; 5] = [
        Hardfork::PreLondon,
        Hardfork::London,
        Hardfork::Shanghai,
        Hardfork::Cancun,
        Hardfork::Prague,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Hardfork::PreLondon => "pre-london",
            Hardfork::London => "london",
            Hardfork::Shanghai => "shanghai",
            Hardfork::Cancun => "cancun",
            Hardfork::Prague => "prague",
        }
    }
}

impl Display for Hardfork {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hardfork {
    type Err = UnknownHardforkName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Hardfork::ALL
            .into_iter()
            .find(|fork| fork.name() == wanted)
            .ok_or(UnknownHardforkName(s.to_string()))
    }
}
