use derive_debug_plus::Dbg;
use ethers::types::H256;
use ethers::types::U256;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::SlotIndex;

/// A storage slot confirmed to hold a holder's balance.
#[derive(Clone, Dbg, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageSlotProof {
    /// Declaration index of the balances mapping inside the contract.
    pub slot_index: SlotIndex,

    /// The word read back with `eth_getStorageAt` at the derived slot.
    pub raw_value: H256,

    /// The balance decoded from `raw_value`.
    pub balance: U256,

    /// `balance` rendered with the token's decimals.
    pub balance_decimal: String,
}
