pub mod types;

pub type ChainId = u64;
pub type BlockNr = u64;
pub type SlotIndex = u64;
