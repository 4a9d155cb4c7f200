//! Storage slot derivation and the brute-force balance slot search.
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use ethers::types::Address;
use ethers::types::H256;
use ethers::types::U256;
use ethers::utils::keccak256;
use serde_derive::Serialize;
use tracing::debug;
use tracing::info;
use xchain_messages::types::BlockRef;
use xchain_messages::types::ContractKind;
use xchain_messages::types::ContractType;
use xchain_messages::types::StorageSlotProof;
use xchain_messages::ChainId;
use xchain_messages::SlotIndex;

use crate::calls::TokenReader;
use crate::error::ProofError;
use crate::error::Result;
use crate::header::block_number;
use crate::metrics::Metrics;
use crate::minime::checkpoint_balance;
use crate::minime::last_checkpoint_slot;
use crate::rpc::EthRpc;
use crate::rpc::RpcPool;

/// Balance mapping positions seen most often in deployed tokens, probed
/// before the rest of the range.
pub const SLOT_SHORTLIST: [SlotIndex; 5] = [
    0x65, // Aragon governance tokens
    0x1,  // Compound
    0x33, // DAOhaus
    2,    // USDT
    9,    // USDC
];

/// MiniMe declares `balances` as its ninth state variable.
pub const MINIME_SLOT_SHORTLIST: [SlotIndex; 1] = [8];

/// Candidate base slots are `0..SLOT_SEARCH_RANGE`.
pub const SLOT_SEARCH_RANGE: SlotIndex = 256;

pub fn word(value: U256) -> H256 {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    H256(out)
}

pub fn word_value(word: H256) -> U256 {
    U256::from_big_endian(word.as_bytes())
}

/// Storage slot of `mapping[key]` for a mapping declared at `position`.
pub fn mapping_slot(
    key: Address,
    position: U256,
) -> H256 {
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(key.as_bytes());
    position.to_big_endian(&mut preimage[32..]);
    H256(keccak256(preimage))
}

/// Slot of a holder's balance in a mapping declared at `slot_index`.
pub fn balance_slot(
    holder: Address,
    slot_index: SlotIndex,
) -> H256 {
    mapping_slot(holder, U256::from(slot_index))
}

/// Slot of element `index` of a dynamic array whose length lives at
/// `array_slot`, for single-word elements.
pub fn array_element_slot(
    array_slot: H256,
    index: U256,
) -> H256 {
    let start = U256::from_big_endian(&keccak256(array_slot));
    word(start.overflowing_add(index).0)
}

/// Renders `balance` with `decimals` fractional digits.
pub fn format_balance(
    balance: U256,
    decimals: u8,
) -> Result<String> {
    if decimals == 0 {
        return Ok(balance.to_string());
    }
    ethers::utils::format_units(balance, u32::from(decimals))
        .map_err(|e| ProofError::Format(e.to_string()))
}

/// One candidate of a slot scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanStep {
    /// 1-based position in the scan order.
    pub position: usize,
    pub total: usize,
    pub slot_index: SlotIndex,
    /// The holder's slot for this candidate.
    pub storage_slot: H256,
}

impl Display for ScanStep {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "Checking slot #{} ({} of {})",
            self.slot_index, self.position, self.total
        )
    }
}

/// Candidate slots for one holder: the shortlist first, then the rest of
/// `0..SLOT_SEARCH_RANGE` in ascending order.
#[derive(Clone, Debug)]
pub struct SlotScan {
    holder: Address,
    order: Vec<SlotIndex>,
    next: usize,
}

impl SlotScan {
    pub fn new(
        holder: Address,
        shortlist: &[SlotIndex],
    ) -> Self {
        let mut order = shortlist.to_vec();
        order.extend((0..SLOT_SEARCH_RANGE).filter(|i| !shortlist.contains(i)));
        Self {
            holder,
            order,
            next: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.order.len()
    }
}

impl Iterator for SlotScan {
    type Item = ScanStep;

    fn next(&mut self) -> Option<Self::Item> {
        let slot_index = *self.order.get(self.next)?;
        self.next += 1;
        Some(ScanStep {
            position: self.next,
            total: self.order.len(),
            slot_index,
            storage_slot: balance_slot(self.holder, slot_index),
        })
    }
}

/// Lets the caller follow and abandon a scan.
pub trait ScanObserver: Send + Sync {
    /// Polled before every RPC call; returning `false` stops the scan.
    fn is_fresh(&self) -> bool {
        true
    }

    /// Called once per candidate, after it is probed.
    fn on_progress(
        &self,
        _step: &ScanStep,
    ) {
    }
}

/// An observer that never cancels and ignores progress.
pub struct Unobserved;

impl ScanObserver for Unobserved {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SlotSearch {
    Found(StorageSlotProof),
    /// No candidate holds the balance, or the balance is zero.
    NotFound,
    Cancelled,
}

pub struct SlotLocator {
    pool: Arc<RpcPool>,
    metrics: Metrics,
}

impl SlotLocator {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self {
            pool,
            metrics: Metrics::new(),
        }
    }

    /// Finds the base slot of the mapping holding `holder`'s balance.
    ///
    /// Every match is confirmed against a fresh `eth_getStorageAt` read of
    /// the derived slot.
    #[tracing::instrument(skip(self, contract_type, observer), fields(kind = %contract_type.kind()), err(Debug))]
    pub async fn locate(
        &self,
        chain_id: ChainId,
        contract: Address,
        contract_type: &ContractType,
        holder: Address,
        block: BlockRef,
        observer: &dyn ScanObserver,
    ) -> Result<SlotSearch> {
        let kind = contract_type.kind();
        if matches!(kind, ContractKind::Erc1155 | ContractKind::Unknown) {
            return Err(ProofError::NotImplemented(kind));
        }

        let rpc = self.pool.connection(chain_id)?;
        let probe = Probe {
            rpc: rpc.as_ref(),
            chain_id,
            contract,
            block,
            metrics: &self.metrics,
        };
        let decimals = contract_type.display_decimals();

        let found = if kind == ContractKind::MiniMe {
            self.scan_checkpoints(&probe, holder, observer).await?
        } else {
            self.scan_mapping(&probe, holder, observer).await?
        };

        match found {
            Scan::Hit {
                slot_index,
                raw_value,
                balance,
            } => {
                info!(slot_index, %balance, "balance slot found");
                Ok(SlotSearch::Found(StorageSlotProof {
                    slot_index,
                    raw_value,
                    balance,
                    balance_decimal: format_balance(balance, decimals)?,
                }))
            },
            Scan::Miss => Ok(SlotSearch::NotFound),
            Scan::Cancelled => Ok(SlotSearch::Cancelled),
        }
    }

    async fn scan_mapping(
        &self,
        probe: &Probe<'_>,
        holder: Address,
        observer: &dyn ScanObserver,
    ) -> Result<Scan> {
        if !observer.is_fresh() {
            return Ok(Scan::Cancelled);
        }
        let reader = TokenReader::new(probe.rpc, probe.contract, probe.block);
        let balance = reader.balance_of(holder).await?;
        if balance.is_zero() {
            debug!("holder has no balance, nothing to look for");
            return Ok(Scan::Miss);
        }
        let wanted = word(balance);

        for step in SlotScan::new(holder, &SLOT_SHORTLIST) {
            if !observer.is_fresh() {
                return Ok(Scan::Cancelled);
            }
            let value = probe.read(step.storage_slot).await?;
            observer.on_progress(&step);

            if value == wanted && !value.is_zero() {
                return Ok(Scan::Hit {
                    slot_index: step.slot_index,
                    raw_value: value,
                    balance,
                });
            }
        }
        Ok(Scan::Miss)
    }

    /// MiniMe keeps `Checkpoint[]` per holder; a candidate matches when its
    /// last checkpoint carries the balance `balanceOfAt` reports.
    ///
    /// `latest` is resolved to a number once so the balance and every
    /// storage read see the same block.
    async fn scan_checkpoints(
        &self,
        probe: &Probe<'_>,
        holder: Address,
        observer: &dyn ScanObserver,
    ) -> Result<Scan> {
        if !observer.is_fresh() {
            return Ok(Scan::Cancelled);
        }
        let number = block_number(probe.rpc, probe.block).await?;
        let probe = match probe.block {
            BlockRef::Latest => probe.at(BlockRef::Number(number)),
            _ => *probe,
        };

        if !observer.is_fresh() {
            return Ok(Scan::Cancelled);
        }
        let reader = TokenReader::new(probe.rpc, probe.contract, probe.block);
        let balance = reader.balance_of_at(holder, number).await?;
        if balance.is_zero() {
            debug!(number, "holder has no balance, nothing to look for");
            return Ok(Scan::Miss);
        }

        for step in SlotScan::new(holder, &MINIME_SLOT_SHORTLIST) {
            if !observer.is_fresh() {
                return Ok(Scan::Cancelled);
            }
            let length = probe.read(step.storage_slot).await?;
            observer.on_progress(&step);
            if length.is_zero() {
                continue;
            }

            if !observer.is_fresh() {
                return Ok(Scan::Cancelled);
            }
            let checkpoint = last_checkpoint_slot(step.storage_slot, word_value(length));
            let value = probe.read(checkpoint).await?;
            if checkpoint_balance(value) == balance {
                return Ok(Scan::Hit {
                    slot_index: step.slot_index,
                    raw_value: value,
                    balance,
                });
            }
        }
        Ok(Scan::Miss)
    }
}

enum Scan {
    Hit {
        slot_index: SlotIndex,
        raw_value: H256,
        balance: U256,
    },
    Miss,
    Cancelled,
}

#[derive(Clone, Copy)]
struct Probe<'a> {
    rpc: &'a dyn EthRpc,
    chain_id: ChainId,
    contract: Address,
    block: BlockRef,
    metrics: &'a Metrics,
}

impl<'a> Probe<'a> {
    fn at(
        &self,
        block: BlockRef,
    ) -> Probe<'a> {
        Probe { block, ..*self }
    }

    /// Reads one slot. A storage read cannot be refused by the contract, so
    /// every failure ends the scan.
    async fn read(
        &self,
        slot: H256,
    ) -> Result<H256> {
        self.metrics.increment_slot_probes(self.chain_id);
        Ok(self
            .rpc
            .storage_at(self.contract, slot, self.block)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use xchain_messages::types::TokenInfo;

    use super::*;
    use crate::rpc::mock::MockNetwork;
    use crate::rpc::RpcError;

    const CHAIN: ChainId = 5;

    fn erc20(decimals: u8) -> ContractType {
        ContractType::Erc20(TokenInfo {
            name: Some("Token".to_string()),
            symbol: Some("TKN".to_string()),
            decimals: Some(decimals),
            total_supply: Some(U256::from(10u64).pow(U256::from(24))),
        })
    }

    fn token() -> Address {
        Address::repeat_byte(0x70)
    }

    fn holder() -> Address {
        Address::repeat_byte(0xa1)
    }

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<ScanStep>>,
        stop_after: Option<usize>,
        polls: AtomicUsize,
    }

    impl ScanObserver for Recorder {
        fn is_fresh(&self) -> bool {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst);
            self.stop_after.map_or(true, |limit| polls < limit)
        }

        fn on_progress(
            &self,
            step: &ScanStep,
        ) {
            self.steps.lock().unwrap().push(*step);
        }
    }

    #[test]
    fn mapping_slot_matches_solidity_layout() {
        // keccak256(abi.encode(address(0x..01), uint256(0)))
        let mut holder = [0u8; 20];
        holder[19] = 1;
        assert_eq!(
            mapping_slot(Address::from(holder), U256::zero()),
            "0xada5013122d395ba3c54772283fb069b10426056ef8ca54750cb9bb552a59e7d"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn array_elements_follow_hashed_base() {
        let base = H256::repeat_byte(0x01);
        let first = array_element_slot(base, U256::zero());
        assert_eq!(first, H256(keccak256(base)));
        assert_eq!(
            word_value(array_element_slot(base, U256::from(3))),
            word_value(first) + 3
        );
    }

    #[test]
    fn scan_order_starts_with_shortlist() {
        let scan = SlotScan::new(holder(), &SLOT_SHORTLIST);
        assert_eq!(scan.total(), 256);

        let order: Vec<SlotIndex> = scan.map(|step| step.slot_index).collect();
        assert_eq!(&order[..7], &[0x65, 1, 0x33, 2, 9, 0, 3]);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..256).collect::<Vec<_>>());
    }

    #[test]
    fn steps_describe_progress() {
        let step = SlotScan::new(holder(), &SLOT_SHORTLIST).nth(1).unwrap();
        assert_eq!(step.to_string(), "Checking slot #1 (2 of 256)");
        assert_eq!(step.storage_slot, balance_slot(holder(), 1));
    }

    #[test]
    fn formats_balances_with_decimals() {
        assert_eq!(format_balance(U256::from(7), 0).unwrap(), "7");
        assert!(format_balance(U256::from(1_500_000u64), 6)
            .unwrap()
            .starts_with("1.5"));
    }

    #[tokio::test]
    async fn finds_balance_at_slot_five() {
        let network = MockNetwork::new(CHAIN);
        let balance = U256::from(1_500_000u64);
        network.node.set_call_uint(token(), "balanceOf(address)", balance);
        network
            .node
            .set_storage(token(), balance_slot(holder(), 5), word(balance));
        let locator = SlotLocator::new(network.pool());
        let observer = Recorder::default();

        let found = locator
            .locate(CHAIN, token(), &erc20(6), holder(), BlockRef::Latest, &observer)
            .await
            .unwrap();

        let SlotSearch::Found(proof) = found else {
            panic!("expected a slot, got {found:?}");
        };
        assert_eq!(proof.slot_index, 5);
        assert_eq!(proof.balance, balance);
        assert_eq!(proof.raw_value, word(balance));
        assert!(proof.balance_decimal.starts_with("1.5"));
        // shortlist (5) + slots 0, 3, 4, 5
        assert_eq!(observer.steps.lock().unwrap().len(), 9);
        assert_eq!(network.node.storage_reads(), 9);
    }

    #[tokio::test]
    async fn zero_balance_is_not_found_without_scanning() {
        let network = MockNetwork::new(CHAIN);
        network
            .node
            .set_call_uint(token(), "balanceOf(address)", U256::zero());
        let locator = SlotLocator::new(network.pool());

        let found = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &Unobserved)
            .await
            .unwrap();

        assert_eq!(found, SlotSearch::NotFound);
        assert_eq!(network.node.storage_reads(), 0);
    }

    #[tokio::test]
    async fn unmatched_balance_scans_whole_range() {
        let network = MockNetwork::new(CHAIN);
        network
            .node
            .set_call_uint(token(), "balanceOf(address)", U256::from(10));
        let locator = SlotLocator::new(network.pool());

        let found = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &Unobserved)
            .await
            .unwrap();

        assert_eq!(found, SlotSearch::NotFound);
        assert_eq!(network.node.storage_reads(), 256);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_probe() {
        let network = MockNetwork::new(CHAIN);
        network
            .node
            .set_call_uint(token(), "balanceOf(address)", U256::from(10));
        let locator = SlotLocator::new(network.pool());
        // one poll before the balance read, then one per candidate
        let observer = Recorder {
            stop_after: Some(4),
            ..Default::default()
        };

        let found = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &observer)
            .await
            .unwrap();

        assert_eq!(found, SlotSearch::Cancelled);
        assert_eq!(network.node.storage_reads(), 3);
        assert_eq!(observer.steps.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stale_request_makes_no_calls() {
        let network = MockNetwork::new(CHAIN);
        network
            .node
            .set_call_uint(token(), "balanceOf(address)", U256::from(10));
        let locator = SlotLocator::new(network.pool());
        let observer = Recorder {
            stop_after: Some(0),
            ..Default::default()
        };

        let found = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &observer)
            .await
            .unwrap();

        assert_eq!(found, SlotSearch::Cancelled);
        assert_eq!(network.node.calls(), 0);
        assert_eq!(network.node.storage_reads(), 0);
    }

    #[tokio::test]
    async fn transport_failure_aborts_scan() {
        let network = MockNetwork::new(CHAIN);
        network
            .node
            .set_call_uint(token(), "balanceOf(address)", U256::from(10));
        network.node.fail_storage_with(RpcError::Transport("connection reset".into()));
        let locator = SlotLocator::new(network.pool());
        let observer = Recorder::default();

        let err = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &observer)
            .await
            .unwrap_err();

        assert!(err.is_rpc());
        assert_eq!(network.node.storage_reads(), 1);
        // progress is only reported for candidates that were read
        assert!(observer.steps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_state_aborts_scan() {
        let network = MockNetwork::new(CHAIN);
        let balance = U256::from(10);
        network.node.set_call_uint(token(), "balanceOf(address)", balance);
        network
            .node
            .set_storage(token(), balance_slot(holder(), 9), word(balance));
        network.node.fail_storage_with(RpcError::Node {
            code: -32000,
            message: "missing trie node".into(),
        });
        let locator = SlotLocator::new(network.pool());

        let err = locator
            .locate(CHAIN, token(), &erc20(18), holder(), BlockRef::Latest, &Unobserved)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProofError::Rpc(RpcError::Node { code: -32000, .. })
        ));
        assert_eq!(network.node.storage_reads(), 1);
    }

    #[tokio::test]
    async fn erc1155_is_not_implemented() {
        let network = MockNetwork::new(CHAIN);
        let locator = SlotLocator::new(network.pool());

        let err = locator
            .locate(
                CHAIN,
                token(),
                &ContractType::Erc1155(TokenInfo::default()),
                holder(),
                BlockRef::Latest,
                &Unobserved,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProofError::NotImplemented(ContractKind::Erc1155)));
        assert_eq!(network.node.calls(), 0);
    }

    #[tokio::test]
    async fn finds_minime_checkpoint_array() {
        let network = MockNetwork::new(CHAIN);
        network.node.add_block(crate::header::tests::cancun_block());
        let balance = U256::from(5u64) * U256::exp10(18);
        network
            .node
            .set_call_uint(token(), "balanceOfAt(address,uint256)", balance);
        let base = balance_slot(holder(), 8);
        network.node.set_storage(token(), base, word(U256::from(2)));
        let packed = (balance << 128) | U256::from(19_000_000u64);
        network.node.set_storage(
            token(),
            array_element_slot(base, U256::one()),
            word(packed),
        );
        let locator = SlotLocator::new(network.pool());

        let found = locator
            .locate(
                CHAIN,
                token(),
                &ContractType::MiniMe(TokenInfo::default()),
                holder(),
                BlockRef::Latest,
                &Unobserved,
            )
            .await
            .unwrap();

        let SlotSearch::Found(proof) = found else {
            panic!("expected a slot, got {found:?}");
        };
        assert_eq!(proof.slot_index, 8);
        assert_eq!(proof.balance, balance);
        assert_eq!(proof.raw_value, word(packed));
        assert!(proof.balance_decimal.starts_with("5.0"));
        assert_eq!(network.node.storage_reads(), 2);
        assert_eq!(
            network.node.storage_read_blocks(),
            vec![BlockRef::Number(19_500_000); 2]
        );
    }
}
