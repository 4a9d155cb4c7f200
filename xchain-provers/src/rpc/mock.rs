//! An in-memory node for engine tests.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::Address;
use ethers::types::Bytes;
use ethers::types::H256;
use ethers::types::U256;
use ethers::utils::id;
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use xchain_messages::types::BlockRef;
use xchain_messages::ChainId;

use super::Connector;
use super::EthRpc;
use super::ProofResponse;
use super::RpcBlock;
use super::RpcError;
use super::RpcPool;
use super::StorageProofEntry;
use crate::calls::calldata;
use crate::chains::tests::test_chain;
use crate::chains::ChainDefinition;
use crate::chains::ChainRegistry;
use crate::header::unpadded;
use crate::slots::word_value;

#[derive(Debug, Default)]
struct State {
    blocks: Vec<RpcBlock>,
    storage: HashMap<(Address, H256), H256>,
    calls: HashMap<(Address, [u8; 4]), Result<Bytes, RpcError>>,
    exact_calls: HashMap<(Address, Vec<u8>), Result<Bytes, RpcError>>,
    account_proofs: HashMap<Address, Vec<Bytes>>,
    proof_nodes: HashMap<(Address, H256), Vec<Bytes>>,
    storage_error: Option<RpcError>,
    proof_error: Option<RpcError>,
    storage_reads: usize,
    storage_blocks: Vec<BlockRef>,
    calls_made: usize,
    block_calls: usize,
    proof_calls: Vec<Vec<H256>>,
}

/// Answers from canned blocks, storage and call results. Calls are matched
/// on their full calldata first, then on contract and selector; unanswered
/// calls revert.
#[derive(Debug, Default)]
pub(crate) struct MockRpc {
    state: Mutex<State>,
}

fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

/// A single-node proof standing in for a real trie path.
fn leaf_node(
    key: &[u8],
    value: &[u8],
) -> Bytes {
    let mut stream = RlpStream::new_list(2);
    stream.append(&key.to_vec());
    stream.append(&value.to_vec());
    stream.out().to_vec().into()
}

impl MockRpc {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_block(
        &self,
        block: RpcBlock,
    ) {
        self.state().blocks.push(block);
    }

    pub(crate) fn set_storage(
        &self,
        contract: Address,
        slot: H256,
        value: H256,
    ) {
        self.state().storage.insert((contract, slot), value);
    }

    pub(crate) fn set_call_raw(
        &self,
        contract: Address,
        signature: &str,
        result: Result<Bytes, RpcError>,
    ) {
        self.state()
            .calls
            .insert((contract, selector(signature)), result);
    }

    /// Answers only the call to `signature` with exactly `args`.
    pub(crate) fn set_call_with_args(
        &self,
        contract: Address,
        signature: &str,
        args: &[Token],
        result: Result<Bytes, RpcError>,
    ) {
        self.state()
            .exact_calls
            .insert((contract, calldata(signature, args).to_vec()), result);
    }

    pub(crate) fn set_call_uint(
        &self,
        contract: Address,
        signature: &str,
        value: U256,
    ) {
        let data = ethers::abi::encode(&[Token::Uint(value)]);
        self.set_call_raw(contract, signature, Ok(data.into()));
    }

    pub(crate) fn set_call_bool(
        &self,
        contract: Address,
        signature: &str,
        value: bool,
    ) {
        let data = ethers::abi::encode(&[Token::Bool(value)]);
        self.set_call_raw(contract, signature, Ok(data.into()));
    }

    pub(crate) fn set_call_string(
        &self,
        contract: Address,
        signature: &str,
        value: &str,
    ) {
        let data = ethers::abi::encode(&[Token::String(value.to_string())]);
        self.set_call_raw(contract, signature, Ok(data.into()));
    }

    pub(crate) fn set_call_error(
        &self,
        contract: Address,
        signature: &str,
        error: RpcError,
    ) {
        self.set_call_raw(contract, signature, Err(error));
    }

    pub(crate) fn set_account_proof(
        &self,
        contract: Address,
        nodes: Vec<Bytes>,
    ) {
        self.state().account_proofs.insert(contract, nodes);
    }

    pub(crate) fn set_proof_nodes(
        &self,
        contract: Address,
        slot: H256,
        nodes: Vec<Bytes>,
    ) {
        self.state().proof_nodes.insert((contract, slot), nodes);
    }

    pub(crate) fn fail_storage_with(
        &self,
        error: RpcError,
    ) {
        self.state().storage_error = Some(error);
    }

    pub(crate) fn fail_proofs_with(
        &self,
        error: RpcError,
    ) {
        self.state().proof_error = Some(error);
    }

    pub(crate) fn storage_reads(&self) -> usize {
        self.state().storage_reads
    }

    /// Block each `eth_getStorageAt` was pinned to, in order.
    pub(crate) fn storage_read_blocks(&self) -> Vec<BlockRef> {
        self.state().storage_blocks.clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state().calls_made
    }

    pub(crate) fn block_calls(&self) -> usize {
        self.state().block_calls
    }

    /// Keys requested by every `eth_getProof` so far.
    pub(crate) fn proof_calls(&self) -> Vec<Vec<H256>> {
        self.state().proof_calls.clone()
    }

    pub(crate) fn default_account_proof(contract: Address) -> Vec<Bytes> {
        vec![leaf_node(&keccak256(contract), b"account")]
    }

    pub(crate) fn default_storage_proof(
        slot: H256,
        value: H256,
    ) -> Vec<Bytes> {
        vec![leaf_node(
            &keccak256(slot),
            &unpadded(word_value(value)),
        )]
    }
}

#[async_trait]
impl EthRpc for MockRpc {
    async fn block(
        &self,
        block: BlockRef,
    ) -> Result<Option<RpcBlock>, RpcError> {
        let mut state = self.state();
        state.block_calls += 1;
        let found = match block {
            BlockRef::Latest => state.blocks.last(),
            BlockRef::Hash(hash) => state.blocks.iter().find(|b| b.hash == Some(hash)),
            BlockRef::Number(number) => state
                .blocks
                .iter()
                .find(|b| b.number == Some(U256::from(number))),
        };
        Ok(found.cloned())
    }

    async fn storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockRef,
    ) -> Result<H256, RpcError> {
        let mut state = self.state();
        state.storage_reads += 1;
        state.storage_blocks.push(block);
        if let Some(err) = &state.storage_error {
            return Err(err.clone());
        }
        Ok(state
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn proof(
        &self,
        address: Address,
        keys: &[H256],
        _block: BlockRef,
    ) -> Result<ProofResponse, RpcError> {
        let mut state = self.state();
        state.proof_calls.push(keys.to_vec());
        if let Some(err) = &state.proof_error {
            return Err(err.clone());
        }

        let storage_proof = keys
            .iter()
            .map(|key| {
                let value = state
                    .storage
                    .get(&(address, *key))
                    .copied()
                    .unwrap_or_default();
                let proof = state
                    .proof_nodes
                    .get(&(address, *key))
                    .cloned()
                    .unwrap_or_else(|| Self::default_storage_proof(*key, value));
                StorageProofEntry {
                    key: word_value(*key),
                    value: word_value(value),
                    proof,
                }
            })
            .collect();

        Ok(ProofResponse {
            address,
            account_proof: state
                .account_proofs
                .get(&address)
                .cloned()
                .unwrap_or_else(|| Self::default_account_proof(address)),
            storage_proof,
        })
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        _block: BlockRef,
    ) -> Result<Bytes, RpcError> {
        let mut state = self.state();
        state.calls_made += 1;
        if let Some(result) = state.exact_calls.get(&(to, data.to_vec())) {
            return result.clone();
        }
        let mut key = [0u8; 4];
        if data.len() >= 4 {
            key.copy_from_slice(&data[..4]);
        }
        state
            .calls
            .get(&(to, key))
            .cloned()
            .unwrap_or_else(|| Err(RpcError::Reverted("execution reverted".to_string())))
    }
}

struct SharedNode(Arc<MockRpc>);

impl Connector for SharedNode {
    fn connect(
        &self,
        _url: &str,
    ) -> Result<Arc<dyn EthRpc>, RpcError> {
        Ok(self.0.clone())
    }
}

/// A registry whose every chain is served by the same [`MockRpc`].
pub(crate) struct MockNetwork {
    pub(crate) node: Arc<MockRpc>,
    registry: Arc<ChainRegistry>,
}

impl MockNetwork {
    pub(crate) fn new(chain_id: ChainId) -> Self {
        Self::with_chains(vec![test_chain(chain_id, &["http://node.test"])])
    }

    pub(crate) fn with_chains(chains: Vec<ChainDefinition>) -> Self {
        Self {
            node: Arc::new(MockRpc::default()),
            registry: Arc::new(ChainRegistry::new(chains)),
        }
    }

    pub(crate) fn registry(&self) -> Arc<ChainRegistry> {
        self.registry.clone()
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(SharedNode(self.node.clone()))
    }

    pub(crate) fn pool(&self) -> Arc<RpcPool> {
        Arc::new(RpcPool::new(self.registry(), self.connector()))
    }
}
