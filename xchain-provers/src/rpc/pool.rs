use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use tracing::debug;
use tracing::info;
use xchain_messages::ChainId;

use super::EthRpc;
use super::HttpRpc;
use super::RpcError;
use crate::chains::ChainRegistry;
use crate::error::ProofError;
use crate::error::Result;
use crate::metrics::Metrics;

/// Opens a connection to a single RPC URL.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        url: &str,
    ) -> std::result::Result<Arc<dyn EthRpc>, RpcError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(
        &self,
        url: &str,
    ) -> std::result::Result<Arc<dyn EthRpc>, RpcError> {
        Ok(Arc::new(HttpRpc::new(url)?))
    }
}

/// Connections keyed by URL, created on first use and kept for the lifetime
/// of the pool.
///
/// Chains listing several URLs get one picked at random on every lookup, so
/// repeated lookups spread load across the endpoints while reusing whichever
/// connection already exists for the picked URL.
pub struct RpcPool {
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn Connector>,
    connections: DashMap<String, Arc<dyn EthRpc>>,
    metrics: Metrics,
}

impl RpcPool {
    pub fn new(
        registry: Arc<ChainRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            registry,
            connector,
            connections: DashMap::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// A connection to one of the chain's RPC endpoints.
    pub fn connection(
        &self,
        chain_id: ChainId,
    ) -> Result<Arc<dyn EthRpc>> {
        let chain = self.registry.get(chain_id)?;
        let url = chain
            .rpc_urls
            .choose(&mut rand::thread_rng())
            .ok_or(ProofError::NoRpcEndpoint(chain_id))?;

        if let Some(existing) = self.connections.get(url) {
            return Ok(existing.value().clone());
        }

        match self.connections.entry(url.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let connection = self.connector.connect(url)?;
                info!(chain_id, url = %display_url(url), "RPC connection");
                self.metrics.increment_rpc_connections(chain_id);
                entry.insert(connection.clone());
                Ok(connection)
            },
        }
    }

    /// Number of distinct URLs connected so far.
    pub fn connection_count(&self) -> usize {
        let count = self.connections.len();
        debug!(count, "pooled RPC connections");
        count
    }
}

/// Scheme and host only, since paths and queries often carry API keys.
pub fn display_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::chains::tests::test_chain;
    use crate::rpc::mock::MockRpc;

    #[derive(Default)]
    struct CountingConnector {
        opened: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn connect(
            &self,
            _url: &str,
        ) -> std::result::Result<Arc<dyn EthRpc>, RpcError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockRpc::default()))
        }
    }

    fn pool(connector: Arc<CountingConnector>) -> RpcPool {
        let mut shared = test_chain(10, &["https://shared.example/rpc"]);
        shared.name = "Shared".to_string();
        let registry = ChainRegistry::new(vec![
            test_chain(1, &["https://one.example/key/abc"]),
            test_chain(2, &["https://a.example", "https://b.example"]),
            shared,
            test_chain(11, &["https://shared.example/rpc"]),
            test_chain(12, &[]),
        ]);
        RpcPool::new(Arc::new(registry), connector)
    }

    #[test]
    fn reuses_connection_per_url() {
        let connector = Arc::new(CountingConnector::default());
        let pool = pool(connector.clone());

        for _ in 0..5 {
            pool.connection(1).unwrap();
        }
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.connection_count(), 1);
    }

    #[test]
    fn chains_sharing_a_url_share_a_connection() {
        let connector = Arc::new(CountingConnector::default());
        let pool = pool(connector.clone());

        pool.connection(10).unwrap();
        pool.connection(11).unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spreads_over_configured_urls() {
        let connector = Arc::new(CountingConnector::default());
        let pool = pool(connector.clone());

        for _ in 0..64 {
            pool.connection(2).unwrap();
        }
        // 64 uniform picks between two URLs miss one of them with
        // probability 2^-63.
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.connection_count(), 2);
    }

    #[test]
    fn unknown_chain_never_connects() {
        let connector = Arc::new(CountingConnector::default());
        let pool = pool(connector.clone());

        assert!(matches!(
            pool.connection(999),
            Err(ProofError::UnknownChain(999))
        ));
        assert!(matches!(
            pool.connection(12),
            Err(ProofError::NoRpcEndpoint(12))
        ));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn display_url_hides_credentials() {
        assert_eq!(
            display_url("https://eth-mainnet.example.com/v2/secret-key"),
            "https://eth-mainnet.example.com"
        );
        assert_eq!(display_url("not a url"), "<invalid url>");
    }
}
