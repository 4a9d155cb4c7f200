use metrics::counter;
use metrics::histogram;
use metrics::SharedString;
use xchain_messages::ChainId;

/// Metrics recorded by the proof engine. Nothing is exported unless the
/// binary installs a recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct Metrics {}

impl Metrics {
    pub fn new() -> Self {
        Self {}
    }

    pub fn increment_rpc_connections(
        &self,
        chain_id: ChainId,
    ) {
        let chain_id = SharedString::from(chain_id.to_string());
        counter!("xchain_rpc_connections_total", "chain_id" => chain_id).increment(1);
    }

    pub fn increment_slot_probes(
        &self,
        chain_id: ChainId,
    ) {
        let chain_id = SharedString::from(chain_id.to_string());
        counter!("xchain_slot_probes_total", "chain_id" => chain_id).increment(1);
    }

    pub fn increment_proofs_generated(
        &self,
        kind: &str,
    ) {
        let kind = SharedString::from(String::from(kind));
        counter!("xchain_proofs_generated_total", "kind" => kind).increment(1);
    }

    pub fn increment_proof_failures(
        &self,
        kind: &str,
        error: &'static str,
    ) {
        let kind = SharedString::from(String::from(kind));
        counter!("xchain_proof_failures_total", "kind" => kind, "error" => error).increment(1);
    }

    pub fn increment_header_hash_mismatch(
        &self,
        chain_id: ChainId,
    ) {
        let chain_id = SharedString::from(chain_id.to_string());
        counter!("xchain_header_hash_mismatch_total", "chain_id" => chain_id).increment(1);
    }

    pub fn observe_proof_duration(
        &self,
        kind: &str,
        duration: f64,
    ) {
        let kind = SharedString::from(String::from(kind));
        histogram!("xchain_proof_duration_seconds", "kind" => kind).record(duration);
    }
}
