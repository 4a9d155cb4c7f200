pub mod calls;
pub mod chains;
pub mod detect;
pub mod engine;
pub mod error;
pub mod header;
pub mod metrics;
pub mod minime;
pub mod proofs;
pub mod rpc;
pub mod slots;

pub use engine::ProofEngine;
pub use error::ProofError;
