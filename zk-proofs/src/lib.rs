//! Proof pipeline for zk wealth-threshold claims.
//!
//! A prover shows that some wallet in a published 32-address pool held at least
//! a public threshold at a given block, without revealing which wallet or its
//! balance. This crate contains:
//! - The commitment model over pools and balance snapshots.
//! - The witness builder (signature recovery, limb decomposition, ABI layout).
//! - A Groth16 circuit and its artifact handling.
//! - The proving engine, proof packaging and the verifier client.

pub mod artifacts;
pub mod circuit;
pub mod commitment;
pub mod constants;
pub mod engine;
pub mod error;
pub mod groth16;
pub mod packager;
pub mod pipeline;
pub mod signature;
pub mod types;
pub mod verifier;
pub mod witness;

#[cfg(test)]
mod test_utils;

pub use artifacts::{setup_artifacts, ArtifactPin, CircuitArtifacts, LoadedCircuit};
pub use commitment::{pool_commitment, CommitmentSource, InMemoryRegistry};
pub use engine::{CancelToken, ProgressEvent, ProgressSink, ProverState, ProvingEngine, ProvingOutcome};
pub use error::{CommitmentError, ErrorKind, PoolError, ProofError, VerifierCallError};
pub use packager::{package, unpackage, ProofArtifact, ProofBytes};
pub use pipeline::ProofPipeline;
pub use types::{Address, InstanceId, ProofRequest, PublicSignals, Snapshot, WalletPool, Wei};
pub use verifier::{Groth16ViewVerifier, OnChainVerifier, VerificationFailure, VerificationOutcome, VerifierClient};
pub use witness::Witness;
