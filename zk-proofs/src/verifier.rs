//! Verifier client.
//!
//! Checks an artifact against an instance's published pool and snapshot, then
//! hands the cryptographic check to the on-chain view verifier. A mismatch
//! against the instance is reported separately from an invalid proof.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{PreparedVerifyingKey, VerifyingKey};
use serde::Serialize;
use tracing::{debug, info};

use crate::commitment::{pool_commitment, CommitmentSource};
use crate::error::{ProofError, Result, VerifierCallError};
use crate::groth16;
use crate::packager::{ProofArtifact, ProofBytes};
use crate::types::{amount_to_u128, InstanceId, Snapshot, WalletPool, Wei};

/// The free, side-effect-free verification entrypoint.
pub trait OnChainVerifier: Send + Sync {
    fn verify_proof(&self, proof: &ProofBytes, public_signals: &[Fr]) -> std::result::Result<bool, VerifierCallError>;
}

/// Local stand-in for the deployed Groth16 view verifier: same inputs, same
/// boolean answer, same rejection of undecodable points.
pub struct Groth16ViewVerifier {
    pvk: PreparedVerifyingKey<Bn254>,
}

impl Groth16ViewVerifier {
    pub fn new(vk: &VerifyingKey<Bn254>) -> Result<Self> {
        Ok(Self {
            pvk: groth16::prepare_vk(vk)?,
        })
    }

    pub fn from_prepared(pvk: PreparedVerifyingKey<Bn254>) -> Self {
        Self { pvk }
    }

    pub fn from_vk_bytes(bytes: &[u8]) -> Result<Self> {
        Self::new(&groth16::deserialize_vk(bytes)?)
    }
}

impl OnChainVerifier for Groth16ViewVerifier {
    fn verify_proof(&self, proof: &ProofBytes, public_signals: &[Fr]) -> std::result::Result<bool, VerifierCallError> {
        let proof = proof
            .to_proof()
            .map_err(|e| VerifierCallError::MalformedProof(e.to_string()))?;
        groth16::verify(&self.pvk, &proof, public_signals).map_err(|e| VerifierCallError::Unavailable(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// Artifact was produced against a different pool or snapshot.
    StaleOrMismatchedInstance,
    MalformedSignals,
    /// Public flag says the threshold was not met.
    ClaimNotSatisfied,
    /// Proven threshold is lower than the one the verifier requires.
    ThresholdBelowRequired,
    MalformedProof,
    /// The pairing check returned false.
    ProofRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub reasons: Vec<String>,
    pub failure: Option<VerificationFailure>,
}

impl VerificationOutcome {
    fn accepted() -> Self {
        Self {
            valid: true,
            reasons: Vec::new(),
            failure: None,
        }
    }

    fn rejected(failure: VerificationFailure, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reasons: vec![reason.into()],
            failure: Some(failure),
        }
    }
}

pub struct VerifierClient<'a> {
    source: &'a dyn CommitmentSource,
    chain: &'a dyn OnChainVerifier,
}

impl<'a> VerifierClient<'a> {
    pub fn new(source: &'a dyn CommitmentSource, chain: &'a dyn OnChainVerifier) -> Self {
        Self { source, chain }
    }

    /// Verify `artifact` against the latest published snapshot of `instance_id`.
    ///
    /// Idempotent; touches no state.
    pub fn verify(&self, artifact: &ProofArtifact, instance_id: &InstanceId) -> Result<VerificationOutcome> {
        self.verify_claim(artifact, instance_id, None)
    }

    /// Like [`verify`](Self::verify), additionally requiring the proven threshold
    /// to be at least `required_threshold`.
    pub fn verify_claim(
        &self,
        artifact: &ProofArtifact,
        instance_id: &InstanceId,
        required_threshold: Option<Wei>,
    ) -> Result<VerificationOutcome> {
        let pool = self.source.pool_of(instance_id)?;
        let snapshot = self.source.snapshot_of(instance_id)?;
        let outcome = self.verify_against(artifact, &pool, &snapshot, required_threshold)?;
        info!(instance = %instance_id, valid = outcome.valid, failure = ?outcome.failure, "verified artifact");
        Ok(outcome)
    }

    pub fn verify_against(
        &self,
        artifact: &ProofArtifact,
        pool: &WalletPool,
        snapshot: &Snapshot,
        required_threshold: Option<Wei>,
    ) -> Result<VerificationOutcome> {
        let signals = match artifact.signals() {
            Ok(s) => s,
            Err(e) => return Ok(VerificationOutcome::rejected(VerificationFailure::MalformedSignals, e.to_string())),
        };

        let expected = pool_commitment(pool, snapshot)?;
        if signals.block_number != snapshot.block_number() {
            return Ok(VerificationOutcome::rejected(
                VerificationFailure::StaleOrMismatchedInstance,
                format!(
                    "artifact is for block {}, instance published block {}",
                    signals.block_number,
                    snapshot.block_number()
                ),
            ));
        }
        if signals.pool_commitment != expected {
            return Ok(VerificationOutcome::rejected(
                VerificationFailure::StaleOrMismatchedInstance,
                "artifact commitment does not match the instance's pool and snapshot",
            ));
        }

        if !signals.satisfied {
            return Ok(VerificationOutcome::rejected(
                VerificationFailure::ClaimNotSatisfied,
                "artifact does not claim the threshold is met",
            ));
        }

        if let Some(required) = required_threshold {
            // Requirements beyond the 128-bit domain can never be met by a proof.
            let below = amount_to_u128(&required).is_none_or(|r| signals.threshold < r);
            if below {
                return Ok(VerificationOutcome::rejected(
                    VerificationFailure::ThresholdBelowRequired,
                    format!("proven threshold {} wei is below required {required} wei", signals.threshold),
                ));
            }
        }

        debug!(block = signals.block_number, "calling view verifier");
        match self.chain.verify_proof(artifact.proof(), artifact.public_signals()) {
            Ok(true) => Ok(VerificationOutcome::accepted()),
            Ok(false) => Ok(VerificationOutcome::rejected(
                VerificationFailure::ProofRejected,
                "verifier rejected the proof",
            )),
            Err(VerifierCallError::MalformedProof(reason)) => Ok(VerificationOutcome::rejected(
                VerificationFailure::MalformedProof,
                reason,
            )),
            Err(e) => Err(ProofError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::InMemoryRegistry;
    use crate::packager::{package, PROOF_BYTES_LEN};
    use crate::test_utils::{eth, fixture_pool, fixture_snapshot};
    use crate::types::PublicSignals;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers a fixed value and counts calls.
    struct StubChain {
        answer: std::result::Result<bool, VerifierCallError>,
        calls: AtomicUsize,
    }

    impl StubChain {
        fn new(answer: std::result::Result<bool, VerifierCallError>) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl OnChainVerifier for StubChain {
        fn verify_proof(&self, _: &ProofBytes, _: &[Fr]) -> std::result::Result<bool, VerifierCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn setup() -> (InMemoryRegistry, InstanceId) {
        let registry = InMemoryRegistry::new();
        let id = registry.create_instance(fixture_pool());
        registry.publish_snapshot(&id, fixture_snapshot(1000)).unwrap();
        (registry, id)
    }

    fn artifact_for(block: u64, threshold: u128, satisfied: bool) -> ProofArtifact {
        let signals = PublicSignals {
            pool_commitment: pool_commitment(&fixture_pool(), &fixture_snapshot(block)).unwrap(),
            block_number: block,
            threshold,
            satisfied,
        };
        package(
            ProofBytes::new(vec![0u8; PROOF_BYTES_LEN]).unwrap(),
            signals.to_field_elements(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_when_chain_accepts() {
        let (registry, id) = setup();
        let chain = StubChain::new(Ok(true));
        let client = VerifierClient::new(&registry, &chain);

        let outcome = client.verify(&artifact_for(1000, 10, true), &id).unwrap();
        assert!(outcome.valid);
        assert!(outcome.reasons.is_empty());

        // Idempotent.
        assert_eq!(client.verify(&artifact_for(1000, 10, true), &id).unwrap(), outcome);
        assert_eq!(chain.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_instance_is_not_a_proof_failure() {
        let (registry, id) = setup();
        registry.publish_snapshot(&id, fixture_snapshot(1001)).unwrap();
        let chain = StubChain::new(Ok(true));
        let client = VerifierClient::new(&registry, &chain);

        let outcome = client.verify(&artifact_for(1000, 10, true), &id).unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.failure, Some(VerificationFailure::StaleOrMismatchedInstance));
        assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_other_instance_mismatch() {
        let (registry, _) = setup();
        let mut addresses = fixture_pool().addresses().to_vec();
        addresses.swap(0, 1);
        let other = registry.create_instance(WalletPool::new(addresses).unwrap());
        registry.publish_snapshot(&other, fixture_snapshot(1000)).unwrap();

        let chain = StubChain::new(Ok(true));
        let outcome = VerifierClient::new(&registry, &chain)
            .verify(&artifact_for(1000, 10, true), &other)
            .unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::StaleOrMismatchedInstance));
    }

    #[test]
    fn test_chain_answer_surfaced() {
        let (registry, id) = setup();

        let rejecting = StubChain::new(Ok(false));
        let outcome = VerifierClient::new(&registry, &rejecting)
            .verify(&artifact_for(1000, 10, true), &id)
            .unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::ProofRejected));

        let malformed = StubChain::new(Err(VerifierCallError::MalformedProof("bad point".into())));
        let outcome = VerifierClient::new(&registry, &malformed)
            .verify(&artifact_for(1000, 10, true), &id)
            .unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::MalformedProof));

        let down = StubChain::new(Err(VerifierCallError::Unavailable("rpc timeout".into())));
        assert!(matches!(
            VerifierClient::new(&registry, &down).verify(&artifact_for(1000, 10, true), &id),
            Err(ProofError::Verifier(_))
        ));
    }

    #[test]
    fn test_required_threshold() {
        let (registry, id) = setup();
        let chain = StubChain::new(Ok(true));
        let client = VerifierClient::new(&registry, &chain);
        let artifact = artifact_for(1000, 10 * crate::test_utils::ETH, true);

        assert!(client.verify_claim(&artifact, &id, Some(eth(10))).unwrap().valid);
        let outcome = client.verify_claim(&artifact, &id, Some(eth(20))).unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::ThresholdBelowRequired));
        let outcome = client.verify_claim(&artifact, &id, Some(Wei::MAX)).unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::ThresholdBelowRequired));
    }

    #[test]
    fn test_unsatisfied_claim() {
        let (registry, id) = setup();
        let chain = StubChain::new(Ok(true));
        let outcome = VerifierClient::new(&registry, &chain)
            .verify(&artifact_for(1000, 10, false), &id)
            .unwrap();
        assert_eq!(outcome.failure, Some(VerificationFailure::ClaimNotSatisfied));
    }

    #[test]
    fn test_unknown_instance_is_an_error() {
        let registry = InMemoryRegistry::new();
        let chain = StubChain::new(Ok(true));
        let missing = InstanceId(crate::types::Address([3u8; 20]));
        assert!(matches!(
            VerifierClient::new(&registry, &chain).verify(&artifact_for(1000, 10, true), &missing),
            Err(ProofError::Commitment(_))
        ));
    }
}
