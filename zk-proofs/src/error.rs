//! Error taxonomy for the proof pipeline.

use thiserror::Error;

use crate::types::{Address, InstanceId};

pub type Result<T> = std::result::Result<T, ProofError>;

/// Coarse classification of a [`ProofError`].
///
/// Callers use it to decide what to do next: input errors need a corrected
/// request, resource errors need an operator to fix the artifact source,
/// computation errors point at a witness/circuit ABI bug.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Resource,
    Computation,
    Serialization,
    Commitment,
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("claimed index {index} is outside the pool (size {pool_size})")]
    IndexOutOfRange { index: usize, pool_size: usize },

    #[error("pool entry at index {index} is {expected}, not the signer {signer}")]
    IdentityMismatch {
        index: usize,
        expected: Address,
        signer: Address,
    },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("balance at the claimed index is below the threshold {threshold} wei at block {block_number}")]
    ThresholdNotMet { threshold: String, block_number: u64 },

    #[error("{field} does not fit the circuit's 128-bit amount domain: {value}")]
    AmountOutOfRange { field: &'static str, value: String },

    #[error("failed to load circuit artifact {path}: {reason}")]
    ArtifactLoad { path: String, reason: String },

    #[error("{artifact} content hash {found} does not match pinned {expected}")]
    ArtifactVersionMismatch {
        artifact: &'static str,
        expected: String,
        found: String,
    },

    #[error("assignment violates circuit constraint {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("proof generation failed: {0}")]
    Proving(String),

    #[error("malformed proof artifact: {0}")]
    MalformedArtifact(String),

    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    #[error(transparent)]
    Verifier(#[from] VerifierCallError),
}

impl ProofError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexOutOfRange { .. }
            | Self::IdentityMismatch { .. }
            | Self::InvalidSignature(_)
            | Self::ThresholdNotMet { .. }
            | Self::AmountOutOfRange { .. } => ErrorKind::Input,
            Self::ArtifactLoad { .. } | Self::ArtifactVersionMismatch { .. } | Self::Verifier(_) => {
                ErrorKind::Resource
            }
            Self::ConstraintViolation { .. } | Self::Proving(_) => ErrorKind::Computation,
            Self::MalformedArtifact(_) => ErrorKind::Serialization,
            Self::Commitment(_) => ErrorKind::Commitment,
        }
    }

    pub(crate) fn artifact_load(path: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::ArtifactLoad {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of the read interface over published pools and snapshots.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("instance {0} has no published snapshot")]
    SnapshotNotFound(InstanceId),

    #[error("snapshot for {instance} is at block {published}, expected at least {expected}")]
    Stale {
        instance: InstanceId,
        expected: u64,
        published: u64,
    },

    #[error("snapshot block {block} is not newer than published block {latest}")]
    NonMonotonicSnapshot { block: u64, latest: u64 },

    #[error("snapshot balance at index {index} does not fit the 128-bit amount domain: {value}")]
    BalanceOutOfRange { index: usize, value: String },

    #[error(transparent)]
    InvalidPool(#[from] PoolError),
}

/// Failures of the on-chain verification call itself, as opposed to a `false` answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifierCallError {
    /// The proof bytes do not decode to curve points; the contract would revert.
    #[error("proof does not decode to valid curve points: {0}")]
    MalformedProof(String),

    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Violations of the pool/snapshot data contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool must contain exactly {expected} addresses, got {got}")]
    WrongSize { expected: usize, got: usize },

    #[error("snapshot must contain exactly {expected} balances, got {got}")]
    WrongBalanceCount { expected: usize, got: usize },

    #[error("address {address} appears at both index {first} and {second}")]
    DuplicateAddress {
        address: Address,
        first: usize,
        second: usize,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = ProofError::IndexOutOfRange { index: 40, pool_size: 32 };
        assert_eq!(e.kind(), ErrorKind::Input);

        let e = ProofError::ArtifactVersionMismatch {
            artifact: "proving key",
            expected: "aa".into(),
            found: "bb".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Resource);

        let e = ProofError::ConstraintViolation { constraint: "pool_commitment".into() };
        assert_eq!(e.kind(), ErrorKind::Computation);

        let e = ProofError::MalformedArtifact("truncated".into());
        assert_eq!(e.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_threshold_error_message() {
        let e = ProofError::ThresholdNotMet {
            threshold: "100".into(),
            block_number: 1000,
        };
        let msg = e.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("1000"));
    }
}
