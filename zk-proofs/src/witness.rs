//! Witness construction.
//!
//! Turns a prover request plus the published pool and snapshot into the exact
//! assignment the circuit consumes. Everything here is a pure function of its
//! inputs: identical requests always produce byte-identical witnesses.
//!
//! Witness layout (the circuit ABI, never reorder):
//!
//! | group            | arity | visibility |
//! |------------------|-------|------------|
//! | pool_commitment  | 1     | public     |
//! | block_number     | 1     | public     |
//! | threshold        | 1     | public     |
//! | satisfied        | 1     | public     |
//! | claimed_index    | 1     | private    |
//! | balance          | 1     | private    |
//! | signer_address   | 1     | private    |
//! | signature_r      | 4     | private    |
//! | signature_s      | 4     | private    |
//! | signature_v      | 1     | private    |
//! | public_key_x     | 4     | private    |
//! | public_key_y     | 4     | private    |
//! | pool_addresses   | 32    | private    |
//! | pool_balances    | 32    | private    |
//!
//! Multi-limb groups are little-endian 64-bit limbs (limb 0 least significant).

use std::fmt;

use ark_bn254::Fr;
use ark_serialize::CanonicalSerialize;
use tracing::debug;

use crate::commitment::{commitment_preimage, poseidon_commitment};
use crate::constants::{LIMBS_PER_WORD, POOL_SIZE};
use crate::error::{ProofError, Result};
use crate::signature::{
    address_of, challenge_hash, public_key_coordinates, to_limbs, WalletSignature,
};
use crate::types::{amount_to_u128, Address, ProofRequest, PublicSignals, Snapshot, WalletPool};

/// Signal groups in ABI order with their arity.
pub const WITNESS_LAYOUT: [(&str, usize); 14] = [
    ("pool_commitment", 1),
    ("block_number", 1),
    ("threshold", 1),
    ("satisfied", 1),
    ("claimed_index", 1),
    ("balance", 1),
    ("signer_address", 1),
    ("signature_r", LIMBS_PER_WORD),
    ("signature_s", LIMBS_PER_WORD),
    ("signature_v", 1),
    ("public_key_x", LIMBS_PER_WORD),
    ("public_key_y", LIMBS_PER_WORD),
    ("pool_addresses", POOL_SIZE),
    ("pool_balances", POOL_SIZE),
];

/// Total number of field elements in a witness.
pub fn witness_len() -> usize {
    WITNESS_LAYOUT.iter().map(|(_, n)| n).sum()
}

/// Full circuit assignment for one proving attempt.
///
/// Holds the secret index and balance, so it is never serialised to disk and
/// its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Witness {
    pub(crate) public: PublicSignals,
    pub(crate) claimed_index: usize,
    pub(crate) balance: u128,
    pub(crate) signer: Address,
    pub(crate) signature_r: [u64; LIMBS_PER_WORD],
    pub(crate) signature_s: [u64; LIMBS_PER_WORD],
    pub(crate) signature_v: u8,
    pub(crate) public_key_x: [u64; LIMBS_PER_WORD],
    pub(crate) public_key_y: [u64; LIMBS_PER_WORD],
    pub(crate) pool: Vec<Address>,
    pub(crate) balances: Vec<u128>,
}

impl Witness {
    pub fn public_signals(&self) -> &PublicSignals {
        &self.public
    }

    /// All signals in ABI order.
    pub fn to_field_elements(&self) -> Vec<Fr> {
        let mut v = Vec::with_capacity(witness_len());
        v.extend(self.public.to_field_elements());
        v.push(Fr::from(self.claimed_index as u64));
        v.push(Fr::from(self.balance));
        v.push(self.signer.to_field());
        v.extend(self.signature_r.iter().map(|l| Fr::from(*l)));
        v.extend(self.signature_s.iter().map(|l| Fr::from(*l)));
        v.push(Fr::from(self.signature_v));
        v.extend(self.public_key_x.iter().map(|l| Fr::from(*l)));
        v.extend(self.public_key_y.iter().map(|l| Fr::from(*l)));
        v.extend(self.pool.iter().map(Address::to_field));
        v.extend(self.balances.iter().map(|b| Fr::from(*b)));
        v
    }

    /// Canonical byte encoding (concatenated compressed field elements).
    pub fn to_bytes(&self) -> Vec<u8> {
        let elements = self.to_field_elements();
        let mut out = Vec::with_capacity(elements.len() * 32);
        for e in &elements {
            e.serialize_compressed(&mut out)
                .expect("in-memory serialization");
        }
        out
    }

    /// A satisfiable all-zero assignment used for key generation.
    pub(crate) fn blank() -> Self {
        let pool = vec![Address::default(); POOL_SIZE];
        let balances = vec![0u128; POOL_SIZE];
        let mut preimage = Vec::with_capacity(1 + 2 * POOL_SIZE);
        preimage.push(Fr::from(0u64));
        for _ in 0..POOL_SIZE {
            preimage.push(Fr::from(0u64));
            preimage.push(Fr::from(0u64));
        }

        Self {
            public: PublicSignals {
                pool_commitment: poseidon_commitment(&preimage),
                block_number: 0,
                threshold: 0,
                satisfied: true,
            },
            claimed_index: 0,
            balance: 0,
            signer: Address::default(),
            signature_r: [0; LIMBS_PER_WORD],
            signature_s: [0; LIMBS_PER_WORD],
            signature_v: 0,
            public_key_x: [0; LIMBS_PER_WORD],
            public_key_y: [0; LIMBS_PER_WORD],
            pool,
            balances,
        }
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Witness")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Outcome of the precondition checks, consumed by [`assemble`].
pub struct ValidatedRequest {
    signature: WalletSignature,
    public_key: k256::ecdsa::VerifyingKey,
    threshold: u128,
}

/// Check every precondition in order without assembling a witness.
///
/// 1. claimed index in range (`IndexOutOfRange`)
/// 2. pool entry equals the signer (`IdentityMismatch`)
/// 3. signature recovers to the signer (`InvalidSignature`)
/// 4. balance at the index meets the threshold (`ThresholdNotMet`)
/// 5. amounts fit the circuit's 128-bit domain (`AmountOutOfRange`)
pub fn validate(request: &ProofRequest, pool: &WalletPool, snapshot: &Snapshot) -> Result<ValidatedRequest> {
    let index = request.claimed_index;
    let (Some(pool_entry), Some(balance)) = (pool.get(index), snapshot.balance(index)) else {
        return Err(ProofError::IndexOutOfRange {
            index,
            pool_size: POOL_SIZE,
        });
    };

    if *pool_entry != request.signer_address {
        return Err(ProofError::IdentityMismatch {
            index,
            expected: *pool_entry,
            signer: request.signer_address,
        });
    }

    let signature = WalletSignature::from_bytes(&request.signature)?;
    let public_key = signature.recover(&challenge_hash())?;
    let recovered = address_of(&public_key);
    if recovered != request.signer_address {
        return Err(ProofError::InvalidSignature(format!(
            "signature recovers to {recovered}, not {}",
            request.signer_address
        )));
    }

    if balance < request.threshold_wei {
        return Err(ProofError::ThresholdNotMet {
            threshold: request.threshold_wei.to_string(),
            block_number: snapshot.block_number(),
        });
    }

    let threshold = amount_to_u128(&request.threshold_wei).ok_or_else(|| ProofError::AmountOutOfRange {
        field: "threshold",
        value: request.threshold_wei.to_string(),
    })?;

    debug!(instance = %request.instance_id, "witness preconditions passed");

    Ok(ValidatedRequest {
        signature,
        public_key,
        threshold,
    })
}

/// Build the circuit witness for `request`.
pub fn build(request: &ProofRequest, pool: &WalletPool, snapshot: &Snapshot) -> Result<Witness> {
    let validated = validate(request, pool, snapshot)?;
    assemble(validated, request, pool, snapshot)
}

/// Assemble the witness from a request that already passed [`validate`] against
/// the same `pool` and `snapshot`. Signature recovery is not repeated.
pub fn assemble(
    validated: ValidatedRequest,
    request: &ProofRequest,
    pool: &WalletPool,
    snapshot: &Snapshot,
) -> Result<Witness> {
    let preimage = commitment_preimage(pool, snapshot)?;
    let pool_commitment = poseidon_commitment(&preimage);

    let balances: Vec<u128> = snapshot
        .balances()
        .iter()
        .map(|b| amount_to_u128(b).unwrap_or_default())
        .collect();
    let balance = balances[request.claimed_index];

    let (x, y) = public_key_coordinates(&validated.public_key)?;

    Ok(Witness {
        public: PublicSignals {
            pool_commitment,
            block_number: snapshot.block_number(),
            threshold: validated.threshold,
            satisfied: balance >= validated.threshold,
        },
        claimed_index: request.claimed_index,
        balance,
        signer: request.signer_address,
        signature_r: to_limbs(&validated.signature.r_bytes()),
        signature_s: to_limbs(&validated.signature.s_bytes()),
        signature_v: validated.signature.parity(),
        public_key_x: to_limbs(&x),
        public_key_y: to_limbs(&y),
        pool: pool.addresses().to_vec(),
        balances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::pool_commitment;
    use crate::test_utils::{eth, fixture_pool, fixture_request, fixture_snapshot};
    use crate::constants::PUBLIC_SIGNAL_ARITY;
    use crate::types::{InstanceId, Wei};

    fn instance() -> InstanceId {
        InstanceId(Address([1u8; 20]))
    }

    #[test]
    fn test_layout_len() {
        assert_eq!(witness_len(), 4 + 3 + 4 + 4 + 1 + 4 + 4 + 32 + 32);
        let w = Witness::blank();
        assert_eq!(w.to_field_elements().len(), witness_len());
    }

    #[test]
    fn test_build_is_deterministic() {
        let pool = fixture_pool();
        let snapshot = fixture_snapshot(1000);
        let request = fixture_request(instance(), 15, eth(10));

        let a = build(&request, &pool, &snapshot).unwrap();
        let b = build(&request, &pool, &snapshot).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.to_bytes().len(), witness_len() * 32);
    }

    #[test]
    fn test_assemble_matches_build() {
        let pool = fixture_pool();
        let snapshot = fixture_snapshot(1000);
        let request = fixture_request(instance(), 15, eth(10));

        let validated = validate(&request, &pool, &snapshot).unwrap();
        let assembled = assemble(validated, &request, &pool, &snapshot).unwrap();
        assert_eq!(assembled, build(&request, &pool, &snapshot).unwrap());
    }

    #[test]
    fn test_public_inputs_hide_index_and_balance() {
        let pool = fixture_pool();
        let snapshot = fixture_snapshot(1000);
        let request = fixture_request(instance(), 15, eth(10));

        let w = build(&request, &pool, &snapshot).unwrap();
        let public = w.public_signals();
        assert_eq!(public.block_number, 1000);
        assert_eq!(public.threshold, 10 * crate::test_utils::ETH);
        assert!(public.satisfied);
        assert_eq!(public.pool_commitment, pool_commitment(&pool, &snapshot).unwrap());

        let signals = public.to_field_elements();
        assert_eq!(signals.len(), PUBLIC_SIGNAL_ARITY);
        assert!(!signals.contains(&Fr::from(50 * crate::test_utils::ETH)));
    }

    #[test]
    fn test_index_out_of_range() {
        let request = fixture_request(instance(), 15, eth(10));
        let request = ProofRequest {
            claimed_index: 32,
            ..request
        };
        assert!(matches!(
            build(&request, &fixture_pool(), &fixture_snapshot(1000)),
            Err(ProofError::IndexOutOfRange { index: 32, pool_size: 32 })
        ));
    }

    #[test]
    fn test_identity_mismatch_for_every_other_index() {
        let pool = fixture_pool();
        let snapshot = fixture_snapshot(1000);
        let request = fixture_request(instance(), 15, eth(1));

        for index in (0..POOL_SIZE).filter(|i| *i != 15) {
            let r = ProofRequest {
                claimed_index: index,
                ..request.clone()
            };
            assert!(
                matches!(validate(&r, &pool, &snapshot), Err(ProofError::IdentityMismatch { .. })),
                "index {index}"
            );
        }
    }

    #[test]
    fn test_signature_from_other_wallet_rejected() {
        let pool = fixture_pool();
        let snapshot = fixture_snapshot(1000);
        let mut request = fixture_request(instance(), 15, eth(10));
        request.signature = fixture_request(instance(), 3, eth(10)).signature;

        assert!(matches!(
            build(&request, &pool, &snapshot),
            Err(ProofError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_threshold_not_met() {
        let request = fixture_request(instance(), 15, eth(100));
        assert!(matches!(
            build(&request, &fixture_pool(), &fixture_snapshot(1000)),
            Err(ProofError::ThresholdNotMet { block_number: 1000, .. })
        ));
    }

    #[test]
    fn test_threshold_equal_to_balance_is_met() {
        let request = fixture_request(instance(), 15, eth(50));
        let w = build(&request, &fixture_pool(), &fixture_snapshot(1000)).unwrap();
        assert!(w.public_signals().satisfied);
    }

    #[test]
    fn test_precondition_order() {
        // Wrong index AND a threshold that could never be met: identity wins.
        let request = ProofRequest {
            claimed_index: 3,
            ..fixture_request(instance(), 15, Wei::MAX)
        };
        assert!(matches!(
            validate(&request, &fixture_pool(), &fixture_snapshot(1000)),
            Err(ProofError::IdentityMismatch { index: 3, .. })
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let request = fixture_request(instance(), 15, eth(10));
        let w = build(&request, &fixture_pool(), &fixture_snapshot(1000)).unwrap();
        let dbg = format!("{w:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("claimed_index"));
    }
}
