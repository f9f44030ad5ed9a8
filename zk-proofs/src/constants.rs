//! Crate-wide constants shared by the witness builder, the circuit and the artifact loader.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;

/// Number of addresses in every wallet pool (the anonymity set).
pub const POOL_SIZE: usize = 32;

/// Fixed message every prover signs with their wallet.
///
/// Prover and any independent re-verification of signature provenance must use
/// the exact same bytes.
pub const CHALLENGE_MESSAGE: &str =
    "zk-flex wealth proof: I control one wallet in this pool. This signature authorizes proof generation only.";

/// Width of one signature / public-key limb in bits.
pub const LIMB_BITS: usize = 64;

/// Limbs per 256-bit scalar or coordinate.
pub const LIMBS_PER_WORD: usize = 4;

/// Balances and thresholds are carried through the circuit as 128-bit values.
pub const AMOUNT_BITS: usize = 128;

/// Number of public signals: pool commitment, block number, threshold, satisfied flag.
pub const PUBLIC_SIGNAL_ARITY: usize = 4;

/// Identifier and version written into the constraint-system artifact.
pub const CIRCUIT_ID: &str = "wealth-threshold-32";
pub const CIRCUIT_VERSION: u32 = 1;

/// Artifact file names inside a circuit directory.
pub const CONSTRAINT_SYSTEM_FILE: &str = "circuit.json";
pub const PROVING_KEY_FILE: &str = "proving_key.bin";
pub const PIN_FILE: &str = "pin.json";

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1). The pool commitment absorbs 65 elements,
// so the rate-2 layout keeps the permutation count (and constraint count) low.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha).
pub const POSEIDON_ALPHA: u64 = 5;

/// Deterministically derive Poseidon parameters for BN254::Fr.
///
/// The native hasher and the in-circuit gadget both call this, so they agree on
/// the same round constants and MDS matrix.
pub fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}
