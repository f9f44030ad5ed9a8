//! R1CS circuit for the wealth-threshold statement.
//!
//! What this circuit proves:
//! 1) The prover knows a pool of 32 addresses and a snapshot of their balances whose
//!    Poseidon commitment equals the public commitment (and binds the public block number).
//! 2) A hidden index selects exactly one pool entry, and that entry is the signer address.
//! 3) The balance at that index, compared with the public threshold, yields the public
//!    `satisfied` flag.
//!
//! Privacy: index, balance, signer and signature material are witnesses. Only the
//! commitment, block number, threshold and the flag are public.
//!
//! Signature recovery happens natively in the witness builder. The signature and public
//! key limbs are carried as range-checked witnesses so the witness layout stays stable,
//! but ECDSA over secp256k1 is not re-verified in-circuit.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::ns;
use ark_relations::r1cs::{
    ConstraintLayer, ConstraintSynthesizer, ConstraintSystem, ConstraintSystemRef, OptimizationGoal,
    SynthesisError,
};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;

use crate::constants::{poseidon_config, AMOUNT_BITS, LIMB_BITS, POOL_SIZE};
use crate::error::{ProofError, Result};
use crate::witness::Witness;

fn zero() -> FpVar<Fr> {
    FpVar::Constant(Fr::from(0u64))
}

/// `value` as `n` little-endian bits.
fn le_bits(value: u128, n: usize) -> Vec<bool> {
    (0..n).map(|i| (value >> i) & 1 == 1).collect()
}

/// Pack little-endian boolean bits into an FpVar (linear, no constraints).
fn bits_le_to_fp(bits_le: &[Boolean<Fr>]) -> FpVar<Fr> {
    let mut acc = zero();
    let mut coeff = Fr::from(1u64);

    for b in bits_le {
        acc += FpVar::from(b.clone()) * coeff;
        coeff = coeff + coeff;
    }

    acc
}

/// Allocate `bits` as witnesses and enforce that they pack into `var`.
///
/// Doubles as a range check: `var < 2^bits.len()`.
fn enforce_packed(
    cs: &ConstraintSystemRef<Fr>,
    var: &FpVar<Fr>,
    bits: &[bool],
) -> std::result::Result<Vec<Boolean<Fr>>, SynthesisError> {
    let vars = bits
        .iter()
        .map(|b| Boolean::new_witness(cs.clone(), || Ok(*b)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    bits_le_to_fp(&vars).enforce_equal(var)?;
    Ok(vars)
}

/// 2^128 as a field constant.
fn two_pow_amount_bits() -> Fr {
    Fr::from(u128::MAX) + Fr::from(1u64)
}

#[derive(Clone, Debug)]
pub struct WealthThresholdCircuit {
    witness: Witness,
}

impl WealthThresholdCircuit {
    pub fn new(witness: Witness) -> Self {
        Self { witness }
    }

    /// Circuit over the all-zero assignment. The constraint shape does not depend on
    /// witness values, so this is what key generation synthesizes.
    pub fn blank() -> Self {
        Self::new(Witness::blank())
    }

    pub fn public_inputs(&self) -> Vec<Fr> {
        self.witness.public_signals().to_field_elements()
    }
}

impl ConstraintSynthesizer<Fr> for WealthThresholdCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> std::result::Result<(), SynthesisError> {
        let w = self.witness;
        if w.pool.len() != POOL_SIZE || w.balances.len() != POOL_SIZE {
            return Err(SynthesisError::Unsatisfiable);
        }

        // --- Public inputs ---
        // IMPORTANT: ordering MUST match `PublicSignals::to_field_elements`.
        let commitment = FpVar::new_input(cs.clone(), || Ok(w.public.pool_commitment))?;
        let block_number = FpVar::new_input(cs.clone(), || Ok(Fr::from(w.public.block_number)))?;
        let threshold = FpVar::new_input(cs.clone(), || Ok(Fr::from(w.public.threshold)))?;
        let satisfied = Boolean::new_input(cs.clone(), || Ok(w.public.satisfied))?;

        // --- Private scalars ---
        let index = FpVar::new_witness(cs.clone(), || Ok(Fr::from(w.claimed_index as u64)))?;
        let balance = FpVar::new_witness(cs.clone(), || Ok(Fr::from(w.balance)))?;
        let signer = FpVar::new_witness(cs.clone(), || Ok(w.signer.to_field()))?;

        // Each section runs under its own r1cs namespace so an unsatisfied
        // constraint reports where it lives.
        let limbs_ns = ns!(cs, "limbs");
        for limb in w.signature_r.iter().chain(&w.signature_s) {
            let var = FpVar::new_witness(cs.clone(), || Ok(Fr::from(*limb)))?;
            enforce_packed(&cs, &var, &le_bits(u128::from(*limb), LIMB_BITS))?;
        }
        let _parity = Boolean::new_witness(cs.clone(), || Ok(w.signature_v != 0))?;
        for limb in w.public_key_x.iter().chain(&w.public_key_y) {
            let var = FpVar::new_witness(cs.clone(), || Ok(Fr::from(*limb)))?;
            enforce_packed(&cs, &var, &le_bits(u128::from(*limb), LIMB_BITS))?;
        }
        drop(limbs_ns);

        let addresses = w
            .pool
            .iter()
            .map(|a| FpVar::new_witness(cs.clone(), || Ok(a.to_field())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let balances = w
            .balances
            .iter()
            .map(|b| FpVar::new_witness(cs.clone(), || Ok(Fr::from(*b))))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // --- Commitment binding ---
        // Absorb order MUST match `commitment::commitment_preimage`.
        let commitment_ns = ns!(cs, "commitment");
        let mut preimage = Vec::with_capacity(1 + 2 * POOL_SIZE);
        preimage.push(block_number);
        for (address, bal) in addresses.iter().zip(&balances) {
            preimage.push(address.clone());
            preimage.push(bal.clone());
        }

        let poseidon_cfg = poseidon_config();
        let mut sponge = PoseidonSpongeVar::<Fr>::new(cs.clone(), &poseidon_cfg);
        sponge.absorb(&preimage)?;
        let computed = sponge.squeeze_field_elements(1)?[0].clone();
        computed.enforce_equal(&commitment)?;
        drop(commitment_ns);

        // --- Index selection ---
        // One-hot selector: exactly one bit set, at position `index`.
        let selection_ns = ns!(cs, "selection");
        let mut selector_sum = zero();
        let mut selected_index = zero();
        let mut selected_address = zero();
        let mut selected_balance = zero();

        for (i, (address, bal)) in addresses.iter().zip(&balances).enumerate() {
            let bit = Boolean::new_witness(cs.clone(), || Ok(i == w.claimed_index))?;
            let bit = FpVar::from(bit);

            selector_sum += &bit;
            selected_index += bit.clone() * Fr::from(i as u64);
            selected_address += &bit * address;
            selected_balance += &bit * bal;
        }

        selector_sum.enforce_equal(&FpVar::Constant(Fr::from(1u64)))?;
        selected_index.enforce_equal(&index)?;
        selected_address.enforce_equal(&signer)?;
        selected_balance.enforce_equal(&balance)?;
        drop(selection_ns);

        // --- Threshold comparison ---
        // With both operands below 2^128, bit 128 of `balance + 2^128 - threshold`
        // is set iff balance >= threshold.
        let comparison_ns = ns!(cs, "comparison");
        enforce_packed(&cs, &threshold, &le_bits(w.public.threshold, AMOUNT_BITS))?;
        enforce_packed(&cs, &balance, &le_bits(w.balance, AMOUNT_BITS))?;

        let diff = &balance - &threshold + two_pow_amount_bits();
        let mut diff_bits = le_bits(w.balance.wrapping_sub(w.public.threshold), AMOUNT_BITS);
        diff_bits.push(w.balance >= w.public.threshold);
        let diff_vars = enforce_packed(&cs, &diff, &diff_bits)?;

        satisfied.enforce_equal(&diff_vars[AMOUNT_BITS])?;
        drop(comparison_ns);

        Ok(())
    }
}

/// Size of the synthesized constraint system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintCounts {
    pub constraints: usize,
    /// Public inputs, not counting the constant-one variable.
    pub instance_variables: usize,
    pub witness_variables: usize,
}

/// Synthesize the blank circuit in setup mode and report its shape.
pub fn constraint_counts() -> Result<ConstraintCounts> {
    let cs = ConstraintSystem::<Fr>::new_ref();
    cs.set_optimization_goal(OptimizationGoal::Constraints);
    cs.set_mode(ark_relations::r1cs::SynthesisMode::Setup);
    WealthThresholdCircuit::blank()
        .generate_constraints(cs.clone())
        .map_err(|e| ProofError::Proving(format!("synthesis failed: {e}")))?;
    cs.finalize();

    Ok(ConstraintCounts {
        constraints: cs.num_constraints(),
        instance_variables: cs.num_instance_variables() - 1,
        witness_variables: cs.num_witness_variables(),
    })
}

/// Run the circuit over `witness` and report the first violated constraint, if any.
///
/// Proving an unsatisfied assignment yields a proof that fails verification, so the
/// engine checks first and fails with a precise error instead.
pub fn check_assignment(witness: &Witness) -> Result<()> {
    // Constraint traces are only recorded while a `ConstraintLayer` is the
    // active subscriber.
    let subscriber = tracing_subscriber::Registry::default().with(ConstraintLayer::default());
    let (num_constraints, unsatisfied) = tracing::subscriber::with_default(subscriber, || {
        let cs = ConstraintSystem::<Fr>::new_ref();
        cs.set_optimization_goal(OptimizationGoal::Constraints);
        WealthThresholdCircuit::new(witness.clone())
            .generate_constraints(cs.clone())
            .map_err(|e| ProofError::Proving(format!("synthesis failed: {e}")))?;

        let unsatisfied = cs
            .which_is_unsatisfied()
            .map_err(|e| ProofError::Proving(format!("satisfiability check failed: {e}")))?;
        Ok::<_, ProofError>((cs.num_constraints(), unsatisfied))
    })?;

    match unsatisfied {
        None => {
            debug!(constraints = num_constraints, "assignment satisfies circuit");
            Ok(())
        }
        Some(trace) => Err(ProofError::ConstraintViolation {
            constraint: constraint_path(&trace),
        }),
    }
}

/// Flatten a multi-line constraint trace into `outer / ... / inner`.
///
/// Traces without namespace information are a bare constraint index.
fn constraint_path(trace: &str) -> String {
    let mut steps: Vec<&str> = trace
        .lines()
        .filter_map(|line| line.trim().split_once(": ").map(|(_, step)| step))
        .collect();
    if steps.is_empty() {
        return format!("constraint #{}", trace.trim());
    }
    steps.reverse();
    steps.join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eth, fixture_pool, fixture_request, fixture_snapshot, ETH};
    use crate::types::{Address, InstanceId};
    use crate::witness;

    fn real_witness() -> Witness {
        let request = fixture_request(InstanceId(Address([1u8; 20])), 15, eth(10));
        witness::build(&request, &fixture_pool(), &fixture_snapshot(1000)).unwrap()
    }

    #[test]
    fn test_blank_circuit_is_satisfied() {
        assert!(check_assignment(&Witness::blank()).is_ok());
    }

    #[test]
    fn test_real_witness_is_satisfied() {
        assert!(check_assignment(&real_witness()).is_ok());
    }

    #[test]
    fn test_shape_is_stable() {
        let counts = constraint_counts().unwrap();
        assert_eq!(counts.instance_variables, 4);
        assert!(counts.constraints > 0);
        assert_eq!(counts, constraint_counts().unwrap());
    }

    #[test]
    fn test_public_inputs_order() {
        let circuit = WealthThresholdCircuit::new(real_witness());
        let inputs = circuit.public_inputs();
        assert_eq!(inputs[1], Fr::from(1000u64));
        assert_eq!(inputs[2], Fr::from(10 * ETH));
        assert_eq!(inputs[3], Fr::from(1u64));
    }

    #[test]
    fn test_flipped_flag_violates() {
        let mut w = real_witness();
        w.public.threshold = 60 * ETH;
        // Balance is 50 ETH, so claiming `satisfied` at 60 ETH must fail.
        match check_assignment(&w) {
            Err(ProofError::ConstraintViolation { constraint }) => {
                assert!(constraint.contains("circuit::comparison"), "{constraint}");
            }
            other => panic!("expected a constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn test_tampered_balance_breaks_commitment() {
        let mut w = real_witness();
        w.balances[3] += 1;
        match check_assignment(&w) {
            Err(ProofError::ConstraintViolation { constraint }) => {
                assert!(constraint.starts_with("zkflex_proofs::circuit::commitment"), "{constraint}");
                assert!(constraint.parse::<usize>().is_err());
            }
            other => panic!("expected a constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn test_signer_must_match_selected_entry() {
        let mut w = real_witness();
        w.claimed_index = 14;
        match check_assignment(&w) {
            Err(ProofError::ConstraintViolation { constraint }) => {
                assert!(constraint.contains("circuit::selection"), "{constraint}");
            }
            other => panic!("expected a constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn test_block_is_bound() {
        let mut w = real_witness();
        w.public.block_number = 1001;
        assert!(check_assignment(&w).is_err());
    }

    #[test]
    fn test_constraint_path_formatting() {
        let trace = "   0: ark_r1cs_std::eq::enforce_equal\n             at src/eq.rs:10\n   1: zkflex_proofs::circuit::commitment\n             at src/circuit.rs:140";
        assert_eq!(
            constraint_path(trace),
            "zkflex_proofs::circuit::commitment / ark_r1cs_std::eq::enforce_equal"
        );
        assert_eq!(constraint_path("9058"), "constraint #9058");
    }
}
