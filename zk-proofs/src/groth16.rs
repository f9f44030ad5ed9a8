//! Groth16 prover/verifier orchestration for the wealth-threshold circuit.
//!
//! SECURITY NOTE (prototype): Groth16 requires a trusted setup that produces a proving key (PK)
//! and verifying key (VK). `setup_keys` generates keys locally. In production the keys come
//! from an MPC ceremony and are only ever loaded, never generated.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use rand::RngCore;

use crate::circuit::WealthThresholdCircuit;
use crate::error::{ProofError, Result};
use crate::witness::Witness;

/// Generate a Groth16 keypair for the circuit.
///
/// The constraint shape is fixed, so this runs once per circuit version.
pub fn setup_keys(rng: &mut impl RngCore) -> Result<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> {
    let circuit = WealthThresholdCircuit::blank();

    let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng)
        .map_err(|e| ProofError::Proving(format!("key generation failed: {e}")))?;

    let vk = pk.vk.clone();
    Ok((pk, vk))
}

/// Prove `witness` against `pk`.
pub fn create_proof(pk: &ProvingKey<Bn254>, witness: Witness, rng: &mut impl RngCore) -> Result<Proof<Bn254>> {
    let circuit = WealthThresholdCircuit::new(witness);
    Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, rng)
        .map_err(|e| ProofError::Proving(format!("{e}")))
}

pub fn prepare_vk(vk: &VerifyingKey<Bn254>) -> Result<PreparedVerifyingKey<Bn254>> {
    Groth16::<Bn254>::process_vk(vk).map_err(|e| ProofError::Proving(format!("{e}")))
}

/// Pairing check of `proof` against `public_inputs`.
pub fn verify(pvk: &PreparedVerifyingKey<Bn254>, proof: &Proof<Bn254>, public_inputs: &[Fr]) -> Result<bool> {
    Groth16::<Bn254>::verify_with_processed_vk(pvk, public_inputs, proof)
        .map_err(|e| ProofError::Proving(format!("{e}")))
}

/// Serialize a proving key to bytes.
pub fn serialize_pk(pk: &ProvingKey<Bn254>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pk.serialize_compressed(&mut out)
        .map_err(|e| ProofError::MalformedArtifact(format!("proving key: {e}")))?;
    Ok(out)
}

pub fn deserialize_pk(bytes: &[u8]) -> Result<ProvingKey<Bn254>> {
    ProvingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ProofError::MalformedArtifact(format!("proving key: {e}")))
}

pub fn serialize_vk(vk: &VerifyingKey<Bn254>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    vk.serialize_compressed(&mut out)
        .map_err(|e| ProofError::MalformedArtifact(format!("verifying key: {e}")))?;
    Ok(out)
}

pub fn deserialize_vk(bytes: &[u8]) -> Result<VerifyingKey<Bn254>> {
    VerifyingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ProofError::MalformedArtifact(format!("verifying key: {e}")))
}

pub fn serialize_proof(proof: &Proof<Bn254>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    proof
        .serialize_compressed(&mut out)
        .map_err(|e| ProofError::MalformedArtifact(format!("proof: {e}")))?;
    Ok(out)
}

pub fn deserialize_proof(bytes: &[u8]) -> Result<Proof<Bn254>> {
    Proof::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ProofError::MalformedArtifact(format!("proof: {e}")))
}
