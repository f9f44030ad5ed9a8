//! Portable proof artifacts.
//!
//! Canonical encoding is a JSON object:
//!
//! ```json
//! {
//!   "protocol": "groth16",
//!   "curve": "bn254",
//!   "proof_b64": "<base64 of the 128-byte compressed Groth16 proof>",
//!   "public_signals": ["<hex of compressed little-endian Fr>", "...", "...", "..."]
//! }
//! ```
//!
//! Public signals are, in order: pool commitment, block number, threshold,
//! satisfied flag. Unknown fields are rejected.

use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::PUBLIC_SIGNAL_ARITY;
use crate::error::{ProofError, Result};
use crate::groth16;
use crate::types::{FrHex, PublicSignals};

pub const PROTOCOL: &str = "groth16";
pub const CURVE: &str = "bn254";

/// Compressed BN254 Groth16 proof: A (G1) || B (G2) || C (G1).
pub const PROOF_BYTES_LEN: usize = 128;

/// Opaque proof bytes. Only the length is checked here; curve points are decoded
/// by the verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofBytes(Vec<u8>);

impl ProofBytes {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != PROOF_BYTES_LEN {
            return Err(ProofError::MalformedArtifact(format!(
                "proof must be {PROOF_BYTES_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_proof(proof: &Proof<Bn254>) -> Result<Self> {
        Self::new(groth16::serialize_proof(proof)?)
    }

    pub fn to_proof(&self) -> Result<Proof<Bn254>> {
        groth16::deserialize_proof(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofArtifact {
    proof: ProofBytes,
    public_signals: Vec<Fr>,
}

impl ProofArtifact {
    pub fn proof(&self) -> &ProofBytes {
        &self.proof
    }

    pub fn public_signals(&self) -> &[Fr] {
        &self.public_signals
    }

    /// Typed view of the public signals.
    pub fn signals(&self) -> Result<PublicSignals> {
        PublicSignals::from_field_elements(&self.public_signals).map_err(ProofError::MalformedArtifact)
    }

    /// Canonical encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_wire()).expect("artifact wire form is plain JSON")
    }

    fn to_wire(&self) -> WireArtifact {
        WireArtifact {
            protocol: PROTOCOL.to_string(),
            curve: CURVE.to_string(),
            proof_b64: BASE64.encode(self.proof.as_bytes()),
            public_signals: self.public_signals.iter().map(FrHex::from_fr).collect(),
        }
    }

    fn from_wire(wire: WireArtifact) -> Result<Self> {
        if wire.protocol != PROTOCOL || wire.curve != CURVE {
            return Err(ProofError::MalformedArtifact(format!(
                "unsupported proof system {}/{}",
                wire.protocol, wire.curve
            )));
        }

        let proof = BASE64
            .decode(wire.proof_b64.as_bytes())
            .map_err(|e| ProofError::MalformedArtifact(format!("proof_b64: {e}")))?;

        let public_signals = wire
            .public_signals
            .iter()
            .enumerate()
            .map(|(i, h)| {
                h.to_fr()
                    .map_err(|e| ProofError::MalformedArtifact(format!("public signal {i}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        package(ProofBytes::new(proof)?, public_signals)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireArtifact {
    protocol: String,
    curve: String,
    proof_b64: String,
    public_signals: Vec<FrHex>,
}

impl Serialize for ProofArtifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProofArtifact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireArtifact::deserialize(deserializer)?;
        Self::from_wire(wire).map_err(serde::de::Error::custom)
    }
}

/// Bundle a proof and its public signals, rejecting anything the verifier could
/// not parse.
pub fn package(proof: ProofBytes, public_signals: Vec<Fr>) -> Result<ProofArtifact> {
    if public_signals.len() != PUBLIC_SIGNAL_ARITY {
        return Err(ProofError::MalformedArtifact(format!(
            "expected {PUBLIC_SIGNAL_ARITY} public signals, got {}",
            public_signals.len()
        )));
    }

    Ok(ProofArtifact { proof, public_signals })
}

/// Parse the canonical encoding. Never panics on hostile input.
pub fn unpackage(bytes: &[u8]) -> Result<ProofArtifact> {
    let wire: WireArtifact =
        serde_json::from_slice(bytes).map_err(|e| ProofError::MalformedArtifact(e.to_string()))?;
    ProofArtifact::from_wire(wire)
}
