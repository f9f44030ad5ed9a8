//! Circuit artifacts: the constraint-system descriptor and the proving key.
//!
//! Both files are pinned by SHA-256. Nothing is parsed until the bytes on disk
//! hash to the pinned pair, so a swapped or half-written file can never reach the
//! prover.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ark_bn254::Bn254;
use ark_groth16::{PreparedVerifyingKey, ProvingKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::circuit::constraint_counts;
use crate::constants::{
    CIRCUIT_ID, CIRCUIT_VERSION, CONSTRAINT_SYSTEM_FILE, LIMB_BITS, PIN_FILE, POOL_SIZE, PROVING_KEY_FILE,
    PUBLIC_SIGNAL_ARITY,
};
use crate::error::{ProofError, Result};
use crate::groth16;
use crate::witness::WITNESS_LAYOUT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalGroup {
    pub name: String,
    pub arity: usize,
}

/// Contents of the constraint-system artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitDescriptor {
    pub circuit_id: String,
    pub version: u32,
    pub pool_size: usize,
    pub limb_bits: usize,
    pub public_signal_arity: usize,
    pub witness_layout: Vec<SignalGroup>,
    pub constraints: usize,
    pub instance_variables: usize,
    pub witness_variables: usize,
}

impl CircuitDescriptor {
    /// Descriptor of the circuit compiled into this crate.
    pub fn reference() -> Result<Self> {
        let counts = constraint_counts()?;
        Ok(Self {
            circuit_id: CIRCUIT_ID.to_string(),
            version: CIRCUIT_VERSION,
            pool_size: POOL_SIZE,
            limb_bits: LIMB_BITS,
            public_signal_arity: PUBLIC_SIGNAL_ARITY,
            witness_layout: WITNESS_LAYOUT
                .iter()
                .map(|(name, arity)| SignalGroup {
                    name: name.to_string(),
                    arity: *arity,
                })
                .collect(),
            constraints: counts.constraints,
            instance_variables: counts.instance_variables,
            witness_variables: counts.witness_variables,
        })
    }
}

/// Expected content hashes of the two artifact files (lowercase hex SHA-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactPin {
    pub constraint_system_sha256: String,
    pub proving_key_sha256: String,
}

impl ArtifactPin {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| ProofError::artifact_load(path.display(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| ProofError::artifact_load(path.display(), e))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ProofError::artifact_load(path.display(), e))?;
        fs::write(path, json).map_err(|e| ProofError::artifact_load(path.display(), e))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Locations of one versioned artifact pair plus the pin it must match.
#[derive(Clone, Debug)]
pub struct CircuitArtifacts {
    pub constraint_system: PathBuf,
    pub proving_key: PathBuf,
    pub pin: ArtifactPin,
}

impl CircuitArtifacts {
    /// Standard layout: `circuit.json`, `proving_key.bin` and `pin.json` in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            constraint_system: dir.join(CONSTRAINT_SYSTEM_FILE),
            proving_key: dir.join(PROVING_KEY_FILE),
            pin: ArtifactPin::read(&dir.join(PIN_FILE))?,
        })
    }

    pub fn exists_in(dir: &Path) -> bool {
        [CONSTRAINT_SYSTEM_FILE, PROVING_KEY_FILE, PIN_FILE]
            .iter()
            .all(|f| dir.join(f).exists())
    }
}

/// Prototype trusted setup: generate keys for the reference circuit and write
/// both artifacts plus their pin into `dir`.
pub fn setup_artifacts(dir: &Path, rng: &mut impl RngCore) -> Result<ArtifactPin> {
    fs::create_dir_all(dir).map_err(|e| ProofError::artifact_load(dir.display(), e))?;

    let descriptor = CircuitDescriptor::reference()?;
    let descriptor_bytes = serde_json::to_vec_pretty(&descriptor)
        .map_err(|e| ProofError::MalformedArtifact(format!("circuit descriptor: {e}")))?;

    let (pk, _vk) = groth16::setup_keys(rng)?;
    let pk_bytes = groth16::serialize_pk(&pk)?;

    let cs_path = dir.join(CONSTRAINT_SYSTEM_FILE);
    let pk_path = dir.join(PROVING_KEY_FILE);
    fs::write(&cs_path, &descriptor_bytes).map_err(|e| ProofError::artifact_load(cs_path.display(), e))?;
    fs::write(&pk_path, &pk_bytes).map_err(|e| ProofError::artifact_load(pk_path.display(), e))?;

    let pin = ArtifactPin {
        constraint_system_sha256: sha256_hex(&descriptor_bytes),
        proving_key_sha256: sha256_hex(&pk_bytes),
    };
    pin.write(&dir.join(PIN_FILE))?;

    info!(
        dir = %dir.display(),
        constraints = descriptor.constraints,
        proving_key_bytes = pk_bytes.len(),
        "wrote circuit artifacts"
    );
    Ok(pin)
}

/// A parsed, validated artifact pair.
pub struct LoadedCircuit {
    pub pin: ArtifactPin,
    pub descriptor: CircuitDescriptor,
    pub proving_key: ProvingKey<Bn254>,
    pub prepared_vk: PreparedVerifyingKey<Bn254>,
}

impl LoadedCircuit {
    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.proving_key.vk
    }
}

/// Read both files and check them against the pin.
///
/// Returns the raw bytes so a cache miss can parse without reading twice.
fn read_pinned(artifacts: &CircuitArtifacts) -> Result<(Vec<u8>, Vec<u8>)> {
    let cs_path = &artifacts.constraint_system;
    let pk_path = &artifacts.proving_key;

    let cs_bytes = fs::read(cs_path).map_err(|e| ProofError::artifact_load(cs_path.display(), e))?;
    let found = sha256_hex(&cs_bytes);
    if found != artifacts.pin.constraint_system_sha256 {
        return Err(ProofError::ArtifactVersionMismatch {
            artifact: "constraint system",
            expected: artifacts.pin.constraint_system_sha256.clone(),
            found,
        });
    }

    let pk_bytes = fs::read(pk_path).map_err(|e| ProofError::artifact_load(pk_path.display(), e))?;
    let found = sha256_hex(&pk_bytes);
    if found != artifacts.pin.proving_key_sha256 {
        return Err(ProofError::ArtifactVersionMismatch {
            artifact: "proving key",
            expected: artifacts.pin.proving_key_sha256.clone(),
            found,
        });
    }

    Ok((cs_bytes, pk_bytes))
}

fn parse(artifacts: &CircuitArtifacts, cs_bytes: &[u8], pk_bytes: &[u8]) -> Result<LoadedCircuit> {
    let cs_path = artifacts.constraint_system.display();
    let pk_path = artifacts.proving_key.display();

    let descriptor: CircuitDescriptor =
        serde_json::from_slice(cs_bytes).map_err(|e| ProofError::artifact_load(&cs_path, e))?;

    let expected = CircuitDescriptor::reference()?;
    if descriptor != expected {
        return Err(ProofError::artifact_load(
            &cs_path,
            format!(
                "descriptor {} v{} does not describe the compiled circuit {} v{}",
                descriptor.circuit_id, descriptor.version, expected.circuit_id, expected.version
            ),
        ));
    }

    let proving_key = groth16::deserialize_pk(pk_bytes).map_err(|e| ProofError::artifact_load(&pk_path, e))?;
    if proving_key.vk.gamma_abc_g1.len() != PUBLIC_SIGNAL_ARITY + 1 {
        return Err(ProofError::artifact_load(
            &pk_path,
            format!(
                "key expects {} public inputs, circuit has {PUBLIC_SIGNAL_ARITY}",
                proving_key.vk.gamma_abc_g1.len().saturating_sub(1)
            ),
        ));
    }
    let prepared_vk = groth16::prepare_vk(&proving_key.vk)?;

    Ok(LoadedCircuit {
        pin: artifacts.pin.clone(),
        descriptor,
        proving_key,
        prepared_vk,
    })
}

/// Pin check, parse and validation without caching.
pub fn load(artifacts: &CircuitArtifacts) -> Result<LoadedCircuit> {
    let (cs_bytes, pk_bytes) = read_pinned(artifacts)?;
    parse(artifacts, &cs_bytes, &pk_bytes)
}

/// Process-wide cache of loaded artifacts, keyed by content hash.
///
/// Files are re-hashed on every acquisition, so a hit is only served when the
/// bytes on disk still match the pin the entry was loaded under. Acquisition is
/// serialised: concurrent callers wait for one load rather than racing.
#[derive(Default)]
pub struct ArtifactCache {
    entries: Mutex<HashMap<ArtifactPin, Arc<LoadedCircuit>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, artifacts: &CircuitArtifacts) -> Result<Arc<LoadedCircuit>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let (cs_bytes, pk_bytes) = read_pinned(artifacts)?;
        if let Some(hit) = entries.get(&artifacts.pin) {
            debug!(proving_key = %artifacts.pin.proving_key_sha256, "artifact cache hit");
            return Ok(hit.clone());
        }

        let loaded = Arc::new(parse(artifacts, &cs_bytes, &pk_bytes)?);
        info!(
            proving_key = %artifacts.pin.proving_key_sha256,
            constraints = loaded.descriptor.constraints,
            "loaded circuit artifacts"
        );
        entries.insert(artifacts.pin.clone(), loaded.clone());
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_descriptor_matches_layout() {
        let d = CircuitDescriptor::reference().unwrap();
        assert_eq!(d.circuit_id, CIRCUIT_ID);
        assert_eq!(d.public_signal_arity, 4);
        assert_eq!(d.instance_variables, 4);
        assert_eq!(d.witness_layout.len(), WITNESS_LAYOUT.len());
        assert_eq!(d.witness_layout[0].name, "pool_commitment");
    }

    #[test]
    fn test_descriptor_rejects_unknown_fields() {
        let mut json = serde_json::to_value(CircuitDescriptor::reference().unwrap()).unwrap();
        json["extra"] = serde_json::json!(1);
        assert!(serde_json::from_value::<CircuitDescriptor>(json).is_err());
    }

    #[test]
    fn test_missing_files_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = CircuitArtifacts {
            constraint_system: dir.path().join(CONSTRAINT_SYSTEM_FILE),
            proving_key: dir.path().join(PROVING_KEY_FILE),
            pin: ArtifactPin {
                constraint_system_sha256: "00".into(),
                proving_key_sha256: "00".into(),
            },
        };
        assert!(matches!(load(&artifacts), Err(ProofError::ArtifactLoad { .. })));
        assert!(matches!(
            CircuitArtifacts::from_dir(dir.path()),
            Err(ProofError::ArtifactLoad { .. })
        ));
    }

    #[test]
    fn test_hash_mismatch_checked_before_parse() {
        let dir = tempfile::tempdir().unwrap();
        let cs_path = dir.path().join(CONSTRAINT_SYSTEM_FILE);
        fs::write(&cs_path, b"not json").unwrap();

        let artifacts = CircuitArtifacts {
            constraint_system: cs_path,
            proving_key: dir.path().join(PROVING_KEY_FILE),
            pin: ArtifactPin {
                constraint_system_sha256: sha256_hex(b"something else"),
                proving_key_sha256: "00".into(),
            },
        };
        assert!(matches!(
            load(&artifacts),
            Err(ProofError::ArtifactVersionMismatch { artifact: "constraint system", .. })
        ));
    }

    #[test]
    fn test_pinned_garbage_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let cs_path = dir.path().join(CONSTRAINT_SYSTEM_FILE);
        let pk_path = dir.path().join(PROVING_KEY_FILE);
        fs::write(&cs_path, b"{}").unwrap();
        fs::write(&pk_path, b"\x00\x01").unwrap();

        let artifacts = CircuitArtifacts {
            constraint_system: cs_path,
            proving_key: pk_path,
            pin: ArtifactPin {
                constraint_system_sha256: sha256_hex(b"{}"),
                proving_key_sha256: sha256_hex(b"\x00\x01"),
            },
        };
        assert!(matches!(load(&artifacts), Err(ProofError::ArtifactLoad { .. })));
    }

    #[test]
    fn test_pin_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let pin = ArtifactPin {
            constraint_system_sha256: sha256_hex(b"a"),
            proving_key_sha256: sha256_hex(b"b"),
        };
        let path = dir.path().join(PIN_FILE);
        pin.write(&path).unwrap();
        assert_eq!(ArtifactPin::read(&path).unwrap(), pin);
    }
}
