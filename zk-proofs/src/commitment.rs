//! Read interface over published pools and snapshots, plus the commitment both
//! the circuit and the verifier recompute from them.
//!
//! The real backing store is an on-chain registry. [`InMemoryRegistry`] mirrors
//! its behaviour for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;
use tracing::info;

use crate::constants::poseidon_config;
use crate::error::{CommitmentError, ProofError};
use crate::signature::keccak256;
use crate::types::{amount_to_u128, Address, InstanceId, Snapshot, WalletPool};

/// Read accessors over the published commitment data.
pub trait CommitmentSource: Send + Sync {
    fn pool_of(&self, id: &InstanceId) -> Result<WalletPool, CommitmentError>;

    /// Latest published snapshot of the instance.
    fn snapshot_of(&self, id: &InstanceId) -> Result<Snapshot, CommitmentError>;

    /// Like [`snapshot_of`](Self::snapshot_of) but reports `Stale` when the
    /// published snapshot is older than the block the caller expected.
    fn snapshot_at_least(&self, id: &InstanceId, min_block: u64) -> Result<Snapshot, CommitmentError> {
        let snapshot = self.snapshot_of(id)?;
        if snapshot.block_number() < min_block {
            return Err(CommitmentError::Stale {
                instance: *id,
                expected: min_block,
                published: snapshot.block_number(),
            });
        }
        Ok(snapshot)
    }
}

/// Field elements absorbed into the pool commitment, in order:
/// `block, addr_0, bal_0, ..., addr_31, bal_31`.
///
/// Fails when a balance exceeds the circuit's 128-bit amount domain.
pub fn commitment_preimage(pool: &WalletPool, snapshot: &Snapshot) -> Result<Vec<Fr>, ProofError> {
    let mut elements = Vec::with_capacity(1 + 2 * pool.len());
    elements.push(Fr::from(snapshot.block_number()));

    for (address, balance) in pool.addresses().iter().zip(snapshot.balances()) {
        let balance = amount_to_u128(balance).ok_or_else(|| ProofError::AmountOutOfRange {
            field: "snapshot balance",
            value: balance.to_string(),
        })?;
        elements.push(address.to_field());
        elements.push(Fr::from(balance));
    }

    Ok(elements)
}

/// Poseidon commitment over raw preimage elements.
///
/// This MUST match the circuit's sponge usage.
pub fn poseidon_commitment(elements: &Vec<Fr>) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    sponge.absorb(elements);
    sponge.squeeze_field_elements(1)[0]
}

/// Commitment binding a pool and one snapshot of it.
pub fn pool_commitment(pool: &WalletPool, snapshot: &Snapshot) -> Result<Fr, ProofError> {
    Ok(poseidon_commitment(&commitment_preimage(pool, snapshot)?))
}

struct Instance {
    pool: WalletPool,
    snapshots: Vec<Snapshot>,
}

/// Process-local registry of pool instances.
#[derive(Default)]
pub struct InMemoryRegistry {
    instances: RwLock<HashMap<InstanceId, Instance>>,
    nonce: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool and return its new instance id.
    ///
    /// Ids are derived from a per-registry nonce and the pool contents, so two
    /// creators never have to race on "the last instance created".
    pub fn create_instance(&self, pool: WalletPool) -> InstanceId {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let id = derive_instance_id(nonce, &pool);

        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Instance {
                    pool,
                    snapshots: Vec::new(),
                },
            );

        info!(instance = %id, nonce, "created pool instance");
        id
    }

    /// Append a snapshot. Snapshots are immutable and strictly increasing in block number,
    /// and every balance must fit the circuit's 128-bit amount domain.
    pub fn publish_snapshot(&self, id: &InstanceId, snapshot: Snapshot) -> Result<(), CommitmentError> {
        check_balances(&snapshot)?;

        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        let instance = instances
            .get_mut(id)
            .ok_or(CommitmentError::InstanceNotFound(*id))?;

        if let Some(latest) = instance.snapshots.last() {
            if snapshot.block_number() <= latest.block_number() {
                return Err(CommitmentError::NonMonotonicSnapshot {
                    block: snapshot.block_number(),
                    latest: latest.block_number(),
                });
            }
        }

        info!(instance = %id, block = snapshot.block_number(), "published snapshot");
        instance.snapshots.push(snapshot);
        Ok(())
    }
}

impl CommitmentSource for InMemoryRegistry {
    fn pool_of(&self, id: &InstanceId) -> Result<WalletPool, CommitmentError> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|i| i.pool.clone())
            .ok_or(CommitmentError::InstanceNotFound(*id))
    }

    fn snapshot_of(&self, id: &InstanceId) -> Result<Snapshot, CommitmentError> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        let instance = instances.get(id).ok_or(CommitmentError::InstanceNotFound(*id))?;
        instance
            .snapshots
            .last()
            .cloned()
            .ok_or(CommitmentError::SnapshotNotFound(*id))
    }
}

/// Reject snapshots the circuit could not commit to.
pub fn check_balances(snapshot: &Snapshot) -> Result<(), CommitmentError> {
    for (index, balance) in snapshot.balances().iter().enumerate() {
        if amount_to_u128(balance).is_none() {
            return Err(CommitmentError::BalanceOutOfRange {
                index,
                value: balance.to_string(),
            });
        }
    }
    Ok(())
}

/// `keccak256(nonce_be || addresses)[12..]`.
pub fn derive_instance_id(nonce: u64, pool: &WalletPool) -> InstanceId {
    let mut preimage = Vec::with_capacity(8 + 20 * pool.len());
    preimage.extend_from_slice(&nonce.to_be_bytes());
    for address in pool.addresses() {
        preimage.extend_from_slice(address.as_bytes());
    }
    let digest = keccak256(&preimage);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    InstanceId(Address(bytes))
}
