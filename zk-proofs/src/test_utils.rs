//! Shared fixtures for unit tests.

use k256::ecdsa::SigningKey;

use crate::constants::POOL_SIZE;
use crate::signature::{address_of, tests::sign_challenge};
use crate::types::{Address, InstanceId, ProofRequest, Snapshot, WalletPool, Wei};

pub(crate) const ETH: u128 = 1_000_000_000_000_000_000;

pub(crate) fn eth(amount: u128) -> Wei {
    Wei::from(amount * ETH)
}

pub(crate) fn fixture_key(index: usize) -> SigningKey {
    let mut seed = [0x42u8; 32];
    seed[31] = index as u8 + 1;
    SigningKey::from_slice(&seed).unwrap()
}

pub(crate) fn fixture_pool() -> WalletPool {
    let addresses: Vec<Address> = (0..POOL_SIZE)
        .map(|i| address_of(fixture_key(i).verifying_key()))
        .collect();
    WalletPool::new(addresses).unwrap()
}

/// Index `i` holds `i + 1` ETH, except index 15 which holds 50 ETH.
pub(crate) fn fixture_snapshot(block_number: u64) -> Snapshot {
    let balances = (0..POOL_SIZE)
        .map(|i| if i == 15 { eth(50) } else { eth(i as u128 + 1) })
        .collect();
    Snapshot::new(block_number, balances).unwrap()
}

pub(crate) fn fixture_request(instance_id: InstanceId, index: usize, threshold: Wei) -> ProofRequest {
    let key = fixture_key(index);
    ProofRequest {
        instance_id,
        claimed_index: index,
        threshold_wei: threshold,
        signature: sign_challenge(&key),
        signer_address: address_of(key.verifying_key()),
    }
}
