//! Data model shared between the commitment model, the witness builder and the verifier.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ruint::aliases::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{AMOUNT_BITS, POOL_SIZE, PUBLIC_SIGNAL_ARITY};
use crate::error::PoolError;

/// Wei amounts as published by the chain.
pub type Wei = U256;

/// 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Field encoding used by the circuit (big-endian integer, always < p).
    pub fn to_field(&self) -> Fr {
        Fr::from_be_bytes_mod_order(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| PoolError::InvalidAddress(format!("{s}: {e}")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| PoolError::InvalidAddress(format!("{s}: expected 20 bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of one pool instance (the instance contract address).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Address);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The anonymity set: exactly [`POOL_SIZE`] unique addresses, order significant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalletPool {
    addresses: Vec<Address>,
}

impl WalletPool {
    pub fn new(addresses: Vec<Address>) -> Result<Self, PoolError> {
        if addresses.len() != POOL_SIZE {
            return Err(PoolError::WrongSize {
                expected: POOL_SIZE,
                got: addresses.len(),
            });
        }

        for (second, address) in addresses.iter().enumerate() {
            if let Some(first) = addresses[..second].iter().position(|a| a == address) {
                return Err(PoolError::DuplicateAddress {
                    address: *address,
                    first,
                    second,
                });
            }
        }

        Ok(Self { addresses })
    }

    pub fn get(&self, index: usize) -> Option<&Address> {
        self.addresses.get(index)
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<'de> Deserialize<'de> for WalletPool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            addresses: Vec<Address>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.addresses).map_err(serde::de::Error::custom)
    }
}

/// Balances of every pool index, captured atomically at one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    block_number: u64,
    balances: Vec<Wei>,
}

impl Snapshot {
    pub fn new(block_number: u64, balances: Vec<Wei>) -> Result<Self, PoolError> {
        if balances.len() != POOL_SIZE {
            return Err(PoolError::WrongBalanceCount {
                expected: POOL_SIZE,
                got: balances.len(),
            });
        }
        Ok(Self {
            block_number,
            balances,
        })
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn balance(&self, index: usize) -> Option<Wei> {
        self.balances.get(index).copied()
    }

    pub fn balances(&self) -> &[Wei] {
        &self.balances
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            block_number: u64,
            balances: Vec<Wei>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.block_number, raw.balances).map_err(serde::de::Error::custom)
    }
}

/// Prover-supplied parameters for one proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofRequest {
    pub instance_id: InstanceId,
    pub claimed_index: usize,
    pub threshold_wei: Wei,
    /// 65-byte `r || s || v` signature over the challenge message.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub signer_address: Address,
}

/// Narrow a wei amount to the circuit's 128-bit domain.
pub fn amount_to_u128(value: &Wei) -> Option<u128> {
    if value.bit_len() > AMOUNT_BITS {
        return None;
    }
    let limbs = value.as_limbs();
    Some(u128::from(limbs[0]) | (u128::from(limbs[1]) << 64))
}

/// Typed view of the four public signals, in circuit order.
///
/// Never carries the claimed index or the exact balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublicSignals {
    #[serde(serialize_with = "fr_as_hex")]
    pub pool_commitment: Fr,
    pub block_number: u64,
    pub threshold: u128,
    pub satisfied: bool,
}

impl PublicSignals {
    pub fn to_field_elements(&self) -> Vec<Fr> {
        vec![
            self.pool_commitment,
            Fr::from(self.block_number),
            Fr::from(self.threshold),
            Fr::from(self.satisfied),
        ]
    }

    /// Strict decoding: exact arity, integers in range, flag exactly 0 or 1.
    pub fn from_field_elements(signals: &[Fr]) -> Result<Self, String> {
        let [commitment, block, threshold, satisfied] = signals else {
            return Err(format!(
                "expected {PUBLIC_SIGNAL_ARITY} public signals, got {}",
                signals.len()
            ));
        };

        let block = fr_to_u128(block, 64).ok_or("block number does not fit in 64 bits")? as u64;
        let threshold = fr_to_u128(threshold, AMOUNT_BITS).ok_or("threshold does not fit in 128 bits")?;
        let satisfied = match fr_to_u128(satisfied, 1) {
            Some(0) => false,
            Some(1) => true,
            _ => return Err("satisfied flag is not 0 or 1".to_string()),
        };

        Ok(Self {
            pool_commitment: *commitment,
            block_number: block,
            threshold,
            satisfied,
        })
    }
}

fn fr_to_u128(x: &Fr, bits: usize) -> Option<u128> {
    let big = x.into_bigint();
    if big.num_bits() as usize > bits {
        return None;
    }
    let limbs = big.as_ref();
    Some(u128::from(limbs[0]) | (u128::from(limbs[1]) << 64))
}

fn fr_as_hex<S: Serializer>(x: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
    FrHex::from_fr(x).serialize(serializer)
}

/// JSON-friendly representation of a field element.
///
/// Fr values travel as hex strings of the canonical compressed (little-endian)
/// encoding, so every component agrees on one byte layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrHex {
    pub hex: String,
}

impl FrHex {
    pub fn from_fr(x: &Fr) -> Self {
        let mut bytes = Vec::new();
        x.serialize_compressed(&mut bytes)
            .expect("in-memory serialization");
        Self { hex: hex::encode(bytes) }
    }

    pub fn to_fr(&self) -> Result<Fr, String> {
        let bytes = hex::decode(&self.hex).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        Fr::deserialize_compressed(&bytes[..]).map_err(|e| format!("invalid field bytes: {e}"))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}
