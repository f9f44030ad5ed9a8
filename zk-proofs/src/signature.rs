//! Wallet signatures over the challenge message.
//!
//! Signatures are the 65-byte `r || s || v` form wallets return from
//! `personal_sign`. The message is hashed EIP-191 style before recovery.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tiny_keccak::{Hasher, Keccak};

use crate::constants::{CHALLENGE_MESSAGE, LIMBS_PER_WORD};
use crate::error::{ProofError, Result};
use crate::types::Address;

pub const SIGNATURE_LEN: usize = 65;

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];

    hasher.update(bytes);
    hasher.finalize(&mut output);

    output
}

/// EIP-191 `personal_sign` digest of `message`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];

    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize(&mut output);

    output
}

/// Digest every prover signs.
pub fn challenge_hash() -> [u8; 32] {
    personal_message_hash(CHALLENGE_MESSAGE.as_bytes())
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address(bytes)
}

/// A parsed, low-s normalised signature with its recovery parity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletSignature {
    signature: Signature,
    recovery_id: RecoveryId,
}

impl WalletSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(ProofError::InvalidSignature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let parity = match bytes[64] {
            0 | 27 => false,
            1 | 28 => true,
            v => return Err(ProofError::InvalidSignature(format!("unsupported recovery byte {v}"))),
        };

        let signature = Signature::from_slice(&bytes[..64])
            .map_err(|e| ProofError::InvalidSignature(e.to_string()))?;

        // Wallets may hand back high-s signatures; the negated s recovers the
        // same key with the opposite y parity.
        let (signature, parity) = match signature.normalize_s() {
            Some(normalized) => (normalized, !parity),
            None => (signature, parity),
        };

        Ok(Self {
            signature,
            recovery_id: RecoveryId::new(parity, false),
        })
    }

    /// Recover the signing key for `prehash`.
    pub fn recover(&self, prehash: &[u8; 32]) -> Result<VerifyingKey> {
        VerifyingKey::recover_from_prehash(prehash, &self.signature, self.recovery_id)
            .map_err(|e| ProofError::InvalidSignature(e.to_string()))
    }

    pub fn r_bytes(&self) -> [u8; 32] {
        self.signature.r().to_bytes().into()
    }

    pub fn s_bytes(&self) -> [u8; 32] {
        self.signature.s().to_bytes().into()
    }

    /// Recovery parity as carried in the witness (0 or 1).
    pub fn parity(&self) -> u8 {
        u8::from(self.recovery_id.is_y_odd())
    }

    /// Canonical 65-byte form with `v` in {27, 28}.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(&self.r_bytes());
        out[32..64].copy_from_slice(&self.s_bytes());
        out[64] = 27 + self.parity();
        out
    }
}

/// Split a 32-byte big-endian word into little-endian 64-bit limbs.
///
/// Limb 0 holds the least significant 64 bits.
pub fn to_limbs(word_be: &[u8; 32]) -> [u64; LIMBS_PER_WORD] {
    let mut limbs = [0u64; LIMBS_PER_WORD];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let end = 32 - i * 8;
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&word_be[end - 8..end]);
        *limb = u64::from_be_bytes(chunk);
    }
    limbs
}

/// Affine coordinates of a public key as 32-byte big-endian words.
pub fn public_key_coordinates(key: &VerifyingKey) -> Result<([u8; 32], [u8; 32])> {
    let point = key.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(ProofError::InvalidSignature("recovered key is the identity".into()));
    };
    let mut xs = [0u8; 32];
    let mut ys = [0u8; 32];
    xs.copy_from_slice(x);
    ys.copy_from_slice(y);
    Ok((xs, ys))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    pub(crate) fn sign_challenge(key: &SigningKey) -> Vec<u8> {
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&challenge_hash())
            .unwrap();
        let mut out = signature.to_bytes().to_vec();
        out.push(27 + recovery_id.to_byte());
        out
    }

    fn test_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_known_address() {
        // Anvil / Hardhat account #0.
        let key = SigningKey::from_slice(
            &hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80").unwrap(),
        )
        .unwrap();
        assert_eq!(
            address_of(key.verifying_key()).to_string(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_recover_signer() {
        let key = test_key(7);
        let sig = WalletSignature::from_bytes(&sign_challenge(&key)).unwrap();
        let recovered = sig.recover(&challenge_hash()).unwrap();
        assert_eq!(address_of(&recovered), address_of(key.verifying_key()));
    }

    #[test]
    fn test_accepts_raw_parity_byte() {
        let key = test_key(9);
        let mut bytes = sign_challenge(&key);
        bytes[64] -= 27;
        let sig = WalletSignature::from_bytes(&bytes).unwrap();
        let recovered = sig.recover(&challenge_hash()).unwrap();
        assert_eq!(address_of(&recovered), address_of(key.verifying_key()));
    }

    #[test]
    fn test_high_s_is_normalised() {
        let key = test_key(11);
        let bytes = sign_challenge(&key);
        let low = Signature::from_slice(&bytes[..64]).unwrap();
        let high_s = -*low.s();
        let high = Signature::from_scalars(low.r().to_bytes(), high_s.to_bytes()).unwrap();

        let mut flipped = high.to_bytes().to_vec();
        flipped.push(if bytes[64] == 27 { 28 } else { 27 });

        let sig = WalletSignature::from_bytes(&flipped).unwrap();
        let recovered = sig.recover(&challenge_hash()).unwrap();
        assert_eq!(address_of(&recovered), address_of(key.verifying_key()));
        assert_eq!(sig.to_bytes().to_vec(), bytes);
    }

    #[test]
    fn test_rejects_bad_lengths_and_v() {
        assert!(matches!(
            WalletSignature::from_bytes(&[0u8; 64]),
            Err(ProofError::InvalidSignature(_))
        ));

        let mut bytes = sign_challenge(&test_key(3));
        bytes[64] = 5;
        assert!(matches!(
            WalletSignature::from_bytes(&bytes),
            Err(ProofError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_limbs_little_endian() {
        let mut word = [0u8; 32];
        word[31] = 1; // least significant byte
        word[0] = 0x80; // most significant byte
        let limbs = to_limbs(&word);
        assert_eq!(limbs[0], 1);
        assert_eq!(limbs[1], 0);
        assert_eq!(limbs[2], 0);
        assert_eq!(limbs[3], 0x8000_0000_0000_0000);
    }
}
