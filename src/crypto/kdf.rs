//! Password/keyfile key derivation with round-based key stretching.
//!
//! The final body key is built in three steps:
//!
//! 1. **Composite key**: each supplied credential is hashed with
//!    SHA-256 on its own; the digests are concatenated (password first)
//!    and hashed again into a 256-bit composite key.
//! 2. **Stretching**: the header's 32-byte transform seed keys an
//!    AES-256 block cipher; each 16-byte half of the composite key is
//!    encrypted in place, single-block ECB, for exactly the header's
//!    round count.  Every round feeds the next, so the work cannot be
//!    shortcut or reordered.
//! 3. **Final key**: SHA-256(seed_rand || stretched composite key).
//!
//! With zero rounds this degenerates to SHA-256(seed_rand || composite
//! key), with no stretching.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::errors::{KdbError, Result};

/// Length of the derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Build the composite key from the supplied credentials.
///
/// At least one of `password` and `keyfile` must be present.
pub fn composite_key(password: Option<&[u8]>, keyfile: Option<&[u8]>) -> Result<[u8; KEY_LEN]> {
    let mut hasher = Sha256::new();
    match (password, keyfile) {
        (None, None) => return Err(KdbError::MissingCredentials),
        (Some(p), None) => hasher.update(Sha256::digest(p)),
        (None, Some(k)) => hasher.update(Sha256::digest(k)),
        (Some(p), Some(k)) => {
            hasher.update(Sha256::digest(p));
            hasher.update(Sha256::digest(k));
        }
    }
    Ok(hasher.finalize().into())
}

/// Stretch the composite key: AES-256-ECB on each 16-byte half,
/// `rounds` sequential encryptions each.
pub fn transform_key(composite: &[u8; KEY_LEN], seed_key: &[u8; 32], rounds: u32) -> [u8; KEY_LEN] {
    let cipher = Aes256::new(GenericArray::from_slice(seed_key));

    let mut out = *composite;
    let (left, right) = out.split_at_mut(16);
    let left = GenericArray::from_mut_slice(left);
    let right = GenericArray::from_mut_slice(right);
    for _ in 0..rounds {
        cipher.encrypt_block(left);
    }
    for _ in 0..rounds {
        cipher.encrypt_block(right);
    }
    out
}

/// Derive the final body key from credentials and header salts.
pub fn derive_final_key(
    password: Option<&[u8]>,
    keyfile: Option<&[u8]>,
    seed_rand: &[u8; 16],
    seed_key: &[u8; 32],
    rounds: u32,
) -> Result<FinalKey> {
    let mut composite = composite_key(password, keyfile)?;
    let mut stretched = transform_key(&composite, seed_key, rounds);
    composite.zeroize();

    let mut hasher = Sha256::new();
    hasher.update(seed_rand);
    hasher.update(stretched);
    stretched.zeroize();

    Ok(FinalKey::new(hasher.finalize().into()))
}

/// The derived body cipher key, zeroed on drop so it cannot linger in
/// memory after the load or save call that produced it.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct FinalKey {
    bytes: [u8; KEY_LEN],
}

impl FinalKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}
