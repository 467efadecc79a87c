//! The body cipher envelope: CBC encryption with PKCS#7 padding and
//! content-hash verification.
//!
//! The header flags select the algorithm (AES-256 or Twofish; the
//! legacy ARC4 flag is unsupported).  There is no MAC in this format:
//! the SHA-256 of the decrypted plaintext against the header's stored
//! hash is the sole signal distinguishing good credentials from bad
//! ones, so padding failures on a well-formed body are reported as
//! authentication failures too, never as structural errors.

use aes::Aes256;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use twofish::Twofish;

use crate::errors::{KdbError, Result};
use crate::format::header::{FLAG_RIJNDAEL, FLAG_TWOFISH};

/// CBC block size for both supported algorithms.
const BLOCK_LEN: usize = 16;

/// The body encryption algorithm selected by the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyCipher {
    Aes,
    Twofish,
}

impl BodyCipher {
    /// Resolve the algorithm from the header flags bitmask.
    pub fn from_flags(flags: u32) -> Result<Self> {
        if flags & FLAG_RIJNDAEL != 0 {
            Ok(BodyCipher::Aes)
        } else if flags & FLAG_TWOFISH != 0 {
            Ok(BodyCipher::Twofish)
        } else {
            Err(KdbError::UnsupportedCipher(flags))
        }
    }

    /// The flag bit written back to the header on save.
    pub fn flag(self) -> u32 {
        match self {
            BodyCipher::Aes => FLAG_RIJNDAEL,
            BodyCipher::Twofish => FLAG_TWOFISH,
        }
    }
}

/// Decrypt the body and strip the PKCS#7 padding.
pub fn decrypt_body(
    cipher: BodyCipher,
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(KdbError::Structural(format!(
            "encrypted body length {} is not a multiple of the cipher block size",
            ciphertext.len()
        )));
    }

    let plaintext = match cipher {
        BodyCipher::Aes => cbc::Decryptor::<Aes256>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        BodyCipher::Twofish => cbc::Decryptor::<Twofish>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };

    // A wrong key produces garbage padding; indistinguishable from
    // corruption, and reported the same way as a hash mismatch.
    plaintext.map_err(|_| KdbError::Authentication)
}

/// Encrypt the serialized body with PKCS#7 padding.
pub fn encrypt_body(
    cipher: BodyCipher,
    key: &[u8; 32],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> Vec<u8> {
    match cipher {
        BodyCipher::Aes => cbc::Encryptor::<Aes256>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        BodyCipher::Twofish => cbc::Encryptor::<Twofish>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    }
}

/// SHA-256 digest of the decrypted body, stored in the header.
pub fn content_hash(plaintext: &[u8]) -> [u8; 32] {
    Sha256::digest(plaintext).into()
}

/// Verify the decrypted body against the header's stored hash,
/// constant-time.
pub fn verify_contents(plaintext: &[u8], expected: &[u8; 32]) -> Result<()> {
    let actual = content_hash(plaintext);
    if actual.ct_eq(expected).into() {
        Ok(())
    } else {
        Err(KdbError::Authentication)
    }
}
