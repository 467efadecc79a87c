//! Cryptographic pipeline pieces:
//! - composite-key derivation and round-based stretching (`kdf`)
//! - the CBC body envelope and content-hash check (`cipher`)

pub mod cipher;
pub mod kdf;

pub use cipher::{content_hash, decrypt_body, encrypt_body, verify_contents, BodyCipher};
pub use kdf::{composite_key, derive_final_key, transform_key, FinalKey};
