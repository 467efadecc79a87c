//! The database aggregate and the load/save pipeline.
//!
//! Load runs the stages in a fixed order, each consuming the previous
//! stage's full output:
//!
//! ```text
//! header parse -> key derivation -> decrypt -> hash check
//!              -> record decode -> tree build
//! ```
//!
//! Save is the reverse: flatten -> record encode -> hash -> encrypt
//! -> header serialize.  The core works purely on byte buffers; file
//! I/O, locking and credential prompting belong to callers.

use rand::TryRngCore;

use crate::crypto::cipher::{self, BodyCipher};
use crate::crypto::kdf;
use crate::errors::{KdbError, Result};
use crate::format::header::{Header, DB_VERSION, HEADER_LEN, SIGNATURE_1, SIGNATURE_2, VERSION_MASK};
use crate::format::record::{decode_record, encode_record, EntryRecord, GroupRecord};

use super::model::{build_tree, flatten, Group};

/// Stretch rounds written when creating a new database.
pub const DEFAULT_KEY_ENC_ROUNDS: u32 = 50_000;

/// Raw key material for load and save.  At least one of password and
/// keyfile must be present; the constructor enforces this so the
/// pipeline never starts with nothing to derive from.
#[derive(Clone)]
pub struct Credentials {
    password: Option<Vec<u8>>,
    keyfile: Option<Vec<u8>>,
}

impl Credentials {
    pub fn new(password: Option<&[u8]>, keyfile: Option<&[u8]>) -> Result<Self> {
        if password.is_none() && keyfile.is_none() {
            return Err(KdbError::MissingCredentials);
        }
        Ok(Credentials {
            password: password.map(<[u8]>::to_vec),
            keyfile: keyfile.map(<[u8]>::to_vec),
        })
    }

    pub fn from_password(password: &str) -> Self {
        Credentials {
            password: Some(password.as_bytes().to_vec()),
            keyfile: None,
        }
    }

    pub fn from_keyfile(keyfile: &[u8]) -> Self {
        Credentials {
            password: None,
            keyfile: Some(keyfile.to_vec()),
        }
    }

    fn derive_final_key(&self, seed_rand: &[u8; 16], seed_key: &[u8; 32], rounds: u32) -> Result<kdf::FinalKey> {
        kdf::derive_final_key(
            self.password.as_deref(),
            self.keyfile.as_deref(),
            seed_rand,
            seed_key,
            rounds,
        )
    }
}

/// An in-memory database: the group/entry tree plus the settings that
/// get written back on save.
///
/// The tree is rebuilt wholesale on every load; it is owned by this
/// aggregate and has no ties to the buffer it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    /// Synthetic root group owning the top-level groups.
    pub root: Group,
    /// Body cipher used on the next save.
    pub cipher: BodyCipher,
    /// Stretch rounds used on the next save.
    pub key_enc_rounds: u32,
    /// Uuids of entries whose group reference did not resolve on load;
    /// those entries hang off the root.  Data-quality anomaly, not an
    /// error.
    pub orphaned_uuids: Vec<String>,
}

impl Database {
    /// An empty database with default settings.
    pub fn new() -> Self {
        Database {
            root: Group::default(),
            cipher: BodyCipher::Aes,
            key_enc_rounds: DEFAULT_KEY_ENC_ROUNDS,
            orphaned_uuids: Vec::new(),
        }
    }

    /// Decrypt and parse a complete database file image.
    pub fn load(buf: &[u8], credentials: &Credentials) -> Result<Self> {
        let header = Header::decode(buf)?;
        if header.version & VERSION_MASK != DB_VERSION & VERSION_MASK {
            return Err(KdbError::UnsupportedVersion(header.version));
        }
        let body_cipher = BodyCipher::from_flags(header.flags)?;
        log::debug!(
            "header: cipher={}, {} groups, {} entries, {} rounds",
            header.cipher_name(),
            header.ngroups,
            header.nentries,
            header.key_enc_rounds
        );

        let key = credentials.derive_final_key(
            &header.seed_rand,
            &header.seed_key,
            header.key_enc_rounds,
        )?;

        let plaintext = cipher::decrypt_body(
            body_cipher,
            key.as_bytes(),
            &header.encryption_iv,
            &buf[HEADER_LEN..],
        )?;
        cipher::verify_contents(&plaintext, &header.contents_hash)?;
        log::debug!("decrypted body: {} bytes", plaintext.len());

        let mut rest: &[u8] = &plaintext;
        let mut groups = Vec::with_capacity(header.ngroups as usize);
        for _ in 0..header.ngroups {
            let (rec, order) = decode_record::<GroupRecord>(rest)?;
            rest = &rest[order.encoded_len()..];
            groups.push(Group::from_record(rec)?);
        }

        let mut entries = Vec::with_capacity(header.nentries as usize);
        for _ in 0..header.nentries {
            let (rec, order) = decode_record::<EntryRecord>(rest)?;
            rest = &rest[order.encoded_len()..];
            entries.push(super::model::Entry::from_record(rec));
        }

        let (root, orphaned_uuids) = build_tree(groups, entries)?;
        if !orphaned_uuids.is_empty() {
            log::warn!(
                "{} entries had unresolved group references and were attached to the root",
                orphaned_uuids.len()
            );
        }

        Ok(Database {
            root,
            cipher: body_cipher,
            key_enc_rounds: header.key_enc_rounds,
            orphaned_uuids,
        })
    }

    /// Serialize and encrypt the database into a complete file image.
    ///
    /// Fresh random seeds and IV are generated on every save, so two
    /// saves of the same tree never produce the same bytes.
    pub fn save(&self, credentials: &Credentials) -> Result<Vec<u8>> {
        let (group_records, entry_records) = flatten(&self.root);

        let mut body = Vec::new();
        for rec in &group_records {
            body.extend(encode_record(rec)?);
        }
        for rec in &entry_records {
            body.extend(encode_record(rec)?);
        }
        log::debug!(
            "serialized body: {} bytes, {} groups, {} entries",
            body.len(),
            group_records.len(),
            entry_records.len()
        );

        let mut seed_rand = [0u8; 16];
        let mut encryption_iv = [0u8; 16];
        let mut seed_key = [0u8; 32];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed_rand)
            .and_then(|()| rand::rngs::OsRng.try_fill_bytes(&mut encryption_iv))
            .and_then(|()| rand::rngs::OsRng.try_fill_bytes(&mut seed_key))
            .map_err(|e| KdbError::Encryption(format!("system rng failed: {e}")))?;

        let header = Header {
            signature1: SIGNATURE_1,
            signature2: SIGNATURE_2,
            flags: self.cipher.flag(),
            version: DB_VERSION,
            seed_rand,
            encryption_iv,
            ngroups: group_records.len() as u32,
            nentries: entry_records.len() as u32,
            contents_hash: cipher::content_hash(&body),
            seed_key,
            key_enc_rounds: self.key_enc_rounds,
        };

        let key = credentials.derive_final_key(&seed_rand, &seed_key, self.key_enc_rounds)?;
        let ciphertext = cipher::encrypt_body(self.cipher, key.as_bytes(), &encryption_iv, &body);

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}
