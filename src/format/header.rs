//! The fixed 124-byte database file header.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [ 4 bytes] signature1      = 0x9AA2D903
//! [ 4 bytes] signature2      = 0xB54BFB65
//! [ 4 bytes] flags           cipher selection bitmask
//! [ 4 bytes] version
//! [16 bytes] seed_rand       salt hashed into the final key
//! [16 bytes] encryption_iv   CBC IV for the body
//! [ 4 bytes] ngroups
//! [ 4 bytes] nentries
//! [32 bytes] contents_hash   SHA-256 of the decrypted body
//! [32 bytes] seed_key        key-transform seed for stretching
//! [ 4 bytes] key_enc_rounds  number of stretch rounds
//! ```
//!
//! Both signatures must match before anything else is attempted; this
//! is the first integrity gate, checked before decryption.

use crate::errors::{KdbError, Result};

pub const SIGNATURE_1: u32 = 0x9AA2_D903;
pub const SIGNATURE_2: u32 = 0xB54B_FB65;

/// Serialized header size in bytes.
pub const HEADER_LEN: usize = 124;

/// The single supported on-disk version, compared under `VERSION_MASK`.
pub const DB_VERSION: u32 = 0x0003_0002;
pub const VERSION_MASK: u32 = 0xFFFF_FF00;

// Cipher selection flag bits.
pub const FLAG_SHA2: u32 = 1;
pub const FLAG_RIJNDAEL: u32 = 2;
pub const FLAG_ARCFOUR: u32 = 4;
pub const FLAG_TWOFISH: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub signature1: u32,
    pub signature2: u32,
    pub flags: u32,
    pub version: u32,
    pub seed_rand: [u8; 16],
    pub encryption_iv: [u8; 16],
    pub ngroups: u32,
    pub nentries: u32,
    pub contents_hash: [u8; 32],
    pub seed_key: [u8; 32],
    pub key_enc_rounds: u32,
}

impl Header {
    /// Parse a header from the first 124 bytes of a database file and
    /// validate its signatures.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(KdbError::Structural(format!(
                "file too small for a database header: {} bytes",
                buf.len()
            )));
        }

        let mut r = FieldReader { buf, index: 0 };
        let header = Header {
            signature1: r.u32(),
            signature2: r.u32(),
            flags: r.u32(),
            version: r.u32(),
            seed_rand: r.bytes(),
            encryption_iv: r.bytes(),
            ngroups: r.u32(),
            nentries: r.u32(),
            contents_hash: r.bytes(),
            seed_key: r.bytes(),
            key_enc_rounds: r.u32(),
        };

        if header.signature1 != SIGNATURE_1 || header.signature2 != SIGNATURE_2 {
            return Err(KdbError::InvalidDatabase(
                header.signature1,
                header.signature2,
            ));
        }

        Ok(header)
    }

    /// Serialize the header, fields in declaration order.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut w = FieldWriter {
            buf: &mut buf,
            index: 0,
        };
        w.u32(self.signature1);
        w.u32(self.signature2);
        w.u32(self.flags);
        w.u32(self.version);
        w.bytes(&self.seed_rand);
        w.bytes(&self.encryption_iv);
        w.u32(self.ngroups);
        w.u32(self.nentries);
        w.bytes(&self.contents_hash);
        w.bytes(&self.seed_key);
        w.u32(self.key_enc_rounds);
        buf
    }

    /// Human-readable name of the cipher selected by the flags bitmask.
    ///
    /// First matching bit wins, in fixed priority order.
    pub fn cipher_name(&self) -> &'static str {
        if self.flags & FLAG_SHA2 != 0 {
            "SHA2"
        } else if self.flags & FLAG_RIJNDAEL != 0 {
            "Rijndael"
        } else if self.flags & FLAG_ARCFOUR != 0 {
            "ArcFour"
        } else if self.flags & FLAG_TWOFISH != 0 {
            "TwoFish"
        } else {
            "Unknown"
        }
    }
}

struct FieldReader<'a> {
    buf: &'a [u8],
    index: usize,
}

impl FieldReader<'_> {
    fn u32(&mut self) -> u32 {
        let value = u32::from_le_bytes(self.buf[self.index..self.index + 4].try_into().unwrap());
        self.index += 4;
        value
    }

    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let value: [u8; N] = self.buf[self.index..self.index + N].try_into().unwrap();
        self.index += N;
        value
    }
}

struct FieldWriter<'a> {
    buf: &'a mut [u8],
    index: usize,
}

impl FieldWriter<'_> {
    fn u32(&mut self, value: u32) {
        self.buf[self.index..self.index + 4].copy_from_slice(&value.to_le_bytes());
        self.index += 4;
    }

    fn bytes(&mut self, value: &[u8]) {
        self.buf[self.index..self.index + value.len()].copy_from_slice(value);
        self.index += value.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            signature1: SIGNATURE_1,
            signature2: SIGNATURE_2,
            flags: FLAG_RIJNDAEL,
            version: DB_VERSION,
            seed_rand: [0x11; 16],
            encryption_iv: [0x22; 16],
            ngroups: 3,
            nentries: 5,
            contents_hash: [0x33; 32],
            seed_key: [0x44; 32],
            key_enc_rounds: 50_000,
        }
    }

    #[test]
    fn roundtrip_field_for_field() {
        let header = sample_header();
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(Header::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn bad_signature_is_invalid_database() {
        let mut header = sample_header();
        header.signature2 = 0xDEAD_BEEF;
        let encoded = header.encode();
        assert!(matches!(
            Header::decode(&encoded),
            Err(KdbError::InvalidDatabase(SIGNATURE_1, 0xDEAD_BEEF))
        ));
    }

    #[test]
    fn short_buffer_is_structural() {
        assert!(matches!(
            Header::decode(&[0u8; 50]),
            Err(KdbError::Structural(_))
        ));
    }

    #[test]
    fn cipher_name_priority_order() {
        let mut header = sample_header();
        for (flags, name) in [
            (FLAG_SHA2 | FLAG_TWOFISH, "SHA2"),
            (FLAG_RIJNDAEL, "Rijndael"),
            (FLAG_ARCFOUR | FLAG_TWOFISH, "ArcFour"),
            (FLAG_TWOFISH, "TwoFish"),
            (0x40, "Unknown"),
        ] {
            header.flags = flags;
            assert_eq!(header.cipher_name(), name);
        }
    }
}
