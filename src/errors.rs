use thiserror::Error;

/// All errors that can occur while loading or saving a database.
#[derive(Debug, Error)]
pub enum KdbError {
    // --- Parsing errors ---
    #[error("Malformed database structure: {0}")]
    Structural(String),

    #[error("Invalid database: bad signatures {0:#010x} {1:#010x}")]
    InvalidDatabase(u32, u32),

    #[error("Unsupported database version: {0:#010x}")]
    UnsupportedVersion(u32),

    // --- Configuration errors ---
    #[error("Password and/or keyfile is required")]
    MissingCredentials,

    // --- Crypto errors ---
    #[error("Content hash mismatch: the key is wrong or the file is damaged")]
    Authentication,

    #[error("Unsupported cipher selected by header flags {0:#06x}")]
    UnsupportedCipher(u32),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Convenience type alias for kpdb results.
pub type Result<T> = std::result::Result<T, KdbError>;
