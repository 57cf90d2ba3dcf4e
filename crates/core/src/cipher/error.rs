//! Cipher error types.

use thiserror::Error;

/// Stream cipher construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The file is marked encrypted but has no key or IV on record.
    #[error("missing key material for encrypted file")]
    MissingKeyMaterial,

    /// Key length does not match the method.
    #[error("invalid key length {actual}, expected {expected}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: &'static str,
        /// Actual length in bytes.
        actual: usize,
    },

    /// IV / nonce length does not match the method.
    #[error("invalid iv length {actual}, expected {expected} bytes")]
    InvalidIvLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// The requested keystream position is not reachable.
    #[error("keystream position {0} out of range")]
    SeekOutOfRange(u64),
}
