//! Seekable stream ciphers for encrypted files.

mod decryptor;
mod error;

pub use decryptor::{StreamDecryptor, StreamEncryptor};
pub use error::CipherError;
