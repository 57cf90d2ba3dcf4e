//! Seekable stream ciphers over fragment byte streams.
//!
//! Files are encrypted with a counter-mode stream cipher, so decryption can
//! start at any byte offset without reading from the beginning: the keystream
//! is advanced whole blocks by counter arithmetic and any intra-block
//! remainder is burned off before the first real byte.

use aes::{Aes128, Aes256};
use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;

use super::error::CipherError;
use crate::catalog::EncryptionMethod;

const AES_BLOCK: u64 = 16;
const CHACHA_NONCE_LEN: usize = 12;

enum Inner {
    None,
    Aes128(Ctr128BE<Aes128>),
    Aes256(Ctr128BE<Aes256>),
    ChaCha20(Box<ChaCha20>),
}

/// A stream cipher positioned at a byte offset of a file's keystream.
///
/// Counter mode is symmetric; the same construction encrypts on upload and
/// decrypts on read.
pub struct StreamDecryptor {
    inner: Inner,
}

/// Alias documenting the encrypt direction of the same transform.
pub type StreamEncryptor = StreamDecryptor;

// Key material and cipher state stay out of Debug output.
impl std::fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecryptor").finish_non_exhaustive()
    }
}

impl StreamDecryptor {
    /// Build a cipher positioned at `offset` bytes into the keystream.
    ///
    /// `offset` is the position within the logical (whole-file) byte stream,
    /// not within any single fragment.
    ///
    /// # Errors
    ///
    /// Returns `MissingKeyMaterial` or a length error if the key material
    /// does not match the method, and `SeekOutOfRange` if the keystream
    /// cannot reach `offset`.
    pub fn new(
        method: EncryptionMethod,
        key: Option<&[u8]>,
        iv: Option<&[u8]>,
        offset: u64,
    ) -> Result<Self, CipherError> {
        match method {
            EncryptionMethod::None => Ok(Self { inner: Inner::None }),
            EncryptionMethod::AesCtr => {
                let (key, iv) = required(key, iv)?;
                if iv.len() != 16 {
                    return Err(CipherError::InvalidIvLength {
                        expected: 16,
                        actual: iv.len(),
                    });
                }
                let counter = seek_counter(iv, offset);
                let remainder = usize::try_from(offset % AES_BLOCK)
                    .map_err(|_| CipherError::SeekOutOfRange(offset))?;
                let mut inner = match key.len() {
                    16 => Ctr128BE::<Aes128>::new_from_slices(key, &counter)
                        .map(Inner::Aes128)
                        .map_err(|_| CipherError::MissingKeyMaterial)?,
                    32 => Ctr128BE::<Aes256>::new_from_slices(key, &counter)
                        .map(Inner::Aes256)
                        .map_err(|_| CipherError::MissingKeyMaterial)?,
                    n => {
                        return Err(CipherError::InvalidKeyLength {
                            expected: "16 or 32",
                            actual: n,
                        });
                    }
                };
                discard(&mut inner, remainder);
                Ok(Self { inner })
            }
            EncryptionMethod::ChaCha20 => {
                let (key, iv) = required(key, iv)?;
                if key.len() != 32 {
                    return Err(CipherError::InvalidKeyLength {
                        expected: "32",
                        actual: key.len(),
                    });
                }
                if iv.len() != CHACHA_NONCE_LEN {
                    return Err(CipherError::InvalidIvLength {
                        expected: CHACHA_NONCE_LEN,
                        actual: iv.len(),
                    });
                }
                let mut cipher = ChaCha20::new_from_slices(key, iv)
                    .map_err(|_| CipherError::MissingKeyMaterial)?;
                cipher
                    .try_seek(offset)
                    .map_err(|_| CipherError::SeekOutOfRange(offset))?;
                Ok(Self {
                    inner: Inner::ChaCha20(Box::new(cipher)),
                })
            }
        }
    }

    /// Transform `buf` in place, advancing the keystream by `buf.len()` bytes.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.inner {
            Inner::None => {}
            Inner::Aes128(c) => c.apply_keystream(buf),
            Inner::Aes256(c) => c.apply_keystream(buf),
            Inner::ChaCha20(c) => c.apply_keystream(buf),
        }
    }
}

fn required<'a>(
    key: Option<&'a [u8]>,
    iv: Option<&'a [u8]>,
) -> Result<(&'a [u8], &'a [u8]), CipherError> {
    match (key, iv) {
        (Some(k), Some(i)) => Ok((k, i)),
        _ => Err(CipherError::MissingKeyMaterial),
    }
}

/// Advance a 16-byte big-endian counter by the whole blocks before `offset`.
///
/// The counter wraps modulo 2^128, matching CTR keystream arithmetic.
fn seek_counter(iv: &[u8], offset: u64) -> [u8; 16] {
    let mut base = [0u8; 16];
    base.copy_from_slice(iv);
    let counter = u128::from_be_bytes(base).wrapping_add(u128::from(offset / AES_BLOCK));
    counter.to_be_bytes()
}

/// Burn off the intra-block remainder so the next byte lines up with `offset`.
fn discard(inner: &mut Inner, remainder: usize) {
    if remainder == 0 {
        return;
    }
    let mut sink = [0u8; 64];
    let buf = &mut sink[..remainder];
    match inner {
        Inner::None => {}
        Inner::Aes128(c) => c.apply_keystream(buf),
        Inner::Aes256(c) => c.apply_keystream(buf),
        Inner::ChaCha20(c) => c.apply_keystream(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AES_KEY: [u8; 32] = [7u8; 32];
    const AES_IV: [u8; 16] = [3u8; 16];
    const CHACHA_KEY: [u8; 32] = [9u8; 32];
    const CHACHA_NONCE: [u8; 12] = [5u8; 12];

    fn encrypt_all(method: EncryptionMethod, key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
        let mut cipher = StreamEncryptor::new(method, Some(key), Some(iv), 0).expect("cipher");
        let mut out = data.to_vec();
        cipher.apply(&mut out);
        out
    }

    fn decrypt_from(
        method: EncryptionMethod,
        key: &[u8],
        iv: &[u8],
        offset: u64,
        data: &[u8],
    ) -> Vec<u8> {
        let mut cipher = StreamDecryptor::new(method, Some(key), Some(iv), offset).expect("cipher");
        let mut out = data.to_vec();
        cipher.apply(&mut out);
        out
    }

    #[test]
    fn test_none_is_passthrough() {
        let mut cipher = StreamDecryptor::new(EncryptionMethod::None, None, None, 42).expect("none");
        let mut buf = b"hello".to_vec();
        cipher.apply(&mut buf);
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_aes_mid_stream_start_matches_full_decrypt() {
        let plain: Vec<u8> = (0u16..200).map(|i| (i % 251) as u8).collect();
        let sealed = encrypt_all(EncryptionMethod::AesCtr, &AES_KEY, &AES_IV, &plain);

        // 37 is deliberately not block aligned.
        for offset in [0u64, 15, 16, 17, 37, 160] {
            let o = offset as usize;
            let got =
                decrypt_from(EncryptionMethod::AesCtr, &AES_KEY, &AES_IV, offset, &sealed[o..]);
            assert_eq!(got, &plain[o..], "offset {offset}");
        }
    }

    #[test]
    fn test_aes_128_key_supported() {
        let key = [1u8; 16];
        let plain = b"sixteen byte key".to_vec();
        let sealed = encrypt_all(EncryptionMethod::AesCtr, &key, &AES_IV, &plain);
        let got = decrypt_from(EncryptionMethod::AesCtr, &key, &AES_IV, 0, &sealed);
        assert_eq!(got, plain);
    }

    #[test]
    fn test_chacha_mid_stream_start_matches_full_decrypt() {
        let plain: Vec<u8> = (0u16..300).map(|i| (i % 251) as u8).collect();
        let sealed = encrypt_all(EncryptionMethod::ChaCha20, &CHACHA_KEY, &CHACHA_NONCE, &plain);

        for offset in [0u64, 63, 64, 65, 130] {
            let o = offset as usize;
            let got = decrypt_from(
                EncryptionMethod::ChaCha20,
                &CHACHA_KEY,
                &CHACHA_NONCE,
                offset,
                &sealed[o..],
            );
            assert_eq!(got, &plain[o..], "offset {offset}");
        }
    }

    #[test]
    fn test_split_application_equals_contiguous() {
        let plain: Vec<u8> = (0u16..128).map(|i| i as u8).collect();
        let sealed = encrypt_all(EncryptionMethod::AesCtr, &AES_KEY, &AES_IV, &plain);

        let mut cipher =
            StreamDecryptor::new(EncryptionMethod::AesCtr, Some(&AES_KEY), Some(&AES_IV), 0)
                .expect("cipher");
        let mut out = sealed.clone();
        let (a, b) = out.split_at_mut(50);
        cipher.apply(a);
        cipher.apply(b);
        assert_eq!(out, plain);
    }

    #[test]
    fn test_missing_key_material() {
        let err = StreamDecryptor::new(EncryptionMethod::AesCtr, None, None, 0).unwrap_err();
        assert_eq!(err, CipherError::MissingKeyMaterial);
    }

    #[test]
    fn test_invalid_lengths() {
        let err =
            StreamDecryptor::new(EncryptionMethod::AesCtr, Some(&[0u8; 20]), Some(&AES_IV), 0)
                .unwrap_err();
        assert!(matches!(err, CipherError::InvalidKeyLength { actual: 20, .. }));

        let err =
            StreamDecryptor::new(EncryptionMethod::ChaCha20, Some(&CHACHA_KEY), Some(&[0u8; 8]), 0)
                .unwrap_err();
        assert!(matches!(err, CipherError::InvalidIvLength { actual: 8, .. }));
    }
}
