//! Core storage/streaming engine for Shardbox.
//!
//! This crate contains the engine logic with ZERO web or database dependencies.
//! Files are split into size-bounded fragments, each stored as an attachment on
//! a message of an external platform, uploaded through a pool of rate-limited
//! credentials.
//!
//! # Modules
//!
//! - `catalog` - Fragment placement records and layout invariants
//! - `pool` - Per-owner credential pool with admission control
//! - `gateway` - The only component that talks to the external platform
//! - `cipher` - Seekable stream ciphers (AES-CTR / ChaCha20)
//! - `stream` - Byte-range resolution and the decrypting fragment reader
//! - `gc` - Attachment consistency maintenance on delete/edit
//! - `upload` - Chunk-encrypt-send-record upload pipeline

pub mod catalog;
pub mod cipher;
pub mod gateway;
pub mod gc;
pub mod pool;
pub mod stream;
pub mod upload;
