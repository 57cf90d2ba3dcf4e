//! Credential pool: bounded-concurrency, rate-limit-aware credential leasing.
//!
//! This module provides:
//! - The `Credential` type (bot tokens and webhooks)
//! - `CredentialPool` with per-owner slot accounting and bounded-wait leasing
//! - Rate-limit observation folding and account-wide block tracking

mod error;
mod manager;
mod types;

pub use error::PoolError;
pub use manager::{CredentialFilter, CredentialPool, Lease};
pub use types::{Credential, RateLimitObservation};
