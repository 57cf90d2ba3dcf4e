//! Repository implementations of the core store traits.

mod credential;
mod storage;

pub use credential::CredentialRepository;
pub use storage::StorageRepository;
