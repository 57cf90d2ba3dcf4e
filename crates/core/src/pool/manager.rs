//! Per-owner credential pool with slot accounting and rate-limit tracking.
//!
//! Every request to the external platform goes out under a credential leased
//! from this pool. A credential carries a bounded number of concurrent slots
//! and a request budget learned from rate-limit response headers; acquisition
//! waits a bounded time for a slot before giving up.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shardbox_shared::config::PoolConfig;
use shardbox_shared::types::{CredentialId, OwnerId};
use tracing::{debug, warn};

use super::error::PoolError;
use super::types::{Credential, RateLimitObservation};

/// Tracked state of one credential.
#[derive(Debug)]
struct CredState {
    credential: Credential,
    /// Concurrent requests currently out under this credential.
    used_slots: u32,
    /// Requests left in the current rate-limit window.
    remaining: u32,
    /// When the window resets.
    reset_at: DateTime<Utc>,
    /// Rejected by the platform; out of rotation until re-seeded.
    revoked: bool,
}

impl CredState {
    fn new(credential: Credential) -> Self {
        Self {
            credential,
            used_slots: 0,
            // Window state is unknown until the first response reports it;
            // a past reset_at makes the credential immediately usable.
            remaining: 1,
            reset_at: DateTime::UNIX_EPOCH,
            revoked: false,
        }
    }

    fn usable(&self, max_slots: u32, now: DateTime<Utc>) -> bool {
        !self.revoked
            && self.used_slots < max_slots
            && (self.remaining > 1 || now >= self.reset_at)
    }
}

#[derive(Debug, Default)]
struct OwnerState {
    credentials: Vec<CredState>,
    blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct OwnerPool {
    state: Mutex<OwnerState>,
}

impl OwnerPool {
    fn lock(&self) -> std::sync::MutexGuard<'_, OwnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Which credential kinds an acquisition will accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialFilter {
    /// Any registered credential.
    #[default]
    Any,
    /// Bot tokens only; webhooks cannot read arbitrary channel messages.
    BotsOnly,
}

impl CredentialFilter {
    const fn admits(self, credential: &Credential) -> bool {
        match self {
            Self::Any => true,
            Self::BotsOnly => credential.is_bot(),
        }
    }
}

/// A leased credential. Dropping the lease frees its slot.
pub struct Lease {
    owner: Arc<OwnerPool>,
    credential: Credential,
}

impl Lease {
    /// The leased credential.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Identifier of the leased credential.
    #[must_use]
    pub fn credential_id(&self) -> CredentialId {
        self.credential.id()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut state = self.owner.lock();
        let id = self.credential.id();
        if let Some(cred) = state.credentials.iter_mut().find(|c| c.credential.id() == id) {
            cred.used_slots = cred.used_slots.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("credential_id", &self.credential.id())
            .finish_non_exhaustive()
    }
}

/// Per-owner credential pool.
pub struct CredentialPool {
    owners: DashMap<OwnerId, Arc<OwnerPool>>,
    config: PoolConfig,
}

impl CredentialPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            owners: DashMap::new(),
            config,
        }
    }

    /// Register (or replace) an owner's credentials.
    ///
    /// Slot accounting starts fresh; in-flight leases from a previous
    /// registration release against the old state and are discarded.
    pub fn seed_owner(&self, owner_id: OwnerId, credentials: Vec<Credential>) {
        let state = OwnerState {
            credentials: credentials.into_iter().map(CredState::new).collect(),
            blocked_until: None,
        };
        self.owners.insert(
            owner_id,
            Arc::new(OwnerPool {
                state: Mutex::new(state),
            }),
        );
    }

    /// Whether the owner has been seeded.
    #[must_use]
    pub fn has_owner(&self, owner_id: OwnerId) -> bool {
        self.owners.contains_key(&owner_id)
    }

    /// Drop an owner's pool state.
    pub fn forget(&self, owner_id: OwnerId) {
        self.owners.remove(&owner_id);
    }

    /// Lease a credential for one request, waiting a bounded time for a slot.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOwner` if the owner was never seeded, `OwnerBlocked`
    /// while an account-wide block is active, and `CredentialExhausted` when
    /// no credential frees up within the configured wait.
    pub async fn acquire(&self, owner_id: OwnerId) -> Result<Lease, PoolError> {
        self.acquire_filtered(owner_id, CredentialFilter::Any).await
    }

    /// Like [`acquire`](Self::acquire), restricted to credentials the filter
    /// admits.
    ///
    /// # Errors
    ///
    /// Same as `acquire`.
    pub async fn acquire_filtered(
        &self,
        owner_id: OwnerId,
        filter: CredentialFilter,
    ) -> Result<Lease, PoolError> {
        let owner = self
            .owners
            .get(&owner_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PoolError::UnknownOwner(owner_id))?;

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.acquire_wait_ms);
        let retry_interval = Duration::from_millis(self.config.retry_interval_ms);

        loop {
            {
                let mut state = owner.lock();
                let now = Utc::now();

                if let Some(until) = state.blocked_until {
                    if now < until {
                        let retry_after_secs =
                            u64::try_from((until - now).num_seconds()).unwrap_or(0).max(1);
                        return Err(PoolError::OwnerBlocked {
                            owner_id,
                            retry_after_secs,
                        });
                    }
                    state.blocked_until = None;
                }

                if state.credentials.is_empty() {
                    return Err(PoolError::UnknownOwner(owner_id));
                }

                let max_slots = self.config.max_slots_per_credential;
                if let Some(cred) = state
                    .credentials
                    .iter_mut()
                    .find(|c| filter.admits(&c.credential) && c.usable(max_slots, now))
                {
                    if now >= cred.reset_at {
                        // New (or unknown) window: allow a single trial request.
                        cred.remaining = 1;
                    }
                    cred.remaining = cred.remaining.saturating_sub(1);
                    cred.used_slots += 1;
                    debug!(
                        credential_id = %cred.credential.id(),
                        used_slots = cred.used_slots,
                        remaining = cred.remaining,
                        "leased credential"
                    );
                    return Ok(Lease {
                        owner: Arc::clone(&owner),
                        credential: cred.credential.clone(),
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(owner_id = %owner_id, "credential acquisition timed out");
                return Err(PoolError::CredentialExhausted(owner_id));
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Fold a response's rate-limit headers into the credential's state.
    ///
    /// Within the same window the local budget only shrinks; a newer window
    /// replaces it outright.
    pub fn observe(
        &self,
        owner_id: OwnerId,
        credential_id: CredentialId,
        observation: RateLimitObservation,
    ) {
        let Some(owner) = self.owners.get(&owner_id) else {
            return;
        };
        let mut state = owner.lock();
        if let Some(cred) = state
            .credentials
            .iter_mut()
            .find(|c| c.credential.id() == credential_id)
        {
            if observation.reset_at > cred.reset_at {
                cred.remaining = observation.remaining;
            } else {
                cred.remaining = cred.remaining.min(observation.remaining);
            }
            cred.reset_at = cred.reset_at.max(observation.reset_at);
        }
    }

    /// Take a credential the platform rejected out of rotation.
    ///
    /// A revoked credential is never leased again until the owner is
    /// re-seeded, so rotation after a 401/403 moves on to a live one.
    pub fn mark_revoked(&self, owner_id: OwnerId, credential_id: CredentialId) {
        if let Some(owner) = self.owners.get(&owner_id) {
            let mut state = owner.lock();
            if let Some(cred) = state
                .credentials
                .iter_mut()
                .find(|c| c.credential.id() == credential_id)
            {
                warn!(%credential_id, "credential rejected by platform, out of rotation");
                cred.revoked = true;
            }
        }
    }

    /// Record an account-wide block reported by the platform.
    pub fn mark_blocked(&self, owner_id: OwnerId, retry_after: Duration) {
        if let Some(owner) = self.owners.get(&owner_id) {
            let until = Utc::now()
                + chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero());
            warn!(owner_id = %owner_id, ?retry_after, "owner blocked by platform");
            owner.lock().blocked_until = Some(until);
        }
    }

    /// Remaining block duration for the owner, if one is active.
    #[must_use]
    pub fn blocked_remaining(&self, owner_id: OwnerId) -> Option<Duration> {
        let owner = self.owners.get(&owner_id)?;
        let until = owner.lock().blocked_until?;
        (until - Utc::now()).to_std().ok()
    }
}
