//! Attachment consistency maintenance.
//!
//! When fragments are deleted, the messages hosting them may still carry
//! attachments that must survive (other files' fragments, thumbnails). For
//! each touched message the service recomputes the minimal attachment set
//! and issues either a patch or a full message delete, tolerating external
//! drift: messages already gone on the platform count as done.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, stream};
use shardbox_shared::types::{AttachmentId, CredentialId, FileId, MessageId, OwnerId};
use tracing::{debug, info, warn};

use super::error::GcError;
use crate::catalog::{FragmentStore, Placement, group_by_message};
use crate::gateway::{AttachmentPlatform, MessageRef};

/// Messages processed concurrently within one batch.
const GC_CONCURRENCY: usize = 5;

/// Outcome summary of one GC batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Messages the batch touched.
    pub messages_processed: usize,
    /// Messages deleted outright (no placements left).
    pub messages_deleted: usize,
    /// Messages patched down to their surviving attachments.
    pub messages_patched: usize,
    /// Messages skipped because their author's webhook is revoked.
    pub messages_skipped: usize,
    /// Per-message failures; never aborts the batch.
    pub failures: Vec<GcFailure>,
    /// Catalog rows removed after the platform pass.
    pub rows_deleted: u64,
}

impl GcReport {
    /// Whether every message was handled without failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One message's GC failure.
#[derive(Debug, PartialEq, Eq)]
pub struct GcFailure {
    /// The message that could not be reconciled.
    pub message_id: MessageId,
    /// What went wrong.
    pub error: String,
}

enum Outcome {
    Deleted,
    Patched,
    Skipped,
    Failed(String),
}

/// Garbage collector for attachment placements.
pub struct GcService<S, P> {
    store: Arc<S>,
    platform: Arc<P>,
}

impl<S, P> GcService<S, P>
where
    S: FragmentStore,
    P: AttachmentPlatform,
{
    /// Create a new GC service.
    #[must_use]
    pub fn new(store: Arc<S>, platform: Arc<P>) -> Self {
        Self { store, platform }
    }

    /// Remove the given files: reconcile every touched message on the
    /// platform, then delete the catalog rows.
    ///
    /// Runs to completion once started; per-message failures are reported,
    /// not propagated, so siblings always get their pass.
    ///
    /// # Errors
    ///
    /// Only catalog access errors abort the batch.
    pub async fn collect_files(
        &self,
        owner_id: OwnerId,
        file_ids: &[FileId],
    ) -> Result<GcReport, GcError> {
        let removing = self.store.list_placements_for_files(file_ids).await?;
        if removing.is_empty() {
            let rows_deleted = self.store.delete_files(file_ids).await?;
            return Ok(GcReport {
                rows_deleted,
                ..GcReport::default()
            });
        }

        let removing_by_message = group_by_message(&removing);
        let message_refs: HashMap<MessageId, MessageRef> = removing
            .iter()
            .map(|p| (p.message_id.clone(), MessageRef::from(p)))
            .collect();

        // Webhook authors found revoked mid-batch; skip their other messages.
        let revoked: Mutex<HashSet<CredentialId>> = Mutex::new(HashSet::new());

        let outcomes: Vec<(MessageId, Outcome)> = stream::iter(removing_by_message)
            .map(|(message_id, removed_ids)| {
                let message_ref = message_refs.get(&message_id).cloned();
                let revoked = &revoked;
                async move {
                    let Some(message_ref) = message_ref else {
                        return (
                            message_id,
                            Outcome::Failed("placement vanished mid-batch".to_string()),
                        );
                    };
                    let outcome = self
                        .reconcile_message(owner_id, &message_ref, &removed_ids, revoked)
                        .await;
                    (message_id, outcome)
                }
            })
            .buffer_unordered(GC_CONCURRENCY)
            .collect()
            .await;

        let mut report = GcReport::default();
        for (message_id, outcome) in outcomes {
            report.messages_processed += 1;
            match outcome {
                Outcome::Deleted => report.messages_deleted += 1,
                Outcome::Patched => report.messages_patched += 1,
                Outcome::Skipped => report.messages_skipped += 1,
                Outcome::Failed(error) => report.failures.push(GcFailure { message_id, error }),
            }
        }

        report.rows_deleted = self.store.delete_files(file_ids).await?;
        info!(
            processed = report.messages_processed,
            deleted = report.messages_deleted,
            patched = report.messages_patched,
            failures = report.failures.len(),
            rows = report.rows_deleted,
            "gc batch finished"
        );
        Ok(report)
    }

    /// Reconcile one message: compute the surviving attachment set and issue
    /// the minimal platform call.
    async fn reconcile_message(
        &self,
        owner_id: OwnerId,
        message_ref: &MessageRef,
        removed_ids: &[AttachmentId],
        revoked: &Mutex<HashSet<CredentialId>>,
    ) -> Outcome {
        if lock(revoked).contains(&message_ref.author_id) {
            debug!(message_id = %message_ref.message_id, "author revoked, skipping");
            return Outcome::Skipped;
        }

        let all_known: Vec<Placement> = match self
            .store
            .list_message_placements(&message_ref.message_id)
            .await
        {
            Ok(placements) => placements,
            Err(err) => return Outcome::Failed(err.to_string()),
        };

        let removed: HashSet<&AttachmentId> = removed_ids.iter().collect();
        let keep: Vec<AttachmentId> = all_known
            .iter()
            .map(|p| &p.attachment_id)
            .filter(|id| !removed.contains(*id))
            .cloned()
            .collect();

        let result = if keep.is_empty() {
            self.platform.delete_message(owner_id, message_ref).await
        } else {
            self.platform
                .patch_attachments(owner_id, message_ref, &keep)
                .await
        };

        match result {
            Ok(()) if keep.is_empty() => Outcome::Deleted,
            Ok(()) => Outcome::Patched,
            Err(err) if err.is_already_absent() => {
                debug!(message_id = %message_ref.message_id, "message already gone");
                if keep.is_empty() { Outcome::Deleted } else { Outcome::Patched }
            }
            Err(crate::gateway::GatewayError::WebhookRevoked(id)) => {
                warn!(credential_id = %id, "webhook revoked, skipping its messages");
                lock(revoked).insert(id);
                Outcome::Skipped
            }
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

fn lock<'a>(
    set: &'a Mutex<HashSet<CredentialId>>,
) -> std::sync::MutexGuard<'a, HashSet<CredentialId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
