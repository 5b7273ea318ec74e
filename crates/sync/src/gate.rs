//! Sync confirmation gate.
//!
//! Writes are compare-and-set against the revision the working copy was
//! loaded from. When the store has moved on, nothing is written; instead a
//! [`SyncConfirmation`] is parked here until the caller either overwrites
//! the store or drops the local write.

use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    quill_projects::{FileSystem, ProjectApi, SaveOutcome},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::sync_metrics;

use crate::{Error, Result};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A write the session wants to land.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub project_id: String,
    pub files: FileSystem,
    /// Store revision the working copy was derived from.
    pub base_version: u64,
}

/// Why a write attempt did not reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AbortReason {
    /// The project was closed or replaced while the write was in flight.
    Superseded,
    /// A confirmation is already waiting; the snapshot was queued behind it.
    ConflictPending,
    /// The store is known to be unreachable.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { version: u64 },
    ConfirmationRequired { remote_version: u64 },
    Aborted(AbortReason),
}

/// A write suspended until the caller decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfirmation {
    pub project_id: String,
    /// The snapshot that hit the conflict.
    pub local: FileSystem,
    /// Newest snapshot that arrived while this record was pending.
    pub queued: Option<FileSystem>,
    pub base_version: u64,
    pub remote_version: u64,
    pub created_at: u64,
}

impl SyncConfirmation {
    /// The snapshot an overwrite would write.
    pub fn latest(&self) -> &FileSystem {
        self.queued.as_ref().unwrap_or(&self.local)
    }
}

/// Result of an explicit overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedWrite {
    pub project_id: String,
    pub files: FileSystem,
    pub version: u64,
}

/// Holds at most one [`SyncConfirmation`].
#[derive(Default)]
pub struct SyncGate {
    pending: Mutex<Option<SyncConfirmation>>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SyncConfirmation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to write `request`.
    ///
    /// `still_current` is consulted before the write and again before a
    /// conflict record is installed; once it returns `false` the attempt
    /// ends as [`AbortReason::Superseded`].
    pub async fn attempt_write(
        &self,
        api: &dyn ProjectApi,
        request: WriteRequest,
        still_current: impl Fn() -> bool,
    ) -> Result<WriteOutcome> {
        if self.queue_behind_pending(&request) {
            return Ok(WriteOutcome::Aborted(AbortReason::ConflictPending));
        }
        if !still_current() {
            return Ok(WriteOutcome::Aborted(AbortReason::Superseded));
        }

        let outcome = api
            .update_files(
                &request.project_id,
                &request.files,
                Some(request.base_version),
            )
            .await?;

        match outcome {
            SaveOutcome::Saved { version } => {
                #[cfg(feature = "metrics")]
                metrics::counter!(sync_metrics::WRITES_TOTAL).increment(1);
                debug!(id = %request.project_id, version, "working copy written");
                Ok(WriteOutcome::Written { version })
            },
            SaveOutcome::Conflict { remote_version } => {
                let mut slot = self.slot();
                if !still_current() {
                    return Ok(WriteOutcome::Aborted(AbortReason::Superseded));
                }
                if let Some(existing) = slot.as_mut() {
                    existing.queued = Some(request.files);
                    return Ok(WriteOutcome::Aborted(AbortReason::ConflictPending));
                }
                #[cfg(feature = "metrics")]
                metrics::counter!(sync_metrics::CONFLICTS_TOTAL).increment(1);
                warn!(
                    id = %request.project_id,
                    base = request.base_version,
                    remote = remote_version,
                    "remote copy diverged, write needs confirmation"
                );
                *slot = Some(SyncConfirmation {
                    project_id: request.project_id,
                    local: request.files,
                    queued: None,
                    base_version: request.base_version,
                    remote_version,
                    created_at: now_ms(),
                });
                Ok(WriteOutcome::ConfirmationRequired { remote_version })
            },
        }
    }

    /// Queue `request` on the pending record, if there is one. A record left
    /// behind by another project is stale and gets dropped instead.
    fn queue_behind_pending(&self, request: &WriteRequest) -> bool {
        let mut slot = self.slot();
        let Some(existing) = slot.as_mut() else {
            return false;
        };
        if existing.project_id != request.project_id {
            debug!(
                stale = %existing.project_id,
                id = %request.project_id,
                "dropping confirmation left by another project"
            );
            *slot = None;
            return false;
        }
        existing.queued = Some(request.files.clone());
        debug!(id = %request.project_id, "write deferred behind pending confirmation");
        true
    }

    /// Overwrite the store with the newest pending snapshot.
    ///
    /// On a failed write the record is put back so the decision can be
    /// retried, unless `still_current` says its project went away meanwhile.
    pub async fn confirm(
        &self,
        api: &dyn ProjectApi,
        still_current: impl Fn() -> bool,
    ) -> Result<ConfirmedWrite> {
        let record = self.slot().take().ok_or(Error::NoPendingSync)?;
        let files = record.latest().clone();

        let outcome = match api.update_files(&record.project_id, &files, None).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.put_back(record, &still_current);
                return Err(e.into());
            },
        };

        match outcome {
            SaveOutcome::Saved { version } => {
                #[cfg(feature = "metrics")]
                metrics::counter!(sync_metrics::WRITES_TOTAL).increment(1);
                info!(id = %record.project_id, version, "remote copy overwritten");
                Ok(ConfirmedWrite {
                    project_id: record.project_id,
                    files,
                    version,
                })
            },
            SaveOutcome::Conflict { remote_version } => {
                let project_id = record.project_id.clone();
                self.put_back(
                    SyncConfirmation {
                        remote_version,
                        ..record
                    },
                    &still_current,
                );
                Err(Error::message(format!(
                    "store refused unconditional write for {project_id}"
                )))
            },
        }
    }

    /// Reinstall `record` if its project is still current and no newer
    /// record took the slot.
    fn put_back(&self, record: SyncConfirmation, still_current: impl Fn() -> bool) {
        let mut slot = self.slot();
        if slot.is_some() || !still_current() {
            debug!(id = %record.project_id, "pending sync not reinstated");
            return;
        }
        *slot = Some(record);
    }

    /// Drop the pending record unless it belongs to `current`.
    pub fn discard_unless(&self, current: Option<&str>) {
        let stale = self
            .slot()
            .take_if(|r| Some(r.project_id.as_str()) != current);
        if let Some(r) = stale {
            debug!(id = %r.project_id, "pending sync of a closed project discarded");
        }
    }

    /// Drop the pending record and its local write.
    pub fn cancel(&self) -> Option<SyncConfirmation> {
        let record = self.slot().take();
        if let Some(r) = &record {
            info!(id = %r.project_id, "pending sync cancelled");
        }
        record
    }

    /// Drop the pending record because its project is going away.
    pub fn discard(&self) {
        if let Some(r) = self.slot().take() {
            debug!(id = %r.project_id, "pending sync discarded");
        }
    }

    pub fn pending(&self) -> Option<SyncConfirmation> {
        self.slot().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }
}
