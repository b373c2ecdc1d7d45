// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types and per-run checkpoint tracking for the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, SyncCheckpointStore};
use crate::entities::now_millis;
use crate::error::SyncError;
use crate::events::Notifier;
use crate::resilience::rate_limit::RateLimitHook;
use crate::scope::Scope;

/// Phase of a sync run.
///
/// Watch the orchestrator's phase receiver to follow a run:
///
/// ```text
/// Idle → Authenticating → DownloadingOwnChunks → DownloadingLinkedChunks
///      → DownloadingBodies → UploadingOwnChanges → UploadingLinkedChanges
///      → PersistingFinalState → Finished | Failed | Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No run in progress yet.
    Idle,
    /// Validating the account auth context.
    Authenticating,
    /// Fetching and applying the user-own chunk stream.
    DownloadingOwnChunks,
    /// Fetching and applying linked-notebook chunk streams (one sub-flow
    /// per authorized linked notebook, run concurrently).
    DownloadingLinkedChunks,
    /// Fetching full note and resource bodies.
    DownloadingBodies,
    /// Sending user-own locally-modified entities.
    UploadingOwnChanges,
    /// Sending linked-notebook locally-modified entities.
    UploadingLinkedChanges,
    /// Final checkpoint persistence.
    PersistingFinalState,
    Finished,
    Failed,
    Stopped,
}

impl SyncPhase {
    /// Whether this phase moves remote data into the local store.
    #[must_use]
    pub fn is_download(&self) -> bool {
        matches!(
            self,
            Self::DownloadingOwnChunks | Self::DownloadingLinkedChunks | Self::DownloadingBodies
        )
    }

    /// Whether this phase moves local data to the remote service.
    #[must_use]
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::UploadingOwnChanges | Self::UploadingLinkedChanges)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::DownloadingOwnChunks => write!(f, "DownloadingOwnChunks"),
            Self::DownloadingLinkedChunks => write!(f, "DownloadingLinkedChunks"),
            Self::DownloadingBodies => write!(f, "DownloadingBodies"),
            Self::UploadingOwnChanges => write!(f, "UploadingOwnChanges"),
            Self::UploadingLinkedChanges => write!(f, "UploadingLinkedChanges"),
            Self::PersistingFinalState => write!(f, "PersistingFinalState"),
            Self::Finished => write!(f, "Finished"),
            Self::Failed => write!(f, "Failed"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Committed progress for every scope touched by one run.
///
/// The single source for checkpoint persistence: values only ever grow,
/// and they are advanced strictly from fully-committed work (a whole
/// applied chunk, a completed upload) — never from a partially-applied
/// item. Doubles as the rate-limit hook: a quota breach persists a
/// checkpoint for everything touched so far before the engine suspends.
pub(crate) struct RunCheckpoints {
    store: Arc<dyn SyncCheckpointStore>,
    notifier: Notifier,
    committed: Mutex<HashMap<Scope, i32>>,
}

impl RunCheckpoints {
    pub(crate) fn new(store: Arc<dyn SyncCheckpointStore>, notifier: Notifier) -> Self {
        Self {
            store,
            notifier,
            committed: Mutex::new(HashMap::new()),
        }
    }

    /// Advance a scope's committed USN (never backwards).
    pub(crate) fn advance(&self, scope: &Scope, usn: i32) {
        let mut committed = self.committed.lock();
        let entry = committed.entry(scope.clone()).or_insert(usn);
        *entry = (*entry).max(usn);
    }

    pub(crate) fn committed_usn(&self, scope: &Scope) -> Option<i32> {
        self.committed.lock().get(scope).copied()
    }

    /// Persist one scope's checkpoint from its committed USN.
    pub(crate) async fn persist(&self, scope: &Scope) -> Result<(), SyncError> {
        let Some(update_count) = self.committed_usn(scope) else {
            debug!(scope = %scope, "no committed progress for scope, nothing to persist");
            return Ok(());
        };
        let checkpoint = Checkpoint {
            update_count,
            last_sync_time: now_millis(),
        };
        self.store.save(scope, &checkpoint).await?;
        crate::metrics::record_checkpoint_saved(scope);
        self.notifier.checkpoint_persisted(scope, &checkpoint);
        Ok(())
    }

    /// Persist checkpoints for every scope touched so far.
    pub(crate) async fn persist_all(&self) -> Result<(), SyncError> {
        let scopes: Vec<Scope> = self.committed.lock().keys().cloned().collect();
        for scope in scopes {
            self.persist(&scope).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitHook for RunCheckpoints {
    async fn on_rate_limit(&self, wait: Duration) {
        debug!(wait_secs = wait.as_secs(), "persisting checkpoints before rate-limit suspension");
        if let Err(e) = self.persist_all().await {
            // The suspension still happens; the checkpoints are retried at
            // the next save point.
            warn!(error = %e, "failed to persist checkpoints on rate-limit suspension");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;

    #[test]
    fn test_phase_display_and_classification() {
        assert_eq!(format!("{}", SyncPhase::DownloadingOwnChunks), "DownloadingOwnChunks");
        assert!(SyncPhase::DownloadingBodies.is_download());
        assert!(SyncPhase::UploadingLinkedChanges.is_upload());
        assert!(!SyncPhase::Finished.is_download());
        assert!(!SyncPhase::Authenticating.is_upload());
    }

    #[tokio::test]
    async fn test_advance_never_regresses() {
        let run = RunCheckpoints::new(
            Arc::new(InMemoryCheckpointStore::new()),
            Notifier::new(),
        );
        let scope = Scope::UserOwn;
        run.advance(&scope, 10);
        run.advance(&scope, 4);
        assert_eq!(run.committed_usn(&scope), Some(10));
        run.advance(&scope, 15);
        assert_eq!(run.committed_usn(&scope), Some(15));
    }

    #[tokio::test]
    async fn test_persist_all_covers_touched_scopes() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let run = RunCheckpoints::new(store.clone(), Notifier::new());
        let own = Scope::UserOwn;
        let linked = Scope::LinkedNotebook("ln".into());

        run.advance(&own, 7);
        run.advance(&linked, 3);
        run.persist_all().await.unwrap();

        use crate::checkpoint::SyncCheckpointStore;
        assert_eq!(store.load(&own).await.unwrap().unwrap().update_count, 7);
        assert_eq!(store.load(&linked).await.unwrap().unwrap().update_count, 3);
    }

    #[tokio::test]
    async fn test_persist_untouched_scope_is_noop() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let run = RunCheckpoints::new(store.clone(), Notifier::new());
        run.persist(&Scope::UserOwn).await.unwrap();

        use crate::checkpoint::SyncCheckpointStore;
        assert!(store.load(&Scope::UserOwn).await.unwrap().is_none());
    }
}
