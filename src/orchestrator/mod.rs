// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] is the top-level phase state machine composing
//! every engine component: per-scope chunk download, conflict resolution,
//! body download, local-change upload, rate-limit back-off, and checkpoint
//! persistence. One instance serves one sync run.
//!
//! # Phases
//!
//! ```text
//! Idle → Authenticating → DownloadingOwnChunks → DownloadingLinkedChunks
//!      → DownloadingBodies → UploadingOwnChanges → UploadingLinkedChanges
//!      → PersistingFinalState → Finished | Failed | Stopped
//! ```
//!
//! Linked-notebook sub-flows run concurrently with each other; every
//! store write is serialized through the single-writer actor.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use note_sync_engine::{
//!     AuthToken, InMemoryCheckpointStore, InMemoryLocalStore, InMemoryNoteService,
//!     SyncConfig, SyncOrchestrator,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(InMemoryLocalStore::new());
//! let service = Arc::new(InMemoryNoteService::new("token"));
//! let checkpoints = Arc::new(InMemoryCheckpointStore::new());
//!
//! let orchestrator = SyncOrchestrator::new(
//!     SyncConfig::default(),
//!     store,
//!     service,
//!     checkpoints,
//!     AuthToken("token".into()),
//! );
//! let outcome = orchestrator.synchronize().await.expect("sync failed");
//! println!("downloaded: {}", outcome.something_downloaded);
//! # }
//! ```

mod download;
mod lifecycle;
mod types;
mod upload;

pub use types::SyncPhase;
pub(crate) use types::RunCheckpoints;

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::checkpoint::SyncCheckpointStore;
use crate::downloader::ChunkProcessor;
use crate::events::{Notifier, SyncEventHandler};
use crate::remote::traits::NoteService;
use crate::resilience::rate_limit::RateLimitGuard;
use crate::scope::AuthToken;
use crate::store::traits::LocalStore;
use crate::store::writer::StoreWriter;
use crate::uploader::LocalChangeUploader;

/// Top-level sync phase state machine. One instance per sync run.
///
/// The orchestrator owns all sub-components outright; the store, service,
/// and checkpoint collaborators are shared handles whose mutation paths
/// the orchestrator funnels through its single-writer actor.
pub struct SyncOrchestrator {
    pub(super) config: SyncConfig,
    pub(super) store: Arc<dyn LocalStore>,
    pub(super) writer: StoreWriter,
    pub(super) service: Arc<dyn NoteService>,
    pub(super) checkpoints: Arc<dyn SyncCheckpointStore>,
    pub(super) notifier: Notifier,
    pub(super) auth: AuthToken,

    pub(super) phase: watch::Sender<SyncPhase>,
    phase_rx: watch::Receiver<SyncPhase>,
    pub(super) stop: watch::Sender<bool>,
    pub(super) stop_rx: watch::Receiver<bool>,

    pub(super) guard: RateLimitGuard,
    pub(super) processor: ChunkProcessor,
    pub(super) uploader: LocalChangeUploader,
}

impl SyncOrchestrator {
    /// Create an orchestrator for one run against the given collaborators
    /// and the account's current auth context.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        service: Arc<dyn NoteService>,
        checkpoints: Arc<dyn SyncCheckpointStore>,
        auth: AuthToken,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(SyncPhase::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let notifier = Notifier::new();

        let (writer, _writer_handle) = StoreWriter::spawn(store.clone());
        let guard = RateLimitGuard::new(
            notifier.clone(),
            config.rate_limit_max_wait_secs,
            stop_rx.clone(),
        );
        let processor = ChunkProcessor::new(store.clone(), writer.clone());
        let uploader = LocalChangeUploader::new(
            store.clone(),
            writer.clone(),
            service.clone(),
            guard.clone(),
            notifier.clone(),
        );

        Self {
            config,
            store,
            writer,
            service,
            checkpoints,
            notifier,
            auth,
            phase: phase_tx,
            phase_rx,
            stop: stop_tx,
            stop_rx,
            guard,
            processor,
            uploader,
        }
    }

    /// Register a notification handler. Handlers registered after
    /// `synchronize()` starts may miss earlier notifications.
    pub fn register_handler(&self, handler: Arc<dyn SyncEventHandler>) {
        self.notifier.register(handler);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase_rx.borrow()
    }

    /// Receiver to watch phase changes.
    #[must_use]
    pub fn phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.phase_rx.clone()
    }

    /// Request a stop. Honored at the next suspension point; any store
    /// write in flight completes first. Depending on the phase at the
    /// acknowledgment, a download-stopped or upload-stopped notification
    /// is emitted.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Whether a stop has been requested (it may not be acknowledged yet).
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    pub(super) fn set_phase(&self, phase: SyncPhase) {
        let _ = self.phase.send(phase);
    }

    pub(super) fn check_stop(&self) -> Result<(), crate::error::SyncError> {
        if self.stop_requested() {
            Err(crate::error::SyncError::Stopped)
        } else {
            Ok(())
        }
    }
}
