// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Notification surface consumed by the presentation layer.
//!
//! Callers register a [`SyncEventHandler`] per interest; the [`Notifier`]
//! dispatches to every registered handler sequentially, on the emitting
//! scope's task, so per-scope ordering guarantees survive fan-out.
//! Handlers should return quickly; anything slow belongs on the handler's
//! own channel.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::checkpoint::Checkpoint;
use crate::counters::SyncChunksDataCounters;
use crate::scope::Scope;

/// One chunk-download progress report for a scope.
///
/// Within one scope's download sub-session, `highest_downloaded_usn`
/// strictly increases while the other two fields stay constant, and
/// `last_previous_usn <= highest_downloaded_usn <= highest_server_usn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDownloadProgress {
    pub highest_downloaded_usn: i32,
    pub highest_server_usn: i32,
    pub last_previous_usn: i32,
}

/// Final result of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether any remote change reached the local store this run.
    pub something_downloaded: bool,
    /// Whether any local change reached the remote service this run.
    pub something_sent: bool,
    /// Whether the run ended at a stop request rather than completion.
    pub stopped: bool,
    /// Scopes halted by scoped (authentication) failures, with reasons.
    pub failed_scopes: Vec<(Scope, String)>,
}

/// Handler for sync notifications. Every method is a default no-op;
/// implementors override the kinds they care about.
#[allow(unused_variables)]
pub trait SyncEventHandler: Send + Sync {
    fn on_started(&self) {}
    fn on_finished(&self, outcome: &SyncOutcome) {}
    fn on_failed(&self, scope: Option<&Scope>, message: &str) {}

    /// Stop acknowledged while downloading remote changes.
    fn on_download_stopped(&self) {}
    /// Stop acknowledged while uploading local changes.
    fn on_upload_stopped(&self) {}

    fn on_chunk_download_progress(&self, scope: &Scope, progress: &ChunkDownloadProgress) {}
    fn on_chunks_data_counters(&self, scope: &Scope, counters: &SyncChunksDataCounters) {}
    fn on_note_download_progress(&self, scope: &Scope, downloaded: u32, total: u32) {}
    fn on_resource_download_progress(&self, scope: &Scope, downloaded: u32, total: u32) {}

    /// Dirty-entity enumeration for a scope finished; `count` entities
    /// are about to be sent.
    fn on_prepared_dirty_objects(&self, scope: &Scope, count: usize) {}

    fn on_rate_limit(&self, wait_seconds: u64) {}
    fn on_checkpoint_persisted(&self, scope: &Scope, checkpoint: &Checkpoint) {}
}

/// Fan-out point for sync notifications. Cheap to clone.
#[derive(Clone, Default)]
pub struct Notifier {
    handlers: Arc<RwLock<Vec<Arc<dyn SyncEventHandler>>>>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn SyncEventHandler>) {
        self.handlers.write().push(handler);
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn each(&self, f: impl Fn(&dyn SyncEventHandler)) {
        for handler in self.handlers.read().iter() {
            f(handler.as_ref());
        }
    }

    pub fn started(&self) {
        self.each(|h| h.on_started());
    }

    pub fn finished(&self, outcome: &SyncOutcome) {
        self.each(|h| h.on_finished(outcome));
    }

    pub fn failed(&self, scope: Option<&Scope>, message: &str) {
        self.each(|h| h.on_failed(scope, message));
    }

    pub fn download_stopped(&self) {
        self.each(|h| h.on_download_stopped());
    }

    pub fn upload_stopped(&self) {
        self.each(|h| h.on_upload_stopped());
    }

    pub fn chunk_download_progress(&self, scope: &Scope, progress: &ChunkDownloadProgress) {
        self.each(|h| h.on_chunk_download_progress(scope, progress));
    }

    pub fn chunks_data_counters(&self, scope: &Scope, counters: &SyncChunksDataCounters) {
        self.each(|h| h.on_chunks_data_counters(scope, counters));
    }

    pub fn note_download_progress(&self, scope: &Scope, downloaded: u32, total: u32) {
        self.each(|h| h.on_note_download_progress(scope, downloaded, total));
    }

    pub fn resource_download_progress(&self, scope: &Scope, downloaded: u32, total: u32) {
        self.each(|h| h.on_resource_download_progress(scope, downloaded, total));
    }

    pub fn prepared_dirty_objects(&self, scope: &Scope, count: usize) {
        self.each(|h| h.on_prepared_dirty_objects(scope, count));
    }

    pub fn rate_limit(&self, wait_seconds: u64) {
        self.each(|h| h.on_rate_limit(wait_seconds));
    }

    pub fn checkpoint_persisted(&self, scope: &Scope, checkpoint: &Checkpoint) {
        self.each(|h| h.on_checkpoint_persisted(scope, checkpoint));
    }
}
