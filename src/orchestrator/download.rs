// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote-to-local phases: chunk download per scope, then note and
//! resource body download.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::checkpoint::SyncCheckpointStore;
use crate::downloader::ScopeSession;
use crate::entities::EntityKind;
use crate::error::SyncError;
use crate::events::ChunkDownloadProgress;
use crate::scope::{AuthToken, Guid, Scope};

use super::types::RunCheckpoints;
use super::SyncOrchestrator;

/// One scope's completed download sub-flow.
pub(super) struct ScopeDownload {
    pub session: ScopeSession,
}

impl SyncOrchestrator {
    /// Run one scope's chunk-download sub-flow: fetch the sync state,
    /// pick full vs incremental, pull chunks to the server's water mark,
    /// apply them, and persist the scope checkpoint.
    ///
    /// Returns `None` when the server has nothing newer than the
    /// checkpoint (the idempotent no-op path).
    pub(super) async fn download_scope(
        &self,
        scope: &Scope,
        auth: &AuthToken,
        run: &RunCheckpoints,
    ) -> Result<Option<ScopeDownload>, SyncError> {
        let state = self
            .guard
            .run("get_sync_state", run, || self.service.sync_state(auth, scope))
            .await?;

        let checkpoint = self.checkpoints.load(scope).await?;
        let after_usn = match checkpoint {
            None => 0,
            // The incremental history the checkpoint relies on is gone;
            // start over from zero.
            Some(cp) if cp.last_sync_time < state.full_sync_before => {
                info!(
                    scope = %scope,
                    checkpoint_time = cp.last_sync_time,
                    full_sync_before = state.full_sync_before,
                    "checkpoint predates the incremental horizon, full download"
                );
                0
            }
            Some(cp) => cp.update_count,
        };

        if state.update_count <= after_usn {
            debug!(scope = %scope, update_count = state.update_count, "scope already up to date");
            return Ok(None);
        }
        info!(
            scope = %scope,
            after_usn,
            server_update_count = state.update_count,
            "downloading sync chunks"
        );

        // Fetch every chunk first so session totals are fixed before any
        // chunk is applied.
        let mut chunks = Vec::new();
        let mut cursor = after_usn;
        loop {
            self.check_stop()?;
            let chunk = self
                .guard
                .run("get_sync_chunk", run, || {
                    self.service.sync_chunk(
                        auth,
                        scope,
                        cursor,
                        self.config.max_chunk_entries,
                        &self.config.chunk_filter,
                    )
                })
                .await?;

            if chunk.chunk_high_usn <= cursor {
                // No forward progress: the server is drained.
                break;
            }
            cursor = chunk.chunk_high_usn;
            self.notifier.chunk_download_progress(
                scope,
                &ChunkDownloadProgress {
                    highest_downloaded_usn: chunk.chunk_high_usn,
                    highest_server_usn: state.update_count,
                    last_previous_usn: after_usn,
                },
            );
            chunks.push(chunk);
            if cursor >= state.update_count {
                break;
            }
        }

        let mut session = ScopeSession::new(scope.clone(), after_usn);
        session.counters.set_totals(&chunks);

        for chunk in &chunks {
            self.check_stop()?;
            self.processor.apply_chunk(&mut session, chunk).await?;
            run.advance(scope, session.applied_usn);
            self.notifier.chunks_data_counters(scope, &session.counters);
        }

        // Checkpoints of linked notebooks expunged by this stream go away
        // with their mirrored data.
        for guid in &session.expunged_linked_notebooks {
            self.checkpoints
                .forget(&Scope::LinkedNotebook(guid.clone()))
                .await?;
        }

        run.persist(scope).await?;
        Ok(Some(ScopeDownload { session }))
    }

    /// Fetch full note and resource bodies queued by one scope's chunk
    /// application.
    pub(super) async fn download_bodies(
        &self,
        scope: &Scope,
        auth: &AuthToken,
        session: &ScopeSession,
        run: &RunCheckpoints,
    ) -> Result<(), SyncError> {
        let note_guids: Vec<Guid> = dedup(&session.notes_to_download);
        let total_notes = note_guids.len() as u32;
        for (index, guid) in note_guids.iter().enumerate() {
            self.check_stop()?;
            let fetched = self
                .guard
                .run("get_note", run, || self.service.get_note(auth, guid))
                .await?;

            let guid_owned = guid.clone();
            self.writer
                .submit(move |store| async move {
                    // The body belongs to the note as applied from its
                    // chunk; flags set since then (the resource quirk)
                    // must survive.
                    let Some(mut local) = store.note_by_guid(&guid_owned).await? else {
                        return Ok(());
                    };
                    local.content = fetched.content.clone();
                    for resource in &mut local.resources {
                        if resource.data.is_some() {
                            continue;
                        }
                        if let Some(remote) = fetched
                            .resources
                            .iter()
                            .find(|r| r.guid == resource.guid)
                        {
                            resource.data = remote.data.clone();
                            resource.data_hash = remote.data_hash.clone();
                            resource.data_size = remote.data_size;
                        }
                    }
                    store.put_note(&local).await
                })
                .await?;

            crate::metrics::record_body_download(EntityKind::Note);
            self.notifier
                .note_download_progress(scope, index as u32 + 1, total_notes);
        }

        let resource_guids: Vec<Guid> = dedup(&session.resources_to_download);
        let total_resources = resource_guids.len() as u32;
        for (index, guid) in resource_guids.iter().enumerate() {
            self.check_stop()?;

            // A note body fetched above may already have carried the data.
            if let Some(existing) = self.store.resource_by_guid(guid).await? {
                if existing.data.is_some() {
                    self.notifier.resource_download_progress(
                        scope,
                        index as u32 + 1,
                        total_resources,
                    );
                    continue;
                }
            }

            let mut fetched = self
                .guard
                .run("get_resource", run, || self.service.get_resource(auth, guid))
                .await?;
            if let Some(existing) = self.store.resource_by_guid(guid).await? {
                fetched.local_id = existing.local_id;
            }
            fetched.locally_modified = false;

            self.writer
                .submit(move |store| async move { store.put_resource(&fetched).await })
                .await?;

            crate::metrics::record_body_download(EntityKind::Resource);
            self.notifier
                .resource_download_progress(scope, index as u32 + 1, total_resources);
        }

        Ok(())
    }
}

fn dedup(guids: &[Guid]) -> Vec<Guid> {
    let mut seen = HashSet::new();
    guids
        .iter()
        .filter(|guid| seen.insert(guid.as_str()))
        .cloned()
        .collect()
}
