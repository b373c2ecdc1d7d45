// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Uploads locally-modified entities to the remote service.
//!
//! Per scope, dirty entities go up in a fixed order: saved searches
//! (user-own scope only), then tags, then notebooks, then notes. Tags
//! before notes matters: a locally-created note can then resolve its
//! local tag references to freshly-assigned guids.
//!
//! Each successful create/update writes the remote-issued guid and USN
//! back into the local entity and clears its dirty flag. Any failure that
//! isn't a rate limit aborts the remaining uploads for the scope and
//! surfaces the error; nothing is skipped silently.

use std::sync::Arc;

use tracing::{debug, info};

use crate::entities::{EntityKind, Note};
use crate::error::SyncError;
use crate::events::Notifier;
use crate::remote::traits::NoteService;
use crate::resilience::rate_limit::{RateLimitGuard, RateLimitHook};
use crate::scope::{AuthToken, Scope};
use crate::store::traits::LocalStore;
use crate::store::writer::StoreWriter;

/// Result of one scope's upload phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Entities successfully sent.
    pub sent: usize,
    /// Highest USN the service assigned to anything sent this phase.
    pub max_committed_usn: i32,
}

pub struct LocalChangeUploader {
    store: Arc<dyn LocalStore>,
    writer: StoreWriter,
    service: Arc<dyn NoteService>,
    guard: RateLimitGuard,
    notifier: Notifier,
}

impl LocalChangeUploader {
    #[must_use]
    pub fn new(
        store: Arc<dyn LocalStore>,
        writer: StoreWriter,
        service: Arc<dyn NoteService>,
        guard: RateLimitGuard,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            writer,
            service,
            guard,
            notifier,
        }
    }

    /// Send every dirty entity of one scope.
    pub async fn upload_scope(
        &self,
        scope: &Scope,
        auth: &AuthToken,
        hook: &dyn RateLimitHook,
    ) -> Result<UploadOutcome, SyncError> {
        let searches: Vec<_> = if *scope == Scope::UserOwn {
            self.store
                .list_saved_searches()
                .await?
                .into_iter()
                .filter(|s| s.locally_modified)
                .collect()
        } else {
            Vec::new()
        };
        let tags: Vec<_> = self
            .store
            .list_tags(Some(scope))
            .await?
            .into_iter()
            .filter(|t| t.locally_modified)
            .collect();
        let notebooks: Vec<_> = self
            .store
            .list_notebooks(Some(scope))
            .await?
            .into_iter()
            .filter(|n| n.locally_modified)
            .collect();
        let notes: Vec<_> = self
            .store
            .list_notes(Some(scope))
            .await?
            .into_iter()
            .filter(|n| n.locally_modified)
            .collect();

        let prepared = searches.len() + tags.len() + notebooks.len() + notes.len();
        self.notifier.prepared_dirty_objects(scope, prepared);
        if prepared == 0 {
            debug!(scope = %scope, "nothing dirty to upload");
            return Ok(UploadOutcome::default());
        }
        info!(scope = %scope, count = prepared, "uploading locally-modified entities");

        let mut outcome = UploadOutcome::default();

        for search in searches {
            let committed = if search.guid.is_none() {
                self.guard
                    .run("create_saved_search", hook, || {
                        self.service.create_saved_search(auth, &search)
                    })
                    .await?
            } else {
                self.guard
                    .run("update_saved_search", hook, || {
                        self.service.update_saved_search(auth, &search)
                    })
                    .await?
            };
            let mut committed = committed;
            committed.local_id = search.local_id.clone();
            committed.locally_modified = false;
            self.track(&mut outcome, committed.update_sequence_num, EntityKind::SavedSearch);
            self.writer
                .submit(move |store| async move { store.put_saved_search(&committed).await })
                .await?;
        }

        for tag in tags {
            let committed = if tag.guid.is_none() {
                self.guard
                    .run("create_tag", hook, || self.service.create_tag(auth, &tag))
                    .await?
            } else {
                self.guard
                    .run("update_tag", hook, || self.service.update_tag(auth, &tag))
                    .await?
            };
            let mut committed = committed;
            committed.local_id = tag.local_id.clone();
            committed.linked_notebook_guid = tag.linked_notebook_guid.clone();
            committed.locally_modified = false;
            self.track(&mut outcome, committed.update_sequence_num, EntityKind::Tag);
            self.writer
                .submit(move |store| async move { store.put_tag(&committed).await })
                .await?;
        }

        for notebook in notebooks {
            let committed = if notebook.guid.is_none() {
                self.guard
                    .run("create_notebook", hook, || {
                        self.service.create_notebook(auth, &notebook)
                    })
                    .await?
            } else {
                self.guard
                    .run("update_notebook", hook, || {
                        self.service.update_notebook(auth, &notebook)
                    })
                    .await?
            };
            let mut committed = committed;
            committed.local_id = notebook.local_id.clone();
            committed.linked_notebook_guid = notebook.linked_notebook_guid.clone();
            committed.locally_modified = false;
            self.track(&mut outcome, committed.update_sequence_num, EntityKind::Notebook);
            self.writer
                .submit(move |store| async move { store.put_notebook(&committed).await })
                .await?;
        }

        for note in notes {
            let note = self.with_resolved_tag_guids(note).await?;
            let committed = if note.guid.is_none() {
                self.guard
                    .run("create_note", hook, || self.service.create_note(auth, &note))
                    .await?
            } else {
                self.guard
                    .run("update_note", hook, || self.service.update_note(auth, &note))
                    .await?
            };
            let mut committed = committed;
            committed.local_id = note.local_id.clone();
            committed.linked_notebook_guid = note.linked_notebook_guid.clone();
            committed.tag_local_ids = note.tag_local_ids.clone();
            committed.locally_modified = false;
            // Resources inside the committed note carry their assigned
            // guids/USNs; local ids were preserved by the service echo.
            self.track(&mut outcome, committed.update_sequence_num, EntityKind::Note);
            self.writer
                .submit(move |store| async move { store.put_note(&committed).await })
                .await?;
        }

        info!(scope = %scope, sent = outcome.sent, "upload phase complete");
        Ok(outcome)
    }

    fn track(&self, outcome: &mut UploadOutcome, usn: Option<i32>, kind: EntityKind) {
        outcome.sent += 1;
        outcome.max_committed_usn = outcome.max_committed_usn.max(usn.unwrap_or(0));
        crate::metrics::record_upload(kind, "success");
    }

    /// Fill the remote-side tag references from the local ones. Tags go up
    /// before notes, so every referenced tag that can have a guid has one.
    async fn with_resolved_tag_guids(&self, mut note: Note) -> Result<Note, SyncError> {
        if note.tag_local_ids.is_empty() {
            return Ok(note);
        }
        let scope = match &note.linked_notebook_guid {
            None => Scope::UserOwn,
            Some(guid) => Scope::LinkedNotebook(guid.clone()),
        };
        let tags = self.store.list_tags(Some(&scope)).await?;
        note.tag_guids = note
            .tag_local_ids
            .iter()
            .filter_map(|local_id| {
                tags.iter()
                    .find(|t| &t.local_id == local_id)
                    .and_then(|t| t.guid.clone())
            })
            .collect();
        Ok(note)
    }
}
