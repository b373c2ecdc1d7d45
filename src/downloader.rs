// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applies downloaded sync chunks to the local store.
//!
//! One [`ChunkProcessor`] serves a whole run; per-scope download state
//! (counters, conflict records, body-download queues, the committed USN)
//! lives in a [`ScopeSession`]. All writes go through the single-writer
//! actor; reads hit the shared store handle directly.
//!
//! Apply rules per record:
//! - unknown guid: insert as remote-authoritative, not locally modified
//! - known guid, locally modified, record USN at or above the local
//!   baseline: route to the conflict resolver
//! - known guid, clean, record USN above the local baseline: overwrite
//! - anything else: the record is stale, skip it
//!
//! Reproduced quirk: a remotely-changed resource whose containing note is
//! untouched in the same chunk marks that note locally modified, so the
//! next upload re-sends the note with the resource reflected consistently.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chunk::SyncChunk;
use crate::conflict::{is_conflict, ConflictRecord, ConflictResolver};
use crate::counters::SyncChunksDataCounters;
use crate::entities::{EntityKind, Note, Resource};
use crate::error::SyncError;
use crate::remote::traits::ServiceError;
use crate::scope::{Guid, Scope};
use crate::store::traits::LocalStore;
use crate::store::writer::StoreWriter;

/// Per-scope download session state.
pub struct ScopeSession {
    pub scope: Scope,
    pub counters: SyncChunksDataCounters,
    pub conflicts: Vec<ConflictRecord>,
    /// Guids that already got a conflict copy this session.
    conflict_copies: HashSet<Guid>,
    /// Note guids whose bodies still need downloading.
    pub notes_to_download: Vec<Guid>,
    /// Resource guids whose bodies still need downloading.
    pub resources_to_download: Vec<Guid>,
    /// Linked notebooks expunged by this scope's chunks (user-own only);
    /// the orchestrator drops their checkpoints.
    pub expunged_linked_notebooks: Vec<Guid>,
    /// Noteless tags pruned from this linked notebook.
    pub pruned_tags: Vec<Guid>,
    /// Highest USN of the last fully-applied chunk. Checkpoints are
    /// computed from this, never from a partially-applied chunk.
    pub applied_usn: i32,
}

impl ScopeSession {
    #[must_use]
    pub fn new(scope: Scope, last_previous_usn: i32) -> Self {
        Self {
            scope,
            counters: SyncChunksDataCounters::default(),
            conflicts: Vec::new(),
            conflict_copies: HashSet::new(),
            notes_to_download: Vec::new(),
            resources_to_download: Vec::new(),
            expunged_linked_notebooks: Vec::new(),
            pruned_tags: Vec::new(),
            applied_usn: last_previous_usn,
        }
    }
}

/// Applies chunks for any scope of one sync run.
#[derive(Clone)]
pub struct ChunkProcessor {
    store: Arc<dyn LocalStore>,
    writer: StoreWriter,
    resolver: ConflictResolver,
}

impl ChunkProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>, writer: StoreWriter) -> Self {
        let resolver = ConflictResolver::new(writer.clone());
        Self {
            store,
            writer,
            resolver,
        }
    }

    /// Apply one chunk. On success the session's `applied_usn` advances to
    /// the chunk's high USN; on failure it stays where it was, so a
    /// checkpoint computed from it never reflects a partial chunk.
    pub async fn apply_chunk(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        let scope = session.scope.clone();
        debug!(
            scope = %scope,
            high_usn = chunk.chunk_high_usn,
            records = chunk.record_count(),
            expunges = chunk.expunge_count(),
            "applying sync chunk"
        );

        if matches!(scope, Scope::UserOwn) {
            self.apply_saved_searches(session, chunk).await?;
            self.apply_linked_notebooks(session, chunk).await?;
        }
        self.apply_tags(session, chunk).await?;
        self.apply_notebooks(session, chunk).await?;
        let notes_touched = self.apply_notes(session, chunk).await?;
        self.apply_resources(session, chunk, &notes_touched).await?;
        self.apply_expunges(session, chunk).await?;

        if session.scope != Scope::UserOwn && !chunk.expunged_notes.is_empty() {
            self.prune_noteless_tags(session).await?;
        }

        session.applied_usn = session.applied_usn.max(chunk.chunk_high_usn);
        crate::metrics::record_chunk_applied(&scope, chunk.record_count(), chunk.expunge_count());
        Ok(())
    }

    fn guid_of<'a>(guid: &'a Option<Guid>, kind: EntityKind) -> Result<&'a str, SyncError> {
        guid.as_deref().ok_or_else(|| {
            SyncError::Service(ServiceError::Malformed(format!(
                "chunk {kind} record without guid"
            )))
        })
    }

    async fn apply_saved_searches(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        for remote in &chunk.saved_searches {
            let guid = Self::guid_of(&remote.guid, EntityKind::SavedSearch)?;
            match self.store.saved_search_by_guid(guid).await? {
                None => {
                    let mut incoming = remote.clone();
                    incoming.locally_modified = false;
                    self.writer
                        .submit(move |store| async move { store.put_saved_search(&incoming).await })
                        .await?;
                    session.counters.record_added(EntityKind::SavedSearch);
                }
                Some(local) => {
                    if is_conflict(
                        local.locally_modified,
                        local.update_sequence_num,
                        remote.update_sequence_num,
                    ) {
                        let create_copy = session.conflict_copies.insert(guid.to_string());
                        let record = self
                            .resolver
                            .resolve_saved_search(&local, remote, create_copy)
                            .await?;
                        session.conflicts.push(record);
                        session.counters.record_updated(EntityKind::SavedSearch);
                    } else if !local.locally_modified
                        && remote.update_sequence_num > local.update_sequence_num
                    {
                        let mut incoming = remote.clone();
                        incoming.local_id = local.local_id;
                        incoming.locally_modified = false;
                        self.writer
                            .submit(move |store| async move {
                                store.put_saved_search(&incoming).await
                            })
                            .await?;
                        session.counters.record_updated(EntityKind::SavedSearch);
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_tags(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        let scope_guid = session.scope.linked_notebook_guid().map(String::from);
        for remote in &chunk.tags {
            let guid = Self::guid_of(&remote.guid, EntityKind::Tag)?;
            let mut remote = remote.clone();
            remote.linked_notebook_guid = scope_guid.clone();

            match self.store.tag_by_guid(guid).await? {
                None => {
                    let mut incoming = remote;
                    incoming.locally_modified = false;
                    self.writer
                        .submit(move |store| async move { store.put_tag(&incoming).await })
                        .await?;
                    session.counters.record_added(EntityKind::Tag);
                }
                Some(local) => {
                    if is_conflict(
                        local.locally_modified,
                        local.update_sequence_num,
                        remote.update_sequence_num,
                    ) {
                        let create_copy = session.conflict_copies.insert(guid.to_string());
                        let record = self
                            .resolver
                            .resolve_tag(&local, &remote, create_copy)
                            .await?;
                        session.conflicts.push(record);
                        session.counters.record_updated(EntityKind::Tag);
                    } else if !local.locally_modified
                        && remote.update_sequence_num > local.update_sequence_num
                    {
                        let mut incoming = remote;
                        incoming.local_id = local.local_id;
                        incoming.locally_modified = false;
                        self.writer
                            .submit(move |store| async move { store.put_tag(&incoming).await })
                            .await?;
                        session.counters.record_updated(EntityKind::Tag);
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_notebooks(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        let scope_guid = session.scope.linked_notebook_guid().map(String::from);
        for remote in &chunk.notebooks {
            let guid = Self::guid_of(&remote.guid, EntityKind::Notebook)?;
            let mut remote = remote.clone();
            remote.linked_notebook_guid = scope_guid.clone();

            match self.store.notebook_by_guid(guid).await? {
                None => {
                    let mut incoming = remote;
                    incoming.locally_modified = false;
                    self.writer
                        .submit(move |store| async move { store.put_notebook(&incoming).await })
                        .await?;
                    session.counters.record_added(EntityKind::Notebook);
                }
                Some(local) => {
                    if is_conflict(
                        local.locally_modified,
                        local.update_sequence_num,
                        remote.update_sequence_num,
                    ) {
                        let create_copy = session.conflict_copies.insert(guid.to_string());
                        let record = self
                            .resolver
                            .resolve_notebook(&local, &remote, create_copy)
                            .await?;
                        session.conflicts.push(record);
                        session.counters.record_updated(EntityKind::Notebook);
                    } else if !local.locally_modified
                        && remote.update_sequence_num > local.update_sequence_num
                    {
                        let mut incoming = remote;
                        incoming.local_id = local.local_id;
                        incoming.locally_modified = false;
                        self.writer
                            .submit(move |store| async move { store.put_notebook(&incoming).await })
                            .await?;
                        session.counters.record_updated(EntityKind::Notebook);
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_linked_notebooks(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        for remote in &chunk.linked_notebooks {
            let existing = self.store.linked_notebook_by_guid(&remote.guid).await?;
            let is_new = existing.is_none();
            if let Some(existing) = existing {
                if remote.update_sequence_num <= existing.update_sequence_num {
                    continue;
                }
            }
            let incoming = remote.clone();
            self.writer
                .submit(move |store| async move { store.put_linked_notebook(&incoming).await })
                .await?;
            if is_new {
                session.counters.record_added(EntityKind::LinkedNotebook);
            } else {
                session.counters.record_updated(EntityKind::LinkedNotebook);
            }
        }
        Ok(())
    }

    async fn apply_notes(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<HashSet<Guid>, SyncError> {
        let scope_guid = session.scope.linked_notebook_guid().map(String::from);
        let mut touched = HashSet::new();

        for remote in &chunk.notes {
            let guid = Self::guid_of(&remote.guid, EntityKind::Note)?.to_string();
            let mut remote = remote.clone();
            remote.linked_notebook_guid = scope_guid.clone();
            remote.tag_local_ids = self.resolve_tag_local_ids(&remote.tag_guids).await?;

            match self.store.note_by_guid(&guid).await? {
                None => {
                    let mut incoming = remote;
                    incoming.locally_modified = false;
                    self.writer
                        .submit(move |store| async move { store.put_note(&incoming).await })
                        .await?;
                    session.counters.record_added(EntityKind::Note);
                    session.notes_to_download.push(guid.clone());
                    touched.insert(guid);
                }
                Some(local) => {
                    // Keep already-downloaded resource bodies whose hash
                    // didn't change, so only real changes re-download.
                    merge_unchanged_resource_data(&mut remote, &local);

                    if is_conflict(
                        local.locally_modified,
                        local.update_sequence_num,
                        remote.update_sequence_num,
                    ) {
                        let create_copy = session.conflict_copies.insert(guid.clone());
                        let record = self
                            .resolver
                            .resolve_note(&local, &remote, create_copy)
                            .await?;
                        session.conflicts.push(record);
                        session.counters.record_updated(EntityKind::Note);
                        session.notes_to_download.push(guid.clone());
                        touched.insert(guid);
                    } else if !local.locally_modified
                        && remote.update_sequence_num > local.update_sequence_num
                    {
                        let mut incoming = remote;
                        incoming.local_id = local.local_id;
                        incoming.locally_modified = false;
                        self.writer
                            .submit(move |store| async move { store.put_note(&incoming).await })
                            .await?;
                        session.counters.record_updated(EntityKind::Note);
                        session.notes_to_download.push(guid.clone());
                        touched.insert(guid);
                    }
                }
            }
        }
        Ok(touched)
    }

    async fn resolve_tag_local_ids(&self, tag_guids: &[Guid]) -> Result<Vec<String>, SyncError> {
        let mut local_ids = Vec::with_capacity(tag_guids.len());
        for guid in tag_guids {
            match self.store.tag_by_guid(guid).await? {
                Some(tag) => local_ids.push(tag.local_id),
                // Tag records precede notes within a chunk; a missing tag
                // here means it arrives in a later chunk.
                None => debug!(tag_guid = %guid, "note references a tag not yet mirrored"),
            }
        }
        Ok(local_ids)
    }

    async fn apply_resources(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
        notes_touched: &HashSet<Guid>,
    ) -> Result<(), SyncError> {
        for remote in &chunk.resources {
            let guid = Self::guid_of(&remote.guid, EntityKind::Resource)?.to_string();
            let note_guid = remote.note_guid.clone().ok_or_else(|| {
                SyncError::Service(ServiceError::Malformed(format!(
                    "chunk resource {guid} without owning note"
                )))
            })?;

            let existing = self.store.resource_by_guid(&guid).await?;
            let changed = match &existing {
                None => true,
                Some(local) => remote.update_sequence_num > local.update_sequence_num,
            };
            if !changed {
                continue;
            }

            let mut incoming = remote.clone();
            incoming.locally_modified = false;
            if let Some(local) = &existing {
                incoming.local_id = local.local_id.clone();
                if local.data_hash == incoming.data_hash {
                    incoming.data = local.data.clone();
                }
            }
            let needs_body = incoming.data.is_none();

            let put = incoming.clone();
            match self
                .writer
                .submit(move |store| async move { store.put_resource(&put).await })
                .await
            {
                Ok(()) => {}
                Err(crate::store::traits::StoreError::NotFound) => {
                    // The owning note arrives in a later chunk; the
                    // resource comes embedded in it.
                    warn!(resource_guid = %guid, note_guid = %note_guid, "resource for a note not yet mirrored, deferring");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if existing.is_some() {
                session.counters.record_updated(EntityKind::Resource);
            } else {
                session.counters.record_added(EntityKind::Resource);
            }
            if needs_body {
                session.resources_to_download.push(guid.clone());
            }

            // A resource change without a note change still re-uploads the
            // note, so both sides carry the resource consistently.
            if !notes_touched.contains(&note_guid) {
                let mark_guid = note_guid.clone();
                self.writer
                    .submit(move |store| async move {
                        if let Some(mut note) = store.note_by_guid(&mark_guid).await? {
                            note.locally_modified = true;
                            store.put_note(&note).await?;
                        }
                        Ok(())
                    })
                    .await?;
                debug!(note_guid = %note_guid, resource_guid = %guid, "marked owning note dirty after remote resource change");
            }
        }
        Ok(())
    }

    async fn apply_expunges(
        &self,
        session: &mut ScopeSession,
        chunk: &SyncChunk,
    ) -> Result<(), SyncError> {
        for guid in &chunk.expunged_saved_searches {
            let guid = guid.clone();
            self.writer
                .submit(move |store| async move { store.expunge_saved_search_by_guid(&guid).await })
                .await?;
            session.counters.record_expunged(EntityKind::SavedSearch);
        }
        for guid in &chunk.expunged_tags {
            let guid = guid.clone();
            self.writer
                .submit(move |store| async move { store.expunge_tag_by_guid(&guid).await })
                .await?;
            session.counters.record_expunged(EntityKind::Tag);
        }
        for guid in &chunk.expunged_notebooks {
            let guid = guid.clone();
            self.writer
                .submit(move |store| async move { store.expunge_notebook_by_guid(&guid).await })
                .await?;
            session.counters.record_expunged(EntityKind::Notebook);
        }
        for guid in &chunk.expunged_notes {
            let guid = guid.clone();
            self.writer
                .submit(move |store| async move { store.expunge_note_by_guid(&guid).await })
                .await?;
            session.counters.record_expunged(EntityKind::Note);
        }
        for guid in &chunk.expunged_linked_notebooks {
            self.expunge_linked_notebook_scope(guid).await?;
            session.counters.record_expunged(EntityKind::LinkedNotebook);
            session.expunged_linked_notebooks.push(guid.clone());
        }
        Ok(())
    }

    /// Drop a linked notebook and every entity mirrored from its stream.
    async fn expunge_linked_notebook_scope(&self, guid: &str) -> Result<(), SyncError> {
        let scope = Scope::LinkedNotebook(guid.to_string());
        info!(linked_notebook = %guid, "linked notebook expunged, dropping its mirrored scope");

        let notes = self.store.list_notes(Some(&scope)).await?;
        let notebooks = self.store.list_notebooks(Some(&scope)).await?;
        let tags = self.store.list_tags(Some(&scope)).await?;

        let note_guids: Vec<Guid> = notes.into_iter().filter_map(|n| n.guid).collect();
        let notebook_guids: Vec<Guid> = notebooks.into_iter().filter_map(|n| n.guid).collect();
        let tag_guids: Vec<Guid> = tags.into_iter().filter_map(|t| t.guid).collect();
        let linked_guid = guid.to_string();

        self.writer
            .submit(move |store| async move {
                for guid in &note_guids {
                    store.expunge_note_by_guid(guid).await?;
                }
                for guid in &notebook_guids {
                    store.expunge_notebook_by_guid(guid).await?;
                }
                for guid in &tag_guids {
                    store.expunge_tag_by_guid(guid).await?;
                }
                store.expunge_linked_notebook_by_guid(&linked_guid).await
            })
            .await?;
        Ok(())
    }

    /// Expunge tags of this linked notebook that no remaining note
    /// references.
    async fn prune_noteless_tags(&self, session: &mut ScopeSession) -> Result<(), SyncError> {
        let scope = session.scope.clone();
        let tags = self.store.list_tags(Some(&scope)).await?;
        if tags.is_empty() {
            return Ok(());
        }
        let notes = self.store.list_notes(Some(&scope)).await?;

        let mut referenced: HashSet<&str> = HashSet::new();
        for note in &notes {
            referenced.extend(note.tag_local_ids.iter().map(String::as_str));
            referenced.extend(note.tag_guids.iter().map(String::as_str));
        }

        for tag in &tags {
            let Some(guid) = tag.guid.as_deref() else {
                continue;
            };
            if referenced.contains(tag.local_id.as_str()) || referenced.contains(guid) {
                continue;
            }
            let expunge_guid = guid.to_string();
            self.writer
                .submit(move |store| async move { store.expunge_tag_by_guid(&expunge_guid).await })
                .await?;
            session.counters.record_expunged(EntityKind::Tag);
            session.pruned_tags.push(guid.to_string());
            info!(scope = %scope, tag_guid = %guid, "expunged noteless tag");
        }
        Ok(())
    }
}

/// Keep already-downloaded resource bodies whose hash is unchanged when a
/// remote note record replaces the local resource list.
fn merge_unchanged_resource_data(incoming: &mut Note, local: &Note) {
    for resource in &mut incoming.resources {
        if resource.data.is_some() {
            continue;
        }
        let unchanged = local.resources.iter().find(|existing| {
            existing.guid == resource.guid && existing.data_hash == resource.data_hash
        });
        if let Some(existing) = unchanged {
            resource.data = existing.data.clone();
            resource.local_id = existing.local_id.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tag;
    use crate::store::memory::InMemoryLocalStore;

    fn processor_with_store() -> (ChunkProcessor, Arc<InMemoryLocalStore>) {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, _handle) = StoreWriter::spawn(store.clone());
        (ChunkProcessor::new(store.clone(), writer), store)
    }

    fn remote_tag(guid: &str, usn: i32, name: &str) -> Tag {
        let mut tag = Tag::new_local(name);
        tag.guid = Some(guid.to_string());
        tag.update_sequence_num = Some(usn);
        tag.locally_modified = false;
        tag
    }

    fn remote_note(guid: &str, usn: i32, title: &str) -> Note {
        let mut note = Note::new_local(title);
        note.guid = Some(guid.to_string());
        note.update_sequence_num = Some(usn);
        note.locally_modified = false;
        note.content = None;
        note
    }

    #[tokio::test]
    async fn test_unknown_guid_inserted_clean() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut chunk = SyncChunk::default();
        chunk.tags.push(remote_tag("g1", 1, "travel"));
        chunk.chunk_high_usn = 1;

        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        let tag = store.tag_by_guid("g1").await.unwrap().unwrap();
        assert!(!tag.locally_modified);
        assert_eq!(session.counters.tags.added, 1);
        assert_eq!(session.applied_usn, 1);
    }

    #[tokio::test]
    async fn test_stale_record_skipped() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut current = remote_tag("g1", 9, "current");
        current.locally_modified = false;
        store.put_tag(&current).await.unwrap();

        let mut chunk = SyncChunk::default();
        chunk.tags.push(remote_tag("g1", 5, "stale"));
        chunk.chunk_high_usn = 5;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        let tag = store.tag_by_guid("g1").await.unwrap().unwrap();
        assert_eq!(tag.name, "current");
        assert_eq!(session.counters.tags.added, 0);
        assert_eq!(session.counters.tags.updated, 0);
    }

    #[tokio::test]
    async fn test_dirty_local_with_newer_remote_goes_to_resolver() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut local = remote_tag("g1", 3, "Tag_local");
        local.locally_modified = true;
        store.put_tag(&local).await.unwrap();

        let mut chunk = SyncChunk::default();
        chunk.tags.push(remote_tag("g1", 8, "Tag_remote"));
        chunk.chunk_high_usn = 8;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        assert_eq!(session.conflicts.len(), 1);
        assert_eq!(store.tag_by_guid("g1").await.unwrap().unwrap().name, "Tag_remote");
        let copies: Vec<_> = store
            .list_tags(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.guid.is_none())
            .collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].name, "Tag_local");
    }

    #[tokio::test]
    async fn test_one_conflict_copy_per_guid_per_session() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut local = remote_tag("g1", 3, "Tag_local");
        local.locally_modified = true;
        store.put_tag(&local).await.unwrap();

        let mut first = SyncChunk::default();
        first.tags.push(remote_tag("g1", 8, "Tag_remote"));
        first.chunk_high_usn = 8;
        processor.apply_chunk(&mut session, &first).await.unwrap();

        // Make the mirrored tag dirty again mid-session, then apply a
        // second remote rename of the same guid.
        let mut again = store.tag_by_guid("g1").await.unwrap().unwrap();
        again.locally_modified = true;
        store.put_tag(&again).await.unwrap();

        let mut second = SyncChunk::default();
        second.tags.push(remote_tag("g1", 9, "Tag_remote_2"));
        second.chunk_high_usn = 9;
        processor.apply_chunk(&mut session, &second).await.unwrap();

        let copies = store
            .list_tags(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.guid.is_none())
            .count();
        assert_eq!(copies, 1);
        assert_eq!(session.conflicts.len(), 2);
    }

    #[tokio::test]
    async fn test_note_apply_queues_body_download() {
        let (processor, _store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut chunk = SyncChunk::default();
        chunk.notes.push(remote_note("n1", 1, "metadata only"));
        chunk.chunk_high_usn = 1;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        assert_eq!(session.notes_to_download, vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn test_resource_change_marks_untouched_note_dirty() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        // Seed a clean note with one resource at usn 2.
        let mut note = remote_note("n1", 2, "holder");
        let mut resource = Resource::new_local("image/png", vec![1, 2]);
        resource.guid = Some("r1".into());
        resource.note_guid = Some("n1".into());
        resource.update_sequence_num = Some(2);
        resource.locally_modified = false;
        note.resources.push(resource.clone());
        store.put_note(&note).await.unwrap();

        // A later chunk carries only the resource, changed remotely.
        resource.update_sequence_num = Some(7);
        resource.data = None;
        resource.data_hash = "0123".into();
        let mut chunk = SyncChunk::default();
        chunk.resources.push(resource);
        chunk.chunk_high_usn = 7;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        let note = store.note_by_guid("n1").await.unwrap().unwrap();
        assert!(note.locally_modified, "containing note must be re-uploaded");
        assert_eq!(session.counters.resources.updated, 1);
        assert_eq!(session.resources_to_download, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_unchanged_resource_data_survives_note_update() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut note = remote_note("n1", 2, "holder");
        let mut resource = Resource::new_local("image/png", vec![1, 2, 3]);
        resource.guid = Some("r1".into());
        resource.note_guid = Some("n1".into());
        resource.update_sequence_num = Some(2);
        resource.locally_modified = false;
        note.resources.push(resource.clone());
        store.put_note(&note).await.unwrap();

        // Remote retitles the note; the resource hash is unchanged.
        let mut updated = remote_note("n1", 6, "retitled");
        resource.data = None;
        updated.resources.push(resource);
        let mut chunk = SyncChunk::default();
        chunk.notes.push(updated);
        chunk.chunk_high_usn = 6;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        let note = store.note_by_guid("n1").await.unwrap().unwrap();
        assert_eq!(note.title, "retitled");
        assert_eq!(note.resources[0].data.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(session.resources_to_download.is_empty());
    }

    #[tokio::test]
    async fn test_expunges_applied_and_counted() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        store.put_tag(&remote_tag("g1", 1, "doomed")).await.unwrap();

        let mut chunk = SyncChunk::default();
        chunk.expunged_tags.push("g1".into());
        chunk.chunk_high_usn = 2;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        assert!(store.tag_by_guid("g1").await.unwrap().is_none());
        assert_eq!(session.counters.tags.expunged, 1);
    }

    #[tokio::test]
    async fn test_noteless_tag_pruned_in_linked_scope() {
        let (processor, store) = processor_with_store();
        let scope = Scope::LinkedNotebook("ln-1".into());
        let mut session = ScopeSession::new(scope.clone(), 0);

        // Linked tag X referenced only by note n1.
        let mut tag = remote_tag("X", 1, "lonely");
        tag.linked_notebook_guid = Some("ln-1".into());
        store.put_tag(&tag).await.unwrap();

        let mut note = remote_note("n1", 2, "only holder");
        note.linked_notebook_guid = Some("ln-1".into());
        note.tag_guids.push("X".into());
        store.put_note(&note).await.unwrap();

        let mut chunk = SyncChunk::default();
        chunk.expunged_notes.push("n1".into());
        chunk.chunk_high_usn = 3;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        assert!(store.tag_by_guid("X").await.unwrap().is_none());
        assert_eq!(session.pruned_tags, vec!["X".to_string()]);
        // One expunge for the note, one for the pruned tag.
        assert_eq!(session.counters.notes.expunged, 1);
        assert_eq!(session.counters.tags.expunged, 1);
    }

    #[tokio::test]
    async fn test_referenced_tag_survives_pruning() {
        let (processor, store) = processor_with_store();
        let scope = Scope::LinkedNotebook("ln-1".into());
        let mut session = ScopeSession::new(scope.clone(), 0);

        let mut tag = remote_tag("X", 1, "kept");
        tag.linked_notebook_guid = Some("ln-1".into());
        store.put_tag(&tag).await.unwrap();

        for guid in ["n1", "n2"] {
            let mut note = remote_note(guid, 2, guid);
            note.linked_notebook_guid = Some("ln-1".into());
            note.tag_guids.push("X".into());
            store.put_note(&note).await.unwrap();
        }

        let mut chunk = SyncChunk::default();
        chunk.expunged_notes.push("n1".into());
        chunk.chunk_high_usn = 3;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        // n2 still references X.
        assert!(store.tag_by_guid("X").await.unwrap().is_some());
        assert!(session.pruned_tags.is_empty());
    }

    #[tokio::test]
    async fn test_expunged_linked_notebook_drops_scope() {
        let (processor, store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        store
            .put_linked_notebook(&crate::entities::LinkedNotebook {
                guid: "ln-1".into(),
                update_sequence_num: Some(1),
                share_name: "shared".into(),
                username: "alice".into(),
                shard_id: "s1".into(),
                uri: "https://example.com".into(),
            })
            .await
            .unwrap();
        let mut note = remote_note("n1", 1, "mirrored");
        note.linked_notebook_guid = Some("ln-1".into());
        store.put_note(&note).await.unwrap();

        let mut chunk = SyncChunk::default();
        chunk.expunged_linked_notebooks.push("ln-1".into());
        chunk.chunk_high_usn = 5;
        processor.apply_chunk(&mut session, &chunk).await.unwrap();

        assert!(store.linked_notebook_by_guid("ln-1").await.unwrap().is_none());
        assert!(store.note_by_guid("n1").await.unwrap().is_none());
        assert_eq!(session.expunged_linked_notebooks, vec!["ln-1".to_string()]);
    }

    #[tokio::test]
    async fn test_record_without_guid_is_a_data_error() {
        let (processor, _store) = processor_with_store();
        let mut session = ScopeSession::new(Scope::UserOwn, 0);

        let mut chunk = SyncChunk::default();
        chunk.tags.push(Tag::new_local("guidless"));
        chunk.chunk_high_usn = 1;

        let result = processor.apply_chunk(&mut session, &chunk).await;
        assert!(matches!(
            result,
            Err(SyncError::Service(ServiceError::Malformed(_)))
        ));
        // The failed chunk never advanced the committed USN.
        assert_eq!(session.applied_usn, 0);
    }
}
