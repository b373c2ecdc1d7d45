// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity conflict detection and resolution.
//!
//! A conflict exists when a locally-modified entity at guid G meets a
//! chunk record whose USN is at or above the USN the local copy was last
//! synced against: the local edit was made without observing the latest
//! remote state. Resolution is last-writer-plus-copy: the remote version
//! wins at guid G, and the pre-conflict local edit is preserved in a
//! brand-new guid-less local entity queued for upload.
//!
//! At most one copy is created per (conflicting guid, session); the chunk
//! processor tracks which guids already have one.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entities::{EntityKind, Note, Notebook, SavedSearch, Tag};
use crate::error::SyncError;
use crate::scope::Guid;
use crate::store::writer::StoreWriter;

/// How a detected conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionKind {
    /// Remote overwrote the entity at the guid; a new local entity
    /// preserving the local edit was created.
    RemoteWinsWithLocalCopy,
    /// Remote overwrote the entity at the guid; this session had already
    /// created a copy for the guid, so no second one was made.
    RemoteWins,
}

/// One resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_kind: EntityKind,
    pub source_guid: Guid,
    pub resolution: ResolutionKind,
}

/// Whether a chunk record conflicts with the local entity at its guid.
///
/// `local_baseline_usn` is the USN the local copy was last synced against.
/// Any local edit not known to have observed the latest remote state is a
/// candidate, so a remote USN equal to the baseline still counts: the
/// record's arrival proves newer state exists that the edit never saw.
#[must_use]
pub fn is_conflict(
    locally_modified: bool,
    local_baseline_usn: Option<i32>,
    remote_usn: Option<i32>,
) -> bool {
    if !locally_modified {
        return false;
    }
    match (local_baseline_usn, remote_usn) {
        (Some(baseline), Some(remote)) => remote >= baseline,
        // A dirty local without a recorded baseline never observed any
        // remote state at all.
        _ => true,
    }
}

/// Applies conflict resolutions through the single-writer path.
#[derive(Clone)]
pub struct ConflictResolver {
    writer: StoreWriter,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(writer: StoreWriter) -> Self {
        Self { writer }
    }

    /// Resolve a saved-search conflict. `create_copy` is false when this
    /// session already created a copy for the guid.
    pub async fn resolve_saved_search(
        &self,
        local: &SavedSearch,
        remote: &SavedSearch,
        create_copy: bool,
    ) -> Result<ConflictRecord, SyncError> {
        let source_guid = remote.guid.clone().unwrap_or_default();

        let mut committed = remote.clone();
        committed.local_id = local.local_id.clone();
        committed.locally_modified = false;

        let copy = create_copy.then(|| {
            let mut copy = local.clone();
            copy.local_id = uuid::Uuid::new_v4().to_string();
            copy.guid = None;
            copy.update_sequence_num = None;
            copy.locally_modified = true;
            copy
        });

        self.writer
            .submit(move |store| async move {
                store.put_saved_search(&committed).await?;
                if let Some(copy) = copy {
                    store.put_saved_search(&copy).await?;
                }
                Ok(())
            })
            .await?;

        Ok(self.record(EntityKind::SavedSearch, source_guid, create_copy))
    }

    pub async fn resolve_tag(
        &self,
        local: &Tag,
        remote: &Tag,
        create_copy: bool,
    ) -> Result<ConflictRecord, SyncError> {
        let source_guid = remote.guid.clone().unwrap_or_default();

        let mut committed = remote.clone();
        committed.local_id = local.local_id.clone();
        committed.linked_notebook_guid = local.linked_notebook_guid.clone();
        committed.locally_modified = false;

        let copy = create_copy.then(|| {
            let mut copy = local.clone();
            copy.local_id = uuid::Uuid::new_v4().to_string();
            copy.guid = None;
            copy.update_sequence_num = None;
            copy.parent_guid = None;
            copy.locally_modified = true;
            copy
        });

        self.writer
            .submit(move |store| async move {
                store.put_tag(&committed).await?;
                if let Some(copy) = copy {
                    store.put_tag(&copy).await?;
                }
                Ok(())
            })
            .await?;

        Ok(self.record(EntityKind::Tag, source_guid, create_copy))
    }

    pub async fn resolve_notebook(
        &self,
        local: &Notebook,
        remote: &Notebook,
        create_copy: bool,
    ) -> Result<ConflictRecord, SyncError> {
        let source_guid = remote.guid.clone().unwrap_or_default();

        let mut committed = remote.clone();
        committed.local_id = local.local_id.clone();
        committed.linked_notebook_guid = local.linked_notebook_guid.clone();
        committed.locally_modified = false;

        let copy = create_copy.then(|| {
            let mut copy = local.clone();
            copy.local_id = uuid::Uuid::new_v4().to_string();
            copy.guid = None;
            copy.update_sequence_num = None;
            copy.default_notebook = false;
            copy.locally_modified = true;
            copy
        });

        self.writer
            .submit(move |store| async move {
                store.put_notebook(&committed).await?;
                if let Some(copy) = copy {
                    store.put_notebook(&copy).await?;
                }
                Ok(())
            })
            .await?;

        Ok(self.record(EntityKind::Notebook, source_guid, create_copy))
    }

    /// Resolve a note conflict. The remote version (including its resource
    /// list) overwrites the note at the guid; the pre-conflict local edit
    /// survives as a conflicting copy carrying `conflict_source_guid`.
    pub async fn resolve_note(
        &self,
        local: &Note,
        remote: &Note,
        create_copy: bool,
    ) -> Result<ConflictRecord, SyncError> {
        let source_guid = remote.guid.clone().unwrap_or_default();

        let mut committed = remote.clone();
        committed.local_id = local.local_id.clone();
        committed.linked_notebook_guid = local.linked_notebook_guid.clone();
        committed.tag_local_ids = Vec::new();
        committed.locally_modified = false;

        let copy = create_copy.then(|| local.clone().into_conflicting_copy(&source_guid));

        self.writer
            .submit(move |store| async move {
                store.put_note(&committed).await?;
                if let Some(copy) = copy {
                    store.put_note(&copy).await?;
                }
                Ok(())
            })
            .await?;

        Ok(self.record(EntityKind::Note, source_guid, create_copy))
    }

    fn record(&self, entity_kind: EntityKind, source_guid: Guid, copied: bool) -> ConflictRecord {
        crate::metrics::record_conflict(entity_kind);
        let resolution = if copied {
            info!(kind = %entity_kind, guid = %source_guid, "conflict resolved, local edit preserved in a copy");
            ResolutionKind::RemoteWinsWithLocalCopy
        } else {
            debug!(kind = %entity_kind, guid = %source_guid, "conflict resolved, copy already created this session");
            ResolutionKind::RemoteWins
        };
        ConflictRecord {
            entity_kind,
            source_guid,
            resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::memory::InMemoryLocalStore;
    use crate::store::traits::LocalStore;

    fn resolver_with_store() -> (ConflictResolver, Arc<InMemoryLocalStore>) {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, _handle) = StoreWriter::spawn(store.clone());
        (ConflictResolver::new(writer), store)
    }

    fn synced_tag(guid: &str, usn: i32, name: &str) -> Tag {
        let mut tag = Tag::new_local(name);
        tag.guid = Some(guid.to_string());
        tag.update_sequence_num = Some(usn);
        tag.locally_modified = false;
        tag
    }

    #[test]
    fn test_clean_local_never_conflicts() {
        assert!(!is_conflict(false, Some(1), Some(100)));
    }

    #[test]
    fn test_dirty_local_conflicts_at_or_above_baseline() {
        assert!(is_conflict(true, Some(5), Some(6)));
        assert!(is_conflict(true, Some(5), Some(5)));
        assert!(!is_conflict(true, Some(5), Some(4)));
    }

    #[test]
    fn test_dirty_local_without_baseline_conflicts() {
        assert!(is_conflict(true, None, Some(1)));
        assert!(is_conflict(true, Some(1), None));
    }

    #[tokio::test]
    async fn test_tag_resolution_overwrites_and_copies() {
        let (resolver, store) = resolver_with_store();

        let mut local = synced_tag("G", 3, "Tag_local");
        local.locally_modified = true;
        store.put_tag(&local).await.unwrap();

        let remote = synced_tag("G", 8, "Tag_remote");

        let record = resolver.resolve_tag(&local, &remote, true).await.unwrap();
        assert_eq!(record.entity_kind, EntityKind::Tag);
        assert_eq!(record.source_guid, "G");
        assert_eq!(record.resolution, ResolutionKind::RemoteWinsWithLocalCopy);

        // The entity at guid G now carries the remote name, clean.
        let at_guid = store.tag_by_guid("G").await.unwrap().unwrap();
        assert_eq!(at_guid.name, "Tag_remote");
        assert_eq!(at_guid.local_id, local.local_id);
        assert!(!at_guid.locally_modified);

        // Exactly one new guid-less dirty tag preserves the local edit.
        let tags = store.list_tags(None).await.unwrap();
        assert_eq!(tags.len(), 2);
        let copy = tags.iter().find(|t| t.guid.is_none()).unwrap();
        assert_eq!(copy.name, "Tag_local");
        assert!(copy.locally_modified);
    }

    #[tokio::test]
    async fn test_second_resolution_skips_copy() {
        let (resolver, store) = resolver_with_store();

        let mut local = synced_tag("G", 3, "Tag_local");
        local.locally_modified = true;
        store.put_tag(&local).await.unwrap();

        resolver
            .resolve_tag(&local, &synced_tag("G", 8, "Tag_remote"), true)
            .await
            .unwrap();
        let record = resolver
            .resolve_tag(&local, &synced_tag("G", 9, "Tag_remote_2"), false)
            .await
            .unwrap();

        assert_eq!(record.resolution, ResolutionKind::RemoteWins);
        // Still only one copy.
        let copies = store
            .list_tags(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.guid.is_none())
            .count();
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn test_note_resolution_carries_conflict_source_guid() {
        let (resolver, store) = resolver_with_store();

        let mut local = Note::new_local("report");
        local.guid = Some("N".into());
        local.update_sequence_num = Some(4);
        local.content = Some("<body>my edit</body>".into());
        local.locally_modified = true;
        store.put_note(&local).await.unwrap();

        let mut remote = Note::new_local("report");
        remote.guid = Some("N".into());
        remote.update_sequence_num = Some(10);
        remote.locally_modified = false;

        resolver.resolve_note(&local, &remote, true).await.unwrap();

        let at_guid = store.note_by_guid("N").await.unwrap().unwrap();
        assert!(!at_guid.locally_modified);
        assert_eq!(at_guid.update_sequence_num, Some(10));

        let notes = store.list_notes(None).await.unwrap();
        let copy = notes.iter().find(|n| n.guid.is_none()).unwrap();
        assert_eq!(copy.conflict_source_guid.as_deref(), Some("N"));
        assert_eq!(copy.content.as_deref(), Some("<body>my edit</body>"));
        assert!(copy.locally_modified);
        assert!(copy.title.contains("conflicting copy"));
    }

    #[tokio::test]
    async fn test_notebook_copy_is_never_the_default() {
        let (resolver, store) = resolver_with_store();

        let mut local = Notebook::new_local("journal");
        local.guid = Some("B".into());
        local.update_sequence_num = Some(2);
        local.default_notebook = true;
        local.locally_modified = true;
        store.put_notebook(&local).await.unwrap();

        let mut remote = local.clone();
        remote.update_sequence_num = Some(7);
        remote.name = "journal (remote)".into();
        remote.locally_modified = false;

        resolver
            .resolve_notebook(&local, &remote, true)
            .await
            .unwrap();

        let notebooks = store.list_notebooks(None).await.unwrap();
        let copy = notebooks.iter().find(|n| n.guid.is_none()).unwrap();
        assert!(!copy.default_notebook);
        assert_eq!(copy.name, "journal");
    }
}
