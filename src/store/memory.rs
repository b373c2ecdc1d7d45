// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory reference implementation of the local store.
//!
//! Backs the test suites and small embedders. Entities are keyed by
//! `local_id`; guid lookups scan, which is fine at in-memory scale.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entities::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag};
use crate::scope::{Scope, UsnScope};

use super::traits::{LocalStore, StoreError};

#[derive(Default)]
pub struct InMemoryLocalStore {
    saved_searches: DashMap<String, SavedSearch>,
    tags: DashMap<String, Tag>,
    notebooks: DashMap<String, Notebook>,
    notes: DashMap<String, Note>,
    linked_notebooks: DashMap<String, LinkedNotebook>,
}

impl InMemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entity count across all tables (linked notebooks included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.saved_searches.len()
            + self.tags.len()
            + self.notebooks.len()
            + self.notes.len()
            + self.linked_notebooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.saved_searches.clear();
        self.tags.clear();
        self.notebooks.clear();
        self.notes.clear();
        self.linked_notebooks.clear();
    }
}

fn scope_matches(linked_notebook_guid: Option<&str>, scope: Option<&Scope>) -> bool {
    match scope {
        None => true,
        Some(Scope::UserOwn) => linked_notebook_guid.is_none(),
        Some(Scope::LinkedNotebook(guid)) => linked_notebook_guid == Some(guid.as_str()),
    }
}

fn usn_scope_matches(linked_notebook_guid: Option<&str>, scope: &UsnScope) -> bool {
    match scope {
        UsnScope::AllIncludingLinked => true,
        UsnScope::UserOwn => linked_notebook_guid.is_none(),
        UsnScope::LinkedNotebook(guid) => linked_notebook_guid == Some(guid.as_str()),
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn saved_search_by_guid(&self, guid: &str) -> Result<Option<SavedSearch>, StoreError> {
        Ok(self
            .saved_searches
            .iter()
            .find(|entry| entry.guid.as_deref() == Some(guid))
            .map(|entry| entry.value().clone()))
    }

    async fn put_saved_search(&self, search: &SavedSearch) -> Result<(), StoreError> {
        self.saved_searches
            .insert(search.local_id.clone(), search.clone());
        Ok(())
    }

    async fn expunge_saved_search_by_guid(&self, guid: &str) -> Result<(), StoreError> {
        self.saved_searches
            .retain(|_, search| search.guid.as_deref() != Some(guid));
        Ok(())
    }

    async fn list_saved_searches(&self) -> Result<Vec<SavedSearch>, StoreError> {
        Ok(self
            .saved_searches
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn tag_by_guid(&self, guid: &str) -> Result<Option<Tag>, StoreError> {
        Ok(self
            .tags
            .iter()
            .find(|entry| entry.guid.as_deref() == Some(guid))
            .map(|entry| entry.value().clone()))
    }

    async fn put_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        self.tags.insert(tag.local_id.clone(), tag.clone());
        Ok(())
    }

    async fn expunge_tag_by_guid(&self, guid: &str) -> Result<(), StoreError> {
        self.tags.retain(|_, tag| tag.guid.as_deref() != Some(guid));
        Ok(())
    }

    async fn list_tags(&self, scope: Option<&Scope>) -> Result<Vec<Tag>, StoreError> {
        Ok(self
            .tags
            .iter()
            .filter(|entry| scope_matches(entry.linked_notebook_guid.as_deref(), scope))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn notebook_by_guid(&self, guid: &str) -> Result<Option<Notebook>, StoreError> {
        Ok(self
            .notebooks
            .iter()
            .find(|entry| entry.guid.as_deref() == Some(guid))
            .map(|entry| entry.value().clone()))
    }

    async fn put_notebook(&self, notebook: &Notebook) -> Result<(), StoreError> {
        self.notebooks
            .insert(notebook.local_id.clone(), notebook.clone());
        Ok(())
    }

    async fn expunge_notebook_by_guid(&self, guid: &str) -> Result<(), StoreError> {
        self.notebooks
            .retain(|_, notebook| notebook.guid.as_deref() != Some(guid));
        Ok(())
    }

    async fn list_notebooks(&self, scope: Option<&Scope>) -> Result<Vec<Notebook>, StoreError> {
        Ok(self
            .notebooks
            .iter()
            .filter(|entry| scope_matches(entry.linked_notebook_guid.as_deref(), scope))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn note_by_guid(&self, guid: &str) -> Result<Option<Note>, StoreError> {
        Ok(self
            .notes
            .iter()
            .find(|entry| entry.guid.as_deref() == Some(guid))
            .map(|entry| entry.value().clone()))
    }

    async fn put_note(&self, note: &Note) -> Result<(), StoreError> {
        self.notes.insert(note.local_id.clone(), note.clone());
        Ok(())
    }

    async fn expunge_note_by_guid(&self, guid: &str) -> Result<(), StoreError> {
        self.notes
            .retain(|_, note| note.guid.as_deref() != Some(guid));
        Ok(())
    }

    async fn list_notes(&self, scope: Option<&Scope>) -> Result<Vec<Note>, StoreError> {
        Ok(self
            .notes
            .iter()
            .filter(|entry| scope_matches(entry.linked_notebook_guid.as_deref(), scope))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn resource_by_guid(&self, guid: &str) -> Result<Option<Resource>, StoreError> {
        for entry in self.notes.iter() {
            if let Some(resource) = entry
                .resources
                .iter()
                .find(|r| r.guid.as_deref() == Some(guid))
            {
                return Ok(Some(resource.clone()));
            }
        }
        Ok(None)
    }

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let note_guid = resource.note_guid.as_deref().ok_or(StoreError::NotFound)?;
        let local_id = self
            .notes
            .iter()
            .find(|entry| entry.guid.as_deref() == Some(note_guid))
            .map(|entry| entry.local_id.clone())
            .ok_or(StoreError::NotFound)?;

        let mut note = self.notes.get_mut(&local_id).ok_or(StoreError::NotFound)?;
        match note
            .resources
            .iter_mut()
            .find(|r| r.guid == resource.guid || r.local_id == resource.local_id)
        {
            Some(existing) => *existing = resource.clone(),
            None => note.resources.push(resource.clone()),
        }
        Ok(())
    }

    async fn linked_notebook_by_guid(
        &self,
        guid: &str,
    ) -> Result<Option<LinkedNotebook>, StoreError> {
        Ok(self.linked_notebooks.get(guid).map(|entry| entry.clone()))
    }

    async fn put_linked_notebook(&self, linked: &LinkedNotebook) -> Result<(), StoreError> {
        self.linked_notebooks
            .insert(linked.guid.clone(), linked.clone());
        Ok(())
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &str) -> Result<(), StoreError> {
        self.linked_notebooks.remove(guid);
        Ok(())
    }

    async fn list_linked_notebooks(&self) -> Result<Vec<LinkedNotebook>, StoreError> {
        Ok(self
            .linked_notebooks
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn highest_usn(&self, scope: UsnScope) -> Result<i32, StoreError> {
        let mut highest = 0;

        for entry in self.tags.iter() {
            if usn_scope_matches(entry.linked_notebook_guid.as_deref(), &scope) {
                highest = highest.max(entry.update_sequence_num.unwrap_or(0));
            }
        }
        for entry in self.notebooks.iter() {
            if usn_scope_matches(entry.linked_notebook_guid.as_deref(), &scope) {
                highest = highest.max(entry.update_sequence_num.unwrap_or(0));
            }
        }
        for entry in self.notes.iter() {
            if usn_scope_matches(entry.linked_notebook_guid.as_deref(), &scope) {
                highest = highest.max(entry.update_sequence_num.unwrap_or(0));
                for resource in &entry.resources {
                    highest = highest.max(resource.update_sequence_num.unwrap_or(0));
                }
            }
        }

        // Saved searches and linked notebooks only count toward user-own.
        if !matches!(scope, UsnScope::LinkedNotebook(_)) {
            for entry in self.saved_searches.iter() {
                highest = highest.max(entry.update_sequence_num.unwrap_or(0));
            }
            for entry in self.linked_notebooks.iter() {
                highest = highest.max(entry.update_sequence_num.unwrap_or(0));
            }
        }

        Ok(highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced_tag(guid: &str, usn: i32) -> Tag {
        let mut tag = Tag::new_local(format!("tag-{guid}"));
        tag.guid = Some(guid.to_string());
        tag.update_sequence_num = Some(usn);
        tag.locally_modified = false;
        tag
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryLocalStore::new();
        assert!(store.is_empty());
        assert_eq!(store.highest_usn(UsnScope::UserOwn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_and_get_by_guid() {
        let store = InMemoryLocalStore::new();
        store.put_tag(&synced_tag("g1", 3)).await.unwrap();

        let found = store.tag_by_guid("g1").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().update_sequence_num, Some(3));
        assert!(store.tag_by_guid("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_upserts_by_local_id() {
        let store = InMemoryLocalStore::new();
        let mut tag = synced_tag("g1", 3);
        store.put_tag(&tag).await.unwrap();

        tag.name = "renamed".into();
        store.put_tag(&tag).await.unwrap();

        let tags = store.list_tags(None).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "renamed");
    }

    #[tokio::test]
    async fn test_expunge_by_guid() {
        let store = InMemoryLocalStore::new();
        store.put_tag(&synced_tag("g1", 1)).await.unwrap();
        store.expunge_tag_by_guid("g1").await.unwrap();
        assert!(store.tag_by_guid("g1").await.unwrap().is_none());

        // Expunging a missing guid is not an error.
        store.expunge_tag_by_guid("g1").await.unwrap();
    }

    #[tokio::test]
    async fn test_scope_filtered_listing() {
        let store = InMemoryLocalStore::new();
        store.put_tag(&synced_tag("own", 1)).await.unwrap();

        let mut linked = synced_tag("shared", 2);
        linked.linked_notebook_guid = Some("ln-1".into());
        store.put_tag(&linked).await.unwrap();

        let own = store.list_tags(Some(&Scope::UserOwn)).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].guid.as_deref(), Some("own"));

        let shared = store
            .list_tags(Some(&Scope::LinkedNotebook("ln-1".into())))
            .await
            .unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].guid.as_deref(), Some("shared"));

        assert_eq!(store.list_tags(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resource_put_updates_embedded_copy() {
        let store = InMemoryLocalStore::new();
        let mut note = Note::new_local("with resource");
        note.guid = Some("n1".into());
        let mut resource = Resource::new_local("image/png", vec![1]);
        resource.guid = Some("r1".into());
        resource.note_guid = Some("n1".into());
        note.resources.push(resource.clone());
        store.put_note(&note).await.unwrap();

        resource.mime = "image/jpeg".into();
        store.put_resource(&resource).await.unwrap();

        let found = store.resource_by_guid("r1").await.unwrap().unwrap();
        assert_eq!(found.mime, "image/jpeg");

        let stored_note = store.note_by_guid("n1").await.unwrap().unwrap();
        assert_eq!(stored_note.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_put_resource_without_note_fails() {
        let store = InMemoryLocalStore::new();
        let mut resource = Resource::new_local("image/png", vec![1]);
        resource.guid = Some("r1".into());
        resource.note_guid = Some("no-such-note".into());

        let result = store.put_resource(&resource).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_highest_usn_per_scope() {
        let store = InMemoryLocalStore::new();
        store.put_tag(&synced_tag("own", 5)).await.unwrap();

        let mut linked = synced_tag("shared", 9);
        linked.linked_notebook_guid = Some("ln-1".into());
        store.put_tag(&linked).await.unwrap();

        let mut search = SavedSearch::new_local("s", "q");
        search.guid = Some("sg".into());
        search.update_sequence_num = Some(7);
        search.locally_modified = false;
        store.put_saved_search(&search).await.unwrap();

        assert_eq!(store.highest_usn(UsnScope::UserOwn).await.unwrap(), 7);
        assert_eq!(
            store
                .highest_usn(UsnScope::LinkedNotebook("ln-1".into()))
                .await
                .unwrap(),
            9
        );
        assert_eq!(
            store.highest_usn(UsnScope::AllIncludingLinked).await.unwrap(),
            9
        );
    }

    #[tokio::test]
    async fn test_highest_usn_counts_embedded_resources() {
        let store = InMemoryLocalStore::new();
        let mut note = Note::new_local("n");
        note.guid = Some("n1".into());
        note.update_sequence_num = Some(2);
        let mut resource = Resource::new_local("image/png", vec![1]);
        resource.guid = Some("r1".into());
        resource.note_guid = Some("n1".into());
        resource.update_sequence_num = Some(11);
        note.resources.push(resource);
        store.put_note(&note).await.unwrap();

        assert_eq!(store.highest_usn(UsnScope::UserOwn).await.unwrap(), 11);
    }
}
