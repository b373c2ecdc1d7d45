// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory, in-process emulation of the remote note service.
//!
//! Keeps one independently-versioned state per scope: a USN counter, the
//! current entities, and a USN-ordered change log from which sync chunks
//! are cut. Backs the integration and chaos suites; also useful as a
//! stand-in backend for embedders' own tests.
//!
//! The emulation is server-shaped where it matters to the engine:
//! chunk records arrive metadata-only (bodies stripped), guids and USNs
//! are assigned on create/update, linked notebooks require their own
//! scope token, and every trait call validates authentication.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::chunk::{ChunkFilter, SyncChunk, SyncState};
use crate::entities::{
    now_millis, EntityKind, LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag,
};
use crate::scope::{AuthToken, Guid, Scope};

use super::traits::{NoteService, ServiceError};

#[derive(Debug, Clone)]
struct ChangeEntry {
    kind: EntityKind,
    guid: Guid,
    expunged: bool,
}

#[derive(Default)]
struct ScopeState {
    usn: i32,
    full_sync_before: i64,
    change_log: BTreeMap<i32, ChangeEntry>,
    saved_searches: HashMap<Guid, SavedSearch>,
    tags: HashMap<Guid, Tag>,
    notebooks: HashMap<Guid, Notebook>,
    notes: HashMap<Guid, Note>,
    linked_notebooks: HashMap<Guid, LinkedNotebook>,
}

impl ScopeState {
    fn next_usn(&mut self) -> i32 {
        self.usn += 1;
        self.usn
    }

    fn log(&mut self, usn: i32, kind: EntityKind, guid: &str, expunged: bool) {
        self.change_log.insert(
            usn,
            ChangeEntry {
                kind,
                guid: guid.to_string(),
                expunged,
            },
        );
    }

    fn find_resource(&self, guid: &str) -> Option<Resource> {
        self.notes.values().find_map(|note| {
            note.resources
                .iter()
                .find(|r| r.guid.as_deref() == Some(guid))
                .cloned()
        })
    }
}

struct Inner {
    scopes: HashMap<Scope, ScopeState>,
    shared_tokens: HashMap<Guid, String>,
}

/// In-memory [`NoteService`] implementation.
pub struct InMemoryNoteService {
    account_token: String,
    inner: Mutex<Inner>,
}

fn new_guid() -> Guid {
    uuid::Uuid::new_v4().to_string()
}

fn strip_note_body(note: &Note) -> Note {
    let mut stripped = note.clone();
    stripped.content = None;
    for resource in &mut stripped.resources {
        resource.data = None;
    }
    stripped
}

impl InMemoryNoteService {
    #[must_use]
    pub fn new(account_token: &str) -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(Scope::UserOwn, ScopeState::default());
        Self {
            account_token: account_token.to_string(),
            inner: Mutex::new(Inner {
                scopes,
                shared_tokens: HashMap::new(),
            }),
        }
    }

    fn check_token(
        inner: &Inner,
        account_token: &str,
        auth: &AuthToken,
        scope: &Scope,
    ) -> Result<(), ServiceError> {
        let valid = match scope {
            Scope::UserOwn => auth.as_str() == account_token,
            Scope::LinkedNotebook(guid) => inner
                .shared_tokens
                .get(guid)
                .is_some_and(|token| auth.as_str() == token),
        };
        if valid {
            Ok(())
        } else {
            Err(ServiceError::Auth(format!("invalid token for {scope}")))
        }
    }

    /// Scope the entity targets, derived from its scope marker.
    fn entity_scope(linked_notebook_guid: Option<&str>) -> Scope {
        match linked_notebook_guid {
            None => Scope::UserOwn,
            Some(guid) => Scope::LinkedNotebook(guid.to_string()),
        }
    }

    /// Find which scope holds an entity of `kind` at `guid`.
    fn scope_of_guid(inner: &Inner, kind: EntityKind, guid: &str) -> Option<Scope> {
        inner.scopes.iter().find_map(|(scope, state)| {
            let held = match kind {
                EntityKind::SavedSearch => state.saved_searches.contains_key(guid),
                EntityKind::Tag => state.tags.contains_key(guid),
                EntityKind::Notebook => state.notebooks.contains_key(guid),
                EntityKind::Note => state.notes.contains_key(guid),
                EntityKind::Resource => state.find_resource(guid).is_some(),
                EntityKind::LinkedNotebook => state.linked_notebooks.contains_key(guid),
            };
            held.then(|| scope.clone())
        })
    }

    // --- Server-side seeding / manipulation (test API, no auth) ---

    /// Register a linked notebook: creates its record in the user-own
    /// stream, its own scope state, and its scope token.
    pub fn register_linked_notebook(&self, share_name: &str, username: &str) -> LinkedNotebook {
        let mut inner = self.inner.lock();
        let guid = new_guid();

        let own = inner
            .scopes
            .get_mut(&Scope::UserOwn)
            .expect("user-own scope always exists");
        let usn = own.next_usn();
        let linked = LinkedNotebook {
            guid: guid.clone(),
            update_sequence_num: Some(usn),
            share_name: share_name.to_string(),
            username: username.to_string(),
            shard_id: "s1".to_string(),
            uri: format!("https://shard.example.com/shared/{guid}"),
        };
        own.linked_notebooks.insert(guid.clone(), linked.clone());
        own.log(usn, EntityKind::LinkedNotebook, &guid, false);

        inner
            .scopes
            .insert(Scope::LinkedNotebook(guid.clone()), ScopeState::default());
        inner
            .shared_tokens
            .insert(guid.clone(), format!("shared-token-{guid}"));
        linked
    }

    /// Bump a resource's USN without touching its owning note, as a remote
    /// edit of the attachment alone would.
    pub fn touch_resource(&self, guid: &str, data: Vec<u8>) {
        let mut inner = self.inner.lock();
        let Some(scope) = Self::scope_of_guid(&inner, EntityKind::Resource, guid) else {
            return;
        };
        let state = inner.scopes.get_mut(&scope).expect("scope exists");
        let usn = state.next_usn();
        for note in state.notes.values_mut() {
            if let Some(resource) = note
                .resources
                .iter_mut()
                .find(|r| r.guid.as_deref() == Some(guid))
            {
                resource.data_hash = hex::encode(Sha256::digest(&data));
                resource.data_size = data.len();
                resource.data = Some(data);
                resource.update_sequence_num = Some(usn);
                break;
            }
        }
        state.log(usn, EntityKind::Resource, guid, false);
    }

    /// Expunge an entity server-side.
    pub fn expunge(&self, kind: EntityKind, guid: &str) {
        let mut inner = self.inner.lock();
        let Some(scope) = Self::scope_of_guid(&inner, kind, guid) else {
            return;
        };
        let state = inner.scopes.get_mut(&scope).expect("scope exists");
        match kind {
            EntityKind::SavedSearch => {
                state.saved_searches.remove(guid);
            }
            EntityKind::Tag => {
                state.tags.remove(guid);
            }
            EntityKind::Notebook => {
                state.notebooks.remove(guid);
            }
            EntityKind::Note => {
                state.notes.remove(guid);
            }
            EntityKind::Resource => return, // resources are expunged with their note
            EntityKind::LinkedNotebook => {
                state.linked_notebooks.remove(guid);
            }
        }
        let usn = state.next_usn();
        state.log(usn, kind, guid, true);

        if kind == EntityKind::LinkedNotebook {
            inner.scopes.remove(&Scope::LinkedNotebook(guid.to_string()));
            inner.shared_tokens.remove(guid);
        }
    }

    /// Move the incremental-history horizon, forcing clients whose
    /// checkpoint predates it into a full download.
    pub fn set_full_sync_before(&self, scope: &Scope, timestamp: i64) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.scopes.get_mut(scope) {
            state.full_sync_before = timestamp;
        }
    }

    /// Current server-side update count for a scope (test assertions).
    #[must_use]
    pub fn update_count(&self, scope: &Scope) -> i32 {
        self.inner.lock().scopes.get(scope).map_or(0, |s| s.usn)
    }
}

#[async_trait]
impl NoteService for InMemoryNoteService {
    async fn authenticate(&self, auth: &AuthToken) -> Result<(), ServiceError> {
        let inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, &Scope::UserOwn)
    }

    async fn authenticate_to_shared_notebook(
        &self,
        auth: &AuthToken,
        linked: &LinkedNotebook,
    ) -> Result<AuthToken, ServiceError> {
        let inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, &Scope::UserOwn)?;
        inner
            .shared_tokens
            .get(&linked.guid)
            .map(|token| AuthToken(token.clone()))
            .ok_or_else(|| {
                ServiceError::Auth(format!("no shared notebook at guid {}", linked.guid))
            })
    }

    async fn sync_state(&self, auth: &AuthToken, scope: &Scope) -> Result<SyncState, ServiceError> {
        let inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, scope)?;
        let state = inner
            .scopes
            .get(scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;
        Ok(SyncState {
            update_count: state.usn,
            full_sync_before: state.full_sync_before,
            current_time: now_millis(),
        })
    }

    async fn sync_chunk(
        &self,
        auth: &AuthToken,
        scope: &Scope,
        after_usn: i32,
        max_entries: usize,
        filter: &ChunkFilter,
    ) -> Result<SyncChunk, ServiceError> {
        let inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, scope)?;
        let state = inner
            .scopes
            .get(scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let mut chunk = SyncChunk::default();
        let mut emitted = 0usize;

        for (&usn, entry) in state.change_log.range(after_usn + 1..) {
            if emitted >= max_entries.max(1) {
                break;
            }
            chunk.chunk_high_usn = usn;

            if entry.expunged {
                if !filter.include_expunged {
                    continue;
                }
                match entry.kind {
                    EntityKind::SavedSearch => {
                        chunk.expunged_saved_searches.push(entry.guid.clone());
                    }
                    EntityKind::Tag => chunk.expunged_tags.push(entry.guid.clone()),
                    EntityKind::Notebook => chunk.expunged_notebooks.push(entry.guid.clone()),
                    EntityKind::Note => chunk.expunged_notes.push(entry.guid.clone()),
                    EntityKind::Resource => continue,
                    EntityKind::LinkedNotebook => {
                        chunk.expunged_linked_notebooks.push(entry.guid.clone());
                    }
                }
                emitted += 1;
                continue;
            }

            // Superseded entries are skipped; the guid reappears in the
            // log at its current USN.
            match entry.kind {
                EntityKind::SavedSearch => {
                    if let Some(search) = state.saved_searches.get(&entry.guid) {
                        if search.update_sequence_num == Some(usn) {
                            chunk.saved_searches.push(search.clone());
                            emitted += 1;
                        }
                    }
                }
                EntityKind::Tag => {
                    if let Some(tag) = state.tags.get(&entry.guid) {
                        if tag.update_sequence_num == Some(usn) {
                            chunk.tags.push(tag.clone());
                            emitted += 1;
                        }
                    }
                }
                EntityKind::Notebook => {
                    if let Some(notebook) = state.notebooks.get(&entry.guid) {
                        if notebook.update_sequence_num == Some(usn) {
                            chunk.notebooks.push(notebook.clone());
                            emitted += 1;
                        }
                    }
                }
                EntityKind::Note => {
                    if let Some(note) = state.notes.get(&entry.guid) {
                        if note.update_sequence_num == Some(usn) {
                            chunk.notes.push(strip_note_body(note));
                            emitted += 1;
                        }
                    }
                }
                EntityKind::Resource => {
                    if !filter.include_resources {
                        continue;
                    }
                    if let Some(resource) = state.find_resource(&entry.guid) {
                        if resource.update_sequence_num == Some(usn) {
                            let mut stripped = resource;
                            stripped.data = None;
                            chunk.resources.push(stripped);
                            emitted += 1;
                        }
                    }
                }
                EntityKind::LinkedNotebook => {
                    if let Some(linked) = state.linked_notebooks.get(&entry.guid) {
                        if linked.update_sequence_num == Some(usn) {
                            chunk.linked_notebooks.push(linked.clone());
                            emitted += 1;
                        }
                    }
                }
            }
        }

        Ok(chunk)
    }

    async fn get_note(&self, auth: &AuthToken, guid: &str) -> Result<Note, ServiceError> {
        let inner = self.inner.lock();
        let scope = Self::scope_of_guid(&inner, EntityKind::Note, guid)
            .ok_or_else(|| ServiceError::NotFound(format!("note {guid}")))?;
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        Ok(inner.scopes[&scope].notes[guid].clone())
    }

    async fn get_resource(&self, auth: &AuthToken, guid: &str) -> Result<Resource, ServiceError> {
        let inner = self.inner.lock();
        let scope = Self::scope_of_guid(&inner, EntityKind::Resource, guid)
            .ok_or_else(|| ServiceError::NotFound(format!("resource {guid}")))?;
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        inner.scopes[&scope]
            .find_resource(guid)
            .ok_or_else(|| ServiceError::NotFound(format!("resource {guid}")))
    }

    async fn create_saved_search(
        &self,
        auth: &AuthToken,
        search: &SavedSearch,
    ) -> Result<SavedSearch, ServiceError> {
        let mut inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, &Scope::UserOwn)?;
        let state = inner
            .scopes
            .get_mut(&Scope::UserOwn)
            .expect("user-own scope always exists");

        let mut committed = search.clone();
        let guid = new_guid();
        let usn = state.next_usn();
        committed.guid = Some(guid.clone());
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.saved_searches.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::SavedSearch, &guid, false);
        Ok(committed)
    }

    async fn update_saved_search(
        &self,
        auth: &AuthToken,
        search: &SavedSearch,
    ) -> Result<SavedSearch, ServiceError> {
        let mut inner = self.inner.lock();
        Self::check_token(&inner, &self.account_token, auth, &Scope::UserOwn)?;
        let state = inner
            .scopes
            .get_mut(&Scope::UserOwn)
            .expect("user-own scope always exists");

        let guid = search
            .guid
            .clone()
            .ok_or_else(|| ServiceError::Malformed("update without guid".to_string()))?;
        if !state.saved_searches.contains_key(&guid) {
            return Err(ServiceError::NotFound(format!("saved search {guid}")));
        }
        let usn = state.next_usn();
        let mut committed = search.clone();
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.saved_searches.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::SavedSearch, &guid, false);
        Ok(committed)
    }

    async fn create_tag(&self, auth: &AuthToken, tag: &Tag) -> Result<Tag, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(tag.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let mut committed = tag.clone();
        let guid = new_guid();
        let usn = state.next_usn();
        committed.guid = Some(guid.clone());
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.tags.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Tag, &guid, false);
        Ok(committed)
    }

    async fn update_tag(&self, auth: &AuthToken, tag: &Tag) -> Result<Tag, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(tag.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let guid = tag
            .guid
            .clone()
            .ok_or_else(|| ServiceError::Malformed("update without guid".to_string()))?;
        if !state.tags.contains_key(&guid) {
            return Err(ServiceError::NotFound(format!("tag {guid}")));
        }
        let usn = state.next_usn();
        let mut committed = tag.clone();
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.tags.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Tag, &guid, false);
        Ok(committed)
    }

    async fn create_notebook(
        &self,
        auth: &AuthToken,
        notebook: &Notebook,
    ) -> Result<Notebook, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(notebook.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let mut committed = notebook.clone();
        let guid = new_guid();
        let usn = state.next_usn();
        committed.guid = Some(guid.clone());
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.notebooks.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Notebook, &guid, false);
        Ok(committed)
    }

    async fn update_notebook(
        &self,
        auth: &AuthToken,
        notebook: &Notebook,
    ) -> Result<Notebook, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(notebook.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let guid = notebook
            .guid
            .clone()
            .ok_or_else(|| ServiceError::Malformed("update without guid".to_string()))?;
        if !state.notebooks.contains_key(&guid) {
            return Err(ServiceError::NotFound(format!("notebook {guid}")));
        }
        let usn = state.next_usn();
        let mut committed = notebook.clone();
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        state.notebooks.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Notebook, &guid, false);
        Ok(committed)
    }

    async fn create_note(&self, auth: &AuthToken, note: &Note) -> Result<Note, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(note.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let mut committed = note.clone();
        let guid = new_guid();
        let usn = state.next_usn();
        committed.guid = Some(guid.clone());
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        for resource in &mut committed.resources {
            if resource.guid.is_none() {
                resource.guid = Some(new_guid());
            }
            resource.note_guid = Some(guid.clone());
            resource.update_sequence_num = Some(usn);
            resource.locally_modified = false;
        }
        state.notes.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Note, &guid, false);
        Ok(committed)
    }

    async fn update_note(&self, auth: &AuthToken, note: &Note) -> Result<Note, ServiceError> {
        let mut inner = self.inner.lock();
        let scope = Self::entity_scope(note.linked_notebook_guid.as_deref());
        Self::check_token(&inner, &self.account_token, auth, &scope)?;
        let state = inner
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ServiceError::NotFound(format!("scope {scope}")))?;

        let guid = note
            .guid
            .clone()
            .ok_or_else(|| ServiceError::Malformed("update without guid".to_string()))?;
        if !state.notes.contains_key(&guid) {
            return Err(ServiceError::NotFound(format!("note {guid}")));
        }
        let usn = state.next_usn();
        let mut committed = note.clone();
        committed.update_sequence_num = Some(usn);
        committed.locally_modified = false;
        for resource in &mut committed.resources {
            if resource.guid.is_none() {
                resource.guid = Some(new_guid());
                resource.update_sequence_num = Some(usn);
            }
            resource.note_guid = Some(guid.clone());
            resource.locally_modified = false;
        }
        state.notes.insert(guid.clone(), committed.clone());
        state.log(usn, EntityKind::Note, &guid, false);
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> AuthToken {
        AuthToken("account-token".to_string())
    }

    fn service() -> InMemoryNoteService {
        InMemoryNoteService::new("account-token")
    }

    #[tokio::test]
    async fn test_authenticate() {
        let service = service();
        assert!(service.authenticate(&token()).await.is_ok());
        assert!(matches!(
            service.authenticate(&AuthToken("bogus".into())).await,
            Err(ServiceError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_create_assigns_guid_and_usn() {
        let service = service();
        let committed = service
            .create_tag(&token(), &Tag::new_local("travel"))
            .await
            .unwrap();
        assert!(committed.guid.is_some());
        assert_eq!(committed.update_sequence_num, Some(1));
        assert!(!committed.locally_modified);
        assert_eq!(service.update_count(&Scope::UserOwn), 1);
    }

    #[tokio::test]
    async fn test_usns_increase_across_updates() {
        let service = service();
        let created = service
            .create_tag(&token(), &Tag::new_local("travel"))
            .await
            .unwrap();
        let updated = service.update_tag(&token(), &created).await.unwrap();
        assert!(updated.update_sequence_num > created.update_sequence_num);
    }

    #[tokio::test]
    async fn test_chunk_carries_records_in_usn_order() {
        let service = service();
        service
            .create_tag(&token(), &Tag::new_local("a"))
            .await
            .unwrap();
        service
            .create_notebook(&token(), &Notebook::new_local("nb"))
            .await
            .unwrap();

        let chunk = service
            .sync_chunk(&token(), &Scope::UserOwn, 0, 100, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(chunk.chunk_high_usn, 2);
        assert_eq!(chunk.tags.len(), 1);
        assert_eq!(chunk.notebooks.len(), 1);
    }

    #[tokio::test]
    async fn test_chunk_respects_after_usn_and_max_entries() {
        let service = service();
        for i in 0..5 {
            service
                .create_tag(&token(), &Tag::new_local(format!("t{i}")))
                .await
                .unwrap();
        }

        let first = service
            .sync_chunk(&token(), &Scope::UserOwn, 0, 2, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(first.tags.len(), 2);
        assert_eq!(first.chunk_high_usn, 2);

        let second = service
            .sync_chunk(
                &token(),
                &Scope::UserOwn,
                first.chunk_high_usn,
                100,
                &ChunkFilter::default(),
            )
            .await
            .unwrap();
        assert_eq!(second.tags.len(), 3);
        assert_eq!(second.chunk_high_usn, 5);
    }

    #[tokio::test]
    async fn test_chunk_strips_bodies() {
        let service = service();
        let mut note = Note::new_local("body note");
        note.content = Some("<body>full text</body>".into());
        note.resources.push(Resource::new_local("image/png", vec![1, 2, 3]));
        let committed = service.create_note(&token(), &note).await.unwrap();

        let chunk = service
            .sync_chunk(&token(), &Scope::UserOwn, 0, 100, &ChunkFilter::default())
            .await
            .unwrap();
        assert!(chunk.notes[0].content.is_none());
        assert!(chunk.notes[0].resources[0].data.is_none());

        // The full body is still there via get_note.
        let full = service
            .get_note(&token(), committed.guid.as_deref().unwrap())
            .await
            .unwrap();
        assert!(full.content.is_some());
        assert!(full.resources[0].data.is_some());
    }

    #[tokio::test]
    async fn test_superseded_entries_collapse() {
        let service = service();
        let created = service
            .create_tag(&token(), &Tag::new_local("t"))
            .await
            .unwrap();
        service.update_tag(&token(), &created).await.unwrap();

        let chunk = service
            .sync_chunk(&token(), &Scope::UserOwn, 0, 100, &ChunkFilter::default())
            .await
            .unwrap();
        // One tag record at its current USN, not two.
        assert_eq!(chunk.tags.len(), 1);
        assert_eq!(chunk.tags[0].update_sequence_num, Some(2));
        assert_eq!(chunk.chunk_high_usn, 2);
    }

    #[tokio::test]
    async fn test_expunge_shows_up_in_chunk() {
        let service = service();
        let created = service
            .create_tag(&token(), &Tag::new_local("t"))
            .await
            .unwrap();
        let guid = created.guid.clone().unwrap();
        service.expunge(EntityKind::Tag, &guid);

        let chunk = service
            .sync_chunk(&token(), &Scope::UserOwn, 0, 100, &ChunkFilter::default())
            .await
            .unwrap();
        assert!(chunk.tags.is_empty());
        assert_eq!(chunk.expunged_tags, vec![guid]);
    }

    #[tokio::test]
    async fn test_linked_notebook_has_independent_stream() {
        let service = service();
        let linked = service.register_linked_notebook("shared", "alice");
        let shared_token = service
            .authenticate_to_shared_notebook(&token(), &linked)
            .await
            .unwrap();

        let mut tag = Tag::new_local("shared tag");
        tag.linked_notebook_guid = Some(linked.guid.clone());
        service.create_tag(&shared_token, &tag).await.unwrap();

        // Linked stream has its own USN sequence starting at 1.
        let scope = Scope::LinkedNotebook(linked.guid.clone());
        assert_eq!(service.update_count(&scope), 1);

        // The account token is not valid for the linked scope.
        let result = service
            .sync_chunk(&token(), &scope, 0, 100, &ChunkFilter::default())
            .await;
        assert!(matches!(result, Err(ServiceError::Auth(_))));

        let chunk = service
            .sync_chunk(&shared_token, &scope, 0, 100, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(chunk.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_touch_resource_bumps_resource_only() {
        let service = service();
        let mut note = Note::new_local("n");
        note.content = Some("<body/>".into());
        note.resources.push(Resource::new_local("image/png", vec![1]));
        let committed = service.create_note(&token(), &note).await.unwrap();
        let resource_guid = committed.resources[0].guid.clone().unwrap();
        let note_usn = committed.update_sequence_num.unwrap();

        service.touch_resource(&resource_guid, vec![4, 5, 6]);

        let chunk = service
            .sync_chunk(
                &token(),
                &Scope::UserOwn,
                note_usn,
                100,
                &ChunkFilter::default(),
            )
            .await
            .unwrap();
        assert!(chunk.notes.is_empty());
        assert_eq!(chunk.resources.len(), 1);
        assert!(chunk.resources[0].update_sequence_num > Some(note_usn));
    }
}
