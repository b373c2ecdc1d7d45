// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local note store boundary.
//!
//! The relational store itself (schema, query engine) is the embedding
//! application's concern; the engine only needs per-entity CRUD/list with
//! an optional scope filter, plus the highest-USN query that seeds
//! incremental downloads.
//!
//! Resources live embedded in their owning note's ordered resource list;
//! the standalone resource accessors locate the owning note and operate on
//! the embedded copy.

use async_trait::async_trait;
use thiserror::Error;

use crate::entities::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag};
use crate::scope::{Scope, UsnScope};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,
    #[error("local store database error: {0}")]
    Database(String),
}

/// The local note store, as seen by the sync engine.
///
/// Reads may run concurrently; all mutations are routed through the
/// single-writer actor (see [`super::writer::StoreWriter`]) so implementors
/// never observe two concurrent writes.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // --- Saved searches (user-own scope only) ---

    async fn saved_search_by_guid(&self, guid: &str) -> Result<Option<SavedSearch>, StoreError>;
    /// Insert or replace, keyed by `local_id`.
    async fn put_saved_search(&self, search: &SavedSearch) -> Result<(), StoreError>;
    async fn expunge_saved_search_by_guid(&self, guid: &str) -> Result<(), StoreError>;
    async fn list_saved_searches(&self) -> Result<Vec<SavedSearch>, StoreError>;

    // --- Tags ---

    async fn tag_by_guid(&self, guid: &str) -> Result<Option<Tag>, StoreError>;
    async fn put_tag(&self, tag: &Tag) -> Result<(), StoreError>;
    async fn expunge_tag_by_guid(&self, guid: &str) -> Result<(), StoreError>;
    /// Tags, optionally restricted to one scope.
    async fn list_tags(&self, scope: Option<&Scope>) -> Result<Vec<Tag>, StoreError>;

    // --- Notebooks ---

    async fn notebook_by_guid(&self, guid: &str) -> Result<Option<Notebook>, StoreError>;
    async fn put_notebook(&self, notebook: &Notebook) -> Result<(), StoreError>;
    async fn expunge_notebook_by_guid(&self, guid: &str) -> Result<(), StoreError>;
    async fn list_notebooks(&self, scope: Option<&Scope>) -> Result<Vec<Notebook>, StoreError>;

    // --- Notes ---

    async fn note_by_guid(&self, guid: &str) -> Result<Option<Note>, StoreError>;
    async fn put_note(&self, note: &Note) -> Result<(), StoreError>;
    /// Expunge a note and its embedded resources.
    async fn expunge_note_by_guid(&self, guid: &str) -> Result<(), StoreError>;
    async fn list_notes(&self, scope: Option<&Scope>) -> Result<Vec<Note>, StoreError>;

    // --- Resources (embedded in notes) ---

    async fn resource_by_guid(&self, guid: &str) -> Result<Option<Resource>, StoreError>;
    /// Insert or replace the embedded copy inside the note referenced by
    /// `resource.note_guid`. Fails with [`StoreError::NotFound`] when no
    /// such note exists.
    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError>;

    // --- Linked notebooks (user-own scope only) ---

    async fn linked_notebook_by_guid(&self, guid: &str)
        -> Result<Option<LinkedNotebook>, StoreError>;
    async fn put_linked_notebook(&self, linked: &LinkedNotebook) -> Result<(), StoreError>;
    async fn expunge_linked_notebook_by_guid(&self, guid: &str) -> Result<(), StoreError>;
    async fn list_linked_notebooks(&self) -> Result<Vec<LinkedNotebook>, StoreError>;

    // --- USN queries ---

    /// Maximum USN across all mutable tables relevant to `scope`
    /// (notebooks, tags, notes, resources, plus linked notebooks and saved
    /// searches for the user-own scope). 0 for empty tables.
    async fn highest_usn(&self, scope: UsnScope) -> Result<i32, StoreError>;
}
