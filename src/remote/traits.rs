// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote note service boundary.
//!
//! The wire protocol and transport are the embedding application's
//! concern; the engine talks to the service through this trait. Every call
//! can fail with [`ServiceError::RateLimitExceeded`], which the rate-limit
//! guard absorbs and retries — no other failure kind is auto-retried.

use async_trait::async_trait;
use thiserror::Error;

use crate::chunk::{ChunkFilter, SyncChunk, SyncState};
use crate::entities::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag};
use crate::scope::{AuthToken, Scope};

#[derive(Error, Debug)]
pub enum ServiceError {
    /// API quota exhausted. Carries the server-advertised wait in seconds.
    #[error("rate limit exceeded, retry after {0}s")]
    RateLimitExceeded(u64),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed remote record: {0}")]
    Malformed(String),
    #[error("remote entity not found: {0}")]
    NotFound(String),
    #[error("remote service error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// Whether this failure is the auto-retried kind.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_))
    }
}

/// The remote cloud note service, as seen by the sync engine.
///
/// User-own calls take the account token; linked-notebook calls take the
/// token issued by [`authenticate_to_shared_notebook`].
///
/// [`authenticate_to_shared_notebook`]: NoteService::authenticate_to_shared_notebook
#[async_trait]
pub trait NoteService: Send + Sync {
    /// Validate the account token.
    async fn authenticate(&self, auth: &AuthToken) -> Result<(), ServiceError>;

    /// Obtain a scope token for one linked notebook.
    async fn authenticate_to_shared_notebook(
        &self,
        auth: &AuthToken,
        linked: &LinkedNotebook,
    ) -> Result<AuthToken, ServiceError>;

    /// Current sync state for one scope.
    async fn sync_state(&self, auth: &AuthToken, scope: &Scope) -> Result<SyncState, ServiceError>;

    /// One batch of changes after `after_usn`, at most `max_entries`
    /// records, in USN order.
    async fn sync_chunk(
        &self,
        auth: &AuthToken,
        scope: &Scope,
        after_usn: i32,
        max_entries: usize,
        filter: &ChunkFilter,
    ) -> Result<SyncChunk, ServiceError>;

    /// Full note body (content plus resource metadata).
    async fn get_note(&self, auth: &AuthToken, guid: &str) -> Result<Note, ServiceError>;

    /// Full resource body (data bytes included).
    async fn get_resource(&self, auth: &AuthToken, guid: &str) -> Result<Resource, ServiceError>;

    // Create/update, returning the committed entity with its
    // server-assigned guid and USN.

    async fn create_saved_search(
        &self,
        auth: &AuthToken,
        search: &SavedSearch,
    ) -> Result<SavedSearch, ServiceError>;
    async fn update_saved_search(
        &self,
        auth: &AuthToken,
        search: &SavedSearch,
    ) -> Result<SavedSearch, ServiceError>;

    async fn create_tag(&self, auth: &AuthToken, tag: &Tag) -> Result<Tag, ServiceError>;
    async fn update_tag(&self, auth: &AuthToken, tag: &Tag) -> Result<Tag, ServiceError>;

    async fn create_notebook(
        &self,
        auth: &AuthToken,
        notebook: &Notebook,
    ) -> Result<Notebook, ServiceError>;
    async fn update_notebook(
        &self,
        auth: &AuthToken,
        notebook: &Notebook,
    ) -> Result<Notebook, ServiceError>;

    async fn create_note(&self, auth: &AuthToken, note: &Note) -> Result<Note, ServiceError>;
    async fn update_note(&self, auth: &AuthToken, note: &Note) -> Result<Note, ServiceError>;
}
