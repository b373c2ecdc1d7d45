// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync chunks and remote sync state.
//!
//! A [`SyncChunk`] is one ordered batch of entity changes plus expunge
//! lists, bounded by `chunk_high_usn`. The server hands chunks out in USN
//! order; the client walks them with an after-USN cursor until the chunk
//! high water mark reaches the server's update count.

use serde::{Deserialize, Serialize};

use crate::entities::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag, Timestamp};
use crate::scope::Guid;

/// Remote sync state for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest USN the server has assigned in this scope.
    pub update_count: i32,
    /// Clients whose checkpoint predates this timestamp must run a full
    /// (from-zero) download; incremental history before it is gone.
    pub full_sync_before: Timestamp,
    /// Server clock at the time of the call.
    pub current_time: Timestamp,
}

/// Server-side record filter for chunk downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFilter {
    /// Include expunged-guid lists in the returned chunks.
    pub include_expunged: bool,
    /// Include resource records (metadata, not bodies) in the returned chunks.
    pub include_resources: bool,
}

impl Default for ChunkFilter {
    fn default() -> Self {
        Self {
            include_expunged: true,
            include_resources: true,
        }
    }
}

/// One batch of remote changes.
///
/// Record lists are metadata-level: note `content` and resource `data` are
/// absent and fetched separately during the body download phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncChunk {
    /// Highest USN contained in this chunk. The after-USN cursor for the
    /// next chunk request.
    pub chunk_high_usn: i32,

    pub saved_searches: Vec<SavedSearch>,
    pub tags: Vec<Tag>,
    pub notebooks: Vec<Notebook>,
    pub notes: Vec<Note>,
    pub resources: Vec<Resource>,
    pub linked_notebooks: Vec<LinkedNotebook>,

    pub expunged_saved_searches: Vec<Guid>,
    pub expunged_tags: Vec<Guid>,
    pub expunged_notebooks: Vec<Guid>,
    pub expunged_notes: Vec<Guid>,
    pub expunged_linked_notebooks: Vec<Guid>,
}

impl SyncChunk {
    /// Whether the chunk carries no records and no expunges at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0 && self.expunge_count() == 0
    }

    /// Number of added/updated records across all entity types.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.saved_searches.len()
            + self.tags.len()
            + self.notebooks.len()
            + self.notes.len()
            + self.resources.len()
            + self.linked_notebooks.len()
    }

    /// Number of expunged guids across all entity types.
    #[must_use]
    pub fn expunge_count(&self) -> usize {
        self.expunged_saved_searches.len()
            + self.expunged_tags.len()
            + self.expunged_notebooks.len()
            + self.expunged_notes.len()
            + self.expunged_linked_notebooks.len()
    }
}
