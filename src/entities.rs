// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity types flowing through the sync engine.
//!
//! Every entity carries a stable `local_id` (assigned at creation, never
//! changes), an optional `guid` (remote identity, absent until the first
//! successful upload), an optional `update_sequence_num` (the USN the local
//! copy was last synced against, absent until synced), and a
//! `locally_modified` flag marking unsynced local edits pending upload.
//!
//! `linked_notebook_guid` marks scope membership: `None` for user-own data,
//! `Some(guid)` for entities mirrored from a linked notebook.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::scope::Guid;

/// Epoch milliseconds, the timestamp unit used throughout the engine.
pub type Timestamp = i64;

pub(crate) fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Entity type discriminator, used by conflict records, counters, and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    SavedSearch,
    Tag,
    Notebook,
    Note,
    Resource,
    LinkedNotebook,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SavedSearch => write!(f, "saved_search"),
            Self::Tag => write!(f, "tag"),
            Self::Notebook => write!(f, "notebook"),
            Self::Note => write!(f, "note"),
            Self::Resource => write!(f, "resource"),
            Self::LinkedNotebook => write!(f, "linked_notebook"),
        }
    }
}

/// A saved search. User-own scope only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub local_id: String,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<i32>,
    pub name: String,
    pub query: String,
    pub locally_modified: bool,
}

impl SavedSearch {
    /// Create a new local-only saved search, dirty and pending upload.
    #[must_use]
    pub fn new_local(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            update_sequence_num: None,
            name: name.into(),
            query: query.into(),
            locally_modified: true,
        }
    }
}

/// A tag. May belong to the user-own scope or a linked notebook scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub local_id: String,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<i32>,
    pub name: String,
    pub parent_guid: Option<Guid>,
    pub locally_modified: bool,
    pub linked_notebook_guid: Option<Guid>,
}

impl Tag {
    #[must_use]
    pub fn new_local(name: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            update_sequence_num: None,
            name: name.into(),
            parent_guid: None,
            locally_modified: true,
            linked_notebook_guid: None,
        }
    }
}

/// A notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub local_id: String,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<i32>,
    pub name: String,
    pub default_notebook: bool,
    pub locally_modified: bool,
    pub linked_notebook_guid: Option<Guid>,
}

impl Notebook {
    #[must_use]
    pub fn new_local(name: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            update_sequence_num: None,
            name: name.into(),
            default_notebook: false,
            locally_modified: true,
            linked_notebook_guid: None,
        }
    }
}

/// A note.
///
/// Chunk records arrive metadata-only: `content` is `None` until the body
/// download phase fills it in. Remote records reference tags by guid
/// (`tag_guids`); the local side tracks the resolved `tag_local_ids` so
/// local-only tags (no guid yet) can be attached too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub local_id: String,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<i32>,
    pub title: String,
    /// Full note body. Absent until downloaded.
    pub content: Option<String>,
    pub notebook_guid: Option<Guid>,
    /// Ordered resource list. Order is part of the note's identity.
    pub resources: Vec<Resource>,
    /// Remote-side tag references.
    pub tag_guids: Vec<Guid>,
    /// Local-side tag references, resolved from `tag_guids` on apply.
    pub tag_local_ids: Vec<String>,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub locally_modified: bool,
    pub linked_notebook_guid: Option<Guid>,
    /// Back-reference to the guid whose conflicting remote update this
    /// note's content was rescued from. Transmitted on upload.
    pub conflict_source_guid: Option<Guid>,
}

impl Note {
    #[must_use]
    pub fn new_local(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            local_id: new_local_id(),
            guid: None,
            update_sequence_num: None,
            title: title.into(),
            content: None,
            notebook_guid: None,
            resources: Vec::new(),
            tag_guids: Vec::new(),
            tag_local_ids: Vec::new(),
            created: now,
            updated: now,
            locally_modified: true,
            linked_notebook_guid: None,
            conflict_source_guid: None,
        }
    }

    /// Clone this note into a brand-new local-only conflicting copy.
    ///
    /// The copy has fresh local ids, no guid, no USN, is marked dirty, is
    /// retitled to mark it as a conflicting copy, and carries a
    /// `conflict_source_guid` back-reference to `source_guid`.
    #[must_use]
    pub fn into_conflicting_copy(mut self, source_guid: &str) -> Self {
        self.local_id = new_local_id();
        self.guid = None;
        self.update_sequence_num = None;
        self.title = format!("{} - conflicting copy", self.title);
        for resource in &mut self.resources {
            resource.local_id = new_local_id();
            resource.guid = None;
            resource.update_sequence_num = None;
            resource.note_guid = None;
            resource.locally_modified = true;
        }
        self.tag_guids.clear();
        self.updated = now_millis();
        self.locally_modified = true;
        self.conflict_source_guid = Some(source_guid.to_string());
        self
    }
}

/// A binary attachment belonging to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub local_id: String,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<i32>,
    pub note_guid: Option<Guid>,
    pub mime: String,
    /// Body bytes. Absent until downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// Hex SHA-256 of the body, known from the chunk record even before
    /// the body itself is downloaded.
    pub data_hash: String,
    pub data_size: usize,
    pub locally_modified: bool,
}

impl Resource {
    /// Create a new local-only resource carrying `data`.
    #[must_use]
    pub fn new_local(mime: impl Into<String>, data: Vec<u8>) -> Self {
        let data_hash = hex::encode(Sha256::digest(&data));
        Self {
            local_id: new_local_id(),
            guid: None,
            update_sequence_num: None,
            note_guid: None,
            mime: mime.into(),
            data_size: data.len(),
            data: Some(data),
            data_hash,
            locally_modified: true,
        }
    }

    /// Verify the body bytes against the recorded hash.
    ///
    /// Returns `true` when the body is absent (nothing to verify yet).
    #[must_use]
    pub fn body_matches_hash(&self) -> bool {
        match &self.data {
            None => true,
            Some(data) => hex::encode(Sha256::digest(data)) == self.data_hash,
        }
    }
}

/// A notebook shared from another account.
///
/// Linked notebooks arrive through the user-own chunk stream, but the data
/// they point at lives in its own independently-versioned stream reached
/// with a per-notebook auth token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedNotebook {
    /// Always present: linked notebooks only exist as remote records.
    pub guid: Guid,
    pub update_sequence_num: Option<i32>,
    pub share_name: String,
    pub username: String,
    pub shard_id: String,
    pub uri: String,
}
