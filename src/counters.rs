// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunk data processing counters.
//!
//! One [`SyncChunksDataCounters`] accumulates per entity type over a single
//! download session for one scope. `total` fields are fixed for the session
//! (set once after all chunks are fetched); `added`/`updated`/`expunged`
//! only ever grow as chunks are applied.

use serde::{Deserialize, Serialize};

use crate::chunk::SyncChunk;
use crate::entities::EntityKind;

/// Counters for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounters {
    /// Server-side total for the session. Fixed once set.
    pub total: u64,
    pub added: u64,
    pub updated: u64,
    pub expunged: u64,
}

/// Cumulative counters across all entity types for one scope's session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChunksDataCounters {
    pub saved_searches: TypeCounters,
    pub tags: TypeCounters,
    pub notebooks: TypeCounters,
    pub notes: TypeCounters,
    pub resources: TypeCounters,
    pub linked_notebooks: TypeCounters,
}

impl SyncChunksDataCounters {
    /// Fix session totals from the full set of downloaded chunks.
    ///
    /// Call once per scope session, after the chunk fetch loop and before
    /// any chunk is applied.
    pub fn set_totals(&mut self, chunks: &[SyncChunk]) {
        let mut totals = Self::default();
        for chunk in chunks {
            totals.saved_searches.total += chunk.saved_searches.len() as u64;
            totals.tags.total += chunk.tags.len() as u64;
            totals.notebooks.total += chunk.notebooks.len() as u64;
            totals.notes.total += chunk.notes.len() as u64;
            totals.resources.total += chunk.resources.len() as u64;
            totals.linked_notebooks.total += chunk.linked_notebooks.len() as u64;
        }
        self.saved_searches.total = totals.saved_searches.total;
        self.tags.total = totals.tags.total;
        self.notebooks.total = totals.notebooks.total;
        self.notes.total = totals.notes.total;
        self.resources.total = totals.resources.total;
        self.linked_notebooks.total = totals.linked_notebooks.total;
    }

    fn of_mut(&mut self, kind: EntityKind) -> &mut TypeCounters {
        match kind {
            EntityKind::SavedSearch => &mut self.saved_searches,
            EntityKind::Tag => &mut self.tags,
            EntityKind::Notebook => &mut self.notebooks,
            EntityKind::Note => &mut self.notes,
            EntityKind::Resource => &mut self.resources,
            EntityKind::LinkedNotebook => &mut self.linked_notebooks,
        }
    }

    /// Counters for one entity type.
    #[must_use]
    pub fn of(&self, kind: EntityKind) -> &TypeCounters {
        match kind {
            EntityKind::SavedSearch => &self.saved_searches,
            EntityKind::Tag => &self.tags,
            EntityKind::Notebook => &self.notebooks,
            EntityKind::Note => &self.notes,
            EntityKind::Resource => &self.resources,
            EntityKind::LinkedNotebook => &self.linked_notebooks,
        }
    }

    pub fn record_added(&mut self, kind: EntityKind) {
        self.of_mut(kind).added += 1;
    }

    pub fn record_updated(&mut self, kind: EntityKind) {
        self.of_mut(kind).updated += 1;
    }

    pub fn record_expunged(&mut self, kind: EntityKind) {
        self.of_mut(kind).expunged += 1;
    }

    /// Whether `self` is a valid successor of `earlier` within one session:
    /// identical totals, nothing decreased.
    #[must_use]
    pub fn is_monotonic_successor_of(&self, earlier: &Self) -> bool {
        fn check(later: &TypeCounters, earlier: &TypeCounters) -> bool {
            later.total == earlier.total
                && later.added >= earlier.added
                && later.updated >= earlier.updated
                && later.expunged >= earlier.expunged
        }
        check(&self.saved_searches, &earlier.saved_searches)
            && check(&self.tags, &earlier.tags)
            && check(&self.notebooks, &earlier.notebooks)
            && check(&self.notes, &earlier.notes)
            && check(&self.resources, &earlier.resources)
            && check(&self.linked_notebooks, &earlier.linked_notebooks)
    }

    /// Sum of added + updated + expunged across every type.
    #[must_use]
    pub fn processed_count(&self) -> u64 {
        [
            self.saved_searches,
            self.tags,
            self.notebooks,
            self.notes,
            self.resources,
            self.linked_notebooks,
        ]
        .iter()
        .map(|c| c.added + c.updated + c.expunged)
        .sum()
    }
}
