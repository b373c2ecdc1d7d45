//! # Note Sync Engine
//!
//! A synchronization engine reconciling an offline-capable local note
//! store with a remote cloud note service, keeping both sides eventually
//! consistent while allowing concurrent edits on either side.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SyncOrchestrator                       │
//! │  • Phase state machine, one instance per sync run           │
//! │  • One sub-flow per scope (user-own + each linked notebook) │
//! └─────────────────────────────────────────────────────────────┘
//!          │ download                          │ upload
//!          ▼                                   ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      ChunkProcessor      │   │     LocalChangeUploader      │
//! │  • Applies sync chunks   │   │  • Dirty entities, in order  │
//! │  • Conflict routing      │   │  • Guid/USN write-back       │
//! │  • Noteless-tag pruning  │   │                              │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              StoreWriter (single-writer actor)              │
//! │  • All local-store mutations, strictly serialized           │
//! └─────────────────────────────────────────────────────────────┘
//!
//! RateLimitGuard wraps every remote call in every phase; checkpoints
//! are persisted per scope after downloads, after uploads, and on every
//! rate-limit suspension.
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use note_sync_engine::{
//!     AuthToken, InMemoryCheckpointStore, InMemoryLocalStore, InMemoryNoteService,
//!     SyncConfig, SyncOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryLocalStore::new());
//!     let service = Arc::new(InMemoryNoteService::new("account-token"));
//!     let checkpoints = Arc::new(InMemoryCheckpointStore::new());
//!
//!     let orchestrator = SyncOrchestrator::new(
//!         SyncConfig::default(),
//!         store,
//!         service,
//!         checkpoints,
//!         AuthToken("account-token".into()),
//!     );
//!
//!     let outcome = orchestrator.synchronize().await.expect("sync failed");
//!     println!(
//!         "downloaded: {}, sent: {}",
//!         outcome.something_downloaded, outcome.something_sent
//!     );
//! }
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`]: the [`SyncOrchestrator`] phase state machine
//! - [`downloader`]: chunk application and per-scope session state
//! - [`conflict`]: conflict classification and last-writer-plus-copy resolution
//! - [`uploader`]: ordered upload of locally-modified entities
//! - [`resilience`]: rate-limit back-off around remote calls
//! - [`store`]: local store boundary and the single-writer actor
//! - [`remote`]: remote note service boundary
//! - [`checkpoint`]: persisted, resumable per-scope checkpoints
//! - [`events`]: the notification surface

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod conflict;
pub mod counters;
pub mod downloader;
pub mod entities;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod remote;
pub mod resilience;
pub mod scope;
pub mod store;
pub mod uploader;

pub use checkpoint::{
    Checkpoint, CheckpointError, InMemoryCheckpointStore, SqliteCheckpointStore,
    SyncCheckpointStore,
};
pub use chunk::{ChunkFilter, SyncChunk, SyncState};
pub use config::SyncConfig;
pub use conflict::{ConflictRecord, ConflictResolver, ResolutionKind};
pub use counters::{SyncChunksDataCounters, TypeCounters};
pub use downloader::{ChunkProcessor, ScopeSession};
pub use entities::{
    EntityKind, LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag, Timestamp,
};
pub use error::SyncError;
pub use events::{ChunkDownloadProgress, Notifier, SyncEventHandler, SyncOutcome};
pub use metrics::LatencyTimer;
pub use orchestrator::{SyncOrchestrator, SyncPhase};
pub use remote::{InMemoryNoteService, NoteService, ServiceError};
pub use resilience::{NoCheckpoints, RateLimitGuard, RateLimitHook};
pub use scope::{AuthToken, Guid, Scope, UsnScope};
pub use store::{InMemoryLocalStore, LocalStore, StoreError, StoreWriter};
pub use uploader::{LocalChangeUploader, UploadOutcome};
