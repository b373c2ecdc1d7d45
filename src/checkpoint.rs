// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted, resumable sync checkpoints.
//!
//! One [`Checkpoint`] per scope: the update count the local replica is
//! synced up to, and when. Saved after each scope's chunk-download phase,
//! after each scope's upload phase, and immediately on a rate-limit
//! suspension, so a restarted process resumes instead of re-downloading.
//!
//! Saves are idempotent and monotonic: an update count lower than the one
//! already persisted for a scope is never written.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::entities::Timestamp;
use crate::scope::{Guid, Scope};

/// Resume point for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest fully-committed USN for the scope.
    pub update_count: i32,
    /// When the scope last completed a sync phase (epoch millis).
    pub last_sync_time: Timestamp,
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint storage error: {0}")]
    Database(String),
}

/// Durable per-scope checkpoint storage.
#[async_trait]
pub trait SyncCheckpointStore: Send + Sync {
    async fn load(&self, scope: &Scope) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Idempotent, monotonic save: a checkpoint with a lower update count
    /// than the persisted one leaves the persisted one in place.
    async fn save(&self, scope: &Scope, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// All persisted linked-notebook checkpoints, keyed by notebook guid.
    async fn load_linked(&self) -> Result<Vec<(Guid, Checkpoint)>, CheckpointError>;

    /// Drop a scope's checkpoint (the scope itself went away, e.g. an
    /// expunged linked notebook).
    async fn forget(&self, scope: &Scope) -> Result<(), CheckpointError>;
}

const LINKED_KEY_PREFIX: &str = "linked:";

/// In-memory checkpoint store for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncCheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, scope: &Scope) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.get(&scope.storage_key()).map(|entry| *entry))
    }

    async fn save(&self, scope: &Scope, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        match self.checkpoints.entry(scope.storage_key()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().update_count > checkpoint.update_count {
                    debug!(
                        scope = %scope,
                        persisted = occupied.get().update_count,
                        offered = checkpoint.update_count,
                        "ignoring non-monotonic checkpoint save"
                    );
                } else {
                    occupied.insert(*checkpoint);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(*checkpoint);
            }
        }
        Ok(())
    }

    async fn load_linked(&self) -> Result<Vec<(Guid, Checkpoint)>, CheckpointError> {
        Ok(self
            .checkpoints
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_prefix(LINKED_KEY_PREFIX)
                    .map(|guid| (guid.to_string(), *entry.value()))
            })
            .collect())
    }

    async fn forget(&self, scope: &Scope) -> Result<(), CheckpointError> {
        self.checkpoints.remove(&scope.storage_key());
        Ok(())
    }
}

/// SQLite-backed checkpoint store. The schema is self-initialising.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the checkpoint database at `path`.
    pub async fn open(path: &str) -> Result<Self, CheckpointError> {
        let url = format!("sqlite://{path}?mode=rwc");
        Self::connect(&url).await
    }

    /// Open an in-memory database (one connection, dies with the store).
    pub async fn in_memory() -> Result<Self, CheckpointError> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_checkpoints (
                scope_key TEXT PRIMARY KEY,
                update_count INTEGER NOT NULL,
                last_sync_time INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SyncCheckpointStore for SqliteCheckpointStore {
    async fn load(&self, scope: &Scope) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query(
            "SELECT update_count, last_sync_time FROM sync_checkpoints WHERE scope_key = ?",
        )
        .bind(scope.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(row.map(|row| Checkpoint {
            update_count: row.get::<i64, _>(0) as i32,
            last_sync_time: row.get::<i64, _>(1),
        }))
    }

    async fn save(&self, scope: &Scope, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        // The WHERE clause on the upsert makes the monotonicity guard and
        // the idempotence a single statement.
        sqlx::query(
            "INSERT INTO sync_checkpoints (scope_key, update_count, last_sync_time)
             VALUES (?, ?, ?)
             ON CONFLICT(scope_key) DO UPDATE SET
                 update_count = excluded.update_count,
                 last_sync_time = excluded.last_sync_time
             WHERE excluded.update_count >= sync_checkpoints.update_count",
        )
        .bind(scope.storage_key())
        .bind(i64::from(checkpoint.update_count))
        .bind(checkpoint.last_sync_time)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_linked(&self) -> Result<Vec<(Guid, Checkpoint)>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT scope_key, update_count, last_sync_time FROM sync_checkpoints
             WHERE scope_key LIKE ?",
        )
        .bind(format!("{LINKED_KEY_PREFIX}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let key: String = row.get(0);
                key.strip_prefix(LINKED_KEY_PREFIX).map(|guid| {
                    (
                        guid.to_string(),
                        Checkpoint {
                            update_count: row.get::<i64, _>(1) as i32,
                            last_sync_time: row.get::<i64, _>(2),
                        },
                    )
                })
            })
            .collect())
    }

    async fn forget(&self, scope: &Scope) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE scope_key = ?")
            .bind(scope.storage_key())
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        Ok(())
    }
}
