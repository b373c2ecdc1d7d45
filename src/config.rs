// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use note_sync_engine::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.max_chunk_entries, 100);
//!
//! // Full config
//! let config = SyncConfig {
//!     max_chunk_entries: 50,
//!     rate_limit_max_wait_secs: Some(900),
//!     checkpoint_db_path: Some("sync_checkpoints.db".into()),
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

use crate::chunk::ChunkFilter;

/// Configuration for the sync engine.
///
/// All fields have sensible defaults; a default-constructed config runs a
/// complete sync.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum entries requested per sync chunk (default: 100)
    #[serde(default = "default_max_chunk_entries")]
    pub max_chunk_entries: usize,

    /// Server-side record filter for chunk downloads
    #[serde(default)]
    pub chunk_filter: ChunkFilter,

    /// Cap on the server-advertised rate-limit wait. A wait above the cap
    /// is surfaced as a hard failure instead of being honored.
    /// None (default) honors any advertised wait.
    #[serde(default)]
    pub rate_limit_max_wait_secs: Option<u64>,

    /// SQLite file for durable checkpoints. None keeps checkpoints
    /// wherever the caller-supplied store puts them.
    #[serde(default)]
    pub checkpoint_db_path: Option<String>,
}

fn default_max_chunk_entries() -> usize { 100 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_chunk_entries: default_max_chunk_entries(),
            chunk_filter: ChunkFilter::default(),
            rate_limit_max_wait_secs: None,
            checkpoint_db_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_chunk_entries, 100);
        assert!(config.rate_limit_max_wait_secs.is_none());
        assert!(config.checkpoint_db_path.is_none());
        assert!(config.chunk_filter.include_expunged);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"max_chunk_entries": 25}"#).unwrap();
        assert_eq!(config.max_chunk_entries, 25);
        assert!(config.rate_limit_max_wait_secs.is_none());
    }

    #[test]
    fn test_deserialize_full() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "max_chunk_entries": 10,
                "chunk_filter": {"include_expunged": false, "include_resources": true},
                "rate_limit_max_wait_secs": 60,
                "checkpoint_db_path": "cp.db"
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_chunk_entries, 10);
        assert!(!config.chunk_filter.include_expunged);
        assert_eq!(config.rate_limit_max_wait_secs, Some(60));
        assert_eq!(config.checkpoint_db_path.as_deref(), Some("cp.db"));
    }
}
