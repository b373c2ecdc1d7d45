// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine-level error type.
//!
//! Remote-call failures are classified at the rate-limit guard boundary:
//! rate limits are absorbed and retried there and never appear here. Of
//! what remains, authentication failures halt only the affected scope,
//! while store/service/checkpoint failures are fatal for the whole run.
//! `Stopped` is not a failure: it marks a stop request honored at a
//! suspension point and is converted to a stopped outcome at the top
//! level, never surfaced to callers as an error.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::remote::traits::ServiceError;
use crate::scope::Scope;
use crate::store::traits::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("local store failure: {0}")]
    Store(#[from] StoreError),

    #[error("remote service failure: {0}")]
    Service(#[from] ServiceError),

    #[error("authentication failed for {scope}: {message}")]
    Auth { scope: Scope, message: String },

    #[error("checkpoint storage failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("stopped by request")]
    Stopped,
}

impl SyncError {
    /// Whether this failure halts only one scope (scoped authentication
    /// failure) rather than the whole run.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_is_scoped() {
        let err = SyncError::Auth {
            scope: Scope::UserOwn,
            message: "expired".into(),
        };
        assert!(err.is_scoped());
        assert!(!SyncError::Stopped.is_scoped());
        assert!(!SyncError::Store(StoreError::NotFound).is_scoped());
    }

    #[test]
    fn test_display_carries_scope() {
        let err = SyncError::Auth {
            scope: Scope::LinkedNotebook("ln-9".into()),
            message: "token revoked".into(),
        };
        let text = format!("{err}");
        assert!(text.contains("linked:ln-9"));
        assert!(text.contains("token revoked"));
    }
}
