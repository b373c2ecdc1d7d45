// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local-to-remote phase: per-scope upload of locally-modified entities,
//! followed by the scope's checkpoint save.

use tracing::debug;

use crate::error::SyncError;
use crate::scope::{AuthToken, Scope, UsnScope};
use crate::uploader::UploadOutcome;

use super::types::RunCheckpoints;
use super::SyncOrchestrator;

impl SyncOrchestrator {
    /// Upload one scope's dirty entities and persist its checkpoint.
    pub(super) async fn upload_scope_changes(
        &self,
        scope: &Scope,
        auth: &AuthToken,
        run: &RunCheckpoints,
    ) -> Result<UploadOutcome, SyncError> {
        self.check_stop()?;
        let local_high = self.store.highest_usn(UsnScope::from(scope)).await?;
        let outcome = self.uploader.upload_scope(scope, auth, run).await?;
        if outcome.sent > 0 {
            // The checkpoint may only jump over USNs this run has actually
            // seen. A contiguous range above the local high water mark is
            // ours alone; a gap means another client wrote to the scope
            // mid-upload, and those USNs are left for the next download.
            if outcome.max_committed_usn == local_high + outcome.sent as i32 {
                run.advance(scope, outcome.max_committed_usn);
            } else {
                debug!(
                    scope = %scope,
                    local_high,
                    sent = outcome.sent,
                    max_committed_usn = outcome.max_committed_usn,
                    "non-contiguous USNs from upload, leaving checkpoint for next download"
                );
            }
        }
        run.persist(scope).await?;
        Ok(outcome)
    }
}
