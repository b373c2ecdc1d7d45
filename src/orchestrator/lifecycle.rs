// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync run itself: phase sequencing, per-scope fan-out, terminal
//! state handling.

use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::events::SyncOutcome;
use crate::remote::traits::ServiceError;
use crate::scope::{AuthToken, Scope};

use super::download::ScopeDownload;
use super::types::{RunCheckpoints, SyncPhase};
use super::SyncOrchestrator;

/// Pull the message out of a scoped authentication failure; anything else
/// stays an error for the caller to propagate.
fn scoped_auth_message(err: SyncError) -> Result<String, SyncError> {
    match err {
        SyncError::Service(ServiceError::Auth(message)) => Ok(message),
        SyncError::Auth { message, .. } => Ok(message),
        other => Err(other),
    }
}

impl SyncOrchestrator {
    /// Run one full synchronization.
    ///
    /// Everything interesting arrives through the notification surface;
    /// the returned [`SyncOutcome`] summarizes the run. A stop request is
    /// not an error: the outcome comes back with `stopped` set. An `Err`
    /// means the run failed outright (local-store or remote data failure,
    /// or an account-level authentication failure no scope survives).
    #[tracing::instrument(skip(self))]
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();
        self.notifier.started();
        let run = RunCheckpoints::new(self.checkpoints.clone(), self.notifier.clone());
        let mut outcome = SyncOutcome::default();

        match self.run_phases(&run, &mut outcome).await {
            Ok(()) => {
                self.set_phase(SyncPhase::Finished);
                crate::metrics::record_sync_run("finished", started.elapsed());
                info!(
                    something_downloaded = outcome.something_downloaded,
                    something_sent = outcome.something_sent,
                    failed_scopes = outcome.failed_scopes.len(),
                    "sync finished"
                );
                self.notifier.finished(&outcome);
                Ok(outcome)
            }
            Err(SyncError::Stopped) => {
                // Which side was interrupted matters to the caller.
                if self.phase().is_upload() {
                    self.notifier.upload_stopped();
                } else {
                    self.notifier.download_stopped();
                }
                outcome.stopped = true;
                self.set_phase(SyncPhase::Stopped);
                crate::metrics::record_sync_run("stopped", started.elapsed());
                info!("sync stopped at a suspension point");
                self.notifier.finished(&outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.set_phase(SyncPhase::Failed);
                crate::metrics::record_sync_run("failed", started.elapsed());
                warn!(error = %err, "sync failed");
                self.notifier.failed(None, &err.to_string());
                Err(err)
            }
        }
    }

    async fn run_phases(
        &self,
        run: &RunCheckpoints,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SyncError> {
        // -- Authenticating --
        self.set_phase(SyncPhase::Authenticating);
        self.guard
            .run("authenticate", run, || self.service.authenticate(&self.auth))
            .await
            .map_err(|err| match err {
                // Nothing can proceed without the account context.
                SyncError::Service(ServiceError::Auth(message)) => SyncError::Auth {
                    scope: Scope::UserOwn,
                    message,
                },
                other => other,
            })?;

        // -- DownloadingOwnChunks --
        self.set_phase(SyncPhase::DownloadingOwnChunks);
        let own_download = self.download_scope(&Scope::UserOwn, &self.auth, run).await?;

        // -- DownloadingLinkedChunks --
        // Linked notebooks were mirrored by the own stream just above;
        // their sub-flows run concurrently with each other.
        self.set_phase(SyncPhase::DownloadingLinkedChunks);
        let linked_notebooks = self.store.list_linked_notebooks().await?;
        crate::metrics::set_linked_scope_count(linked_notebooks.len());

        let mut linked_flows: Vec<(Scope, AuthToken)> = Vec::new();
        for linked in &linked_notebooks {
            self.check_stop()?;
            let scope = Scope::LinkedNotebook(linked.guid.clone());
            let authenticated = self
                .guard
                .run("authenticate_to_shared_notebook", run, || {
                    self.service.authenticate_to_shared_notebook(&self.auth, linked)
                })
                .await;
            match authenticated {
                Ok(token) => linked_flows.push((scope, token)),
                Err(err) => {
                    let message = scoped_auth_message(err)?;
                    warn!(scope = %scope, error = %message, "linked notebook authentication failed, skipping scope");
                    self.notifier.failed(Some(&scope), &message);
                    outcome.failed_scopes.push((scope, message));
                }
            }
        }

        let download_results = join_all(linked_flows.iter().map(|(scope, token)| async move {
            (
                scope.clone(),
                token.clone(),
                self.download_scope(scope, token, run).await,
            )
        }))
        .await;

        let mut flows: Vec<(Scope, AuthToken, Option<ScopeDownload>)> =
            vec![(Scope::UserOwn, self.auth.clone(), own_download)];
        for (scope, token, result) in download_results {
            match result {
                Ok(download) => flows.push((scope, token, download)),
                Err(err) => {
                    let message = scoped_auth_message(err)?;
                    warn!(scope = %scope, error = %message, "linked notebook download halted by authentication failure");
                    self.notifier.failed(Some(&scope), &message);
                    outcome.failed_scopes.push((scope, message));
                }
            }
        }
        outcome.something_downloaded = flows.iter().any(|(_, _, download)| {
            download
                .as_ref()
                .is_some_and(|d| d.session.counters.processed_count() > 0)
        });

        // -- DownloadingBodies --
        self.set_phase(SyncPhase::DownloadingBodies);
        for (scope, token, download) in &flows {
            let Some(download) = download else { continue };
            if let Err(err) = self
                .download_bodies(scope, token, &download.session, run)
                .await
            {
                let message = scoped_auth_message(err)?;
                warn!(scope = %scope, error = %message, "body download halted by authentication failure");
                self.notifier.failed(Some(scope), &message);
                outcome.failed_scopes.push((scope.clone(), message));
            }
        }

        // -- UploadingOwnChanges --
        self.set_phase(SyncPhase::UploadingOwnChanges);
        let sent = self
            .upload_scope_changes(&Scope::UserOwn, &self.auth, run)
            .await?;
        outcome.something_sent |= sent.sent > 0;

        // -- UploadingLinkedChanges --
        self.set_phase(SyncPhase::UploadingLinkedChanges);
        for (scope, token, _) in &flows {
            if *scope == Scope::UserOwn {
                continue;
            }
            match self.upload_scope_changes(scope, token, run).await {
                Ok(sent) => outcome.something_sent |= sent.sent > 0,
                Err(err) => {
                    let message = scoped_auth_message(err)?;
                    warn!(scope = %scope, error = %message, "linked notebook upload halted by authentication failure");
                    self.notifier.failed(Some(scope), &message);
                    outcome.failed_scopes.push((scope.clone(), message));
                }
            }
        }

        // -- PersistingFinalState --
        self.set_phase(SyncPhase::PersistingFinalState);
        run.persist_all().await?;
        Ok(())
    }
}
