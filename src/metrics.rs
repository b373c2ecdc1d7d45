// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `note_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: remote endpoint name (get_sync_chunk, create_note, ...)
//! - `status`: success, error, rate_limited
//! - `entity`: saved_search, tag, notebook, note, resource, linked_notebook
//! - `scope`: user-own, linked

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

use crate::entities::EntityKind;
use crate::scope::Scope;

fn scope_label(scope: &Scope) -> &'static str {
    match scope {
        Scope::UserOwn => "user-own",
        Scope::LinkedNotebook(_) => "linked",
    }
}

/// Record one outbound remote call.
pub fn record_remote_call(operation: &str, status: &str) {
    counter!(
        "note_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one applied sync chunk and the records it carried.
pub fn record_chunk_applied(scope: &Scope, records: usize, expunges: usize) {
    counter!(
        "note_sync_chunks_applied_total",
        "scope" => scope_label(scope)
    )
    .increment(1);
    histogram!(
        "note_sync_chunk_records",
        "scope" => scope_label(scope)
    )
    .record(records as f64);
    histogram!(
        "note_sync_chunk_expunges",
        "scope" => scope_label(scope)
    )
    .record(expunges as f64);
}

/// Record one detected conflict.
pub fn record_conflict(kind: EntityKind) {
    counter!(
        "note_sync_conflicts_total",
        "entity" => kind.to_string()
    )
    .increment(1);
}

/// Record one uploaded (created or updated) entity.
pub fn record_upload(kind: EntityKind, status: &str) {
    counter!(
        "note_sync_uploads_total",
        "entity" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one downloaded note or resource body.
pub fn record_body_download(kind: EntityKind) {
    counter!(
        "note_sync_body_downloads_total",
        "entity" => kind.to_string()
    )
    .increment(1);
}

/// Record a rate-limit suspension and its advertised wait.
pub fn record_rate_limit_wait(wait: Duration) {
    counter!("note_sync_rate_limits_total").increment(1);
    histogram!("note_sync_rate_limit_wait_seconds").record(wait.as_secs_f64());
}

/// Record one persisted checkpoint.
pub fn record_checkpoint_saved(scope: &Scope) {
    counter!(
        "note_sync_checkpoints_saved_total",
        "scope" => scope_label(scope)
    )
    .increment(1);
}

/// Record a whole-run duration and result.
pub fn record_sync_run(result: &str, duration: Duration) {
    counter!(
        "note_sync_runs_total",
        "result" => result.to_string()
    )
    .increment(1);
    histogram!(
        "note_sync_run_seconds",
        "result" => result.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Gauge of linked-notebook scopes seen in the current run.
pub fn set_linked_scope_count(count: usize) {
    gauge!("note_sync_linked_scopes").set(count as f64);
}

/// RAII latency timer for a remote operation.
///
/// Records `note_sync_operation_seconds` on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(
            "note_sync_operation_seconds",
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
