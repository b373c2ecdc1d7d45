// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-writer actor for the local store.
//!
//! All store mutations — from any scope's chunk processing or upload — are
//! funneled through one task that executes them strictly one at a time, so
//! two scopes' concurrent chunk applications never interleave at the level
//! of a single entity write. Reads bypass the actor and hit the shared
//! store handle directly.
//!
//! Mutations are submitted as closures and awaited via oneshot futures; a
//! write that is in flight when a stop request arrives always completes
//! before the stop is acknowledged.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{LocalStore, StoreError};

type WriteJob =
    Box<dyn FnOnce(Arc<dyn LocalStore>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Handle to the single-writer task. Cheap to clone.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl StoreWriter {
    /// Spawn the writer task owning the mutation path to `store`.
    ///
    /// The task drains its queue and exits when every handle is dropped;
    /// the join handle is returned for embedders that want to await a
    /// clean drain on shutdown.
    pub fn spawn(store: Arc<dyn LocalStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<WriteJob>(64);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(Arc::clone(&store)).await;
            }
            debug!("store writer drained, exiting");
        });
        (Self { tx }, handle)
    }

    /// Submit one mutation and await its result.
    ///
    /// The closure runs on the writer task with exclusive access to the
    /// mutation path; the returned future resolves when the write has
    /// fully committed.
    pub async fn submit<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn LocalStore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |store| {
            Box::pin(async move {
                let result = op(store).await;
                if reply_tx.send(result).is_err() {
                    // Submitter gave up waiting; the write itself committed.
                    warn!("store write completed but submitter went away");
                }
            })
        });

        self.tx
            .send(job)
            .await
            .map_err(|_| StoreError::Database("store writer task is gone".to_string()))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Database("store writer dropped the reply".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tag;
    use crate::store::memory::InMemoryLocalStore;

    #[tokio::test]
    async fn test_submit_commits_through_writer() {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, _handle) = StoreWriter::spawn(store.clone());

        let tag = Tag::new_local("through-writer");
        writer
            .submit(move |store| async move { store.put_tag(&tag).await })
            .await
            .unwrap();

        assert_eq!(store.list_tags(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_returns_value() {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, _handle) = StoreWriter::spawn(store.clone());

        let count = writer
            .submit(|store| async move {
                store.put_tag(&Tag::new_local("one")).await?;
                Ok(store.list_tags(None).await?.len())
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_submits_all_commit() {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, _handle) = StoreWriter::spawn(store.clone());

        let mut handles = Vec::new();
        for i in 0..50 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let tag = Tag::new_local(format!("tag-{i}"));
                writer
                    .submit(move |store| async move { store.put_tag(&tag).await })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_tags(None).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_writer_exits_when_handles_drop() {
        let store = Arc::new(InMemoryLocalStore::new());
        let (writer, handle) = StoreWriter::spawn(store);
        drop(writer);
        handle.await.unwrap();
    }
}
