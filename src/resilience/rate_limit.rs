// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rate-limit back-off around remote calls.
//!
//! Every outbound remote call goes through [`RateLimitGuard::run`]. A
//! quota-exceeded failure is the only kind that is automatically retried:
//! the guard emits the rate-limit notification, gives the hook a chance to
//! persist checkpoints for every scope touched so far, sleeps out the
//! server-advertised wait, and then re-issues the exact same call. All
//! other failures propagate unchanged.
//!
//! The cool-down sleep is a suspension point: a stop request interrupts it
//! and the guard acknowledges with `SyncError::Stopped`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::events::Notifier;
use crate::remote::traits::ServiceError;

/// Invoked on every rate-limit suspension, before the cool-down sleep.
///
/// The orchestrator's implementation persists a checkpoint for every scope
/// touched so far in the run, computed strictly from fully-committed items.
#[async_trait]
pub trait RateLimitHook: Send + Sync {
    async fn on_rate_limit(&self, wait: Duration);
}

/// No-op hook for flows with nothing to persist.
pub struct NoCheckpoints;

#[async_trait]
impl RateLimitHook for NoCheckpoints {
    async fn on_rate_limit(&self, _wait: Duration) {}
}

/// Wraps outbound remote calls with quota back-off.
#[derive(Clone)]
pub struct RateLimitGuard {
    notifier: Notifier,
    /// Waits above this cap become hard failures instead of being honored.
    max_wait: Option<Duration>,
    stop: watch::Receiver<bool>,
}

impl RateLimitGuard {
    #[must_use]
    pub fn new(
        notifier: Notifier,
        max_wait_secs: Option<u64>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            notifier,
            max_wait: max_wait_secs.map(Duration::from_secs),
            stop,
        }
    }

    /// Run one remote call, absorbing rate-limit failures.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &'static str,
        hook: &dyn RateLimitHook,
        mut operation: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let mut stop = self.stop.clone();
        let mut suspensions = 0u32;

        loop {
            if *stop.borrow() {
                return Err(SyncError::Stopped);
            }

            let attempt = {
                let _timer = crate::metrics::LatencyTimer::start(operation_name);
                operation().await
            };
            match attempt {
                Ok(value) => {
                    if suspensions > 0 {
                        info!(
                            operation = operation_name,
                            suspensions, "remote call succeeded after rate-limit back-off"
                        );
                    }
                    crate::metrics::record_remote_call(operation_name, "success");
                    return Ok(value);
                }
                Err(ServiceError::RateLimitExceeded(wait_seconds)) => {
                    let wait = Duration::from_secs(wait_seconds);
                    crate::metrics::record_remote_call(operation_name, "rate_limited");
                    crate::metrics::record_rate_limit_wait(wait);

                    if let Some(max_wait) = self.max_wait {
                        if wait > max_wait {
                            warn!(
                                operation = operation_name,
                                wait_seconds,
                                cap_seconds = max_wait.as_secs(),
                                "advertised rate-limit wait exceeds the configured cap"
                            );
                            return Err(SyncError::Service(ServiceError::RateLimitExceeded(
                                wait_seconds,
                            )));
                        }
                    }

                    suspensions += 1;
                    warn!(
                        operation = operation_name,
                        wait_seconds, suspensions, "rate limit exceeded, suspending"
                    );
                    self.notifier.rate_limit(wait_seconds);
                    hook.on_rate_limit(wait).await;

                    tokio::select! {
                        () = sleep(wait) => {}
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                return Err(SyncError::Stopped);
                            }
                        }
                    }
                }
                Err(err) => {
                    crate::metrics::record_remote_call(operation_name, "error");
                    return Err(SyncError::Service(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn guard_with_stop(max_wait_secs: Option<u64>) -> (RateLimitGuard, watch::Sender<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            RateLimitGuard::new(Notifier::new(), max_wait_secs, stop_rx),
            stop_tx,
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let (guard, _stop) = guard_with_stop(None);
        let result: Result<i32, _> = guard
            .run("op", &NoCheckpoints, || async { Ok(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_after_wait() {
        let (guard, _stop) = guard_with_stop(None);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = guard
            .run("op", &NoCheckpoints, || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ServiceError::RateLimitExceeded(30))
                    } else {
                        Ok("resumed")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "resumed");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_invoked_per_suspension() {
        struct CountingHook(AtomicU32);

        #[async_trait]
        impl RateLimitHook for CountingHook {
            async fn on_rate_limit(&self, _wait: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (guard, _stop) = guard_with_stop(None);
        let hook = CountingHook(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        guard
            .run("op", &hook, || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ServiceError::RateLimitExceeded(5))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (guard, _stop) = guard_with_stop(None);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = guard
            .run("op", &NoCheckpoints, || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Backend("boom".into()))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SyncError::Service(ServiceError::Backend(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_above_cap_is_a_hard_failure() {
        let (guard, _stop) = guard_with_stop(Some(10));
        let result: Result<(), _> = guard
            .run("op", &NoCheckpoints, || async {
                Err(ServiceError::RateLimitExceeded(3600))
            })
            .await;

        assert!(matches!(
            result,
            Err(SyncError::Service(ServiceError::RateLimitExceeded(3600)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_cooldown() {
        let (guard, stop_tx) = guard_with_stop(None);

        let task = tokio::spawn(async move {
            guard
                .run("op", &NoCheckpoints, || async {
                    Err::<(), _>(ServiceError::RateLimitExceeded(3600))
                })
                .await
        });

        // Let the guard reach its cool-down sleep, then request a stop.
        tokio::task::yield_now().await;
        stop_tx.send(true).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SyncError::Stopped)));
    }
}
