//! Notification-driven work loop.
//!
//! Feeds object identities from the store's watch into the controller:
//! distinct identities run concurrently up to `workers`, one identity never
//! has two passes in flight, failures are requeued with capped exponential
//! backoff, and every pass runs under a deadline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bucketeer_core::{Notification, ObjectKey};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::types::PassOutcome;

/// Scheduling parameters of the work loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub workers: usize,
    pub pass_timeout: Duration,
    pub requeue_base: Duration,
    pub requeue_max: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            pass_timeout: Duration::from_secs(30),
            requeue_base: Duration::from_millis(500),
            requeue_max: Duration::from_secs(60),
        }
    }
}

impl LoopConfig {
    /// Delay before retrying after the `failures`-th consecutive failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.requeue_base.saturating_mul(factor).min(self.requeue_max)
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Passes that completed successfully.
    pub passes: u64,
    /// Passes that failed or hit their deadline.
    pub failures: u64,
    /// Failed identities scheduled for retry.
    pub requeues: u64,
}

/// Handle that stops a running loop.
#[derive(Clone)]
pub struct LoopStopper {
    tx: Arc<watch::Sender<bool>>,
}

impl LoopStopper {
    /// Stop the loop; in-flight passes are cancelled.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Pending, in-flight and dirty identities.
#[derive(Debug, Default)]
struct WorkQueue {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

impl WorkQueue {
    /// Queue `key` unless it is already queued. An in-flight key is marked
    /// dirty and requeued when its pass finishes.
    fn push(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    fn next_ready(&mut self) -> Option<ObjectKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    fn finish(&mut self, key: &ObjectKey) {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.push(key.clone());
        }
    }

    fn succeeded(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Record a failure, returning the consecutive failure count.
    fn failed(&mut self, key: &ObjectKey) -> u32 {
        let count = self.failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

type PassSet = JoinSet<Result<PassOutcome>>;

/// Pass tasks and the identity each one is working on.
#[derive(Default)]
struct Running {
    tasks: PassSet,
    keys: HashMap<task::Id, ObjectKey>,
}

/// Drives a [`Controller`] from store notifications until stopped.
pub struct ReconciliationLoop {
    controller: Arc<Controller>,
    config: LoopConfig,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl ReconciliationLoop {
    pub fn new(controller: Arc<Controller>, config: LoopConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            controller,
            config,
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Run until stopped or the store's watch closes.
    pub async fn run(self) -> LoopStats {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut notifications = self.controller.store().watch();
        let mut queue = WorkQueue::default();
        let mut running = Running::default();
        let mut retries: JoinSet<ObjectKey> = JoinSet::new();
        let mut stats = LoopStats::default();

        info!(workers = self.config.workers, "Reconciliation loop started");
        self.resync(&mut queue).await;

        while !*stop_rx.borrow() {
            self.dispatch(&mut queue, &mut running);

            tokio::select! {
                biased;

                _ = stop_rx.changed() => {}
                notification = notifications.next() => match notification {
                    Some(Notification::Changed(key)) => queue.push(key),
                    Some(Notification::Resync) => self.resync(&mut queue).await,
                    None => {
                        warn!("Object store watch closed");
                        break;
                    }
                },
                Some(joined) = running.tasks.join_next_with_id(), if !running.tasks.is_empty() => {
                    self.complete(joined, &mut running, &mut queue, &mut retries, &mut stats);
                }
                Some(Ok(key)) = retries.join_next(), if !retries.is_empty() => {
                    debug!(%key, "Requeue delay elapsed");
                    queue.push(key);
                }
            }
        }

        let cancelled = queue.in_flight();
        running.tasks.shutdown().await;
        retries.shutdown().await;
        info!(
            cancelled,
            passes = stats.passes,
            failures = stats.failures,
            requeues = stats.requeues,
            "Reconciliation loop stopped"
        );
        stats
    }

    async fn resync(&self, queue: &mut WorkQueue) {
        match self.controller.store().list().await {
            Ok(keys) => {
                debug!(objects = keys.len(), "Resync");
                keys.into_iter().for_each(|key| queue.push(key));
            }
            Err(e) => warn!(error = %e, "Resync listing failed"),
        }
    }

    fn dispatch(&self, queue: &mut WorkQueue, running: &mut Running) {
        while running.tasks.len() < self.config.workers {
            let Some(key) = queue.next_ready() else {
                break;
            };
            let controller = Arc::clone(&self.controller);
            let deadline = self.config.pass_timeout;
            let pass_key = key.clone();
            let handle = running
                .tasks
                .spawn(async move { run_pass(&controller, &pass_key, deadline).await });
            running.keys.insert(handle.id(), key);
        }
    }

    /// Settle a finished pass task. A task that failed to join still
    /// releases its identity, as a cancelled pass.
    fn complete(
        &self,
        joined: std::result::Result<(task::Id, Result<PassOutcome>), JoinError>,
        running: &mut Running,
        queue: &mut WorkQueue,
        retries: &mut JoinSet<ObjectKey>,
        stats: &mut LoopStats,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, Some(result)),
            Err(e) => {
                error!(error = %e, "Pass task failed to join");
                (e.id(), None)
            }
        };
        let Some(key) = running.keys.remove(&id) else {
            warn!(task = %id, "Finished pass has no identity");
            return;
        };
        let result = result.unwrap_or_else(|| {
            Err(Error::Cancelled {
                key: key.to_string(),
            })
        });
        self.record(&key, result, queue, retries, stats);
        queue.finish(&key);
    }

    fn record(
        &self,
        key: &ObjectKey,
        result: Result<PassOutcome>,
        queue: &mut WorkQueue,
        retries: &mut JoinSet<ObjectKey>,
        stats: &mut LoopStats,
    ) {
        match result {
            Ok(_) => {
                stats.passes = stats.passes.saturating_add(1);
                queue.succeeded(key);
            }
            Err(err) => {
                stats.failures = stats.failures.saturating_add(1);
                let failures = queue.failed(key);
                if !err.is_retryable() {
                    return;
                }
                let delay = self.config.backoff(failures);
                stats.requeues = stats.requeues.saturating_add(1);
                debug!(%key, failures, delay_ms = delay.as_millis(), "Requeueing");
                let key = key.clone();
                retries.spawn(async move {
                    sleep(delay).await;
                    key
                });
            }
        }
    }
}

/// One pass under a deadline. A panicking pass is reported as a failure so
/// its identity is released.
async fn run_pass(
    controller: &Controller,
    key: &ObjectKey,
    deadline: Duration,
) -> Result<PassOutcome> {
    let pass = AssertUnwindSafe(timeout(deadline, controller.reconcile(key))).catch_unwind();
    match pass.await {
        Ok(Ok(result)) => result,
        Ok(Err(_elapsed)) => {
            let err = Error::DeadlineExceeded {
                key: key.to_string(),
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            };
            warn!(%key, error = %err, "Pass abandoned");
            Err(err)
        }
        Err(_panic) => {
            error!(%key, "Pass panicked");
            Err(Error::Cancelled {
                key: key.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use bucketeer_core::{InMemoryConnector, InMemoryObjectStore, InMemorySecretBackend, Kind};

    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::cluster(Kind::Bucket, name)
    }

    #[test]
    fn test_queue_deduplicates_pending() {
        let mut queue = WorkQueue::default();
        queue.push(key("a"));
        queue.push(key("a"));
        queue.push(key("b"));

        assert_eq!(queue.next_ready(), Some(key("a")));
        assert_eq!(queue.next_ready(), Some(key("b")));
        assert_eq!(queue.next_ready(), None);
    }

    #[test]
    fn test_in_flight_key_is_never_handed_out_twice() {
        let mut queue = WorkQueue::default();
        queue.push(key("a"));
        assert_eq!(queue.next_ready(), Some(key("a")));

        queue.push(key("a"));
        queue.push(key("a"));
        assert_eq!(queue.next_ready(), None);

        queue.finish(&key("a"));
        assert_eq!(queue.next_ready(), Some(key("a")));
        queue.finish(&key("a"));
        assert_eq!(queue.next_ready(), None);
    }

    #[test]
    fn test_failures_reset_on_success() {
        let mut queue = WorkQueue::default();
        assert_eq!(queue.failed(&key("a")), 1);
        assert_eq!(queue.failed(&key("a")), 2);
        queue.succeeded(&key("a"));
        assert_eq!(queue.failed(&key("a")), 1);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = LoopConfig {
            requeue_base: Duration::from_millis(100),
            requeue_max: Duration::from_millis(1000),
            ..LoopConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_millis(1000));
        assert_eq!(config.backoff(64), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_pass_task_lost_to_join_error_releases_identity() {
        let controller = Controller::builder()
            .store(InMemoryObjectStore::new_arc())
            .secrets(InMemorySecretBackend::new_arc())
            .connector(InMemoryConnector::new_arc())
            .build()
            .unwrap();
        let runner = ReconciliationLoop::new(Arc::new(controller), LoopConfig::default());
        let mut queue = WorkQueue::default();
        let mut running = Running::default();
        let mut retries = JoinSet::new();
        let mut stats = LoopStats::default();

        queue.push(key("a"));
        let claimed = queue.next_ready().unwrap();
        let handle = running
            .tasks
            .spawn(std::future::pending::<Result<PassOutcome>>());
        running.keys.insert(handle.id(), claimed);
        handle.abort();

        let joined = running.tasks.join_next_with_id().await.unwrap();
        assert!(joined.is_err());
        runner.complete(joined, &mut running, &mut queue, &mut retries, &mut stats);

        assert_eq!(queue.in_flight(), 0);
        assert!(running.keys.is_empty());
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.requeues, 1);
        assert_eq!(retries.len(), 1);

        queue.push(key("a"));
        assert_eq!(queue.next_ready(), Some(key("a")));
    }
}
