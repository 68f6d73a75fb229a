//! Work Loop Behavioral Tests - BDD Style
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod common;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bucketeer_core::{
    InMemoryConnector, InMemoryObjectStore, InMemorySecretBackend, Kind, ManagedObject,
    ObjectKey, ObjectStore, ResourceSpec, Result, ServerSpec, Watch,
};
use bucketeer_reconciler::{Controller, LoopConfig, ReconciliationLoop};
use common::{Harness, server_key, unwrap_result};
use tokio::time::{sleep, timeout};

fn fast_config() -> LoopConfig {
    LoopConfig {
        workers: 2,
        pass_timeout: Duration::from_secs(5),
        requeue_base: Duration::from_millis(10),
        requeue_max: Duration::from_millis(50),
    }
}

/// Poll `check` until it holds or about five seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Object store whose reads take longer than any sane pass deadline.
struct SlowStore {
    inner: Arc<InMemoryObjectStore>,
    delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject> {
        self.inner.update(object).await
    }

    async fn list(&self) -> Result<Vec<ObjectKey>> {
        self.inner.list().await
    }

    fn watch(&self) -> Watch {
        self.inner.watch()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_declared_objects_when_loop_runs_then_all_kinds_converge() {
    // GIVEN: A server, a bucket and a user declared before the loop starts
    let harness = Harness::new().await;
    harness.declare_server(9000).await;
    let bucket = harness.declare_bucket("photos", "public-read").await;
    let user = harness.declare_user("alice", "{}").await;

    // WHEN: The loop runs
    let runner = ReconciliationLoop::new(Arc::clone(&harness.controller), fast_config());
    let stopper = runner.stopper();
    let handle = tokio::spawn(runner.run());

    // THEN: Bucket and user converge even if they were tried before the server
    let (h, bucket, user) = (&harness, &bucket, &user);
    assert!(eventually(|| async move { h.storage.bucket_exists("photos").await }).await);
    assert!(
        eventually(|| async move {
            h.object(user)
                .await
                .is_some_and(|o| o.status.observed_generation == Some(1))
        })
        .await
    );
    assert!(
        eventually(|| async move {
            h.object(bucket)
                .await
                .is_some_and(|o| o.status.observed_generation == Some(1))
        })
        .await
    );

    stopper.stop();
    let stats = unwrap_result(
        unwrap_result(timeout(Duration::from_secs(5), handle).await, "loop stops"),
        "loop task joins",
    );
    assert!(stats.passes >= 3);
    assert!(stats.requeues <= stats.failures);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_running_loop_when_deletion_requested_then_object_finalized() {
    // GIVEN: A converged bucket under a running loop
    let harness = Harness::with_server().await;
    let key = harness.declare_bucket("photos", "").await;
    let runner = ReconciliationLoop::new(Arc::clone(&harness.controller), fast_config());
    let stopper = runner.stopper();
    let handle = tokio::spawn(runner.run());
    let (h, key) = (&harness, &key);
    assert!(eventually(|| async move { h.storage.bucket_exists("photos").await }).await);

    // WHEN: Deletion is requested
    unwrap_result(harness.store.request_deletion(key).await, "request deletion");

    // THEN: The notification drives cleanup and the object disappears
    assert!(eventually(|| async move { h.object(key).await.is_none() }).await);
    assert!(!harness.storage.bucket_exists("photos").await);

    stopper.stop();
    assert!(timeout(Duration::from_secs(5), handle).await.is_ok());
}

#[tokio::test]
async fn given_stopper_when_stopped_before_run_then_run_returns_immediately() {
    let harness = Harness::new().await;
    let runner = ReconciliationLoop::new(Arc::clone(&harness.controller), fast_config());
    let stopper = runner.stopper();

    stopper.stop();
    let stats = unwrap_result(
        timeout(Duration::from_secs(1), runner.run()).await,
        "stopped loop returns",
    );

    assert!(stopper.is_stopped());
    assert_eq!(stats.passes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_slow_store_when_pass_exceeds_deadline_then_failure_counted_and_requeued() {
    // GIVEN: Every read takes longer than the pass deadline
    let inner = InMemoryObjectStore::new_arc();
    unwrap_result(
        inner
            .apply(
                &ObjectKey::cluster(Kind::Server, "s1"),
                ResourceSpec::Server(ServerSpec {
                    hostname: "minio.local".into(),
                    port: 9000,
                    tls: false,
                }),
            )
            .await,
        "server spec applies",
    );
    let store = Arc::new(SlowStore {
        inner: Arc::clone(&inner),
        delay: Duration::from_millis(200),
    });
    let controller = unwrap_result(
        Controller::builder()
            .store(store)
            .secrets(InMemorySecretBackend::new_arc())
            .connector(InMemoryConnector::new_arc())
            .build(),
        "controller builds",
    );
    let config = LoopConfig {
        pass_timeout: Duration::from_millis(20),
        ..fast_config()
    };

    // WHEN: The loop runs for a while
    let runner = ReconciliationLoop::new(Arc::new(controller), config);
    let stopper = runner.stopper();
    let handle = tokio::spawn(runner.run());
    sleep(Duration::from_millis(300)).await;
    stopper.stop();

    // THEN: Passes were abandoned at the deadline and retried
    let stats = unwrap_result(
        unwrap_result(timeout(Duration::from_secs(5), handle).await, "loop stops"),
        "loop task joins",
    );
    assert_eq!(stats.passes, 0);
    assert!(stats.failures >= 2);
    assert!(stats.requeues >= 2);
    let object = unwrap_result(inner.get(&server_key()).await, "store get");
    assert!(object.is_some_and(|o| o.meta.finalizers.is_empty()));
}
