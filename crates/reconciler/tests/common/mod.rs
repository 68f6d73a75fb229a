//! Shared fixtures: one in-memory storage server `s1` wired into a controller.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;

use bucketeer_core::{
    BucketSpec, InMemoryConnector, InMemoryObjectStore, InMemorySecretBackend, InMemoryStorage,
    Kind, ManagedObject, ObjectKey, ObjectStore, ResourceSpec, ServerSpec, UserSpec,
};
use bucketeer_reconciler::{Controller, PassOutcome, ReconcilerConfig, Result};

pub const SERVER: &str = "s1";
pub const ENDPOINT: &str = "minio.local:9000";

/// Route pass logs to the test writer; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unwrap a Result or panic with context.
pub fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{context}: {e}"),
    }
}

/// Unwrap an Option or panic with context.
pub fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{context}"),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryObjectStore>,
    pub secrets: Arc<InMemorySecretBackend>,
    pub storage: Arc<InMemoryStorage>,
    pub controller: Arc<Controller>,
}

impl Harness {
    /// Storage served at [`ENDPOINT`] with admin credentials provisioned,
    /// but no server object declared yet.
    pub async fn new() -> Self {
        Self::with_config(ReconcilerConfig::default()).await
    }

    pub async fn with_config(config: ReconcilerConfig) -> Self {
        init_tracing();
        let store = InMemoryObjectStore::new_arc();
        let secrets = InMemorySecretBackend::new_arc();
        let storage = InMemoryStorage::new_arc();
        let connector = InMemoryConnector::new_arc();
        connector.register(ENDPOINT, Arc::clone(&storage)).await;
        secrets
            .put_credentials("minio/data/servers/s1", "admin", "password")
            .await;

        let controller = unwrap_result(
            Controller::builder()
                .store(store.clone())
                .secrets(secrets.clone())
                .connector(connector)
                .config(config)
                .build(),
            "controller should build",
        );

        Self {
            store,
            secrets,
            storage,
            controller: Arc::new(controller),
        }
    }

    /// Declare server `s1` and converge it into the registry.
    pub async fn with_server() -> Self {
        let harness = Self::new().await;
        harness.declare_server(9000).await;
        unwrap_result(
            harness.reconcile(&server_key()).await,
            "server pass should succeed",
        );
        harness
    }

    pub async fn declare_server(&self, port: u16) -> ManagedObject {
        unwrap_result(
            self.store
                .apply(
                    &server_key(),
                    ResourceSpec::Server(ServerSpec {
                        hostname: "minio.local".into(),
                        port,
                        tls: false,
                    }),
                )
                .await,
            "server spec should apply",
        )
    }

    pub async fn declare_bucket(&self, name: &str, policy: &str) -> ObjectKey {
        let key = bucket_key(name);
        unwrap_result(
            self.store
                .apply(
                    &key,
                    ResourceSpec::Bucket(BucketSpec {
                        server: SERVER.into(),
                        bucket_name: name.into(),
                        policy: policy.into(),
                    }),
                )
                .await,
            "bucket spec should apply",
        );
        key
    }

    pub async fn declare_user(&self, name: &str, policy: &str) -> ObjectKey {
        let key = user_key(name);
        unwrap_result(
            self.store
                .apply(
                    &key,
                    ResourceSpec::User(UserSpec {
                        server: SERVER.into(),
                        policy: policy.into(),
                    }),
                )
                .await,
            "user spec should apply",
        );
        key
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PassOutcome> {
        self.controller.reconcile(key).await
    }

    pub async fn object(&self, key: &ObjectKey) -> Option<ManagedObject> {
        unwrap_result(self.store.get(key).await, "store get should succeed")
    }
}

pub fn server_key() -> ObjectKey {
    ObjectKey::cluster(Kind::Server, SERVER)
}

pub fn bucket_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(Kind::Bucket, "media", name)
}

pub fn user_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(Kind::User, "team", name)
}
