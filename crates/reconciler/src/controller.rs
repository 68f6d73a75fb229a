//! Kind dispatch and assembly.

use std::sync::Arc;

use bucketeer_core::{Kind, ObjectKey, ObjectStore, SecretBackend, StorageConnector};
use tracing::info;

use crate::config::ReconcilerConfig;
use crate::credentials::CredentialResolver;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::kinds::{BucketReconciler, ServerAccess, ServerReconciler, UserReconciler};
use crate::registry::ServerRegistry;
use crate::types::PassOutcome;

/// Routes each object identity to the driver of its kind.
pub struct Controller {
    store: Arc<dyn ObjectStore>,
    registry: Arc<ServerRegistry>,
    credentials: Arc<CredentialResolver>,
    config: ReconcilerConfig,
    servers: Driver<ServerReconciler>,
    buckets: Driver<BucketReconciler>,
    users: Driver<UserReconciler>,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Run one convergence pass for `key`.
    ///
    /// # Errors
    ///
    /// The pass error of the kind's driver.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PassOutcome> {
        match key.kind {
            Kind::Server => self.servers.reconcile(key).await,
            Kind::Bucket => self.buckets.reconcile(key).await,
            Kind::User => self.users.reconcile(key).await,
        }
    }

    /// Readiness of the secret backend.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports.
    pub async fn health(&self) -> Result<()> {
        self.credentials.health().await
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for [`Controller`].
#[derive(Default)]
pub struct ControllerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    secrets: Option<Arc<dyn SecretBackend>>,
    connector: Option<Arc<dyn StorageConnector>>,
    registry: Option<Arc<ServerRegistry>>,
    config: ReconcilerConfig,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn secrets(mut self, secrets: Arc<dyn SecretBackend>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn StorageConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Share an existing registry instead of starting empty.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ServerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the controller.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a collaborator is missing or the configuration
    /// does not validate.
    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("an object store is required"))?;
        let secrets = self
            .secrets
            .ok_or_else(|| Error::invalid_config("a secret backend is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::invalid_config("a storage connector is required"))?;
        let registry = self.registry.unwrap_or_default();

        let credentials = Arc::new(CredentialResolver::new(
            secrets,
            self.config.secret_paths(),
        ));
        let access = ServerAccess::new(Arc::clone(&registry), Arc::clone(&credentials), connector);

        info!(
            secret_mount = self.config.secret_mount.as_str(),
            workers = self.config.workers,
            "Controller assembled"
        );

        Ok(Controller {
            servers: Driver::new(Arc::clone(&store), ServerReconciler::new(access.clone())),
            buckets: Driver::new(Arc::clone(&store), BucketReconciler::new(access.clone())),
            users: Driver::new(Arc::clone(&store), UserReconciler::new(access)),
            store,
            registry,
            credentials,
            config: self.config,
        })
    }
}
