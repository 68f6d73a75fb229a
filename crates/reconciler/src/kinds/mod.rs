//! Per-kind reconcilers.

use std::sync::Arc;

use bucketeer_core::{Error, Kind, Result, ServerConnection, StorageConnector};
use tracing::debug;

use crate::credentials::CredentialResolver;
use crate::registry::ServerRegistry;

pub mod bucket;
pub mod server;
pub mod user;

pub use bucket::{BucketAction, BucketObservation, BucketReconciler};
pub use server::{ServerAction, ServerDeps, ServerObservation, ServerReconciler};
pub use user::{UserAction, UserDeps, UserObservation, UserReconciler, generated_policy_name};

/// Finalizer token of server objects.
pub const SERVER_FINALIZER: &str = "finalizer.server.minio.walkbase.com";
/// Finalizer token of bucket objects.
pub const BUCKET_FINALIZER: &str = "finalizer.bucket.minio.walkbase.com";
/// Finalizer token of user objects.
pub const USER_FINALIZER: &str = "finalizer.user.minio.walkbase.com";

/// Collaborators shared by every kind that talks to a storage server.
#[derive(Clone)]
pub struct ServerAccess {
    pub registry: Arc<ServerRegistry>,
    pub credentials: Arc<CredentialResolver>,
    pub connector: Arc<dyn StorageConnector>,
}

impl ServerAccess {
    pub fn new(
        registry: Arc<ServerRegistry>,
        credentials: Arc<CredentialResolver>,
        connector: Arc<dyn StorageConnector>,
    ) -> Self {
        Self {
            registry,
            credentials,
            connector,
        }
    }

    /// Open an administrative connection to the server named `server`.
    ///
    /// # Errors
    ///
    /// `DependencyUnresolved` until the server has been observed, otherwise
    /// whatever credential lookup or connecting reports.
    pub async fn connect(&self, server: &str) -> Result<ServerConnection> {
        let descriptor = self
            .registry
            .get(server)
            .ok_or_else(|| Error::dependency_unresolved(Kind::Server, server))?;
        let credentials = self.credentials.server_credentials(server).await?;
        debug!(server, endpoint = %descriptor.endpoint(), "Connecting");
        self.connector.connect(&descriptor, &credentials).await
    }
}
