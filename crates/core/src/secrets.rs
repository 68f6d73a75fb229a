//! Secret backend boundary.
//!
//! Credentials live exclusively in the secret backend, at paths laid out by
//! [`SecretPaths`]. The in-memory backend mirrors a KV store closely enough
//! for tests: payloads are loose JSON maps, so malformed secrets can be
//! planted and detected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::result::Result;

/// Raw secret payload as stored by the backend.
pub type SecretData = serde_json::Map<String, serde_json::Value>;

/// Read/write access to stored secrets.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Read the secret at `path`; `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<SecretData>>;

    /// Write (create or replace) the secret at `path`.
    async fn write(&self, path: &str, data: SecretData) -> Result<()>;

    /// Check that the backend is reachable and unsealed.
    async fn health(&self) -> Result<()>;
}

/// Path layout of credentials inside the secret backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPaths {
    mount: String,
}

impl Default for SecretPaths {
    fn default() -> Self {
        Self::new("minio")
    }
}

impl SecretPaths {
    /// Layout under `mount`; any trailing slashes are ignored.
    pub fn new(mount: impl AsRef<str>) -> Self {
        Self {
            mount: mount.as_ref().trim_end_matches('/').to_string(),
        }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Path holding a user principal's credentials.
    pub fn user(&self, principal: &str) -> String {
        format!("{}/data/users/{principal}", self.mount)
    }

    /// Path holding a server's administrative credentials.
    pub fn server(&self, server: &str) -> String {
        format!("{}/data/servers/{server}", self.mount)
    }
}

/// In-memory secret backend for testing.
#[derive(Default)]
pub struct InMemorySecretBackend {
    secrets: RwLock<BTreeMap<String, SecretData>>,
    writes: RwLock<Vec<String>>,
    unavailable: AtomicBool,
}

impl InMemorySecretBackend {
    /// Create a new in-memory secret backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory secret backend wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store a well-formed credential payload.
    pub async fn put_credentials(&self, path: &str, access_key: &str, secret_key: &str) {
        let mut data = SecretData::new();
        data.insert("accessKey".into(), access_key.into());
        data.insert("secretKey".into(), secret_key.into());
        self.put_raw(path, data).await;
    }

    /// Store an arbitrary payload, bypassing the write journal.
    pub async fn put_raw(&self, path: &str, data: SecretData) {
        self.secrets.write().await.insert(path.to_string(), data);
    }

    /// Paths written through [`SecretBackend::write`], in order.
    pub async fn writes(&self) -> Vec<String> {
        self.writes.read().await.clone()
    }

    /// Peek at a stored payload.
    pub async fn get_raw(&self, path: &str) -> Option<SecretData> {
        self.secrets.read().await.get(path).cloned()
    }

    /// Make every call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, operation: &str, path: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::secret_backend(operation, path, "backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for InMemorySecretBackend {
    async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        self.check_available("read", path)?;
        Ok(self.secrets.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<()> {
        self.check_available("write", path)?;
        self.secrets.write().await.insert(path.to_string(), data);
        self.writes.write().await.push(path.to_string());
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.check_available("health", "sys/health")
    }
}
