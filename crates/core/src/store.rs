//! Declarative object store boundary and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::{RwLock, broadcast};

use crate::error::Error;
use crate::result::Result;
use crate::types::{ManagedObject, ObjectKey, ResourceSpec};

const WATCH_CAPACITY: usize = 256;

/// A change notification from the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The object with this identity was written or removed.
    Changed(ObjectKey),
    /// Notifications were dropped; the consumer must relist everything.
    Resync,
}

/// Stream of change notifications.
pub struct Watch {
    receiver: broadcast::Receiver<ObjectKey>,
}

impl Watch {
    pub const fn new(receiver: broadcast::Receiver<ObjectKey>) -> Self {
        Self { receiver }
    }

    /// Next notification, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(key) => Some(Notification::Changed(key)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Watch lagged, requesting resync");
                Some(Notification::Resync)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Versioned key-value store of managed objects with optimistic concurrency.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `None` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>>;

    /// Persist metadata and status of an object.
    ///
    /// # Errors
    ///
    /// `Conflict` when `object.meta.resource_version` is stale, `NotFound`
    /// when the object no longer exists.
    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject>;

    /// Identities of every stored object.
    async fn list(&self) -> Result<Vec<ObjectKey>>;

    /// Subscribe to change notifications.
    fn watch(&self) -> Watch;
}

/// In-memory object store for testing and local runs.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, ManagedObject>>,
    notifier: broadcast::Sender<ObjectKey>,
    failing_updates: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store.
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            notifier,
            failing_updates: AtomicUsize::new(0),
        }
    }

    /// Create a new in-memory object store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Declarer-side create-or-update of the desired spec.
    ///
    /// The generation only moves when the spec actually changes.
    pub async fn apply(&self, key: &ObjectKey, spec: ResourceSpec) -> Result<ManagedObject> {
        if spec.kind() != key.kind {
            return Err(Error::invalid_object(
                key,
                format!("spec of kind {} submitted", spec.kind()),
            ));
        }

        let stored = {
            let mut objects = self.objects.write().await;
            let object = match objects.get(key) {
                Some(existing) if existing.spec == spec => existing.clone(),
                Some(existing) => {
                    let mut next = existing.clone();
                    next.spec = spec;
                    next.meta.generation = next.meta.generation.saturating_add(1);
                    next.meta.resource_version = next.meta.resource_version.saturating_add(1);
                    next
                }
                None => {
                    let mut created = ManagedObject::new(key.name.clone(), spec);
                    created.meta.namespace.clone_from(&key.namespace);
                    created.meta.resource_version = 1;
                    created
                }
            };
            objects.insert(key.clone(), object.clone());
            object
        };

        self.notify(key);
        Ok(stored)
    }

    /// Declarer-side deletion request.
    ///
    /// Objects without finalizers disappear immediately; the rest stay until
    /// their finalizers are released.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        {
            let mut objects = self.objects.write().await;
            let Some(object) = objects.get_mut(key) else {
                return Err(Error::not_found(key.kind, key.name.clone()));
            };
            object.meta.deletion_requested = true;
            object.meta.resource_version = object.meta.resource_version.saturating_add(1);
            if object.meta.finalizers.is_empty() {
                objects.remove(key);
            }
        }

        self.notify(key);
        Ok(())
    }

    /// Seed a raw object snapshot as-is.
    pub async fn insert(&self, object: ManagedObject) {
        let key = object.key();
        self.objects.write().await.insert(key.clone(), object);
        self.notify(&key);
    }

    /// Make the next `count` updates fail with a conflict without persisting.
    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn notify(&self, key: &ObjectKey) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.notifier.send(key.clone());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject> {
        let key = object.key();

        if self.take_injected_failure() {
            return Err(Error::conflict(&key, "injected update failure"));
        }

        let persisted = {
            let mut objects = self.objects.write().await;
            let Some(current) = objects.get(&key) else {
                return Err(Error::not_found(key.kind, key.name.clone()));
            };

            if current.meta.resource_version != object.meta.resource_version {
                return Err(Error::conflict(
                    &key,
                    format!(
                        "resource version {} is stale, current is {}",
                        object.meta.resource_version, current.meta.resource_version
                    ),
                ));
            }

            let mut next = object.clone();
            // Spec and generation belong to the declarer.
            next.spec = current.spec.clone();
            next.meta.generation = current.meta.generation;
            next.meta.deletion_requested = current.meta.deletion_requested;
            next.meta.resource_version = current.meta.resource_version.saturating_add(1);

            if next.meta.deletion_requested && next.meta.finalizers.is_empty() {
                tracing::debug!(key = %key, "Last finalizer released, removing object");
                objects.remove(&key);
            } else {
                objects.insert(key.clone(), next.clone());
            }
            next
        };

        self.notify(&key);
        Ok(persisted)
    }

    async fn list(&self) -> Result<Vec<ObjectKey>> {
        Ok(self.objects.read().await.keys().cloned().collect_vec())
    }

    fn watch(&self) -> Watch {
        Watch::new(self.notifier.subscribe())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::{Kind, ServerSpec};

    fn server_spec(port: u16) -> ResourceSpec {
        ResourceSpec::Server(ServerSpec {
            hostname: "minio.local".into(),
            port,
            tls: false,
        })
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_only_on_change() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Server, "s1");

        let first = store.apply(&key, server_spec(9000)).await.unwrap();
        let same = store.apply(&key, server_spec(9000)).await.unwrap();
        let changed = store.apply(&key, server_spec(9001)).await.unwrap();

        assert_eq!(first.meta.generation, 1);
        assert_eq!(same.meta.generation, 1);
        assert_eq!(changed.meta.generation, 2);
    }

    #[tokio::test]
    async fn test_apply_rejects_mismatched_kind() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Bucket, "photos");
        assert!(store.apply(&key, server_spec(9000)).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Server, "s1");
        let object = store.apply(&key, server_spec(9000)).await.unwrap();

        let mut first = object.clone();
        first.add_finalizer("f");
        store.update(&first).await.unwrap();

        let err = store.update(&object).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Server, "s1");
        let mut object = store.apply(&key, server_spec(9000)).await.unwrap();
        object.add_finalizer("f");
        store.update(&object).await.unwrap();

        store.request_deletion(&key).await.unwrap();
        let mut pending = store.get(&key).await.unwrap().unwrap();
        assert!(pending.meta.deletion_requested);

        pending.remove_finalizer("f");
        store.update(&pending).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizers_is_immediate() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Server, "s1");
        store.apply(&key, server_spec(9000)).await.unwrap();

        store.request_deletion(&key).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_injected_failures_do_not_persist() {
        let store = InMemoryObjectStore::new();
        let key = ObjectKey::cluster(Kind::Server, "s1");
        let mut object = store.apply(&key, server_spec(9000)).await.unwrap();
        object.add_finalizer("f");

        store.fail_next_updates(1);
        assert!(store.update(&object).await.is_err());
        assert!(!store.get(&key).await.unwrap().unwrap().has_finalizer("f"));

        assert!(store.update(&object).await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_sees_writes() {
        let store = InMemoryObjectStore::new();
        let mut watch = store.watch();
        let key = ObjectKey::cluster(Kind::Server, "s1");
        store.apply(&key, server_spec(9000)).await.unwrap();

        assert_eq!(watch.next().await, Some(Notification::Changed(key)));
    }
}
