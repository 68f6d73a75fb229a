//! Remote storage control-plane boundary.
//!
//! Two thin typed APIs mirror the remote service: [`BucketApi`] for bucket
//! lifecycle and policy, [`IdentityApi`] for users and canned policies.
//! A [`StorageConnector`] turns a server descriptor plus admin credentials
//! into a [`ServerConnection`] carrying both.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::{Mutex, RwLock};

use crate::error::Error;
use crate::result::Result;
use crate::types::{Credentials, ServerDescriptor};

/// A user as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Name of the assigned canned policy; empty when none.
    pub policy_name: String,
    pub enabled: bool,
}

/// Bucket operations of the remote service.
#[async_trait]
pub trait BucketApi: Send + Sync {
    async fn exists(&self, bucket: &str) -> Result<bool>;
    async fn create(&self, bucket: &str) -> Result<()>;
    async fn remove(&self, bucket: &str) -> Result<()>;
    async fn get_policy(&self, bucket: &str) -> Result<String>;
    async fn set_policy(&self, bucket: &str, policy: &str) -> Result<()>;
}

/// User and canned-policy operations of the remote service.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Every user keyed by access key.
    async fn list_users(&self) -> Result<HashMap<String, UserInfo>>;
    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<()>;
    async fn remove_user(&self, access_key: &str) -> Result<()>;
    async fn set_user(&self, access_key: &str, secret_key: &str, enabled: bool) -> Result<()>;
    /// Every canned policy keyed by name.
    async fn list_canned_policies(&self) -> Result<HashMap<String, String>>;
    async fn add_canned_policy(&self, name: &str, policy: &str) -> Result<()>;
    async fn remove_canned_policy(&self, name: &str) -> Result<()>;
    async fn set_policy_assignment(&self, policy_name: &str, access_key: &str) -> Result<()>;
}

/// Clients bound to one server.
#[derive(Clone)]
pub struct ServerConnection {
    pub buckets: Arc<dyn BucketApi>,
    pub identity: Arc<dyn IdentityApi>,
}

/// Opens connections to storage servers.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// Build clients for `server` authenticated with `credentials`.
    async fn connect(
        &self,
        server: &ServerDescriptor,
        credentials: &Credentials,
    ) -> Result<ServerConnection>;

    /// Check that `server` answers with `credentials`.
    async fn probe(&self, server: &ServerDescriptor, credentials: &Credentials) -> Result<()>;
}

/// One call received by [`InMemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    BucketExists(String),
    MakeBucket(String),
    RemoveBucket(String),
    GetBucketPolicy(String),
    SetBucketPolicy { bucket: String, policy: String },
    ListUsers,
    AddUser(String),
    RemoveUser(String),
    SetUser { access_key: String, enabled: bool },
    ListCannedPolicies,
    AddCannedPolicy { name: String, policy: String },
    RemoveCannedPolicy(String),
    SetPolicy { policy_name: String, access_key: String },
}

impl RemoteCall {
    /// Operation name, as used for fault injection and error context.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::BucketExists(_) => "BucketExists",
            Self::MakeBucket(_) => "MakeBucket",
            Self::RemoveBucket(_) => "RemoveBucket",
            Self::GetBucketPolicy(_) => "GetBucketPolicy",
            Self::SetBucketPolicy { .. } => "SetBucketPolicy",
            Self::ListUsers => "ListUsers",
            Self::AddUser(_) => "AddUser",
            Self::RemoveUser(_) => "RemoveUser",
            Self::SetUser { .. } => "SetUser",
            Self::ListCannedPolicies => "ListCannedPolicies",
            Self::AddCannedPolicy { .. } => "AddCannedPolicy",
            Self::RemoveCannedPolicy(_) => "RemoveCannedPolicy",
            Self::SetPolicy { .. } => "SetPolicy",
        }
    }

    /// Whether the call changes remote state.
    pub const fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::BucketExists(_)
                | Self::GetBucketPolicy(_)
                | Self::ListUsers
                | Self::ListCannedPolicies
        )
    }
}

#[derive(Debug, Clone, Default)]
struct StoredBucket {
    policy: String,
    objects: usize,
}

#[derive(Debug, Clone)]
struct StoredUser {
    secret_key: String,
    policy_name: String,
    enabled: bool,
}

#[derive(Debug)]
struct StorageState {
    buckets: BTreeMap<String, StoredBucket>,
    users: BTreeMap<String, StoredUser>,
    policies: BTreeMap<String, String>,
    calls: Vec<RemoteCall>,
    failing: BTreeSet<String>,
    reachable: bool,
}

impl Default for StorageState {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            users: BTreeMap::new(),
            policies: BTreeMap::new(),
            calls: Vec::new(),
            failing: BTreeSet::new(),
            reachable: true,
        }
    }
}

impl StorageState {
    /// Journal the call, then fail it if its operation is marked failing.
    fn record(&mut self, call: RemoteCall) -> Result<()> {
        let operation = call.operation();
        self.calls.push(call);
        if self.failing.contains(operation) {
            return Err(Error::remote_call(operation, "injected failure"));
        }
        Ok(())
    }
}

/// In-memory storage service for testing.
///
/// Every call is journaled in order, including failed ones.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<StorageState>,
}

impl InMemoryStorage {
    /// Create a new, empty, reachable storage service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new storage service wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Plant a bucket without journaling a call.
    pub async fn seed_bucket(&self, bucket: &str, policy: &str) {
        self.state.lock().await.buckets.insert(
            bucket.to_string(),
            StoredBucket {
                policy: policy.to_string(),
                objects: 0,
            },
        );
    }

    /// Plant a user without journaling a call.
    pub async fn seed_user(&self, access_key: &str, secret_key: &str, policy_name: &str) {
        self.state.lock().await.users.insert(
            access_key.to_string(),
            StoredUser {
                secret_key: secret_key.to_string(),
                policy_name: policy_name.to_string(),
                enabled: true,
            },
        );
    }

    /// Plant a canned policy without journaling a call.
    pub async fn seed_policy(&self, name: &str, policy: &str) {
        self.state
            .lock()
            .await
            .policies
            .insert(name.to_string(), policy.to_string());
    }

    /// Store an object in `bucket`, making it non-empty.
    pub async fn put_object(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::remote_call("PutObject", format!("bucket {bucket} does not exist")))?;
        stored.objects = stored.objects.saturating_add(1);
        Ok(())
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.lock().await.buckets.contains_key(bucket)
    }

    pub async fn bucket_policy(&self, bucket: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .buckets
            .get(bucket)
            .map(|b| b.policy.clone())
    }

    pub async fn user_info(&self, access_key: &str) -> Option<UserInfo> {
        self.state.lock().await.users.get(access_key).map(|u| UserInfo {
            policy_name: u.policy_name.clone(),
            enabled: u.enabled,
        })
    }

    pub async fn user_secret(&self, access_key: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .users
            .get(access_key)
            .map(|u| u.secret_key.clone())
    }

    pub async fn canned_policy(&self, name: &str) -> Option<String> {
        self.state.lock().await.policies.get(name).cloned()
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().await.calls.clone()
    }

    /// Only the calls that change remote state.
    pub async fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect_vec()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make every call of `operation` fail until cleared.
    pub async fn fail_operation(&self, operation: &str) {
        self.state.lock().await.failing.insert(operation.to_string());
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }

    async fn is_reachable(&self) -> bool {
        self.state.lock().await.reachable
    }
}

#[async_trait]
impl BucketApi for InMemoryStorage {
    async fn exists(&self, bucket: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::BucketExists(bucket.to_string()))?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::MakeBucket(bucket.to_string()))?;
        if state.buckets.contains_key(bucket) {
            return Err(Error::remote_call(
                "MakeBucket",
                format!("bucket {bucket} already exists"),
            ));
        }
        state
            .buckets
            .insert(bucket.to_string(), StoredBucket::default());
        Ok(())
    }

    async fn remove(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::RemoveBucket(bucket.to_string()))?;
        match state.buckets.get(bucket) {
            None => Err(Error::remote_call(
                "RemoveBucket",
                format!("bucket {bucket} does not exist"),
            )),
            Some(stored) if stored.objects > 0 => Err(Error::remote_call(
                "RemoveBucket",
                format!("bucket {bucket} is not empty"),
            )),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn get_policy(&self, bucket: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::GetBucketPolicy(bucket.to_string()))?;
        state
            .buckets
            .get(bucket)
            .map(|b| b.policy.clone())
            .ok_or_else(|| {
                Error::remote_call("GetBucketPolicy", format!("bucket {bucket} does not exist"))
            })
    }

    async fn set_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::SetBucketPolicy {
            bucket: bucket.to_string(),
            policy: policy.to_string(),
        })?;
        let stored = state.buckets.get_mut(bucket).ok_or_else(|| {
            Error::remote_call("SetBucketPolicy", format!("bucket {bucket} does not exist"))
        })?;
        stored.policy = policy.to_string();
        Ok(())
    }
}

#[async_trait]
impl IdentityApi for InMemoryStorage {
    async fn list_users(&self) -> Result<HashMap<String, UserInfo>> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::ListUsers)?;
        Ok(state
            .users
            .iter()
            .map(|(access_key, user)| {
                (
                    access_key.clone(),
                    UserInfo {
                        policy_name: user.policy_name.clone(),
                        enabled: user.enabled,
                    },
                )
            })
            .collect())
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::AddUser(access_key.to_string()))?;
        let policy_name = state
            .users
            .get(access_key)
            .map(|u| u.policy_name.clone())
            .unwrap_or_default();
        state.users.insert(
            access_key.to_string(),
            StoredUser {
                secret_key: secret_key.to_string(),
                policy_name,
                enabled: true,
            },
        );
        Ok(())
    }

    async fn remove_user(&self, access_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::RemoveUser(access_key.to_string()))?;
        state
            .users
            .remove(access_key)
            .map(|_| ())
            .ok_or_else(|| Error::remote_call("RemoveUser", format!("user {access_key} does not exist")))
    }

    async fn set_user(&self, access_key: &str, secret_key: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::SetUser {
            access_key: access_key.to_string(),
            enabled,
        })?;
        let user = state.users.get_mut(access_key).ok_or_else(|| {
            Error::remote_call("SetUser", format!("user {access_key} does not exist"))
        })?;
        user.secret_key = secret_key.to_string();
        user.enabled = enabled;
        Ok(())
    }

    async fn list_canned_policies(&self) -> Result<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::ListCannedPolicies)?;
        Ok(state
            .policies
            .iter()
            .map(|(name, policy)| (name.clone(), policy.clone()))
            .collect())
    }

    async fn add_canned_policy(&self, name: &str, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::AddCannedPolicy {
            name: name.to_string(),
            policy: policy.to_string(),
        })?;
        state.policies.insert(name.to_string(), policy.to_string());
        Ok(())
    }

    async fn remove_canned_policy(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::RemoveCannedPolicy(name.to_string()))?;
        state
            .policies
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| {
                Error::remote_call("RemoveCannedPolicy", format!("policy {name} does not exist"))
            })
    }

    async fn set_policy_assignment(&self, policy_name: &str, access_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(RemoteCall::SetPolicy {
            policy_name: policy_name.to_string(),
            access_key: access_key.to_string(),
        })?;
        if !state.policies.contains_key(policy_name) {
            return Err(Error::remote_call(
                "SetPolicy",
                format!("policy {policy_name} does not exist"),
            ));
        }
        let user = state.users.get_mut(access_key).ok_or_else(|| {
            Error::remote_call("SetPolicy", format!("user {access_key} does not exist"))
        })?;
        user.policy_name = policy_name.to_string();
        Ok(())
    }
}

/// Connector resolving endpoints to in-memory storages.
#[derive(Default)]
pub struct InMemoryConnector {
    storages: RwLock<BTreeMap<String, Arc<InMemoryStorage>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Serve `storage` at `endpoint` (`hostname:port`).
    pub async fn register(&self, endpoint: impl Into<String>, storage: Arc<InMemoryStorage>) {
        self.storages.write().await.insert(endpoint.into(), storage);
    }

    async fn lookup(&self, server: &ServerDescriptor) -> Result<Arc<InMemoryStorage>> {
        let endpoint = server.endpoint();
        self.storages
            .read()
            .await
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| Error::remote_call("connect", format!("no route to {endpoint}")))
    }
}

#[async_trait]
impl StorageConnector for InMemoryConnector {
    async fn connect(
        &self,
        server: &ServerDescriptor,
        _credentials: &Credentials,
    ) -> Result<ServerConnection> {
        let storage = self.lookup(server).await?;
        Ok(ServerConnection {
            buckets: storage.clone(),
            identity: storage,
        })
    }

    async fn probe(&self, server: &ServerDescriptor, _credentials: &Credentials) -> Result<()> {
        let storage = self.lookup(server).await?;
        if storage.is_reachable().await {
            Ok(())
        } else {
            Err(Error::remote_call(
                "probe",
                format!("{} is not answering", server.endpoint()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_bucket_lifecycle_is_journaled() {
        let storage = InMemoryStorage::new();
        assert!(!storage.exists("photos").await.unwrap());
        storage.create("photos").await.unwrap();
        storage.set_policy("photos", "public-read").await.unwrap();

        assert_eq!(storage.get_policy("photos").await.unwrap(), "public-read");
        assert_eq!(
            storage.mutating_calls().await,
            vec![
                RemoteCall::MakeBucket("photos".into()),
                RemoteCall::SetBucketPolicy {
                    bucket: "photos".into(),
                    policy: "public-read".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_non_empty_bucket_cannot_be_removed() {
        let storage = InMemoryStorage::new();
        storage.seed_bucket("logs", "").await;
        storage.put_object("logs").await.unwrap();

        let err = storage.remove("logs").await.unwrap_err();
        assert!(err.to_string().contains("not empty"));
        assert!(storage.bucket_exists("logs").await);
    }

    #[tokio::test]
    async fn test_removing_absent_entities_is_a_remote_error() {
        let storage = InMemoryStorage::new();

        assert!(storage.remove("ghost").await.is_err());
        assert!(storage.remove_user("AKGHOST").await.is_err());
        assert!(storage.remove_canned_policy("_generator_AKGHOST").await.is_err());
        assert_eq!(storage.mutating_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_policy_assignment_requires_policy_and_user() {
        let storage = InMemoryStorage::new();
        assert!(storage.set_policy_assignment("p", "AK").await.is_err());

        storage.seed_policy("p", "{}").await;
        storage.seed_user("AK", "SK", "").await;
        storage.set_policy_assignment("p", "AK").await.unwrap();
        assert_eq!(storage.user_info("AK").await.unwrap().policy_name, "p");
    }

    #[tokio::test]
    async fn test_injected_failure_names_operation() {
        let storage = InMemoryStorage::new();
        storage.fail_operation("ListUsers").await;
        let err = storage.list_users().await.unwrap_err();
        assert!(err.to_string().contains("ListUsers"));
    }

    #[tokio::test]
    async fn test_connector_routes_by_endpoint() {
        let connector = InMemoryConnector::new();
        let storage = InMemoryStorage::new_arc();
        connector.register("minio.local:9000", storage.clone()).await;

        let server = ServerDescriptor {
            name: "s1".into(),
            hostname: "minio.local".into(),
            port: 9000,
            tls: false,
        };
        let creds = Credentials::new("admin", "password");
        assert!(connector.connect(&server, &creds).await.is_ok());
        assert!(connector.probe(&server, &creds).await.is_ok());

        storage.set_reachable(false).await;
        assert!(connector.probe(&server, &creds).await.is_err());

        let elsewhere = ServerDescriptor {
            port: 9001,
            ..server
        };
        assert!(connector.connect(&elsewhere, &creds).await.is_err());
    }
}
