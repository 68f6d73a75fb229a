//! Managed object envelope and per-kind specs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Server,
    Bucket,
    User,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Server => "Server",
            Self::Bucket => "Bucket",
            Self::User => "User",
        };
        f.write_str(name)
    }
}

/// Identity of a managed object: unique per (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key for a cluster-scoped object.
    pub fn cluster(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Key for a namespaced object.
    pub fn namespaced(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Weak reference to another object by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: Kind,
    pub name: String,
}

impl ObjectRef {
    /// Reference to a server by name.
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Server,
            name: name.into(),
        }
    }
}

/// Connection settings of a storage server as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

/// Desired bucket on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub server: String,
    pub bucket_name: String,
    /// Opaque policy document, compared byte for byte. Empty means default.
    #[serde(default)]
    pub policy: String,
}

/// Desired user on a server; the principal is the object name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub server: String,
    /// Canned policy document. Empty means no policy.
    #[serde(default)]
    pub policy: String,
}

/// Spec of a managed object; the object's kind follows from the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceSpec {
    Server(ServerSpec),
    Bucket(BucketSpec),
    User(UserSpec),
}

impl ResourceSpec {
    /// Kind of this spec.
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Server(_) => Kind::Server,
            Self::Bucket(_) => Kind::Bucket,
            Self::User(_) => Kind::User,
        }
    }
}

/// Observed state written only by the convergence driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    /// Generation of the spec the last successful pass converged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<u64>,
    /// Server reachability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

/// Object metadata maintained by the declarer and the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ObjectRef>,
    /// Bumped by the declarer on every spec change.
    #[serde(default)]
    pub generation: u64,
    /// Optimistic concurrency token, bumped on every persisted write.
    #[serde(default)]
    pub resource_version: u64,
}

/// Where an object stands relative to one finalizer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not deleting, token not yet recorded.
    Unmanaged,
    /// Not deleting, token recorded; remote state is re-evaluated each pass.
    Managed,
    /// Deleting with the token still recorded; cleanup pending.
    Finalizing,
    /// Deleting and the token is gone; nothing left to do.
    Released,
}

/// Desired-state record for one external resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub meta: ObjectMeta,
    pub spec: ResourceSpec,
    #[serde(default)]
    pub status: ObjectStatus,
}

impl ManagedObject {
    /// A fresh cluster-scoped object at generation 1.
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            meta: ObjectMeta {
                name: name.into(),
                namespace: None,
                finalizers: BTreeSet::new(),
                deletion_requested: false,
                owner: None,
                generation: 1,
                resource_version: 0,
            },
            spec,
            status: ObjectStatus::default(),
        }
    }

    /// Place the object in a namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.meta.namespace = Some(namespace.into());
        self
    }

    pub const fn kind(&self) -> Kind {
        self.spec.kind()
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            namespace: self.meta.namespace.clone(),
            name: self.meta.name.clone(),
        }
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.meta.finalizers.contains(token)
    }

    /// Record a finalizer token. Returns whether the set changed.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        self.meta.finalizers.insert(token.to_string())
    }

    /// Drop a finalizer token. Returns whether the set changed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        self.meta.finalizers.remove(token)
    }

    /// Classify the object relative to `token`.
    pub fn lifecycle(&self, token: &str) -> Lifecycle {
        match (self.meta.deletion_requested, self.has_finalizer(token)) {
            (false, false) => Lifecycle::Unmanaged,
            (false, true) => Lifecycle::Managed,
            (true, true) => Lifecycle::Finalizing,
            (true, false) => Lifecycle::Released,
        }
    }
}

/// Cached connection descriptor of a known server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerDescriptor {
    /// Descriptor for the server declared as `name`.
    pub fn from_spec(name: impl Into<String>, spec: &ServerSpec) -> Self {
        Self {
            name: name.into(),
            hostname: spec.hostname.clone(),
            port: spec.port,
            tls: spec.tls,
        }
    }

    /// `hostname:port`, the form storage clients dial.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Access credentials of a principal. The secret key never appears in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
