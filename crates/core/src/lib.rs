//! Core types, errors, and collaborator boundaries for bucketeer.
//!
//! bucketeer keeps object-storage resources (servers, buckets, users and
//! their policies) converged with declared desired state. This crate holds
//! everything the reconciliation engine talks to but does not own:
//!
//! - **Model**: [`ManagedObject`] envelopes and per-kind specs
//! - **Object store**: versioned desired/observed state with change notifications
//! - **Secret backend**: where credentials live
//! - **Storage control-plane**: bucket, user and canned-policy administration
//!
//! Each boundary is an async trait with an in-memory implementation for tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod result;
pub mod secrets;
pub mod storage;
pub mod store;
pub mod types;

pub use error::{Error, ErrorCategory, PassPhase};
pub use result::{Result, ResultExt};
pub use secrets::{InMemorySecretBackend, SecretBackend, SecretData, SecretPaths};
pub use storage::{
    BucketApi, IdentityApi, InMemoryConnector, InMemoryStorage, RemoteCall, ServerConnection,
    StorageConnector, UserInfo,
};
pub use store::{InMemoryObjectStore, Notification, ObjectStore, Watch};
pub use types::{
    BucketSpec, Credentials, Kind, Lifecycle, ManagedObject, ObjectKey, ObjectMeta, ObjectRef,
    ObjectStatus, ResourceSpec, ServerDescriptor, ServerSpec, UserSpec,
};
