//! Bucket convergence: existence plus a byte-exact policy document.

use std::fmt;

use async_trait::async_trait;
use bucketeer_core::{
    BucketSpec, Kind, ManagedObject, ObjectRef, ResourceSpec, Result, ServerConnection,
};
use tracing::debug;

use super::{BUCKET_FINALIZER, ServerAccess};
use crate::driver::Reconcile;

/// Remote snapshot of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketObservation {
    pub exists: bool,
    /// Current policy document; only read when the bucket exists.
    pub policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketAction {
    Create { bucket: String },
    SetPolicy { bucket: String, policy: String },
    Remove { bucket: String },
}

impl fmt::Display for BucketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { bucket } => write!(f, "create bucket {bucket}"),
            Self::SetPolicy { bucket, .. } => write!(f, "set policy of bucket {bucket}"),
            Self::Remove { bucket } => write!(f, "remove bucket {bucket}"),
        }
    }
}

pub struct BucketReconciler {
    access: ServerAccess,
}

impl BucketReconciler {
    pub const fn new(access: ServerAccess) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Reconcile for BucketReconciler {
    type Spec = BucketSpec;
    type Deps = ServerConnection;
    type Observed = BucketObservation;
    type Action = BucketAction;

    const KIND: Kind = Kind::Bucket;
    const FINALIZER: &'static str = BUCKET_FINALIZER;

    fn spec(object: &ManagedObject) -> Option<&BucketSpec> {
        match &object.spec {
            ResourceSpec::Bucket(spec) => Some(spec),
            _ => None,
        }
    }

    fn owner(spec: &BucketSpec) -> Option<ObjectRef> {
        Some(ObjectRef::server(spec.server.clone()))
    }

    async fn resolve(&self, _object: &ManagedObject, spec: &BucketSpec) -> Result<ServerConnection> {
        self.access.connect(&spec.server).await
    }

    async fn observe(
        &self,
        spec: &BucketSpec,
        connection: &ServerConnection,
    ) -> Result<BucketObservation> {
        let exists = connection.buckets.exists(&spec.bucket_name).await?;
        let policy = if exists {
            Some(connection.buckets.get_policy(&spec.bucket_name).await?)
        } else {
            None
        };
        debug!(bucket = %spec.bucket_name, exists, "Observed bucket");
        Ok(BucketObservation { exists, policy })
    }

    fn plan(
        spec: &BucketSpec,
        _connection: &ServerConnection,
        observed: &BucketObservation,
    ) -> Vec<BucketAction> {
        plan_bucket(spec, observed)
    }

    fn plan_finalize(
        spec: &BucketSpec,
        _connection: &ServerConnection,
        observed: &BucketObservation,
    ) -> Vec<BucketAction> {
        plan_bucket_cleanup(spec, observed)
    }

    async fn apply(
        &self,
        _spec: &BucketSpec,
        connection: &ServerConnection,
        action: &BucketAction,
    ) -> Result<()> {
        match action {
            BucketAction::Create { bucket } => connection.buckets.create(bucket).await,
            BucketAction::SetPolicy { bucket, policy } => {
                connection.buckets.set_policy(bucket, policy).await
            }
            BucketAction::Remove { bucket } => connection.buckets.remove(bucket).await,
        }
    }
}

/// Create-then-set-policy for a missing bucket, a policy rewrite when the
/// stored document differs byte for byte, nothing otherwise.
pub fn plan_bucket(spec: &BucketSpec, observed: &BucketObservation) -> Vec<BucketAction> {
    let set_policy = || BucketAction::SetPolicy {
        bucket: spec.bucket_name.clone(),
        policy: spec.policy.clone(),
    };

    if !observed.exists {
        return vec![
            BucketAction::Create {
                bucket: spec.bucket_name.clone(),
            },
            set_policy(),
        ];
    }

    if observed.policy.as_deref() == Some(spec.policy.as_str()) {
        Vec::new()
    } else {
        vec![set_policy()]
    }
}

/// Remove the bucket if it is still there.
pub fn plan_bucket_cleanup(spec: &BucketSpec, observed: &BucketObservation) -> Vec<BucketAction> {
    if observed.exists {
        vec![BucketAction::Remove {
            bucket: spec.bucket_name.clone(),
        }]
    } else {
        Vec::new()
    }
}
