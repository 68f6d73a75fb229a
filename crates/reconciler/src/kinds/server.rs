//! Server convergence: keeps the registry in step with declared servers and
//! reports reachability.

use std::fmt;

use async_trait::async_trait;
use bucketeer_core::{
    Credentials, Kind, ManagedObject, ObjectStatus, ResourceSpec, Result, ResultExt,
    ServerDescriptor, ServerSpec,
};
use tracing::{debug, info};

use super::{SERVER_FINALIZER, ServerAccess};
use crate::driver::Reconcile;

pub struct ServerDeps {
    pub descriptor: ServerDescriptor,
    /// Admin credentials; not resolved when the server is being deleted.
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerObservation {
    /// Registry entry as it stood before this pass.
    pub cached: Option<ServerDescriptor>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    Register(ServerDescriptor),
    Evict { name: String },
}

impl fmt::Display for ServerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(descriptor) => {
                write!(f, "register server {} at {}", descriptor.name, descriptor.endpoint())
            }
            Self::Evict { name } => write!(f, "evict server {name}"),
        }
    }
}

pub struct ServerReconciler {
    access: ServerAccess,
}

impl ServerReconciler {
    pub const fn new(access: ServerAccess) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Reconcile for ServerReconciler {
    type Spec = ServerSpec;
    type Deps = ServerDeps;
    type Observed = ServerObservation;
    type Action = ServerAction;

    const KIND: Kind = Kind::Server;
    const FINALIZER: &'static str = SERVER_FINALIZER;

    fn spec(object: &ManagedObject) -> Option<&ServerSpec> {
        match &object.spec {
            ResourceSpec::Server(spec) => Some(spec),
            _ => None,
        }
    }

    async fn resolve(&self, object: &ManagedObject, spec: &ServerSpec) -> Result<ServerDeps> {
        let descriptor = ServerDescriptor::from_spec(object.name(), spec);
        let credentials = if object.meta.deletion_requested {
            None
        } else {
            Some(
                self.access
                    .credentials
                    .server_credentials(object.name())
                    .await?,
            )
        };
        Ok(ServerDeps {
            descriptor,
            credentials,
        })
    }

    async fn observe(&self, _spec: &ServerSpec, deps: &ServerDeps) -> Result<ServerObservation> {
        let cached = self.access.registry.get(&deps.descriptor.name);
        let online = match &deps.credentials {
            Some(credentials) => self
                .access
                .connector
                .probe(&deps.descriptor, credentials)
                .await
                .into_option_logged("Server probe failed")
                .is_some(),
            None => false,
        };
        debug!(server = %deps.descriptor.name, online, "Observed server");
        Ok(ServerObservation { cached, online })
    }

    fn plan(_spec: &ServerSpec, deps: &ServerDeps, observed: &ServerObservation) -> Vec<ServerAction> {
        if observed.cached.as_ref() == Some(&deps.descriptor) {
            Vec::new()
        } else {
            vec![ServerAction::Register(deps.descriptor.clone())]
        }
    }

    fn plan_finalize(
        _spec: &ServerSpec,
        deps: &ServerDeps,
        observed: &ServerObservation,
    ) -> Vec<ServerAction> {
        if observed.cached.is_some() {
            vec![ServerAction::Evict {
                name: deps.descriptor.name.clone(),
            }]
        } else {
            Vec::new()
        }
    }

    async fn apply(&self, _spec: &ServerSpec, _deps: &ServerDeps, action: &ServerAction) -> Result<()> {
        match action {
            ServerAction::Register(descriptor) => {
                if let Some(previous) = self.access.registry.upsert(descriptor.clone()) {
                    info!(
                        server = %descriptor.name,
                        from = %previous.endpoint(),
                        to = %descriptor.endpoint(),
                        "Server endpoint changed"
                    );
                }
            }
            ServerAction::Evict { name } => {
                self.access.registry.remove(name);
            }
        }
        Ok(())
    }

    fn status(object: &ManagedObject, observed: &ServerObservation) -> ObjectStatus {
        ObjectStatus {
            observed_generation: Some(object.meta.generation),
            online: Some(observed.online),
        }
    }
}
