//! User convergence.
//!
//! Three remote entities move together: the user account, its generated
//! canned policy `_generator_<accessKey>`, and the assignment between them.
//! The pass reads users and canned policies once each and plans against that
//! snapshot.

use std::fmt;

use async_trait::async_trait;
use bucketeer_core::{
    Credentials, Kind, ManagedObject, ObjectRef, ResourceSpec, Result, ServerConnection,
    UserInfo, UserSpec,
};
use tracing::debug;

use super::{ServerAccess, USER_FINALIZER};
use crate::credentials::CredentialResolver;
use crate::driver::Reconcile;

const GENERATED_POLICY_PREFIX: &str = "_generator_";

/// Name of the canned policy generated for `access_key`.
pub fn generated_policy_name(access_key: &str) -> String {
    format!("{GENERATED_POLICY_PREFIX}{access_key}")
}

/// Server connection plus the principal's own credentials.
pub struct UserDeps {
    pub connection: ServerConnection,
    pub credentials: Credentials,
}

/// Remote snapshot relevant to one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserObservation {
    pub user: Option<UserInfo>,
    /// Document of the generated canned policy, if it exists.
    pub policy: Option<String>,
}

/// Secret keys are taken from [`UserDeps`] at apply time so they never end
/// up in an action's `Debug` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    RemoveCannedPolicy { name: String },
    AddCannedPolicy { name: String, policy: String },
    AddUser { access_key: String },
    AssignPolicy { policy_name: String, access_key: String },
    SetUser { access_key: String, enabled: bool },
    RemoveUser { access_key: String },
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveCannedPolicy { name } => write!(f, "remove canned policy {name}"),
            Self::AddCannedPolicy { name, .. } => write!(f, "add canned policy {name}"),
            Self::AddUser { access_key } => write!(f, "add user {access_key}"),
            Self::AssignPolicy {
                policy_name,
                access_key,
            } => write!(f, "assign policy {policy_name} to {access_key}"),
            Self::SetUser {
                access_key,
                enabled,
            } => write!(f, "refresh user {access_key} (enabled={enabled})"),
            Self::RemoveUser { access_key } => write!(f, "remove user {access_key}"),
        }
    }
}

pub struct UserReconciler {
    access: ServerAccess,
}

impl UserReconciler {
    pub const fn new(access: ServerAccess) -> Self {
        Self { access }
    }

    fn resolver(&self) -> &CredentialResolver {
        &self.access.credentials
    }
}

#[async_trait]
impl Reconcile for UserReconciler {
    type Spec = UserSpec;
    type Deps = UserDeps;
    type Observed = UserObservation;
    type Action = UserAction;

    const KIND: Kind = Kind::User;
    const FINALIZER: &'static str = USER_FINALIZER;

    fn spec(object: &ManagedObject) -> Option<&UserSpec> {
        match &object.spec {
            ResourceSpec::User(spec) => Some(spec),
            _ => None,
        }
    }

    fn owner(spec: &UserSpec) -> Option<ObjectRef> {
        Some(ObjectRef::server(spec.server.clone()))
    }

    async fn resolve(&self, object: &ManagedObject, spec: &UserSpec) -> Result<UserDeps> {
        let connection = self.access.connect(&spec.server).await?;
        let credentials = self.resolver().user_credentials(object.name()).await?;
        Ok(UserDeps {
            connection,
            credentials,
        })
    }

    async fn observe(&self, _spec: &UserSpec, deps: &UserDeps) -> Result<UserObservation> {
        let access_key = deps.credentials.access_key.as_str();
        let mut users = deps.connection.identity.list_users().await?;
        let mut policies = deps.connection.identity.list_canned_policies().await?;

        let observed = UserObservation {
            user: users.remove(access_key),
            policy: policies.remove(&generated_policy_name(access_key)),
        };
        debug!(
            access_key,
            user_exists = observed.user.is_some(),
            policy_exists = observed.policy.is_some(),
            "Observed user"
        );
        Ok(observed)
    }

    fn plan(spec: &UserSpec, deps: &UserDeps, observed: &UserObservation) -> Vec<UserAction> {
        plan_user(spec, &deps.credentials.access_key, observed)
    }

    fn plan_finalize(
        _spec: &UserSpec,
        deps: &UserDeps,
        observed: &UserObservation,
    ) -> Vec<UserAction> {
        plan_user_cleanup(&deps.credentials.access_key, observed)
    }

    async fn apply(&self, _spec: &UserSpec, deps: &UserDeps, action: &UserAction) -> Result<()> {
        let identity = &deps.connection.identity;
        let secret_key = deps.credentials.secret_key.as_str();
        match action {
            UserAction::RemoveCannedPolicy { name } => identity.remove_canned_policy(name).await,
            UserAction::AddCannedPolicy { name, policy } => {
                identity.add_canned_policy(name, policy).await
            }
            UserAction::AddUser { access_key } => identity.add_user(access_key, secret_key).await,
            UserAction::AssignPolicy {
                policy_name,
                access_key,
            } => identity.set_policy_assignment(policy_name, access_key).await,
            UserAction::SetUser {
                access_key,
                enabled,
            } => identity.set_user(access_key, secret_key, *enabled).await,
            UserAction::RemoveUser { access_key } => identity.remove_user(access_key).await,
        }
    }
}

/// Plan policy, account and assignment convergence for `access_key`.
///
/// The trailing `SetUser` is unconditional: it pushes the secret key from
/// the secret backend on every pass.
pub fn plan_user(spec: &UserSpec, access_key: &str, observed: &UserObservation) -> Vec<UserAction> {
    let policy_name = generated_policy_name(access_key);
    let wants_policy = !spec.policy.is_empty();
    let mut actions = Vec::new();

    let mut create_policy = true;
    match observed.policy.as_deref() {
        Some(_) if !wants_policy => {
            actions.push(UserAction::RemoveCannedPolicy {
                name: policy_name.clone(),
            });
            create_policy = false;
        }
        Some(current) if current == spec.policy => create_policy = false,
        Some(_) => actions.push(UserAction::RemoveCannedPolicy {
            name: policy_name.clone(),
        }),
        None => {}
    }

    let create_policy = create_policy && wants_policy;
    if create_policy {
        actions.push(UserAction::AddCannedPolicy {
            name: policy_name.clone(),
            policy: spec.policy.clone(),
        });
    }

    if observed.user.is_none() {
        actions.push(UserAction::AddUser {
            access_key: access_key.to_string(),
        });
    }

    let assigned = observed.user.as_ref().map(|user| user.policy_name.as_str());
    if wants_policy && (assigned != Some(policy_name.as_str()) || create_policy) {
        actions.push(UserAction::AssignPolicy {
            policy_name,
            access_key: access_key.to_string(),
        });
    }

    actions.push(UserAction::SetUser {
        access_key: access_key.to_string(),
        enabled: true,
    });
    actions
}

/// Remove the account and the generated policy, whichever still exist.
pub fn plan_user_cleanup(access_key: &str, observed: &UserObservation) -> Vec<UserAction> {
    let mut actions = Vec::new();
    if observed.user.is_some() {
        actions.push(UserAction::RemoveUser {
            access_key: access_key.to_string(),
        });
    }
    if observed.policy.is_some() {
        actions.push(UserAction::RemoveCannedPolicy {
            name: generated_policy_name(access_key),
        });
    }
    actions
}
