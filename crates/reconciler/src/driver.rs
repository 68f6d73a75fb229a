//! Generic convergence driver.
//!
//! A pass for one object runs the same lifecycle regardless of kind:
//!
//! 1. Fetch the object; a vanished object is a no-op, also when it vanishes
//!    before a later write.
//! 2. Deleting without our finalizer: nothing to clean up.
//! 3. Resolve dependencies (server descriptor, credentials).
//! 4. Deleting with our finalizer: observe, run the cleanup plan, release
//!    the finalizer. The token stays if any cleanup step fails.
//! 5. Otherwise persist owner link and finalizer in one write, observe,
//!    apply the corrective plan in order, persist status when it changed.
//!
//! Plans are pure functions of spec, dependencies and observation, so the
//! per-kind logic is testable without any I/O.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bucketeer_core::{
    Kind, Lifecycle, ManagedObject, ObjectKey, ObjectRef, ObjectStatus, ObjectStore, ResultExt,
};
use tracing::{debug, info, instrument};

use crate::error::{Error, ErrorCategory, PassPhase, Result, report_failure};
use crate::types::PassOutcome;

/// Per-kind convergence logic driven by [`Driver`].
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Desired state extracted from the object.
    type Spec: Clone + Send + Sync;
    /// Everything a pass needs resolved before it can observe.
    type Deps: Send + Sync;
    /// Snapshot of the remote state.
    type Observed: Send + Sync;
    /// One corrective remote call.
    type Action: fmt::Display + fmt::Debug + Send + Sync;

    const KIND: Kind;
    /// Finalizer token guarding remote cleanup.
    const FINALIZER: &'static str;

    /// This kind's spec, or `None` when the object is of another kind.
    fn spec(object: &ManagedObject) -> Option<&Self::Spec>;

    /// Object that owns instances of this kind.
    fn owner(_spec: &Self::Spec) -> Option<ObjectRef> {
        None
    }

    /// Resolve dependencies. `object.meta.deletion_requested` tells whether
    /// the pass will finalize.
    async fn resolve(&self, object: &ManagedObject, spec: &Self::Spec) -> Result<Self::Deps>;

    /// Read the remote snapshot.
    async fn observe(&self, spec: &Self::Spec, deps: &Self::Deps) -> Result<Self::Observed>;

    /// Corrective actions that bring the remote state in line with `spec`.
    fn plan(spec: &Self::Spec, deps: &Self::Deps, observed: &Self::Observed) -> Vec<Self::Action>;

    /// Cleanup actions run before the finalizer is released.
    fn plan_finalize(
        spec: &Self::Spec,
        deps: &Self::Deps,
        observed: &Self::Observed,
    ) -> Vec<Self::Action>;

    /// Execute one action.
    async fn apply(&self, spec: &Self::Spec, deps: &Self::Deps, action: &Self::Action)
    -> Result<()>;

    /// Status to persist after a successful converge.
    fn status(object: &ManagedObject, _observed: &Self::Observed) -> ObjectStatus {
        ObjectStatus {
            observed_generation: Some(object.meta.generation),
            ..object.status.clone()
        }
    }
}

/// Runs convergence passes of one kind against the object store.
pub struct Driver<K: Reconcile> {
    store: Arc<dyn ObjectStore>,
    reconciler: K,
}

impl<K: Reconcile> Driver<K> {
    pub fn new(store: Arc<dyn ObjectStore>, reconciler: K) -> Self {
        Self { store, reconciler }
    }

    pub const fn reconciler(&self) -> &K {
        &self.reconciler
    }

    /// Run one convergence pass for `key`.
    ///
    /// # Errors
    ///
    /// The first failure, wrapped with the key and the phase it aborted.
    /// Failures are also logged here; callers decide whether to requeue.
    #[instrument(
        skip(self, key),
        fields(
            kind = %K::KIND,
            namespace = key.namespace.as_deref().unwrap_or_default(),
            name = %key.name,
        )
    )]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PassOutcome> {
        let outcome = self
            .pass(key)
            .await
            .inspect_error(|err| report_failure(key, err))?;
        debug!(%outcome, "Pass complete");
        Ok(outcome)
    }

    async fn pass(&self, key: &ObjectKey) -> Result<PassOutcome> {
        let Some(object) = self
            .store
            .get(key)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Resolve))?
        else {
            debug!("Object is gone");
            return Ok(PassOutcome::Absent);
        };

        let spec = K::spec(&object).cloned().ok_or_else(|| {
            Error::invalid_object(key, format!("expected a {} spec", K::KIND))
                .in_pass(key, PassPhase::Resolve)
        })?;

        let lifecycle = object.lifecycle(K::FINALIZER);
        if lifecycle == Lifecycle::Released {
            debug!("Deletion requested and finalizer already released");
            return Ok(PassOutcome::Released);
        }

        let deps = self
            .reconciler
            .resolve(&object, &spec)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Resolve))?;

        match lifecycle {
            Lifecycle::Finalizing => self.finalize(key, object, &spec, &deps).await,
            Lifecycle::Released => Ok(PassOutcome::Released),
            Lifecycle::Unmanaged | Lifecycle::Managed => {
                let Some(object) = self.claim(key, object, &spec).await? else {
                    return Ok(PassOutcome::Absent);
                };
                self.converge(key, object, &spec, &deps).await
            }
        }
    }

    /// Write `object` back. `None` when it was removed since it was read.
    async fn persist(
        &self,
        key: &ObjectKey,
        object: &ManagedObject,
        phase: PassPhase,
    ) -> Result<Option<ManagedObject>> {
        match self.store.update(object).await {
            Ok(persisted) => Ok(Some(persisted)),
            Err(err) if err.category() == ErrorCategory::NotFound => {
                debug!(%phase, "Object removed before write");
                Ok(None)
            }
            Err(err) => Err(err.in_pass(key, phase)),
        }
    }

    async fn finalize(
        &self,
        key: &ObjectKey,
        mut object: ManagedObject,
        spec: &K::Spec,
        deps: &K::Deps,
    ) -> Result<PassOutcome> {
        let observed = self
            .reconciler
            .observe(spec, deps)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Finalize))?;

        let actions = K::plan_finalize(spec, deps, &observed);
        let applied = self
            .apply_all(spec, deps, actions)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Finalize))?;

        object.remove_finalizer(K::FINALIZER);
        self.persist(key, &object, PassPhase::Finalize).await?;

        info!(actions = applied.len(), "Cleanup complete, finalizer released");
        Ok(PassOutcome::Finalized { actions: applied })
    }

    /// Persist the owner link and finalizer before any remote mutation.
    async fn claim(
        &self,
        key: &ObjectKey,
        mut object: ManagedObject,
        spec: &K::Spec,
    ) -> Result<Option<ManagedObject>> {
        let mut changed = false;
        if object.meta.owner.is_none() {
            object.meta.owner = K::owner(spec);
            changed = object.meta.owner.is_some();
        }
        changed |= object.add_finalizer(K::FINALIZER);

        if !changed {
            return Ok(Some(object));
        }

        let persisted = self.persist(key, &object, PassPhase::Claim).await?;
        if persisted.is_some() {
            info!(finalizer = K::FINALIZER, "Object claimed");
        }
        Ok(persisted)
    }

    async fn converge(
        &self,
        key: &ObjectKey,
        mut object: ManagedObject,
        spec: &K::Spec,
        deps: &K::Deps,
    ) -> Result<PassOutcome> {
        let observed = self
            .reconciler
            .observe(spec, deps)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Observe))?;

        let actions = K::plan(spec, deps, &observed);
        if actions.is_empty() {
            debug!("Remote state already converged");
        }
        let applied = self
            .apply_all(spec, deps, actions)
            .await
            .map_err(|e| e.in_pass(key, PassPhase::Apply))?;

        let status = K::status(&object, &observed);
        if status != object.status {
            object.status = status;
            if self.persist(key, &object, PassPhase::Persist).await?.is_none() {
                return Ok(PassOutcome::Absent);
            }
        }

        Ok(PassOutcome::Converged { actions: applied })
    }

    /// Apply actions in order, stopping at the first failure.
    async fn apply_all(
        &self,
        spec: &K::Spec,
        deps: &K::Deps,
        actions: Vec<K::Action>,
    ) -> Result<Vec<String>> {
        let mut applied = Vec::with_capacity(actions.len());
        for action in actions {
            info!(%action, "Applying");
            self.reconciler.apply(spec, deps, &action).await?;
            applied.push(action.to_string());
        }
        Ok(applied)
    }
}
