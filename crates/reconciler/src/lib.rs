//! Level-triggered reconciliation of object-storage resources.
//!
//! Every declared server, bucket and user is driven toward its spec by
//! repeated convergence passes:
//!
//! - **Observe**: read the remote state in one snapshot
//! - **Plan**: a pure diff of spec against observation yields typed actions
//! - **Apply**: execute the actions in order, stopping at the first failure
//! - **Finalize**: on deletion, clean up remotely before the finalizer goes
//!
//! Passes are idempotent. Running one twice against unchanged remote state
//! issues no further bucket or policy mutations, so missed or duplicated
//! notifications are harmless.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use bucketeer_core::{InMemoryConnector, InMemoryObjectStore, InMemorySecretBackend};
//! use bucketeer_reconciler::{Controller, ReconcilerConfig, ReconciliationLoop};
//!
//! #[tokio::main]
//! async fn main() -> bucketeer_reconciler::Result<()> {
//!     let config = ReconcilerConfig::load("bucketeer.toml")?;
//!     let controller = Arc::new(
//!         Controller::builder()
//!             .store(InMemoryObjectStore::new_arc())
//!             .secrets(InMemorySecretBackend::new_arc())
//!             .connector(InMemoryConnector::new_arc())
//!             .config(config.clone())
//!             .build()?,
//!     );
//!
//!     let runner = ReconciliationLoop::new(controller, config.loop_config());
//!     let stopper = runner.stopper();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stopper.stop();
//!     });
//!     let stats = runner.run().await;
//!     println!("{} passes, {} failures", stats.passes, stats.failures);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod controller;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod kinds;
pub mod r#loop;
pub mod registry;
pub mod types;

// Re-export main types
pub use config::ReconcilerConfig;
pub use controller::{Controller, ControllerBuilder};
pub use credentials::{CredentialResolver, generate_credentials};
pub use driver::{Driver, Reconcile};
pub use error::{Error, ErrorCategory, PassPhase, Result, report_failure};
pub use kinds::{
    BUCKET_FINALIZER, BucketAction, BucketReconciler, SERVER_FINALIZER, ServerAccess,
    ServerAction, ServerReconciler, USER_FINALIZER, UserAction, UserReconciler,
    generated_policy_name,
};
pub use r#loop::{LoopConfig, LoopStats, LoopStopper, ReconciliationLoop};
pub use registry::ServerRegistry;
pub use types::PassOutcome;
