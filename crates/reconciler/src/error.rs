//! Error types for the reconciler crate.
//!
//! The taxonomy itself lives in `bucketeer-core`; this module decides how a
//! failed pass is reported.

use std::fmt;

pub use bucketeer_core::{Error, ErrorCategory, PassPhase, Result};
use tracing::{debug, error, warn};

/// Log a failed pass according to its category.
///
/// Data-integrity failures usually mean a configuration problem an operator
/// has to fix, so they stand out at `error`. Everything else is expected to
/// heal on a later pass.
pub fn report_failure(key: &impl fmt::Display, err: &Error) {
    match err.category() {
        ErrorCategory::DataIntegrity | ErrorCategory::Configuration => {
            error!(key = %key, category = ?err.category(), error = %err, "Pass failed, operator attention needed");
        }
        ErrorCategory::NotFound => {
            debug!(key = %key, error = %err, "Pass found nothing to act on");
        }
        category => {
            warn!(key = %key, category = ?category, error = %err, "Pass failed, will retry");
        }
    }
}
