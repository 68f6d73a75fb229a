//! Core types for the reconciler.

use std::fmt;

/// What one convergence pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The object no longer exists.
    Absent,
    /// Deletion was requested and no finalizer is held; nothing to clean up.
    Released,
    /// Remote cleanup ran and the finalizer was released.
    Finalized { actions: Vec<String> },
    /// Remote state was brought in line with the spec.
    Converged { actions: Vec<String> },
}

impl PassOutcome {
    /// Descriptions of the corrective actions applied, in order.
    pub fn actions(&self) -> &[String] {
        match self {
            Self::Finalized { actions } | Self::Converged { actions } => actions,
            Self::Absent | Self::Released => &[],
        }
    }

    /// Whether the pass issued no corrective action.
    pub fn is_noop(&self) -> bool {
        self.actions().is_empty()
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Released => write!(f, "released"),
            Self::Finalized { actions } => write!(f, "finalized ({} actions)", actions.len()),
            Self::Converged { actions } => write!(f, "converged ({} actions)", actions.len()),
        }
    }
}
