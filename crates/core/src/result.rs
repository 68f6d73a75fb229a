//! Result alias and extension combinators.

use crate::error::Error;

/// The standard Result type for bucketeer operations.
///
/// ```ignore
/// fn endpoint(registry: &ServerRegistry, name: &str) -> Result<String> {
///     registry
///         .get(name)
///         .map(|server| server.endpoint())
///         .ok_or_else(|| Error::dependency_unresolved(Kind::Server, name))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error at warn level.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Inspect the error without consuming the Result.
    #[must_use]
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
