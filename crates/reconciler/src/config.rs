//! Reconciler configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! secret_mount = "minio"
//! workers = 4
//! pass_timeout_secs = 30
//! requeue_base_ms = 500
//! requeue_max_ms = 60000
//! ```

use std::path::Path;
use std::time::Duration;

use bucketeer_core::SecretPaths;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::r#loop::LoopConfig;

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Mount prefix of the secret backend.
    pub secret_mount: String,
    /// Maximum concurrent passes.
    pub workers: usize,
    /// Deadline of a single pass.
    pub pass_timeout_secs: u64,
    /// First requeue delay after a failure.
    pub requeue_base_ms: u64,
    /// Requeue delay ceiling.
    pub requeue_max_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            secret_mount: "minio".to_string(),
            workers: 4,
            pass_timeout_secs: 30,
            requeue_base_ms: 500,
            requeue_max_ms: 60_000,
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the document is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// # Errors
    ///
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.secret_mount.trim_matches('/').is_empty() {
            return Err(Error::invalid_config("secret_mount must not be empty"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.pass_timeout_secs == 0 {
            return Err(Error::invalid_config("pass_timeout_secs must be at least 1"));
        }
        if self.requeue_base_ms > self.requeue_max_ms {
            return Err(Error::invalid_config(format!(
                "requeue_base_ms ({}) exceeds requeue_max_ms ({})",
                self.requeue_base_ms, self.requeue_max_ms
            )));
        }
        Ok(())
    }

    pub fn secret_paths(&self) -> SecretPaths {
        SecretPaths::new(&self.secret_mount)
    }

    pub const fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            workers: self.workers,
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
            requeue_base: Duration::from_millis(self.requeue_base_ms),
            requeue_max: Duration::from_millis(self.requeue_max_ms),
        }
    }
}
