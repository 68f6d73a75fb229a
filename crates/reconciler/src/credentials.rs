//! Credential resolution against the secret backend.
//!
//! User principals get credentials minted on first use; servers must have
//! theirs provisioned out of band. Existing secret material is never
//! overwritten: a malformed payload is a data-integrity failure, not a
//! reason to regenerate.

use std::sync::Arc;

use bucketeer_core::{Credentials, Error, Result, SecretBackend, SecretData, SecretPaths};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, info};

const ACCESS_KEY_FIELD: &str = "accessKey";
const SECRET_KEY_FIELD: &str = "secretKey";

const ACCESS_KEY_LEN: usize = 20;
const SECRET_KEY_LEN: usize = 40;
const ACCESS_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Fresh random credentials in the remote service's key format.
pub fn generate_credentials() -> Credentials {
    let mut rng = rand::thread_rng();
    let access_key: String = (0..ACCESS_KEY_LEN)
        .filter_map(|_| ACCESS_KEY_ALPHABET.choose(&mut rng))
        .map(|&b| char::from(b))
        .collect();
    let secret_key: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(SECRET_KEY_LEN)
        .map(char::from)
        .collect();
    Credentials::new(access_key, secret_key)
}

fn parse_credentials(path: &str, data: &SecretData) -> Result<Credentials> {
    let field = |name: &str| {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::data_integrity(format!("secret at '{path}' has no string '{name}' field"))
            })
    };
    Ok(Credentials::new(
        field(ACCESS_KEY_FIELD)?,
        field(SECRET_KEY_FIELD)?,
    ))
}

fn encode_credentials(credentials: &Credentials) -> SecretData {
    let mut data = SecretData::new();
    data.insert(
        ACCESS_KEY_FIELD.to_string(),
        Value::String(credentials.access_key.clone()),
    );
    data.insert(
        SECRET_KEY_FIELD.to_string(),
        Value::String(credentials.secret_key.clone()),
    );
    data
}

/// Looks up, and for users mints, access credentials.
pub struct CredentialResolver {
    backend: Arc<dyn SecretBackend>,
    paths: SecretPaths,
}

impl CredentialResolver {
    pub fn new(backend: Arc<dyn SecretBackend>, paths: SecretPaths) -> Self {
        Self { backend, paths }
    }

    pub const fn paths(&self) -> &SecretPaths {
        &self.paths
    }

    /// Credentials of a user principal, minted and persisted on first use.
    ///
    /// Two concurrent first uses may both mint; the backend's write order
    /// picks the survivor and the next pass converges on it.
    ///
    /// # Errors
    ///
    /// `SecretBackend` when the backend fails, `DataIntegrity` when the
    /// stored payload lacks a string `accessKey` or `secretKey`.
    pub async fn user_credentials(&self, principal: &str) -> Result<Credentials> {
        let path = self.paths.user(principal);

        if let Some(data) = self.backend.read(&path).await? {
            debug!(principal, "Found stored user credentials");
            return parse_credentials(&path, &data);
        }

        let minted = generate_credentials();
        self.backend
            .write(&path, encode_credentials(&minted))
            .await?;
        info!(principal, access_key = %minted.access_key, "Minted user credentials");
        Ok(minted)
    }

    /// Administrative credentials of a server. Never minted.
    ///
    /// # Errors
    ///
    /// `DataIntegrity` when nothing is stored for the server or the payload
    /// is malformed, `SecretBackend` when the backend fails.
    pub async fn server_credentials(&self, server: &str) -> Result<Credentials> {
        let path = self.paths.server(server);
        let data = self.backend.read(&path).await?.ok_or_else(|| {
            Error::data_integrity(format!("no credentials for server '{server}' at '{path}'"))
        })?;
        parse_credentials(&path, &data)
    }

    /// Readiness of the underlying secret backend.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports.
    pub async fn health(&self) -> Result<()> {
        self.backend.health().await
    }
}
