//! Validation backends
//!
//! A backend answers the connect-time credential question. Backends that also
//! decide per-stream publish/playback expose a [`StreamAuthorizer`].

pub mod file;
pub mod jwt;
pub mod roundtrip;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::ValidatorConfig;
use crate::connection::{ConnectExtras, Connection, Role};
use crate::settings::AuthSettings;
use crate::{Error, Result};

pub use file::FileValidator;
pub use jwt::JwtValidator;
pub use roundtrip::RoundTripValidator;

/// Credential validation contract shared by every backend.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Load credential material. Called once before the backend serves any
    /// connection; an error degrades the owning application to deny.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Connect-time check. `extras` carries everything the protocol
    /// authenticator collected besides username and password.
    async fn on_connect_authenticate(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        extras: &ConnectExtras,
    ) -> bool;

    /// Per-stream authorization, for backends that make stream decisions.
    fn stream_authorizer(&self) -> Option<&dyn StreamAuthorizer> {
        None
    }
}

/// Publish/playback decisions made after the connect gate.
#[async_trait]
pub trait StreamAuthorizer: Send + Sync {
    /// Authorize `conn` to act as `role` on `stream`. On success the
    /// implementation persists role, stream id and any signed URL on the
    /// connection's auth context.
    async fn authorize(&self, conn: &Arc<Connection>, role: Role, stream: &str) -> bool;

    /// Release remote state tied to the connection. Errors are logged only.
    async fn on_disconnect(&self, _conn: &Connection) {}

    /// Wait for background authorizations spawned so far.
    async fn drain(&self) {}
}

/// Host-registered validators that configuration refers to by name.
#[derive(Default, Clone)]
pub struct ValidatorCatalog {
    validators: Arc<DashMap<String, Arc<dyn AuthValidator>>>,
}

impl ValidatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator, replacing any previous one with the same name.
    pub fn register(&self, name: impl Into<String>, validator: Arc<dyn AuthValidator>) {
        let name = name.into();
        tracing::debug!(validator = %name, "Registered named validator");
        self.validators.insert(name, validator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthValidator>> {
        self.validators.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn AuthValidator>> {
        self.validators.remove(name).map(|(_, validator)| validator)
    }

    pub fn names(&self) -> Vec<String> {
        self.validators.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for ValidatorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorCatalog")
            .field("names", &self.names())
            .finish()
    }
}

/// Instantiate the backend described by `config`. The returned validator has
/// not been initialized yet.
pub fn build_validator(
    config: &ValidatorConfig,
    settings: &AuthSettings,
    catalog: &ValidatorCatalog,
) -> Result<Arc<dyn AuthValidator>> {
    let validator: Arc<dyn AuthValidator> = match config {
        ValidatorConfig::File { data_source } => {
            Arc::new(FileValidator::new(settings.resolve_path(data_source)))
        }
        ValidatorConfig::Jwt { secret, algorithm } => Arc::new(JwtValidator::new(
            secret.clone(),
            algorithm.clone(),
            settings.conf_dir().to_path_buf(),
            settings.relay().clone(),
        )),
        ValidatorConfig::RoundTrip(rt) => {
            Arc::new(RoundTripValidator::new(rt.clone(), settings.relay().clone())?)
        }
        ValidatorConfig::Named { name } => catalog
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("validator '{name}' is not registered")))?,
    };
    Ok(validator)
}
