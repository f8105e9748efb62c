//! Per-application auth registry
//!
//! The host notifies the registry when application scopes come and go. Each
//! attached application gets one [`AuthenticatorDispatch`] built from its
//! resolved configuration, plus the [`AppEventMonitor`] the host routes
//! connection events to.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{AppAuthOverride, Config};
use crate::connection::Connection;
use crate::dispatch::AuthenticatorDispatch;
use crate::monitor::AppEventMonitor;
use crate::settings::{AuthSettings, ResolvedAuthConfig};
use crate::validator::{build_validator, AuthValidator, ValidatorCatalog};
use crate::{Error, Result};

/// Everything attached to one application scope.
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub config: ResolvedAuthConfig,
    pub dispatch: Arc<AuthenticatorDispatch>,
    pub hook: Arc<AppEventMonitor>,
}

pub struct ScopeAuthRegistry {
    settings: Arc<AuthSettings>,
    catalog: ValidatorCatalog,
    entries: DashMap<String, ScopeEntry>,
    /// Latest build started per application. A build only commits while its
    /// generation is still current; removal drops the marker.
    pending: DashMap<String, u64>,
    generation: AtomicU64,
}

impl ScopeAuthRegistry {
    pub fn new(settings: Arc<AuthSettings>, catalog: ValidatorCatalog) -> Self {
        Self {
            settings,
            catalog,
            entries: DashMap::new(),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(AuthSettings::from_config(config)),
            ValidatorCatalog::new(),
        )
    }

    pub fn settings(&self) -> &Arc<AuthSettings> {
        &self.settings
    }

    pub const fn catalog(&self) -> &ValidatorCatalog {
        &self.catalog
    }

    /// Attach auth to a newly created application scope. Returns whether the
    /// application was attached; false also when the scope was removed while
    /// its validator was initializing.
    pub async fn on_scope_created(&self, app: &str) -> bool {
        let Some(config) = self.settings.resolve(app) else {
            tracing::debug!(app, "No auth configured for application");
            return false;
        };
        let generation = self.begin_build(app);
        let entry = self.build_entry(app, config).await;
        if !self.commit(app, generation, entry) {
            tracing::info!(app, "Application removed during initialization, discarding auth");
            return false;
        }
        tracing::info!(app, "Auth attached to application");
        true
    }

    /// Detach auth from a removed application scope, including one whose
    /// validator is still initializing.
    pub fn on_scope_removed(&self, app: &str) -> bool {
        // Pending first: a commit holds the pending slot while it inserts.
        let was_pending = self.pending.remove(app).is_some();
        let removed = self.entries.remove(app).is_some() || was_pending;
        if removed {
            tracing::info!(app, "Auth detached from application");
        }
        removed
    }

    /// Replace an attached application's configuration with `custom` merged
    /// over the defaults. The previous entry stays in place until the new one
    /// is built. Fails with [`Error::NotFound`] when the application is not
    /// attached or is removed before the rebuild finishes.
    pub async fn reconfigure(&self, app: &str, custom: &AppAuthOverride) -> Result<()> {
        if !self.entries.contains_key(app) {
            return Err(Error::NotFound(format!("application '{app}' is not attached")));
        }
        let config = self.settings.resolve_override(custom);
        let generation = self.begin_build(app);
        let entry = self.build_entry(app, config).await;
        let degraded = entry.dispatch.is_degraded();
        if !self.commit(app, generation, entry) {
            return Err(Error::NotFound(format!(
                "application '{app}' was removed during reconfiguration"
            )));
        }
        if degraded {
            tracing::warn!(app, "Reconfigured application is degraded");
        }
        tracing::info!(app, "Auth reconfigured");
        Ok(())
    }

    fn begin_build(&self, app: &str) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.insert(app.to_string(), generation);
        generation
    }

    /// Install `entry` if `generation` is still the latest build for `app`.
    fn commit(&self, app: &str, generation: u64, entry: ScopeEntry) -> bool {
        match self.pending.entry(app.to_string()) {
            Entry::Occupied(slot) if *slot.get() == generation => {
                self.entries.insert(app.to_string(), entry);
                slot.remove();
                true
            }
            _ => false,
        }
    }

    async fn build_entry(&self, app: &str, config: ResolvedAuthConfig) -> ScopeEntry {
        let dispatch = match self.init_validator(app, &config).await {
            Ok(validator) => {
                AuthenticatorDispatch::new(&config, validator, self.settings.relay().clone())
            }
            Err(e) => {
                let validator = config.validator.kind();
                if e.is_expected() {
                    tracing::warn!(app, validator, error = %e, "Validator unavailable, denying secured connections");
                } else {
                    tracing::error!(
                        app,
                        validator,
                        error = %e,
                        "Validator initialization failed, denying secured connections"
                    );
                }
                AuthenticatorDispatch::degraded(&config)
            }
        };
        let dispatch = Arc::new(dispatch);
        let hook = Arc::new(AppEventMonitor::new(
            app,
            dispatch.clone(),
            self.settings.missing_connection_response(),
        ));
        ScopeEntry {
            config,
            dispatch,
            hook,
        }
    }

    async fn init_validator(
        &self,
        app: &str,
        config: &ResolvedAuthConfig,
    ) -> Result<Arc<dyn AuthValidator>> {
        let validator = build_validator(&config.validator, &self.settings, &self.catalog)?;
        validator.initialize().await?;
        tracing::debug!(app, validator = validator.name(), "Validator initialized");
        Ok(validator)
    }

    pub fn entry(&self, app: &str) -> Option<ScopeEntry> {
        self.entries.get(app).map(|entry| entry.value().clone())
    }

    pub fn dispatch(&self, app: &str) -> Option<Arc<AuthenticatorDispatch>> {
        self.entries.get(app).map(|entry| entry.dispatch.clone())
    }

    pub fn hook(&self, app: &str) -> Option<Arc<AppEventMonitor>> {
        self.entries.get(app).map(|entry| entry.hook.clone())
    }

    pub fn validator(&self, app: &str) -> Option<Arc<dyn AuthValidator>> {
        self.entries
            .get(app)
            .and_then(|entry| entry.dispatch.validator().cloned())
    }

    /// Toggle an application's master enable flag. Returns false for unknown
    /// applications.
    pub fn set_enabled(&self, app: &str, enabled: bool) -> bool {
        match self.entries.get(app) {
            Some(entry) => {
                entry.dispatch.set_enabled(enabled);
                tracing::info!(app, enabled, "Auth enable flag changed");
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, app: &str) -> bool {
        self.entries
            .get(app)
            .is_some_and(|entry| entry.dispatch.is_enabled())
    }

    /// Attached application names, sorted.
    pub fn applications(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Wait for every application's background authorizations to finish.
    pub async fn drain_pending(&self) {
        let dispatches: Vec<Arc<AuthenticatorDispatch>> =
            self.entries.iter().map(|e| e.dispatch.clone()).collect();
        for dispatch in dispatches {
            if let Some(authorizer) = dispatch
                .validator()
                .and_then(|validator| validator.stream_authorizer())
            {
                authorizer.drain().await;
            }
        }
    }

    /// Route a connect event. Applications without auth accept everything.
    pub async fn on_connect(&self, app: &str, conn: &Connection, args: &[String]) -> Result<()> {
        match self.hook(app) {
            Some(hook) => hook.on_connect(conn, args).await,
            None => Ok(()),
        }
    }

    pub async fn on_disconnect(&self, app: &str, conn: &Connection) {
        if let Some(hook) = self.hook(app) {
            hook.on_disconnect(conn).await;
        }
    }

    pub async fn on_publish(&self, app: &str, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        match self.hook(app) {
            Some(hook) => hook.on_publish(conn, stream).await,
            None => true,
        }
    }

    pub async fn on_play(&self, app: &str, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        match self.hook(app) {
            Some(hook) => hook.on_play(conn, stream).await,
            None => true,
        }
    }
}

impl std::fmt::Debug for ScopeAuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeAuthRegistry")
            .field("applications", &self.applications())
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthDefaults, ValidatorConfig};
    use crate::connection::{ConnectExtras, Protocol};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Validator whose initialization blocks until released.
    #[derive(Default)]
    struct GatedValidator {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl AuthValidator for GatedValidator {
        fn name(&self) -> &str {
            "gated"
        }

        async fn initialize(&self) -> Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn on_connect_authenticate(
            &self,
            _conn: &Connection,
            _username: &str,
            _password: &str,
            _extras: &ConnectExtras,
        ) -> bool {
            true
        }
    }

    fn gated_registry() -> (Arc<ScopeAuthRegistry>, Arc<GatedValidator>) {
        let mut config = Config::default();
        config.auth.applications.insert(
            "live".to_string(),
            AppAuthOverride {
                active: Some(true),
                validator: Some(ValidatorConfig::Named {
                    name: "gated".to_string(),
                }),
                ..AppAuthOverride::default()
            },
        );
        let registry = ScopeAuthRegistry::from_config(&config);
        let gated = Arc::new(GatedValidator::default());
        registry.catalog().register("gated", gated.clone());
        (Arc::new(registry), gated)
    }

    fn registry(dir: &std::path::Path, defaults_active: bool) -> ScopeAuthRegistry {
        std::fs::write(dir.join("users.credentials"), "alice secret\n").unwrap();
        let mut config = Config::default();
        config.auth.conf_dir = dir.to_string_lossy().into_owned();
        config.auth.defaults = AuthDefaults {
            active: defaults_active,
            data_source: "users.credentials".to_string(),
            ..AuthDefaults::default()
        };
        config.auth.applications.insert(
            "secure".to_string(),
            AppAuthOverride {
                active: Some(true),
                ..AppAuthOverride::default()
            },
        );
        ScopeAuthRegistry::from_config(&config)
    }

    fn creds(password: &str) -> Vec<String> {
        vec!["alice".to_string(), password.to_string()]
    }

    #[tokio::test]
    async fn test_attach_and_route() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), false);

        assert!(registry.on_scope_created("secure").await);
        assert!(!registry.on_scope_created("open").await);
        assert_eq!(registry.applications(), vec!["secure".to_string()]);
        assert!(registry.is_enabled("secure"));
        assert_eq!(registry.validator("secure").unwrap().name(), "file");

        let conn = Connection::new(Protocol::Rtmp, "/secure");
        assert!(registry.on_connect("secure", &conn, &creds("secret")).await.is_ok());
        assert!(registry.on_connect("secure", &conn, &creds("bad")).await.is_err());
        assert!(registry.on_connect("open", &conn, &creds("bad")).await.is_ok());
    }

    #[tokio::test]
    async fn test_scope_removal_stops_routing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), true);
        assert!(registry.on_scope_created("live").await);

        let conn = Connection::new(Protocol::Rtmp, "/live");
        assert!(registry.on_connect("live", &conn, &creds("bad")).await.is_err());

        assert!(registry.on_scope_removed("live"));
        assert!(registry.dispatch("live").is_none());
        assert!(registry.hook("live").is_none());
        assert!(registry.on_connect("live", &conn, &creds("bad")).await.is_ok());
        assert!(!registry.on_scope_removed("live"));
    }

    #[tokio::test]
    async fn test_set_enabled_and_reconfigure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), false);
        assert!(registry.on_scope_created("secure").await);

        let conn = Connection::new(Protocol::Rtmp, "/secure");
        assert!(registry.set_enabled("secure", false));
        assert!(registry.on_connect("secure", &conn, &creds("bad")).await.is_ok());
        assert!(!registry.set_enabled("missing", true));

        registry
            .reconfigure(
                "secure",
                &AppAuthOverride {
                    active: Some(true),
                    validator: Some(ValidatorConfig::Jwt {
                        secret: "s".to_string(),
                        algorithm: "ES256".to_string(),
                    }),
                    ..AppAuthOverride::default()
                },
            )
            .await
            .unwrap();
        let dispatch = registry.dispatch("secure").unwrap();
        assert!(dispatch.is_degraded());
        assert!(registry.on_connect("secure", &conn, &creds("secret")).await.is_err());
    }

    #[tokio::test]
    async fn test_removal_during_initialization_wins() {
        let (registry, gated) = gated_registry();

        let creating = tokio::spawn({
            let registry = registry.clone();
            async move { registry.on_scope_created("live").await }
        });
        gated.started.notified().await;

        assert!(registry.on_scope_removed("live"));
        gated.release.notify_one();

        assert!(!creating.await.unwrap());
        assert!(registry.applications().is_empty());
        assert!(registry.dispatch("live").is_none());
    }

    #[tokio::test]
    async fn test_reconfigure_requires_attached_application() {
        let (registry, gated) = gated_registry();
        let custom = AppAuthOverride {
            active: Some(true),
            ..AppAuthOverride::default()
        };
        assert!(matches!(
            registry.reconfigure("live", &custom).await,
            Err(Error::NotFound(_))
        ));

        gated.release.notify_one();
        assert!(registry.on_scope_created("live").await);
        gated.started.notified().await;

        let named = AppAuthOverride {
            validator: Some(ValidatorConfig::Named {
                name: "gated".to_string(),
            }),
            ..custom
        };
        let reconfiguring = tokio::spawn({
            let registry = registry.clone();
            async move { registry.reconfigure("live", &named).await }
        });
        gated.started.notified().await;
        assert!(registry.on_scope_removed("live"));
        gated.release.notify_one();

        assert!(matches!(reconfiguring.await.unwrap(), Err(Error::NotFound(_))));
        assert!(registry.applications().is_empty());
    }
}
