//! Configuration cascade
//!
//! Global defaults are captured once into an immutable [`AuthSettings`]
//! snapshot. Each application's override is merged over it field by field.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{
    AppAuthOverride, AuthDefaults, Config, ProtocolFlags, ProtocolOverrides, ValidatorConfig,
};
use crate::params::AgentAllowList;
use crate::relay::RelayVerifier;

/// Explicit value wins, otherwise the fallback.
pub fn inherit<T: Clone>(explicit: Option<&T>, fallback: &T) -> T {
    explicit.cloned().unwrap_or_else(|| fallback.clone())
}

impl ProtocolOverrides {
    #[must_use]
    pub fn merge_over(&self, defaults: &ProtocolFlags) -> ProtocolFlags {
        ProtocolFlags {
            rtmp: inherit(self.rtmp.as_ref(), &defaults.rtmp),
            rtsp: inherit(self.rtsp.as_ref(), &defaults.rtsp),
            rtc: inherit(self.rtc.as_ref(), &defaults.rtc),
            srt: inherit(self.srt.as_ref(), &defaults.srt),
            mpegts: inherit(self.mpegts.as_ref(), &defaults.mpegts),
            http: inherit(self.http.as_ref(), &defaults.http),
            ws: inherit(self.ws.as_ref(), &defaults.ws),
        }
    }
}

/// Effective configuration of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuthConfig {
    pub active: bool,
    pub protocols: ProtocolFlags,
    pub rtmp_query_params: bool,
    pub rtmp_agents: AgentAllowList,
    pub validator: ValidatorConfig,
}

/// Immutable snapshot of the plugin-wide auth configuration.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    defaults: AuthDefaults,
    applications: HashMap<String, AppAuthOverride>,
    conf_dir: PathBuf,
    relay: RelayVerifier,
    missing_connection_response: bool,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            defaults: config.auth.defaults.clone(),
            applications: config.auth.applications.clone(),
            conf_dir: PathBuf::from(&config.auth.conf_dir),
            relay: RelayVerifier::new(config.cluster.relay_secret.as_deref()),
            missing_connection_response: config.auth.missing_connection_response,
        }
    }

    pub const fn defaults(&self) -> &AuthDefaults {
        &self.defaults
    }

    pub const fn relay(&self) -> &RelayVerifier {
        &self.relay
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub const fn missing_connection_response(&self) -> bool {
        self.missing_connection_response
    }

    pub fn application_override(&self, app: &str) -> Option<&AppAuthOverride> {
        self.applications.get(app)
    }

    /// Resolve a relative credential or key path against the conf directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.conf_dir.join(path)
        }
    }

    /// Validator used when neither the application nor the defaults name one.
    pub fn builtin_validator(&self) -> ValidatorConfig {
        ValidatorConfig::File {
            data_source: self.defaults.data_source.clone(),
        }
    }

    /// Pure defaults, no override applied.
    pub fn resolve_defaults(&self) -> ResolvedAuthConfig {
        self.resolve_override(&AppAuthOverride::default())
    }

    /// Merge `app` over the defaults field by field. Blank agent overrides are
    /// ignored.
    pub fn resolve_override(&self, app: &AppAuthOverride) -> ResolvedAuthConfig {
        let defaults = &self.defaults;
        let agents = app
            .rtmp_agents
            .as_ref()
            .filter(|agents| !agents.trim().is_empty());
        let default_validator = defaults
            .validator
            .clone()
            .unwrap_or_else(|| self.builtin_validator());

        ResolvedAuthConfig {
            active: inherit(app.active.as_ref(), &defaults.active),
            protocols: app.protocols.merge_over(&defaults.protocols),
            rtmp_query_params: inherit(app.rtmp_query_params.as_ref(), &defaults.rtmp_query_params),
            rtmp_agents: AgentAllowList::parse(&inherit(agents, &defaults.rtmp_agents)),
            validator: inherit(app.validator.as_ref(), &default_validator),
        }
    }

    /// Configuration an application should be attached with, if any.
    ///
    /// An application with an override is always attached (its resolved
    /// `active` becomes the dispatch's enabled flag). Without an override it is
    /// attached only when the defaults are active.
    pub fn resolve(&self, app: &str) -> Option<ResolvedAuthConfig> {
        match self.applications.get(app) {
            Some(custom) => Some(self.resolve_override(custom)),
            None if self.defaults.active => Some(self.resolve_defaults()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundTripConfig;

    fn settings_with(defaults: AuthDefaults, apps: Vec<(&str, AppAuthOverride)>) -> AuthSettings {
        let mut config = Config::default();
        config.auth.defaults = defaults;
        config.auth.applications = apps
            .into_iter()
            .map(|(name, app)| (name.to_string(), app))
            .collect();
        AuthSettings::from_config(&config)
    }

    #[test]
    fn test_inherit() {
        assert_eq!(inherit(Some(&1), &2), 1);
        assert_eq!(inherit(None, &2), 2);
    }

    #[test]
    fn test_mixed_fields_resolve_independently() {
        let defaults = AuthDefaults {
            active: true,
            protocols: ProtocolFlags {
                rtsp: false,
                ..ProtocolFlags::default()
            },
            rtmp_query_params: false,
            rtmp_agents: "WIN".to_string(),
            ..AuthDefaults::default()
        };
        let app = AppAuthOverride {
            active: None,
            protocols: ProtocolOverrides {
                rtmp: Some(false),
                rtsp: Some(true),
                ..ProtocolOverrides::default()
            },
            rtmp_query_params: Some(true),
            rtmp_agents: None,
            validator: Some(ValidatorConfig::RoundTrip(RoundTripConfig::default())),
        };
        let settings = settings_with(defaults, vec![("live", app)]);

        let resolved = settings.resolve("live").unwrap();
        assert!(resolved.active);
        assert!(!resolved.protocols.rtmp);
        assert!(resolved.protocols.rtsp);
        assert!(resolved.protocols.srt);
        assert!(resolved.rtmp_query_params);
        assert_eq!(resolved.rtmp_agents, AgentAllowList::parse("WIN"));
        assert_eq!(
            resolved.validator,
            ValidatorConfig::RoundTrip(RoundTripConfig::default())
        );
    }

    #[test]
    fn test_validator_resolution_order() {
        let jwt = ValidatorConfig::Jwt {
            secret: "s".to_string(),
            algorithm: "HS256".to_string(),
        };
        let named = ValidatorConfig::Named {
            name: "ldap".to_string(),
        };

        let builtin = settings_with(AuthDefaults::default(), vec![]);
        assert_eq!(
            builtin.resolve_defaults().validator,
            ValidatorConfig::File {
                data_source: AuthDefaults::DEFAULT_DATA_SOURCE.to_string()
            }
        );

        let global = settings_with(
            AuthDefaults {
                validator: Some(jwt.clone()),
                ..AuthDefaults::default()
            },
            vec![(
                "vod",
                AppAuthOverride {
                    validator: Some(named.clone()),
                    ..AppAuthOverride::default()
                },
            )],
        );
        assert_eq!(global.resolve_defaults().validator, jwt);
        assert_eq!(global.resolve("vod").unwrap().validator, named);
    }

    #[test]
    fn test_blank_agent_override_ignored() {
        let settings = settings_with(
            AuthDefaults {
                rtmp_agents: "FMLE".to_string(),
                ..AuthDefaults::default()
            },
            vec![
                (
                    "blank",
                    AppAuthOverride {
                        rtmp_agents: Some("  ".to_string()),
                        ..AppAuthOverride::default()
                    },
                ),
                (
                    "custom",
                    AppAuthOverride {
                        rtmp_agents: Some("*".to_string()),
                        ..AppAuthOverride::default()
                    },
                ),
            ],
        );
        assert_eq!(
            settings.resolve("blank").unwrap().rtmp_agents,
            AgentAllowList::parse("FMLE")
        );
        assert!(settings.resolve("custom").unwrap().rtmp_agents.allows_all());
    }

    #[test]
    fn test_attach_rules() {
        let inactive = settings_with(
            AuthDefaults::default(),
            vec![(
                "live",
                AppAuthOverride {
                    active: Some(true),
                    ..AppAuthOverride::default()
                },
            )],
        );
        assert!(inactive.resolve("other").is_none());
        assert!(inactive.resolve("live").unwrap().active);

        let active = settings_with(
            AuthDefaults {
                active: true,
                ..AuthDefaults::default()
            },
            vec![],
        );
        assert_eq!(active.resolve("other"), Some(active.resolve_defaults()));
    }

    #[test]
    fn test_resolve_path() {
        let settings = settings_with(AuthDefaults::default(), vec![]);
        assert_eq!(
            settings.resolve_path("users.credentials"),
            PathBuf::from("conf").join("users.credentials")
        );
        assert_eq!(
            settings.resolve_path("/etc/keys/pub.pem"),
            PathBuf::from("/etc/keys/pub.pem")
        );
    }
}
