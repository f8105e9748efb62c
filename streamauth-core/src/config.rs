use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::connection::Protocol;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Cluster membership settings used by relay connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Shared secret relay nodes present as `restreamer`. Unset disables relay
    /// authentication (relay claims are rejected).
    pub relay_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory relative credential/key paths are resolved against.
    pub conf_dir: String,
    /// Plugin-wide defaults every application inherits from.
    pub defaults: AuthDefaults,
    /// Per-application overrides keyed by application name.
    pub applications: HashMap<String, AppAuthOverride>,
    /// Stream guard answer when the host cannot supply a connection.
    pub missing_connection_response: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            conf_dir: "conf".to_string(),
            defaults: AuthDefaults::default(),
            applications: HashMap::new(),
            missing_connection_response: true,
        }
    }
}

/// Per-protocol "secure" switches. A protocol set to false is passed through
/// without credential checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolFlags {
    pub rtmp: bool,
    pub rtsp: bool,
    pub rtc: bool,
    pub srt: bool,
    pub mpegts: bool,
    pub http: bool,
    pub ws: bool,
}

impl ProtocolFlags {
    #[must_use]
    pub const fn all(value: bool) -> Self {
        Self {
            rtmp: value,
            rtsp: value,
            rtc: value,
            srt: value,
            mpegts: value,
            http: value,
            ws: value,
        }
    }

    /// Relay connections are never secured through these flags.
    #[must_use]
    pub const fn get(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Rtmp => self.rtmp,
            Protocol::Rtsp => self.rtsp,
            Protocol::Rtc => self.rtc,
            Protocol::Srt => self.srt,
            Protocol::Mpegts => self.mpegts,
            Protocol::Http => self.http,
            Protocol::Ws => self.ws,
            Protocol::Relay => false,
        }
    }
}

impl Default for ProtocolFlags {
    fn default() -> Self {
        Self::all(true)
    }
}

/// Same shape as [`ProtocolFlags`], every field optional so unset values
/// inherit from the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolOverrides {
    pub rtmp: Option<bool>,
    pub rtsp: Option<bool>,
    pub rtc: Option<bool>,
    pub srt: Option<bool>,
    pub mpegts: Option<bool>,
    pub http: Option<bool>,
    pub ws: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthDefaults {
    /// Attach auth to applications without their own override.
    pub active: bool,
    pub protocols: ProtocolFlags,
    /// Read RTMP credentials from the connect query string.
    pub rtmp_query_params: bool,
    /// Semicolon-separated RTMP agent patterns, `*` allows all.
    pub rtmp_agents: String,
    /// Credentials file for the built-in validator.
    pub data_source: String,
    /// Global validator. Unset means the built-in file validator.
    pub validator: Option<ValidatorConfig>,
}

impl AuthDefaults {
    pub const DEFAULT_DATA_SOURCE: &'static str = "simple-auth-plugin.credentials";
}

impl Default for AuthDefaults {
    fn default() -> Self {
        Self {
            active: false,
            protocols: ProtocolFlags::default(),
            rtmp_query_params: true,
            rtmp_agents: "*".to_string(),
            data_source: Self::DEFAULT_DATA_SOURCE.to_string(),
            validator: None,
        }
    }
}

/// Application-level override. Every field left unset inherits the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppAuthOverride {
    pub active: Option<bool>,
    pub protocols: ProtocolOverrides,
    pub rtmp_query_params: Option<bool>,
    pub rtmp_agents: Option<String>,
    pub validator: Option<ValidatorConfig>,
}

/// Validation backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorConfig {
    /// Line-oriented `username password` file
    File { data_source: String },
    /// Signed token check. `secret` is the shared secret for HS* or the path of
    /// a PEM public key for RS*.
    Jwt { secret: String, algorithm: String },
    /// Remote HTTP service
    RoundTrip(RoundTripConfig),
    /// Validator registered programmatically in the `ValidatorCatalog`
    Named { name: String },
}

impl ValidatorConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Jwt { .. } => "jwt",
            Self::RoundTrip(_) => "round_trip",
            Self::Named { .. } => "named",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundTripConfig {
    /// Scheme prefix including `://`
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub validate_endpoint: String,
    pub invalidate_endpoint: Option<String>,
    /// Accept immediately and validate in the background.
    pub lazy: bool,
    /// Reject connections that do not present a token.
    pub client_token_required: bool,
}

impl RoundTripConfig {
    #[must_use]
    pub fn validate_url(&self) -> String {
        format!(
            "{}{}:{}{}",
            self.protocol, self.host, self.port, self.validate_endpoint
        )
    }

    /// Endpoints shorter than 4 characters are treated as unset.
    #[must_use]
    pub fn invalidate_url(&self) -> Option<String> {
        self.invalidate_endpoint
            .as_deref()
            .filter(|endpoint| endpoint.len() > 3)
            .map(|endpoint| format!("{}{}:{}{}", self.protocol, self.host, self.port, endpoint))
    }
}

impl Default for RoundTripConfig {
    fn default() -> Self {
        Self {
            protocol: "http://".to_string(),
            host: "localhost".to_string(),
            port: "3000".to_string(),
            validate_endpoint: "/validateCredentials".to_string(),
            invalidate_endpoint: Some("/invalidateCredentials".to_string()),
            lazy: false,
            client_token_required: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STREAMAUTH__AUTH__DEFAULTS__ACTIVE=true, etc.
        builder = builder.add_source(
            Environment::with_prefix("STREAMAUTH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations that should stop startup. Backend-specific
    /// problems (unsupported JWT algorithms, unreadable keys) surface when the
    /// backend initializes and only degrade the affected application.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }
        if self.auth.defaults.data_source.trim().is_empty() {
            errors.push("auth.defaults.data_source must not be empty".to_string());
        }

        if let Some(validator) = &self.auth.defaults.validator {
            validate_validator("auth.defaults.validator", validator, &mut errors);
        }
        for (name, app) in &self.auth.applications {
            if let Some(validator) = &app.validator {
                validate_validator(
                    &format!("auth.applications.{name}.validator"),
                    validator,
                    &mut errors,
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_validator(path: &str, validator: &ValidatorConfig, errors: &mut Vec<String>) {
    match validator {
        ValidatorConfig::File { data_source } if data_source.trim().is_empty() => {
            errors.push(format!("{path}.data_source must not be empty"));
        }
        ValidatorConfig::Jwt { secret, .. } if secret.is_empty() => {
            errors.push(format!("{path}.secret must not be empty"));
        }
        ValidatorConfig::RoundTrip(rt) => {
            if rt.host.trim().is_empty() {
                errors.push(format!("{path}.host must not be empty"));
            }
            if rt.port.parse::<u16>().is_err() {
                errors.push(format!("{path}.port '{}' is not a valid port", rt.port));
            }
            if !rt.validate_endpoint.starts_with('/') {
                errors.push(format!("{path}.validate_endpoint must start with '/'"));
            }
        }
        ValidatorConfig::Named { name } if name.trim().is_empty() => {
            errors.push(format!("{path}.name must not be empty"));
        }
        _ => {}
    }
}
