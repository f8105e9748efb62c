//! Remote HTTP validation service
//!
//! The connect gate only records credentials. Publish and playback are
//! authorized by POSTing the stored credentials to the remote service, either
//! awaiting the answer (strict) or accepting immediately and closing the
//! connection if the deferred answer is a denial (lazy).

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

use super::{AuthValidator, StreamAuthorizer};
use crate::config::RoundTripConfig;
use crate::connection::{AuthContext, ConnectExtras, Connection, Role, SessionState};
use crate::relay::RelayVerifier;
use crate::{Error, Result};

/// Connect and request timeout for every remote call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(9000);

/// Request body sent to the validate and invalidate endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AuthData<'a> {
    /// Omitted on invalidation.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'a str>,
    pub username: &'a str,
    pub password: &'a str,
    pub token: &'a str,
    #[serde(rename = "streamID")]
    pub stream_id: &'a str,
    pub scope: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "authenticationResponseData")]
    pub authentication_response_data: Option<serde_json::Value>,
}

impl AuthResponse {
    /// Opaque response data as a string; non-string JSON is kept serialized.
    pub fn response_data(&self) -> Option<String> {
        self.authentication_response_data.as_ref().map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn store_on(&self, ctx: &mut AuthContext) {
        if let Some(url) = &self.url {
            ctx.signed_url = Some(url.clone());
        }
        if let Some(data) = self.response_data() {
            ctx.auth_response_data = Some(data);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripMode {
    Strict,
    Lazy,
}

struct Credentials {
    username: String,
    password: String,
    token: String,
}

impl Credentials {
    fn from_context(ctx: &AuthContext) -> Option<Self> {
        Some(Self {
            username: ctx.username.clone()?,
            password: ctx.password.clone()?,
            token: ctx.token.clone().unwrap_or_default(),
        })
    }
}

type InFlightKey = (String, Role, String);

struct Inner {
    config: RoundTripConfig,
    validate_url: String,
    invalidate_url: Option<String>,
    client: reqwest::Client,
    relay: RelayVerifier,
    tasks: TaskTracker,
    /// Held across close/wait/reopen of `tasks`.
    drain_lock: tokio::sync::Mutex<()>,
    in_flight: DashMap<InFlightKey, ()>,
}

impl Inner {
    async fn post(&self, url: &str, data: &AuthData<'_>) -> Result<AuthResponse> {
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(data)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Transport(format!(
                "{url} responded with status {status}"
            )));
        }
        let body: AuthResponse = response.json().await?;
        tracing::debug!(url, result = body.result, "Remote auth response");
        Ok(body)
    }

    async fn validate(
        &self,
        role: Role,
        credentials: &Credentials,
        stream: &str,
        scope: &str,
    ) -> Result<AuthResponse> {
        let data = AuthData {
            kind: Some(role.as_str()),
            username: &credentials.username,
            password: &credentials.password,
            token: &credentials.token,
            stream_id: stream,
            scope,
        };
        self.post(&self.validate_url, &data).await
    }

    fn mode(&self) -> RoundTripMode {
        if self.config.lazy {
            RoundTripMode::Lazy
        } else {
            RoundTripMode::Strict
        }
    }
}

/// Validator backed by a remote HTTP service.
#[derive(Clone)]
pub struct RoundTripValidator {
    inner: Arc<Inner>,
}

impl RoundTripValidator {
    pub fn new(config: RoundTripConfig, relay: RelayVerifier) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                validate_url: config.validate_url(),
                invalidate_url: config.invalidate_url(),
                config,
                client,
                relay,
                tasks: TaskTracker::new(),
                drain_lock: tokio::sync::Mutex::new(()),
                in_flight: DashMap::new(),
            }),
        })
    }

    pub fn mode(&self) -> RoundTripMode {
        self.inner.mode()
    }

    pub fn config(&self) -> &RoundTripConfig {
        &self.inner.config
    }

    /// Background validations still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Wait until every lazy validation spawned so far has finished.
    pub async fn drain(&self) {
        // A reopen from another drainer would leave `wait` parked forever.
        let _guard = self.inner.drain_lock.lock().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    pub async fn authorize_publish(&self, conn: &Arc<Connection>, stream: &str) -> bool {
        self.authorize_stream(conn, Role::Publisher, stream).await
    }

    pub async fn authorize_playback(&self, conn: &Arc<Connection>, stream: &str) -> bool {
        self.authorize_stream(conn, Role::Subscriber, stream).await
    }

    async fn authorize_stream(&self, conn: &Arc<Connection>, role: Role, stream: &str) -> bool {
        let Some(credentials) = Credentials::from_context(&conn.context()) else {
            tracing::debug!(connection = %conn.id(), "No stored credentials, nothing to authorize");
            return true;
        };

        if RelayVerifier::is_relay_username(&credentials.username) {
            let allowed = self.inner.relay.verify(&credentials.password);
            if allowed {
                persist_role(conn, role, stream);
            }
            return allowed;
        }

        match self.mode() {
            RoundTripMode::Strict => {
                match self
                    .inner
                    .validate(role, &credentials, stream, conn.scope_name())
                    .await
                {
                    Ok(response) if response.result => {
                        conn.update_context(|ctx| {
                            ctx.role = Some(role);
                            ctx.stream_id = Some(stream.to_string());
                            response.store_on(ctx);
                        });
                        true
                    }
                    Ok(_) => {
                        tracing::warn!(
                            connection = %conn.id(),
                            role = role.as_str(),
                            stream,
                            "Remote service denied stream access"
                        );
                        false
                    }
                    Err(e) => {
                        log_failure(conn, &e, "Remote validation failed");
                        false
                    }
                }
            }
            RoundTripMode::Lazy => {
                persist_role(conn, role, stream);
                self.spawn_lazy(conn.clone(), role, stream.to_string(), credentials);
                true
            }
        }
    }

    fn spawn_lazy(&self, conn: Arc<Connection>, role: Role, stream: String, credentials: Credentials) {
        let key = (conn.id().to_string(), role, stream.clone());
        if self.inner.in_flight.insert(key.clone(), ()).is_some() {
            tracing::debug!(connection = %conn.id(), stream, "Lazy validation already in flight");
            return;
        }

        let inner = self.inner.clone();
        self.inner.tasks.spawn(async move {
            let outcome = inner
                .validate(role, &credentials, &stream, conn.scope_name())
                .await;
            inner.in_flight.remove(&key);

            match outcome {
                Ok(response) if response.result => {
                    conn.update_context(|ctx| response.store_on(ctx));
                }
                outcome => {
                    if let Err(e) = &outcome {
                        log_failure(&conn, e, "Lazy validation failed");
                    }
                    if conn.is_connected() {
                        tracing::warn!(
                            connection = %conn.id(),
                            stream,
                            "Closing connected client due to authentication failure"
                        );
                        conn.update_context(|ctx| ctx.state = SessionState::Rejected);
                        conn.close();
                    }
                }
            }
        });
    }

    /// Tell the remote service a publisher went away. Only publishers with
    /// stored credentials are invalidated, and only when an invalidate
    /// endpoint is configured.
    pub async fn invalidate(&self, conn: &Connection) -> Result<Option<AuthResponse>> {
        let Some(url) = &self.inner.invalidate_url else {
            return Ok(None);
        };
        let ctx = conn.context();
        if ctx.role != Some(Role::Publisher) {
            return Ok(None);
        }
        let (Some(stream_id), Some(credentials)) =
            (ctx.stream_id.as_deref(), Credentials::from_context(&ctx))
        else {
            return Ok(None);
        };

        let data = AuthData {
            kind: None,
            username: &credentials.username,
            password: &credentials.password,
            token: &credentials.token,
            stream_id,
            scope: conn.scope_name(),
        };
        self.inner.post(url, &data).await.map(Some)
    }
}

/// Transport failures are routine for a remote service; anything else is a bug
/// in the exchange and is logged at error.
fn log_failure(conn: &Connection, error: &Error, message: &str) {
    if error.is_expected() {
        tracing::warn!(connection = %conn.id(), error = %error, "{message}");
    } else {
        tracing::error!(connection = %conn.id(), error = %error, "{message}");
    }
}

fn persist_role(conn: &Connection, role: Role, stream: &str) {
    conn.update_context(|ctx| {
        ctx.role = Some(role);
        ctx.stream_id = Some(stream.to_string());
    });
}

impl std::fmt::Debug for RoundTripValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundTripValidator")
            .field("validate_url", &self.inner.validate_url)
            .field("invalidate_url", &self.inner.invalidate_url)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthValidator for RoundTripValidator {
    fn name(&self) -> &str {
        "round_trip"
    }

    async fn initialize(&self) -> Result<()> {
        tracing::info!(
            validate_url = %self.inner.validate_url,
            invalidate_url = ?self.inner.invalidate_url,
            mode = ?self.mode(),
            "Round-trip validator ready"
        );
        Ok(())
    }

    async fn on_connect_authenticate(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        extras: &ConnectExtras,
    ) -> bool {
        if username.is_empty() || password.is_empty() {
            tracing::warn!(
                connection = %conn.id(),
                "Parameter 'username' and/or 'password' not provided"
            );
            return false;
        }

        let token = extras.token();
        if token.is_none()
            && self.inner.config.client_token_required
            && !RelayVerifier::is_relay_username(username)
        {
            tracing::warn!(connection = %conn.id(), "Client token is required but was not provided");
            return false;
        }

        conn.update_context(|ctx| {
            ctx.username = Some(username.to_string());
            ctx.password = Some(password.to_string());
            if let Some(token) = token {
                ctx.token = Some(token.to_string());
            }
        });
        true
    }

    fn stream_authorizer(&self) -> Option<&dyn StreamAuthorizer> {
        Some(self)
    }
}

#[async_trait]
impl StreamAuthorizer for RoundTripValidator {
    async fn authorize(&self, conn: &Arc<Connection>, role: Role, stream: &str) -> bool {
        self.authorize_stream(conn, role, stream).await
    }

    async fn on_disconnect(&self, conn: &Connection) {
        match self.invalidate(conn).await {
            Ok(Some(response)) => {
                tracing::debug!(connection = %conn.id(), result = response.result, "Invalidated credentials");
            }
            Ok(None) => {}
            Err(e) => log_failure(conn, &e, "Failed to invalidate credentials"),
        }
    }

    async fn drain(&self) {
        RoundTripValidator::drain(self).await;
    }
}
