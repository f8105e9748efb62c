//! Host-facing connection model
//!
//! The host media server owns the real transport. It hands the auth layer a
//! [`Connection`] describing what arrived (protocol tag, scope, connect-time
//! parameters) and a close handler the auth layer may invoke when a deferred
//! authorization fails.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::Error;

/// Streaming protocols the auth layer knows how to gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rtmp,
    Rtsp,
    Rtc,
    Srt,
    Mpegts,
    Http,
    Ws,
    /// Intra-cluster relay connector. Never carries end-user credentials.
    Relay,
}

impl Protocol {
    /// Protocols that carry client credentials and can be secured.
    pub const SECURABLE: [Self; 7] = [
        Self::Rtmp,
        Self::Rtsp,
        Self::Rtc,
        Self::Srt,
        Self::Mpegts,
        Self::Http,
        Self::Ws,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rtmp => "rtmp",
            Self::Rtsp => "rtsp",
            Self::Rtc => "rtc",
            Self::Srt => "srt",
            Self::Mpegts => "mpegts",
            Self::Http => "http",
            Self::Ws => "ws",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rtmp" | "rtmpt" | "rtmps" | "rtmpe" => Ok(Self::Rtmp),
            "rtsp" | "rtsps" => Ok(Self::Rtsp),
            "rtc" | "webrtc" | "whip" | "whep" => Ok(Self::Rtc),
            "srt" => Ok(Self::Srt),
            "mpegts" | "mpeg-ts" | "ts" => Ok(Self::Mpegts),
            "http" | "https" | "hls" => Ok(Self::Http),
            "ws" | "wss" | "websocket" => Ok(Self::Ws),
            "relay" | "connector" => Ok(Self::Relay),
            other => Err(other.to_string()),
        }
    }
}

/// Protocol tag as delivered by the host. Unrecognized tags are kept so the
/// dispatch can log them before failing closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolTag {
    Known(Protocol),
    Unrecognized(String),
}

impl ProtocolTag {
    /// The recognized protocol, or [`Error::UnknownProtocol`] for a tag the
    /// auth layer cannot gate.
    pub fn known(&self) -> crate::Result<Protocol> {
        match self {
            Self::Known(protocol) => Ok(*protocol),
            Self::Unrecognized(tag) => Err(Error::UnknownProtocol(tag.clone())),
        }
    }
}

impl From<Protocol> for ProtocolTag {
    fn from(protocol: Protocol) -> Self {
        Self::Known(protocol)
    }
}

impl From<&str> for ProtocolTag {
    fn from(tag: &str) -> Self {
        tag.parse::<Protocol>()
            .map_or_else(Self::Unrecognized, Self::Known)
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(p) => p.fmt(f),
            Self::Unrecognized(tag) => write!(f, "unrecognized({tag})"),
        }
    }
}

/// Role a connection acquired through stream authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            other => Err(format!("unknown role type: {other}")),
        }
    }
}

/// Per-connection authorization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connect gate has not completed.
    #[default]
    Pending,
    Connected,
    Authorizing,
    Authorized,
    Rejected,
}

/// Attributes written during authentication and read by stream authorization.
#[derive(Clone, Default)]
pub struct AuthContext {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub role: Option<Role>,
    pub stream_id: Option<String>,
    pub signed_url: Option<String>,
    pub auth_response_data: Option<String>,
    pub permissions: Vec<String>,
    pub state: SessionState,
}

impl AuthContext {
    pub const AUTHORIZATION_COMPLETED: &'static str = "authorization_completed";

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn grant(&mut self, permission: &str) {
        if !self.has_permission(permission) {
            self.permissions.push(permission.to_string());
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("has_token", &self.token.is_some())
            .field("role", &self.role)
            .field("stream_id", &self.stream_id)
            .field("signed_url", &self.signed_url)
            .field("permissions", &self.permissions)
            .field("state", &self.state)
            .finish()
    }
}

/// Everything besides username/password a protocol authenticator forwards to
/// the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectExtras {
    #[default]
    None,
    /// Positional connect arguments (RTMP without query-param mode).
    Positional(Vec<String>),
    /// Key/value parameters (query strings, RTSP pairs, HTTP request params).
    Params(HashMap<String, String>),
}

impl ConnectExtras {
    pub const TOKEN_KEY: &'static str = "token";
    /// Positional RTMP convention: `username, password, token, ...`
    pub const TOKEN_POSITION: usize = 2;

    /// Token carried by the extras, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Positional(args) => args.get(Self::TOKEN_POSITION).map(String::as_str),
            Self::Params(map) => map.get(Self::TOKEN_KEY).map(String::as_str),
        }
    }
}

/// Invoked at most once when the auth layer force-closes a connection.
pub type CloseHandler = Arc<dyn Fn(&Connection) + Send + Sync>;

/// A client connection as seen by the auth layer.
pub struct Connection {
    id: String,
    protocol: ProtocolTag,
    scope_path: String,
    connect_params: HashMap<String, String>,
    context: RwLock<AuthContext>,
    connected: AtomicBool,
    close_handler: Option<CloseHandler>,
}

impl Connection {
    pub fn new(protocol: impl Into<ProtocolTag>, scope_path: impl Into<String>) -> Self {
        Self {
            id: nanoid::nanoid!(16),
            protocol: protocol.into(),
            scope_path: scope_path.into(),
            connect_params: HashMap::new(),
            context: RwLock::new(AuthContext::default()),
            connected: AtomicBool::new(true),
            close_handler: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.connect_params.extend(params);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_close_handler(mut self, handler: CloseHandler) -> Self {
        self.close_handler = Some(handler);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn protocol(&self) -> &ProtocolTag {
        &self.protocol
    }

    pub fn scope_path(&self) -> &str {
        &self.scope_path
    }

    /// Scope context path without the leading slash, as sent to remote services.
    pub fn scope_name(&self) -> &str {
        self.scope_path.strip_prefix('/').unwrap_or(&self.scope_path)
    }

    pub const fn connect_params(&self) -> &HashMap<String, String> {
        &self.connect_params
    }

    pub fn connect_param(&self, key: &str) -> Option<&str> {
        self.connect_params.get(key).map(String::as_str)
    }

    /// Snapshot of the current auth context.
    pub fn context(&self) -> AuthContext {
        self.context.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.context.read().state
    }

    pub fn update_context<R>(&self, f: impl FnOnce(&mut AuthContext) -> R) -> R {
        f(&mut self.context.write())
    }

    /// Drop all auth attributes. Called when the connection goes away.
    pub fn clear_context(&self) {
        *self.context.write() = AuthContext::default();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark the connection as gone without invoking the close handler.
    /// Used when the host reports a disconnect.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Force-close the connection. Only the first call reaches the host's
    /// close handler; returns whether this call performed the close.
    pub fn close(&self) -> bool {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        tracing::info!(connection = %self.id, protocol = %self.protocol, "Closing connection");
        if let Some(handler) = &self.close_handler {
            handler(self);
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("scope_path", &self.scope_path)
            .field("connected", &self.is_connected())
            .field("context", &*self.context.read())
            .finish_non_exhaustive()
    }
}
