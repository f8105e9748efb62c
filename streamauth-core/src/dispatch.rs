//! Per-application authenticator selection

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::authenticator::{
    AllowAll, HttpAuthenticator, PairsAuthenticator, ProtocolAuthenticator, QueryAuthenticator,
    RejectAll, RtmpAuthenticator,
};
use crate::config::ProtocolFlags;
use crate::connection::{Connection, Protocol, ProtocolTag};
use crate::relay::RelayVerifier;
use crate::settings::ResolvedAuthConfig;
use crate::validator::AuthValidator;

/// Maps a connection's protocol tag to the authenticator that gates it.
///
/// Built once per application from its resolved configuration. Every protocol
/// authenticator shares the application's validator.
pub struct AuthenticatorDispatch {
    enabled: AtomicBool,
    protocols: ProtocolFlags,
    table: HashMap<Protocol, Arc<dyn ProtocolAuthenticator>>,
    allow_all: Arc<dyn ProtocolAuthenticator>,
    reject_all: Arc<dyn ProtocolAuthenticator>,
    validator: Option<Arc<dyn AuthValidator>>,
    http: Option<Arc<HttpAuthenticator>>,
}

impl AuthenticatorDispatch {
    pub fn new(
        config: &ResolvedAuthConfig,
        validator: Arc<dyn AuthValidator>,
        relay: RelayVerifier,
    ) -> Self {
        let http = Arc::new(HttpAuthenticator::new(validator.clone()));
        let mut table: HashMap<Protocol, Arc<dyn ProtocolAuthenticator>> = HashMap::new();
        table.insert(
            Protocol::Rtmp,
            Arc::new(RtmpAuthenticator::new(
                validator.clone(),
                config.rtmp_query_params,
                config.rtmp_agents.clone(),
                relay,
            )),
        );
        table.insert(Protocol::Rtsp, Arc::new(PairsAuthenticator::rtsp(validator.clone())));
        table.insert(Protocol::Mpegts, Arc::new(PairsAuthenticator::mpegts(validator.clone())));
        table.insert(Protocol::Rtc, Arc::new(QueryAuthenticator::new("rtc", validator.clone())));
        table.insert(Protocol::Srt, Arc::new(QueryAuthenticator::new("srt", validator.clone())));
        table.insert(Protocol::Ws, Arc::new(QueryAuthenticator::new("ws", validator.clone())));
        table.insert(Protocol::Http, http.clone());

        Self {
            enabled: AtomicBool::new(config.active),
            protocols: config.protocols,
            table,
            allow_all: Arc::new(AllowAll),
            reject_all: Arc::new(RejectAll),
            validator: Some(validator),
            http: Some(http),
        }
    }

    /// Dispatch for an application whose validator could not be initialized.
    /// Every secured protocol is rejected.
    pub fn degraded(config: &ResolvedAuthConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.active),
            protocols: config.protocols,
            table: HashMap::new(),
            allow_all: Arc::new(AllowAll),
            reject_all: Arc::new(RejectAll),
            validator: None,
            http: None,
        }
    }

    pub fn select(&self, tag: &ProtocolTag) -> Arc<dyn ProtocolAuthenticator> {
        let protocol = match tag.known() {
            Ok(Protocol::Relay) => return self.allow_all.clone(),
            _ if !self.is_enabled() => return self.allow_all.clone(),
            Ok(protocol) => protocol,
            Err(e) => {
                tracing::error!(error = %e, "Unknown connection type, rejecting");
                return self.reject_all.clone();
            }
        };

        if !self.protocols.get(protocol) {
            return self.allow_all.clone();
        }
        match self.table.get(&protocol) {
            Some(authenticator) => authenticator.clone(),
            None => {
                tracing::debug!(%protocol, "No authenticator available, rejecting");
                self.reject_all.clone()
            }
        }
    }

    /// Run the connect gate for `conn`.
    pub async fn authenticate(&self, conn: &Connection, args: &[String]) -> bool {
        let authenticator = self.select(conn.protocol());
        tracing::trace!(
            connection = %conn.id(),
            authenticator = authenticator.kind(),
            "Selected authenticator"
        );
        authenticator.authenticate(conn, args).await
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub const fn is_degraded(&self) -> bool {
        self.validator.is_none()
    }

    pub const fn protocols(&self) -> &ProtocolFlags {
        &self.protocols
    }

    pub fn validator(&self) -> Option<&Arc<dyn AuthValidator>> {
        self.validator.as_ref()
    }

    pub fn http_authenticator(&self) -> Option<&Arc<HttpAuthenticator>> {
        self.http.as_ref()
    }
}

impl std::fmt::Debug for AuthenticatorDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatorDispatch")
            .field("enabled", &self.is_enabled())
            .field("degraded", &self.is_degraded())
            .field("protocols", &self.protocols)
            .field("validator", &self.validator.as_ref().map(|v| v.name()))
            .finish()
    }
}
