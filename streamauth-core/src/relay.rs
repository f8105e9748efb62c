//! Internal cluster-relay identity
//!
//! Edge/origin nodes re-stream to each other over ordinary protocol
//! connections. Those connections identify themselves with a reserved
//! query-parameter pair and prove membership with the shared cluster secret.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Username used by relay connections when credentials are forwarded.
pub const RELAY_USERNAME: &str = "cluster-restreamer";
/// Marker keys; both must be present for a connection to claim relay identity.
pub const RELAY_CONTEXT_KEY: &str = "cluster-restreamer-context";
pub const RELAY_NAME_KEY: &str = "cluster-restreamer-name";
/// Key carrying the cluster secret on relay connections.
pub const RELAY_SECRET_KEY: &str = "restreamer";

/// Checks relay claims against the cluster shared secret.
#[derive(Clone, Default)]
pub struct RelayVerifier {
    secret: Option<Arc<[u8]>>,
}

impl RelayVerifier {
    /// An empty secret disables relay authentication entirely.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| Arc::from(s.as_bytes())),
        }
    }

    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Constant-time comparison against the cluster secret.
    pub fn verify(&self, provided: &str) -> bool {
        let Some(expected) = &self.secret else {
            tracing::warn!("Relay authentication attempted but no cluster secret is configured");
            return false;
        };
        expected[..].ct_eq(provided.as_bytes()).into()
    }

    /// Whether connect parameters carry the relay marker pair.
    pub fn is_relay_request(params: &HashMap<String, String>) -> bool {
        params.contains_key(RELAY_CONTEXT_KEY) && params.contains_key(RELAY_NAME_KEY)
    }

    pub fn is_relay_username(username: &str) -> bool {
        username == RELAY_USERNAME
    }
}

impl fmt::Debug for RelayVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}
