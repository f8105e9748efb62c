use async_trait::async_trait;
use std::sync::Arc;

use super::{delegate, ProtocolAuthenticator, PASSWORD_KEY, USERNAME_KEY};
use crate::connection::{ConnectExtras, Connection};
use crate::params::parse_pairs;
use crate::validator::AuthValidator;

/// Gate for protocols that deliver `key=value` argument strings (RTSP,
/// MPEG-TS).
pub struct PairsAuthenticator {
    kind: &'static str,
    validator: Arc<dyn AuthValidator>,
}

impl PairsAuthenticator {
    pub fn rtsp(validator: Arc<dyn AuthValidator>) -> Self {
        Self {
            kind: "rtsp",
            validator,
        }
    }

    pub fn mpegts(validator: Arc<dyn AuthValidator>) -> Self {
        Self {
            kind: "mpegts",
            validator,
        }
    }
}

#[async_trait]
impl ProtocolAuthenticator for PairsAuthenticator {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn authenticate(&self, conn: &Connection, args: &[String]) -> bool {
        if args.is_empty() {
            tracing::warn!(connection = %conn.id(), kind = self.kind, "Missing connection parameter(s)");
            return false;
        }
        let Some(map) = parse_pairs(args) else {
            tracing::warn!(connection = %conn.id(), kind = self.kind, "Malformed connection parameter(s)");
            return false;
        };
        let (Some(username), Some(password)) = (map.get(USERNAME_KEY), map.get(PASSWORD_KEY))
        else {
            tracing::warn!(connection = %conn.id(), kind = self.kind, "Missing authentication parameter(s)");
            return false;
        };

        let (username, password) = (username.clone(), password.clone());
        delegate(
            &self.validator,
            conn,
            &username,
            &password,
            ConnectExtras::Params(map),
        )
        .await
    }
}
