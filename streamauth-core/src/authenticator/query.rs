use async_trait::async_trait;
use std::sync::Arc;

use super::{delegate, ProtocolAuthenticator, PASSWORD_KEY, USERNAME_KEY};
use crate::connection::{ConnectExtras, Connection};
use crate::params::decode_params;
use crate::validator::AuthValidator;

/// Gate for protocols whose credentials arrive as a connect-parameter map
/// (WebRTC, SRT, WebSocket). Values are URL-decoded and a leading `?` is
/// dropped from keys.
pub struct QueryAuthenticator {
    kind: &'static str,
    validator: Arc<dyn AuthValidator>,
}

impl QueryAuthenticator {
    pub fn new(kind: &'static str, validator: Arc<dyn AuthValidator>) -> Self {
        Self { kind, validator }
    }
}

#[async_trait]
impl ProtocolAuthenticator for QueryAuthenticator {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn authenticate(&self, conn: &Connection, _args: &[String]) -> bool {
        let map = decode_params(conn.connect_params());
        let (Some(username), Some(password)) = (map.get(USERNAME_KEY), map.get(PASSWORD_KEY))
        else {
            tracing::warn!(connection = %conn.id(), kind = self.kind, "Missing connection parameter(s)");
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
