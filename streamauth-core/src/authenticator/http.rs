use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{delegate, ProtocolAuthenticator, PASSWORD_KEY, USERNAME_KEY};
use crate::connection::{AuthContext, ConnectExtras, Connection};
use crate::params::parse_pairs;
use crate::validator::AuthValidator;

/// Gate for HTTP requests. The host keeps one [`Connection`] per HTTP session;
/// once a request on that session passes, later requests skip validation.
pub struct HttpAuthenticator {
    validator: Arc<dyn AuthValidator>,
}

impl HttpAuthenticator {
    pub fn new(validator: Arc<dyn AuthValidator>) -> Self {
        Self { validator }
    }

    /// Authenticate one request's parameters against the session connection.
    pub async fn authenticate_request(
        &self,
        session: &Connection,
        params: HashMap<String, String>,
    ) -> bool {
        if session
            .context()
            .has_permission(AuthContext::AUTHORIZATION_COMPLETED)
        {
            tracing::trace!(connection = %session.id(), "Session already authorized");
            return true;
        }

        let (Some(username), Some(password)) = (params.get(USERNAME_KEY), params.get(PASSWORD_KEY))
        else {
            tracing::warn!(connection = %session.id(), "Missing request parameter(s)");
            return false;
        };
        let (username, password) = (username.clone(), password.clone());

        let allowed = delegate(
            &self.validator,
            session,
            &username,
            &password,
            ConnectExtras::Params(params),
        )
        .await;
        if allowed {
            session.update_context(|ctx| ctx.grant(AuthContext::AUTHORIZATION_COMPLETED));
        }
        allowed
    }
}

#[async_trait]
impl ProtocolAuthenticator for HttpAuthenticator {
    fn kind(&self) -> &'static str {
        "http"
    }

    /// Request parameters are the session's connect params plus any
    /// `key=value` args; args win on conflict.
    async fn authenticate(&self, conn: &Connection, args: &[String]) -> bool {
        let mut params = conn.connect_params().clone();
        if let Some(extra) = parse_pairs(args) {
            params.extend(extra);
        }
        self.authenticate_request(conn, params).await
    }
}
