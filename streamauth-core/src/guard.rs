use std::sync::Arc;

use crate::connection::{Connection, Role, SessionState};
use crate::dispatch::AuthenticatorDispatch;

/// Publish/playback interception for one application.
///
/// Re-authorizes stream actions from the auth context the connect gate left
/// on the connection. Applications whose validator makes no stream decisions
/// allow every action that reaches this point.
#[derive(Debug, Clone)]
pub struct StreamActionGuard {
    dispatch: Arc<AuthenticatorDispatch>,
    missing_connection_response: bool,
}

impl StreamActionGuard {
    pub fn new(dispatch: Arc<AuthenticatorDispatch>, missing_connection_response: bool) -> Self {
        Self {
            dispatch,
            missing_connection_response,
        }
    }

    pub async fn authorize_publish(&self, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        self.authorize(conn, Role::Publisher, stream).await
    }

    pub async fn authorize_play(&self, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        self.authorize(conn, Role::Subscriber, stream).await
    }

    pub async fn authorize(&self, conn: Option<&Arc<Connection>>, role: Role, stream: &str) -> bool {
        let Some(conn) = conn else {
            tracing::debug!(
                stream,
                allowed = self.missing_connection_response,
                "No connection for stream action"
            );
            return self.missing_connection_response;
        };

        let previous = conn.state();
        match previous {
            SessionState::Pending => {
                tracing::warn!(connection = %conn.id(), stream, "Stream action before connect authentication");
                return false;
            }
            SessionState::Rejected => {
                tracing::debug!(connection = %conn.id(), stream, "Connection already rejected");
                return false;
            }
            SessionState::Connected | SessionState::Authorizing | SessionState::Authorized => {}
        }

        let Some(authorizer) = self
            .dispatch
            .validator()
            .and_then(|validator| validator.stream_authorizer())
        else {
            return true;
        };

        conn.update_context(|ctx| ctx.state = SessionState::Authorizing);
        let allowed = authorizer.authorize(conn, role, stream).await;
        conn.update_context(|ctx| {
            // A lazy check may already have rejected the connection.
            if ctx.state == SessionState::Authorizing {
                // A denied action leaves the connection usable for other streams.
                ctx.state = if allowed {
                    SessionState::Authorized
                } else {
                    previous
                };
            }
        });

        if !allowed {
            tracing::warn!(
                connection = %conn.id(),
                role = role.as_str(),
                stream,
                "Stream action denied"
            );
        }
        allowed
    }
}
