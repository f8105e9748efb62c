use std::sync::Arc;

use crate::connection::{Connection, SessionState};
use crate::dispatch::AuthenticatorDispatch;
use crate::guard::StreamActionGuard;
use crate::{Error, Result};

/// Connection lifecycle hook registered for one application.
///
/// The host forwards connect, disconnect, publish and play events here.
#[derive(Debug, Clone)]
pub struct AppEventMonitor {
    app: String,
    dispatch: Arc<AuthenticatorDispatch>,
    guard: StreamActionGuard,
}

impl AppEventMonitor {
    pub fn new(
        app: impl Into<String>,
        dispatch: Arc<AuthenticatorDispatch>,
        missing_connection_response: bool,
    ) -> Self {
        let guard = StreamActionGuard::new(dispatch.clone(), missing_connection_response);
        Self {
            app: app.into(),
            dispatch,
            guard,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub const fn guard(&self) -> &StreamActionGuard {
        &self.guard
    }

    /// Connect gate. An error means the host must refuse the connection.
    pub async fn on_connect(&self, conn: &Connection, args: &[String]) -> Result<()> {
        if self.dispatch.authenticate(conn, args).await {
            conn.update_context(|ctx| ctx.state = SessionState::Connected);
            tracing::debug!(app = %self.app, connection = %conn.id(), "Connection authenticated");
            return Ok(());
        }

        conn.update_context(|ctx| ctx.state = SessionState::Rejected);
        tracing::warn!(
            app = %self.app,
            connection = %conn.id(),
            protocol = %conn.protocol(),
            "Rejecting client connection due to failed authentication"
        );
        Err(Error::Rejected(format!(
            "access to '{}' denied due to authentication failure",
            self.app
        )))
    }

    /// Invalidate remote state, then drop the connection's auth context.
    pub async fn on_disconnect(&self, conn: &Connection) {
        if let Some(authorizer) = self
            .dispatch
            .validator()
            .and_then(|validator| validator.stream_authorizer())
        {
            authorizer.on_disconnect(conn).await;
        }
        conn.mark_disconnected();
        conn.clear_context();
        tracing::debug!(app = %self.app, connection = %conn.id(), "Connection disconnected");
    }

    pub async fn on_publish(&self, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        self.guard.authorize_publish(conn, stream).await
    }

    pub async fn on_play(&self, conn: Option<&Arc<Connection>>, stream: &str) -> bool {
        self.guard.authorize_play(conn, stream).await
    }
}
