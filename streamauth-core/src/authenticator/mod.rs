//! Protocol authenticators
//!
//! Each authenticator turns a protocol's connect-time parameters into the
//! canonical `(username, password, extras)` triple and hands it to the
//! application's validator.

mod http;
mod pairs;
mod passthru;
mod query;
mod rtmp;

use async_trait::async_trait;
use std::sync::Arc;

use crate::connection::{ConnectExtras, Connection};
use crate::validator::AuthValidator;

pub use http::HttpAuthenticator;
pub use pairs::PairsAuthenticator;
pub use passthru::{AllowAll, RejectAll};
pub use query::QueryAuthenticator;
pub use rtmp::RtmpAuthenticator;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Connect-time gate for one protocol.
#[async_trait]
pub trait ProtocolAuthenticator: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// `args` are the positional connect arguments the protocol delivered;
    /// map-style parameters are read from the connection itself.
    async fn authenticate(&self, conn: &Connection, args: &[String]) -> bool;
}

/// Record the normalized credentials on the connection, then ask the validator.
pub(crate) async fn delegate(
    validator: &Arc<dyn AuthValidator>,
    conn: &Connection,
    username: &str,
    password: &str,
    extras: ConnectExtras,
) -> bool {
    conn.update_context(|ctx| {
        ctx.username = Some(username.to_string());
        ctx.password = Some(password.to_string());
        ctx.token = extras.token().map(str::to_string);
    });

    let allowed = validator
        .on_connect_authenticate(conn, username, password, &extras)
        .await;
    if !allowed {
        tracing::warn!(
            connection = %conn.id(),
            protocol = %conn.protocol(),
            validator = validator.name(),
            "Credentials rejected"
        );
    }
    allowed
}
