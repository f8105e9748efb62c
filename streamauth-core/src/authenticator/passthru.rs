use async_trait::async_trait;

use super::ProtocolAuthenticator;
use crate::connection::Connection;

/// Accepts every connection without consulting a validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ProtocolAuthenticator for AllowAll {
    fn kind(&self) -> &'static str {
        "allow_all"
    }

    async fn authenticate(&self, conn: &Connection, _args: &[String]) -> bool {
        tracing::trace!(connection = %conn.id(), "Pass-through authentication");
        true
    }
}

/// Rejects every connection. Selected for unrecognized protocols and for
/// applications whose validator failed to initialize.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

#[async_trait]
impl ProtocolAuthenticator for RejectAll {
    fn kind(&self) -> &'static str {
        "reject_all"
    }

    async fn authenticate(&self, conn: &Connection, _args: &[String]) -> bool {
        tracing::debug!(connection = %conn.id(), protocol = %conn.protocol(), "Connection blocked");
        false
    }
}
