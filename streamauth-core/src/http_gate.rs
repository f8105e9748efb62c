//! Authorization of HTTP media requests (HLS playlists and segments)
//!
//! The host's HTTP layer extracts request parameters and the request URI and
//! keeps one session [`Connection`] per client; this module decides.

use std::collections::HashMap;
use std::sync::Arc;

use crate::authenticator::{PASSWORD_KEY, USERNAME_KEY};
use crate::connection::{Connection, ConnectExtras, Role, SessionState};
use crate::registry::ScopeAuthRegistry;

pub const TYPE_PARAM: &str = "type";
pub const STREAM_NAME_PARAM: &str = "streamName";
const UNDEFINED: &str = "undefined";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpGateDecision {
    Allow,
    /// Credentials were checked and rejected.
    Unauthorized,
    /// No usable credentials in the request.
    PreconditionFailed,
    /// The application has no usable auth setup.
    Misconfigured,
}

impl HttpGateDecision {
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Allow => 200,
            Self::Unauthorized => 401,
            Self::PreconditionFailed => 412,
            Self::Misconfigured => 500,
        }
    }

    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Stream name from a request URI: last path segment up to the first `.` or
/// `_` (`/live/stream1_720p.m3u8` gives `stream1`).
pub fn stream_name_from_uri(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let segment = path.rsplit('/').next().unwrap_or(path);
    segment.split(['.', '_']).next().unwrap_or(segment)
}

fn is_usable(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty() && v != UNDEFINED)
}

/// Decide one HTTP request for application `app`.
pub async fn authorize_request(
    registry: &ScopeAuthRegistry,
    app: &str,
    session: &Arc<Connection>,
    params: &HashMap<String, String>,
    uri: &str,
) -> HttpGateDecision {
    let param = |key: &str| params.get(key).map(String::as_str);
    let username = param(USERNAME_KEY);
    let password = param(PASSWORD_KEY);
    let token = param(ConnectExtras::TOKEN_KEY).filter(|t| !t.trim().is_empty());

    if token.is_none() && !(is_usable(username) && is_usable(password)) {
        tracing::debug!(app, connection = %session.id(), "No usable credentials on HTTP request");
        session.clear_context();
        return HttpGateDecision::PreconditionFailed;
    }

    let Some(dispatch) = registry.dispatch(app) else {
        tracing::error!(app, "HTTP request for application without auth");
        return HttpGateDecision::Misconfigured;
    };
    let Some(validator) = dispatch.validator() else {
        tracing::error!(app, "HTTP request for application with failed validator");
        return HttpGateDecision::Misconfigured;
    };

    let kind = param(TYPE_PARAM).unwrap_or(Role::Subscriber.as_str());
    let stream = param(STREAM_NAME_PARAM).unwrap_or_else(|| stream_name_from_uri(uri));

    let allowed = if let Some(authorizer) = validator.stream_authorizer() {
        let Ok(role) = kind.parse::<Role>() else {
            tracing::warn!(app, kind, "Unsupported request type");
            session.clear_context();
            return HttpGateDecision::Unauthorized;
        };
        session.update_context(|ctx| {
            ctx.username = Some(username.unwrap_or_default().to_string());
            ctx.password = Some(password.unwrap_or_default().to_string());
            ctx.token = token.map(str::to_string);
            ctx.state = SessionState::Authorizing;
        });
        authorizer.authorize(session, role, stream).await
    } else {
        let Some(http) = dispatch.http_authenticator() else {
            return HttpGateDecision::Misconfigured;
        };
        let allowed = http.authenticate_request(session, params.clone()).await;
        if allowed {
            session.update_context(|ctx| {
                ctx.role = kind.parse().ok();
                ctx.stream_id = Some(stream.to_string());
            });
        }
        allowed
    };

    if allowed {
        session.update_context(|ctx| ctx.state = SessionState::Authorized);
        HttpGateDecision::Allow
    } else {
        tracing::warn!(app, connection = %session.id(), stream, "Unauthorized HTTP request");
        session.clear_context();
        HttpGateDecision::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_from_uri() {
        assert_eq!(stream_name_from_uri("/live/stream1.m3u8"), "stream1");
        assert_eq!(stream_name_from_uri("/live/stream1_720p3.ts"), "stream1");
        assert_eq!(stream_name_from_uri("/live/stream1.m3u8?token=x"), "stream1");
        assert_eq!(stream_name_from_uri("plain"), "plain");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(HttpGateDecision::Allow.status_code(), 200);
        assert_eq!(HttpGateDecision::Unauthorized.status_code(), 401);
        assert_eq!(HttpGateDecision::PreconditionFailed.status_code(), 412);
        assert_eq!(HttpGateDecision::Misconfigured.status_code(), 500);
    }

    #[test]
    fn test_usable_credentials() {
        assert!(is_usable(Some("alice")));
        assert!(!is_usable(Some("undefined")));
        assert!(!is_usable(Some("  ")));
        assert!(!is_usable(None));
    }
}
