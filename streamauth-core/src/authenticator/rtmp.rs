use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{delegate, ProtocolAuthenticator, PASSWORD_KEY, USERNAME_KEY};
use crate::connection::{ConnectExtras, Connection};
use crate::params::{decode_or_raw, parse_query_string, AgentAllowList};
use crate::relay::{RelayVerifier, RELAY_SECRET_KEY, RELAY_USERNAME};
use crate::validator::AuthValidator;

/// Connect parameter carrying the client agent string.
pub const AGENT_PARAM: &str = "flashVer";
/// Connect parameter carrying the raw URL query string.
pub const QUERY_STRING_PARAM: &str = "queryString";

/// RTMP connect gate.
///
/// Credentials come from positional connect arguments, or from the connect
/// URL's query string when query-param mode is on. Relay connections are
/// recognized by their marker parameters and checked against the cluster
/// secret instead of the validator.
pub struct RtmpAuthenticator {
    validator: Arc<dyn AuthValidator>,
    query_params: bool,
    agents: AgentAllowList,
    relay: RelayVerifier,
}

impl RtmpAuthenticator {
    pub fn new(
        validator: Arc<dyn AuthValidator>,
        query_params: bool,
        agents: AgentAllowList,
        relay: RelayVerifier,
    ) -> Self {
        Self {
            validator,
            query_params,
            agents,
            relay,
        }
    }

    /// Connect params merged with the parsed query string. Explicit connect
    /// params win over query entries of the same name.
    fn connect_map(conn: &Connection) -> HashMap<String, String> {
        let mut map = conn
            .connect_param(QUERY_STRING_PARAM)
            .map(parse_query_string)
            .unwrap_or_default();
        map.extend(
            conn.connect_params()
                .iter()
                .filter(|(key, _)| key.as_str() != QUERY_STRING_PARAM)
                .map(|(key, value)| (key.clone(), decode_or_raw(value))),
        );
        map
    }

    fn authenticate_relay(&self, conn: &Connection, map: &HashMap<String, String>) -> bool {
        let Some(secret) = map.get(RELAY_SECRET_KEY) else {
            tracing::warn!(connection = %conn.id(), "Relay marker present without relay secret");
            return false;
        };
        if !self.relay.verify(secret) {
            tracing::warn!(connection = %conn.id(), "Relay secret mismatch");
            return false;
        }
        conn.update_context(|ctx| ctx.username = Some(RELAY_USERNAME.to_string()));
        tracing::debug!(connection = %conn.id(), "Relay connection authenticated");
        true
    }

    async fn authenticate_positional(&self, conn: &Connection, args: &[String]) -> bool {
        let [username, password, ..] = args else {
            tracing::warn!(connection = %conn.id(), "Missing connection parameter(s)");
            return false;
        };
        let username = decode_or_raw(username);
        let password = decode_or_raw(password);
        delegate(
            &self.validator,
            conn,
            &username,
            &password,
            ConnectExtras::Positional(args.to_vec()),
        )
        .await
    }
}

#[async_trait]
impl ProtocolAuthenticator for RtmpAuthenticator {
    fn kind(&self) -> &'static str {
        "rtmp"
    }

    async fn authenticate(&self, conn: &Connection, args: &[String]) -> bool {
        let agent = conn.connect_param(AGENT_PARAM);
        if !self.agents.allows(agent) {
            tracing::warn!(connection = %conn.id(), agent = ?agent, "Invalid or disallowed agent type");
            return false;
        }

        let map = Self::connect_map(conn);
        if RelayVerifier::is_relay_request(&map) {
            return self.authenticate_relay(conn, &map);
        }

        if !self.query_params {
            return self.authenticate_positional(conn, args).await;
        }

        match (map.get(USERNAME_KEY), map.get(PASSWORD_KEY)) {
            (Some(username), Some(password)) => {
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
            _ => {
                tracing::debug!(
                    connection = %conn.id(),
                    "No credentials in query string, falling back to connect arguments"
                );
                self.authenticate_positional(conn, args).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::test_support::RecordingValidator;
    use crate::connection::Protocol;
    use crate::relay::{RELAY_CONTEXT_KEY, RELAY_NAME_KEY};

    fn authenticator(
        validator: Arc<RecordingValidator>,
        query_params: bool,
        agents: &str,
    ) -> RtmpAuthenticator {
        RtmpAuthenticator::new(
            validator,
            query_params,
            AgentAllowList::parse(agents),
            RelayVerifier::new(Some("cluster")),
        )
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_positional_arguments_are_decoded() {
        let validator = RecordingValidator::accepting("al ice", "p@ss");
        let rtmp = authenticator(validator.clone(), false, "*");
        let conn = Connection::new(Protocol::Rtmp, "/live");

        assert!(rtmp.authenticate(&conn, &args(&["al%20ice", "p%40ss", "tok"])).await);
        assert_eq!(
            validator.last_extras(),
            Some(ConnectExtras::Positional(args(&["al%20ice", "p%40ss", "tok"])))
        );
        let ctx = conn.context();
        assert_eq!(ctx.username.as_deref(), Some("al ice"));
        assert_eq!(ctx.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_positional_requires_two_args() {
        let validator = RecordingValidator::accepting("alice", "secret");
        let rtmp = authenticator(validator.clone(), false, "*");
        let conn = Connection::new(Protocol::Rtmp, "/live");

        assert!(!rtmp.authenticate(&conn, &args(&["alice"])).await);
        assert_eq!(validator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_query_string_credentials() {
        let validator = RecordingValidator::accepting("alice", "s3cret");
        let rtmp = authenticator(validator.clone(), true, "*");
        let conn = Connection::new(Protocol::Rtmp, "/live")
            .with_param(QUERY_STRING_PARAM, "?username=alice&password=s3cret&token=abc");

        assert!(rtmp.authenticate(&conn, &[]).await);
        let Some(ConnectExtras::Params(map)) = validator.last_extras() else {
            panic!("expected map extras");
        };
        assert_eq!(map["token"], "abc");
        assert_eq!(conn.context().token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_plain_connect_params_are_decoded() {
        let validator = RecordingValidator::accepting("j@ne", "p w");
        let rtmp = authenticator(validator.clone(), true, "*");
        let conn = Connection::new(Protocol::Rtmp, "/live")
            .with_param(USERNAME_KEY, "j%40ne")
            .with_param(PASSWORD_KEY, "p%20w")
            .with_param("token", "100%");

        assert!(rtmp.authenticate(&conn, &[]).await);
        let Some(ConnectExtras::Params(map)) = validator.last_extras() else {
            panic!("expected map extras");
        };
        assert_eq!(map[USERNAME_KEY], "j@ne");
        assert_eq!(map["token"], "100%");
        assert_eq!(conn.context().username.as_deref(), Some("j@ne"));
    }

    #[tokio::test]
    async fn test_query_mode_falls_back_to_positional() {
        let validator = RecordingValidator::accepting("alice", "secret");
        let rtmp = authenticator(validator.clone(), true, "*");
        let conn = Connection::new(Protocol::Rtmp, "/live").with_param(QUERY_STRING_PARAM, "foo=bar");

        assert!(rtmp.authenticate(&conn, &args(&["alice", "secret"])).await);
        assert!(!rtmp.authenticate(&conn, &[]).await);
    }

    #[tokio::test]
    async fn test_agent_allow_list() {
        let validator = RecordingValidator::accepting("alice", "secret");
        let rtmp = authenticator(validator.clone(), false, "WIN*");

        let windows = Connection::new(Protocol::Rtmp, "/live").with_param(AGENT_PARAM, "WIN 11,2,202,235");
        assert!(rtmp.authenticate(&windows, &args(&["alice", "secret"])).await);

        let strict = authenticator(validator.clone(), false, "WIN");
        let linux = Connection::new(Protocol::Rtmp, "/live").with_param(AGENT_PARAM, "LNX 1,0");
        assert!(!strict.authenticate(&linux, &args(&["alice", "secret"])).await);

        let anonymous = Connection::new(Protocol::Rtmp, "/live");
        assert!(!strict.authenticate(&anonymous, &args(&["alice", "secret"])).await);
        assert_eq!(validator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_relay_marker_bypasses_validator() {
        let validator = RecordingValidator::accepting("alice", "secret");
        let rtmp = authenticator(validator.clone(), false, "*");
        let query = format!("{RELAY_CONTEXT_KEY}=live&{RELAY_NAME_KEY}=edge-1&{RELAY_SECRET_KEY}=cluster");
        let conn = Connection::new(Protocol::Rtmp, "/live").with_param(QUERY_STRING_PARAM, query);

        assert!(rtmp.authenticate(&conn, &[]).await);
        assert_eq!(conn.context().username.as_deref(), Some(RELAY_USERNAME));
        assert_eq!(validator.call_count(), 0);

        let wrong = Connection::new(Protocol::Rtmp, "/live").with_param(
            QUERY_STRING_PARAM,
            format!("{RELAY_CONTEXT_KEY}=live&{RELAY_NAME_KEY}=edge-1&{RELAY_SECRET_KEY}=guess"),
        );
        assert!(!rtmp.authenticate(&wrong, &args(&["alice", "secret"])).await);

        let missing = Connection::new(Protocol::Rtmp, "/live").with_param(
            QUERY_STRING_PARAM,
            format!("{RELAY_CONTEXT_KEY}=live&{RELAY_NAME_KEY}=edge-1"),
        );
        assert!(!rtmp.authenticate(&missing, &args(&["alice", "secret"])).await);
        assert_eq!(validator.call_count(), 0);
    }
}
