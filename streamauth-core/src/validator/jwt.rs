use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AuthValidator;
use crate::connection::{ConnectExtras, Connection};
use crate::relay::RelayVerifier;
use crate::{Error, Result};

/// Allowed clock skew for `exp`/`nbf`, in seconds.
pub const CLOCK_SKEW_SECONDS: u64 = 180;

struct Verifier {
    key: DecodingKey,
    validation: Validation,
}

/// Verifies a signed token presented at connect time.
///
/// HS256/384/512 use `secret` as the shared key. RS256/384/512 treat `secret`
/// as the path of a PEM public key, relative paths resolved against the conf
/// directory.
pub struct JwtValidator {
    secret: String,
    algorithm: String,
    conf_dir: PathBuf,
    relay: RelayVerifier,
    verifier: RwLock<Option<Arc<Verifier>>>,
}

impl JwtValidator {
    pub fn new(
        secret: impl Into<String>,
        algorithm: impl Into<String>,
        conf_dir: impl Into<PathBuf>,
        relay: RelayVerifier,
    ) -> Self {
        Self {
            secret: secret.into(),
            algorithm: algorithm.into(),
            conf_dir: conf_dir.into(),
            relay,
            verifier: RwLock::new(None),
        }
    }

    fn key_path(&self) -> PathBuf {
        let path = Path::new(&self.secret);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.conf_dir.join(path)
        }
    }

    fn parse_algorithm(&self) -> Result<Algorithm> {
        match self.algorithm.as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            "RS256" => Ok(Algorithm::RS256),
            "RS384" => Ok(Algorithm::RS384),
            "RS512" => Ok(Algorithm::RS512),
            other => Err(Error::Configuration(format!(
                "unsupported JWT signature algorithm: {other}"
            ))),
        }
    }

    async fn load_key(&self, algorithm: Algorithm) -> Result<DecodingKey> {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                if self.secret.is_empty() {
                    return Err(Error::Configuration("JWT secret is empty".to_string()));
                }
                Ok(DecodingKey::from_secret(self.secret.as_bytes()))
            }
            _ => {
                let path = self.key_path();
                let pem = tokio::fs::read(&path).await.map_err(|e| {
                    Error::Configuration(format!(
                        "failed to read public key {}: {e}",
                        path.display()
                    ))
                })?;
                DecodingKey::from_rsa_pem(&pem).map_err(|e| {
                    Error::Configuration(format!(
                        "failed to load public key {}: {e}",
                        path.display()
                    ))
                })
            }
        }
    }

    fn is_valid(&self, token: &str) -> bool {
        let Some(verifier) = self.verifier.read().clone() else {
            tracing::warn!("JWT validator used before initialization");
            return false;
        };
        match decode::<serde_json::Value>(token, &verifier.key, &verifier.validation) {
            Ok(_) => true,
            Err(e) => {
                let err = Error::from(e);
                tracing::warn!(error = %err, "Token rejected");
                false
            }
        }
    }
}

#[async_trait]
impl AuthValidator for JwtValidator {
    fn name(&self) -> &str {
        "jwt"
    }

    async fn initialize(&self) -> Result<()> {
        let algorithm = self.parse_algorithm()?;
        let key = self.load_key(algorithm).await?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_SECONDS;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        *self.verifier.write() = Some(Arc::new(Verifier { key, validation }));
        tracing::debug!(algorithm = %self.algorithm, "Loaded JWT verification key");
        Ok(())
    }

    async fn on_connect_authenticate(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        extras: &ConnectExtras,
    ) -> bool {
        if username.is_empty() || password.is_empty() {
            tracing::warn!(
                connection = %conn.id(),
                "Parameter 'username' and/or 'password' not provided"
            );
            return false;
        }

        if let Some(token) = extras.token() {
            conn.update_context(|ctx| ctx.token = Some(token.to_string()));
            return self.is_valid(token);
        }
        if RelayVerifier::is_relay_username(username) {
            return self.relay.verify(password);
        }
        tracing::warn!(connection = %conn.id(), "Client token is required but was not provided");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Protocol;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::collections::HashMap;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn sign(secret: &str, exp: i64) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": "alice", "exp": exp }),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn hs256(secret: &str, relay: RelayVerifier) -> JwtValidator {
        let validator = JwtValidator::new(secret, "HS256", "conf", relay);
        validator.initialize().await.unwrap();
        validator
    }

    fn with_token(token: String) -> ConnectExtras {
        ConnectExtras::Params(HashMap::from([("token".to_string(), token)]))
    }

    #[tokio::test]
    async fn test_token_within_skew_window() {
        let validator = hs256("topsecret", RelayVerifier::default()).await;
        let conn = Connection::new(Protocol::Rtc, "/live");

        let fresh = with_token(sign("topsecret", now() + 3600));
        assert!(validator.on_connect_authenticate(&conn, "alice", "pw", &fresh).await);
        assert!(conn.context().token.is_some());

        let recently_expired = with_token(sign("topsecret", now() - 60));
        assert!(validator
            .on_connect_authenticate(&conn, "alice", "pw", &recently_expired)
            .await);
    }

    #[tokio::test]
    async fn test_rejects_wrong_key_and_expired() {
        let validator = hs256("topsecret", RelayVerifier::default()).await;
        let conn = Connection::new(Protocol::Rtc, "/live");

        let other_key = with_token(sign("othersecret", now() + 3600));
        assert!(!validator.on_connect_authenticate(&conn, "alice", "pw", &other_key).await);

        let expired = with_token(sign("topsecret", now() - 600));
        assert!(!validator.on_connect_authenticate(&conn, "alice", "pw", &expired).await);

        let garbage = with_token("not-a-jwt".to_string());
        assert!(!validator.on_connect_authenticate(&conn, "alice", "pw", &garbage).await);
    }

    #[tokio::test]
    async fn test_positional_token_and_missing_token() {
        let validator = hs256("topsecret", RelayVerifier::default()).await;
        let conn = Connection::new(Protocol::Rtmp, "/live");

        let positional = ConnectExtras::Positional(vec![
            "alice".to_string(),
            "pw".to_string(),
            sign("topsecret", now() + 60),
        ]);
        assert!(validator.on_connect_authenticate(&conn, "alice", "pw", &positional).await);

        let no_token = ConnectExtras::Positional(vec!["alice".to_string(), "pw".to_string()]);
        assert!(!validator.on_connect_authenticate(&conn, "alice", "pw", &no_token).await);
        assert!(!validator.on_connect_authenticate(&conn, "", "pw", &positional).await);
    }

    #[tokio::test]
    async fn test_relay_username_uses_cluster_secret() {
        let validator = hs256("topsecret", RelayVerifier::new(Some("cluster"))).await;
        let conn = Connection::new(Protocol::Rtmp, "/live");
        let extras = ConnectExtras::Params(HashMap::new());

        assert!(validator
            .on_connect_authenticate(&conn, "cluster-restreamer", "cluster", &extras)
            .await);
        assert!(!validator
            .on_connect_authenticate(&conn, "cluster-restreamer", "nope", &extras)
            .await);
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_is_fatal() {
        let validator = JwtValidator::new("secret", "ES256", "conf", RelayVerifier::default());
        assert!(matches!(
            validator.initialize().await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_public_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let validator = JwtValidator::new("missing.pem", "RS256", dir.path(), RelayVerifier::default());
        assert!(matches!(
            validator.initialize().await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_rejects() {
        let validator = JwtValidator::new("topsecret", "HS256", "conf", RelayVerifier::default());
        let conn = Connection::new(Protocol::Rtc, "/live");
        let token = with_token(sign("topsecret", now() + 60));
        assert!(!validator.on_connect_authenticate(&conn, "alice", "pw", &token).await);
    }
}
