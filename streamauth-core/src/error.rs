use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Fatal at initialization: unsupported algorithm, unreadable key,
    /// unwritable credentials path. The affected scope degrades to deny.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Connect gate refused the connection. Hosts map this to a protocol-level
    /// rejection.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Authentication("Token expired".to_string()),
            ErrorKind::ImmatureSignature => {
                Self::Authentication("Token not yet valid".to_string())
            }
            ErrorKind::InvalidToken => Self::Authentication("Invalid token".to_string()),
            ErrorKind::InvalidSignature => {
                Self::Authentication("Invalid token signature".to_string())
            }
            ErrorKind::InvalidAlgorithm => {
                Self::Authentication("Token signed with unexpected algorithm".to_string())
            }
            _ => Self::Authentication(format!("Token verification failed: {err}")),
        }
    }
}

impl Error {
    /// Expected, per-attempt failures. These are logged below error level.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Rejected(_) | Self::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors() {
        assert!(Error::Authentication("bad password".into()).is_expected());
        assert!(Error::Transport("timeout".into()).is_expected());
        assert!(!Error::Configuration("ES256".into()).is_expected());
        assert!(!Error::UnknownProtocol("gopher".into()).is_expected());
    }
}
