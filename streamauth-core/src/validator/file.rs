use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::AuthValidator;
use crate::connection::{ConnectExtras, Connection};
use crate::{Error, Result};

const CREDENTIALS_HEADER: &str = "# Stream credentials\n\
# Add username and password as key-value pair separated by a space (one per line)\n\
# Example: testuser testpass\n";

/// Validates against a line-oriented `username password` file loaded once at
/// initialization.
pub struct FileValidator {
    path: PathBuf,
    credentials: RwLock<HashMap<String, String>>,
}

impl FileValidator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of loaded credential entries.
    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }

    async fn ensure_exists(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, CREDENTIALS_HEADER).await?;
        tracing::info!(path = %self.path.display(), "Created empty credentials file");
        Ok(())
    }
}

/// Parse credential lines. Username and password are separated by the first
/// whitespace, `=` or `:`; lines starting with `#` or `!` are comments.
pub fn parse_credentials(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| {
            let Some(idx) = line.find(|c: char| c.is_whitespace() || c == '=' || c == ':') else {
                return (line.to_string(), String::new());
            };
            let (username, rest) = line.split_at(idx);
            let rest = rest.trim_start();
            let rest = rest
                .strip_prefix(['=', ':'])
                .map_or(rest, str::trim_start);
            (username.to_string(), rest.to_string())
        })
        .collect()
}

#[async_trait]
impl AuthValidator for FileValidator {
    fn name(&self) -> &str {
        "file"
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_exists().await.map_err(|e| {
            Error::Configuration(format!(
                "credentials file {} could not be created: {e}",
                self.path.display()
            ))
        })?;
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Configuration(format!(
                "credentials file {} could not be read: {e}",
                self.path.display()
            ))
        })?;

        let credentials = parse_credentials(&content);
        tracing::info!(
            path = %self.path.display(),
            entries = credentials.len(),
            "Loaded credentials file"
        );
        *self.credentials.write() = credentials;
        Ok(())
    }

    async fn on_connect_authenticate(
        &self,
        conn: &Connection,
        username: &str,
        password: &str,
        _extras: &ConnectExtras,
    ) -> bool {
        if username.is_empty() || password.is_empty() {
            tracing::debug!(connection = %conn.id(), "Missing username or password");
            return false;
        }

        let credentials = self.credentials.read();
        match credentials.get(username) {
            Some(stored) if stored.to_lowercase() == password.to_lowercase() => true,
            Some(_) => {
                tracing::warn!(connection = %conn.id(), username, "Password mismatch");
                false
            }
            None => {
                tracing::warn!(connection = %conn.id(), username, "Unknown username");
                false
            }
        }
    }
}
