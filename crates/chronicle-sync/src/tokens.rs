//! Encrypted OAuth token storage under `<root>/.tokens/`.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use chronicle_keys::SecretCipher;
use chronicle_core::layout::TOKENS_DIR;

use crate::error::Result;

/// Stored OAuth token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthTokens {
    /// Expired, or within five minutes of it.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at - Duration::minutes(5),
            None => true,
        }
    }
}

/// Tokens encrypted at rest with a key derived from an
/// operator-supplied secret. Without a secret an ephemeral key is used
/// and tokens do not survive a restart.
pub struct TokenStore {
    storage_path: PathBuf,
    cipher: SecretCipher,
}

impl TokenStore {
    pub fn new(archive_root: &std::path::Path, encryption_secret: Option<&str>) -> Self {
        let cipher = match encryption_secret {
            Some(secret) => SecretCipher::from_secret(secret),
            None => {
                warn!(
                    "token encryption key not set, using ephemeral key; \
                     stored tokens will be lost on restart"
                );
                SecretCipher::ephemeral()
            }
        };
        Self {
            storage_path: archive_root.join(TOKENS_DIR),
            cipher,
        }
    }

    fn token_path(&self, token_id: &str) -> PathBuf {
        let safe: String = token_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        self.storage_path.join(format!("{}.token", safe))
    }

    pub fn store(&self, token_id: &str, tokens: &OAuthTokens) -> Result<()> {
        std::fs::create_dir_all(&self.storage_path)?;
        let plaintext = serde_json::to_vec(tokens)?;
        let encrypted = self.cipher.encrypt(&plaintext)?;
        std::fs::write(self.token_path(token_id), encrypted)?;
        info!(token_id, "stored tokens");
        Ok(())
    }

    pub fn get(&self, token_id: &str) -> Option<OAuthTokens> {
        let path = self.token_path(token_id);
        let encoded = std::fs::read_to_string(&path).ok()?;
        match self
            .cipher
            .decrypt(&encoded)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_slice(&data).map_err(|e| e.to_string()))
        {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                error!(token_id, error = %e, "failed to decrypt tokens");
                None
            }
        }
    }

    pub fn delete(&self, token_id: &str) -> Result<bool> {
        let path = self.token_path(token_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!(token_id, "deleted tokens");
            return Ok(true);
        }
        Ok(false)
    }

    pub fn has(&self, token_id: &str) -> bool {
        self.token_path(token_id).exists()
    }
}
