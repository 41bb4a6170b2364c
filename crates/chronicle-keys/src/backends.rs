//! API-key storage backends.
//!
//! A key reference routes to its backend by scheme prefix: `env:` for
//! environment variables, `file:` for encrypted files, `vault:` for an
//! external secret store. Unknown schemes default to `env`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::crypto::SecretCipher;
use crate::error::{KeyError, Result};

/// Common capability set for key storage.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    async fn get_key(&self, key_ref: &str) -> Result<Option<String>>;
    async fn set_key(&self, key_ref: &str, value: &str) -> Result<()>;
    async fn delete_key(&self, key_ref: &str) -> Result<bool>;
    async fn key_exists(&self, key_ref: &str) -> bool;
}

/// `env:VARIABLE_NAME`: keys live in process environment variables.
pub struct EnvBackend;

fn env_var_name(key_ref: &str) -> &str {
    key_ref.strip_prefix("env:").unwrap_or(key_ref)
}

#[async_trait]
impl KeyBackend for EnvBackend {
    async fn get_key(&self, key_ref: &str) -> Result<Option<String>> {
        let name = env_var_name(key_ref);
        let value = std::env::var(name).ok();
        if value.is_some() {
            debug!(var = name, "retrieved key from env var");
        }
        Ok(value)
    }

    async fn set_key(&self, key_ref: &str, value: &str) -> Result<()> {
        let name = env_var_name(key_ref);
        std::env::set_var(name, value);
        info!(var = name, "set key in env var");
        Ok(())
    }

    async fn delete_key(&self, key_ref: &str) -> Result<bool> {
        let name = env_var_name(key_ref);
        if std::env::var(name).is_ok() {
            std::env::remove_var(name);
            info!(var = name, "deleted key from env var");
            return Ok(true);
        }
        Ok(false)
    }

    async fn key_exists(&self, key_ref: &str) -> bool {
        std::env::var(env_var_name(key_ref)).is_ok()
    }
}

/// `file:relative/path.enc`: keys encrypted at rest under `keys_dir`
/// with a master key read from the configured environment variable.
pub struct EncryptedFileBackend {
    keys_dir: PathBuf,
    master_key_env: String,
}

impl EncryptedFileBackend {
    pub fn new(keys_dir: impl Into<PathBuf>, master_key_env: &str) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            master_key_env: master_key_env.to_string(),
        }
    }

    fn cipher(&self) -> Result<SecretCipher> {
        let secret = std::env::var(&self.master_key_env)
            .map_err(|_| KeyError::MasterKeyMissing(self.master_key_env.clone()))?;
        Ok(SecretCipher::from_secret(&secret))
    }

    fn key_path(&self, key_ref: &str) -> PathBuf {
        let file = key_ref.strip_prefix("file:").unwrap_or(key_ref);
        self.keys_dir.join(file)
    }
}

#[async_trait]
impl KeyBackend for EncryptedFileBackend {
    async fn get_key(&self, key_ref: &str) -> Result<Option<String>> {
        let path = self.key_path(key_ref);
        if !path.exists() {
            return Ok(None);
        }
        let cipher = self.cipher()?;
        let encoded = std::fs::read_to_string(&path)?;
        let plaintext = cipher.decrypt(&encoded)?;
        debug!(path = %path.display(), "retrieved key from encrypted file");
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|e| KeyError::Crypto(e.to_string()))
    }

    async fn set_key(&self, key_ref: &str, value: &str) -> Result<()> {
        let path = self.key_path(key_ref);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cipher = self.cipher()?;
        let encoded = cipher.encrypt(value.as_bytes())?;
        std::fs::write(&path, encoded)?;
        restrict_permissions(&path)?;
        info!(path = %path.display(), "saved encrypted key file");
        Ok(())
    }

    async fn delete_key(&self, key_ref: &str) -> Result<bool> {
        let path = self.key_path(key_ref);
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!(path = %path.display(), "deleted encrypted key file");
            return Ok(true);
        }
        Ok(false)
    }

    async fn key_exists(&self, key_ref: &str) -> bool {
        self.key_path(key_ref).exists()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// `vault:path/to/secret`: recognized variant, not yet wired to a real
/// Vault deployment.
pub struct VaultBackend;

#[async_trait]
impl KeyBackend for VaultBackend {
    async fn get_key(&self, _key_ref: &str) -> Result<Option<String>> {
        Err(KeyError::UnsupportedBackend("vault".to_string()))
    }

    async fn set_key(&self, _key_ref: &str, _value: &str) -> Result<()> {
        Err(KeyError::UnsupportedBackend("vault".to_string()))
    }

    async fn delete_key(&self, _key_ref: &str) -> Result<bool> {
        Err(KeyError::UnsupportedBackend("vault".to_string()))
    }

    async fn key_exists(&self, _key_ref: &str) -> bool {
        false
    }
}

/// Settings shared by the file backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub keys_dir: PathBuf,
    pub master_key_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            keys_dir: PathBuf::from("./data/keys"),
            master_key_env: "CHRONICLE_MASTER_KEY".to_string(),
        }
    }
}

/// Route a key reference to its backend by scheme prefix.
pub fn backend_for_ref(key_ref: &str, config: &BackendConfig) -> Box<dyn KeyBackend> {
    if key_ref.starts_with("file:") {
        Box::new(EncryptedFileBackend::new(
            config.keys_dir.clone(),
            &config.master_key_env,
        ))
    } else if key_ref.starts_with("vault:") {
        Box::new(VaultBackend)
    } else {
        Box::new(EnvBackend)
    }
}
