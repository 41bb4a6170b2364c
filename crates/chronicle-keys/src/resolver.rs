//! Per-source API key resolution.
//!
//! Resolution order: the source's own key (when enabled, fetchable and
//! validated) then the default installation key. Fetched keys are cached
//! for five minutes, validation outcomes for an hour.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::backends::{backend_for_ref, BackendConfig};
use crate::error::{KeyError, Result};

const OPENROUTER_KEY_URL: &str = "https://openrouter.ai/api/v1/auth/key";
const KEY_CACHE_TTL_MINUTES: i64 = 5;
const VALIDATION_CACHE_TTL_HOURS: i64 = 1;

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Server,
    Default,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Server => "server",
            KeySource::Default => "default",
        }
    }
}

/// Result of key resolution.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
    pub source_key: String,
    pub key_ref: String,
}

impl ResolvedKey {
    /// Attribution string recorded in sidecars and the cost ledger:
    /// `server:{source_key}` or `default`.
    pub fn api_key_used(&self) -> String {
        match self.source {
            KeySource::Server => format!("server:{}", self.source_key),
            KeySource::Default => "default".to_string(),
        }
    }
}

/// Per-source key binding, as carried by the source manifest.
#[derive(Debug, Clone, Default)]
pub struct ServerKeyConfig {
    pub key_ref: Option<String>,
    pub use_server_key: bool,
    pub fallback_to_default: bool,
}

pub struct ApiKeyResolver {
    default_key: Option<String>,
    backend_config: BackendConfig,
    client: reqwest::Client,
    key_cache: DashMap<String, (String, DateTime<Utc>)>,
    validation_cache: DashMap<String, (bool, DateTime<Utc>)>,
}

impl ApiKeyResolver {
    pub fn new(default_key: Option<String>, backend_config: BackendConfig) -> Self {
        let default_key = default_key.or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        Self {
            default_key,
            backend_config,
            client: reqwest::Client::new(),
            key_cache: DashMap::new(),
            validation_cache: DashMap::new(),
        }
    }

    /// Resolve the key for a source given its manifest binding.
    pub async fn get_key_for_source(
        &self,
        source_key: &str,
        server_config: Option<&ServerKeyConfig>,
    ) -> Result<ResolvedKey> {
        if let Some(config) = server_config {
            if config.use_server_key {
                if let Some(key_ref) = &config.key_ref {
                    match self.fetch_key(key_ref).await {
                        Ok(Some(key)) => {
                            if self.validate_key(&key).await {
                                debug!(source = source_key, "using server key");
                                return Ok(ResolvedKey {
                                    key,
                                    source: KeySource::Server,
                                    source_key: source_key.to_string(),
                                    key_ref: key_ref.clone(),
                                });
                            }
                            warn!(source = source_key, "server key validation failed");
                        }
                        Ok(None) => {
                            warn!(source = source_key, key_ref = %key_ref, "server key not found");
                        }
                        Err(e) => {
                            warn!(source = source_key, error = %e, "failed to fetch server key");
                            if !config.fallback_to_default {
                                return Err(KeyError::FallbackDisabled {
                                    source_key: source_key.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        let Some(default_key) = &self.default_key else {
            return Err(KeyError::NoKeyAvailable);
        };
        Ok(ResolvedKey {
            key: default_key.clone(),
            source: KeySource::Default,
            source_key: source_key.to_string(),
            key_ref: "default".to_string(),
        })
    }

    /// Store a key for a source. Generates an `env:` reference when none
    /// is supplied and clears stale cache entries.
    pub async fn set_server_key(
        &self,
        source_key: &str,
        api_key: &str,
        key_ref: Option<&str>,
    ) -> Result<String> {
        let key_ref = key_ref.map(str::to_string).unwrap_or_else(|| {
            let safe = source_key.replace(':', "_").to_uppercase();
            format!("env:OPENROUTER_KEY_{}", safe)
        });

        let backend = backend_for_ref(&key_ref, &self.backend_config);
        backend.set_key(&key_ref, api_key).await?;

        self.key_cache.remove(&key_ref);
        self.validation_cache.remove(&key_digest(api_key));
        info!(source = source_key, key_ref = %key_ref, "set server API key");
        Ok(key_ref)
    }

    pub async fn remove_server_key(&self, key_ref: &str) -> Result<bool> {
        let backend = backend_for_ref(key_ref, &self.backend_config);
        let removed = backend.delete_key(key_ref).await?;
        self.key_cache.remove(key_ref);
        info!(key_ref, "removed server API key");
        Ok(removed)
    }

    pub fn clear_caches(&self) {
        self.key_cache.clear();
        self.validation_cache.clear();
    }

    async fn fetch_key(&self, key_ref: &str) -> Result<Option<String>> {
        if let Some(entry) = self.key_cache.get(key_ref) {
            let (key, expiry) = entry.value();
            if Utc::now() < *expiry {
                return Ok(Some(key.clone()));
            }
        }

        let backend = backend_for_ref(key_ref, &self.backend_config);
        let key = backend.get_key(key_ref).await?;
        if let Some(key) = &key {
            self.key_cache.insert(
                key_ref.to_string(),
                (
                    key.clone(),
                    Utc::now() + Duration::minutes(KEY_CACHE_TTL_MINUTES),
                ),
            );
        }
        Ok(key)
    }

    /// Validate a key against the provider. Network failures are treated
    /// as valid and left uncached so the next call retries.
    async fn validate_key(&self, key: &str) -> bool {
        let digest = key_digest(key);
        if let Some(entry) = self.validation_cache.get(&digest) {
            let (valid, expiry) = entry.value();
            if Utc::now() < *expiry {
                return *valid;
            }
        }

        match self
            .client
            .get(OPENROUTER_KEY_URL)
            .bearer_auth(key)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => {
                let valid = resp.status().is_success();
                self.validation_cache.insert(
                    digest,
                    (
                        valid,
                        Utc::now() + Duration::hours(VALIDATION_CACHE_TTL_HOURS),
                    ),
                );
                valid
            }
            Err(e) => {
                warn!(error = %e, "key validation request failed, assuming valid");
                true
            }
        }
    }
}

fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
