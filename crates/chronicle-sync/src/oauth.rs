//! Google OAuth 2.0 flow for per-server Drive bindings.
//!
//! The authorization leg is CSRF-protected by single-use state tokens
//! that expire after ten minutes. Refresh happens automatically whenever
//! stored tokens are within five minutes of expiry.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};
use crate::tokens::{OAuthTokens, TokenStore};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
];
const STATE_TTL_MINUTES: i64 = 10;

/// Pending authorization state (CSRF protection).
#[derive(Debug, Clone)]
pub struct OAuthState {
    pub state_token: String,
    pub server_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.created_at + Duration::minutes(STATE_TTL_MINUTES)
    }
}

pub struct OAuthFlow {
    token_store: Arc<TokenStore>,
    client: reqwest::Client,
    pending_states: DashMap<String, OAuthState>,
}

impl OAuthFlow {
    pub fn new(token_store: Arc<TokenStore>) -> Self {
        Self {
            token_store,
            client: reqwest::Client::new(),
            pending_states: DashMap::new(),
        }
    }

    fn client_id(&self) -> String {
        std::env::var("GOOGLE_OAUTH_CLIENT_ID").unwrap_or_default()
    }

    fn client_secret(&self) -> String {
        std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").unwrap_or_default()
    }

    fn redirect_uri(&self) -> String {
        std::env::var("GOOGLE_OAUTH_REDIRECT_URI").unwrap_or_default()
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id().is_empty() && !self.client_secret().is_empty()
    }

    /// Build the authorization URL and register its state token.
    pub fn generate_auth_url(&self, server_id: &str, user_id: &str) -> Result<(String, String)> {
        if !self.is_configured() {
            return Err(SyncError::OAuthNotConfigured);
        }

        let state_token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(43)
            .map(char::from)
            .collect();

        self.pending_states.insert(
            state_token.clone(),
            OAuthState {
                state_token: state_token.clone(),
                server_id: server_id.to_string(),
                user_id: user_id.to_string(),
                redirect_uri: self.redirect_uri(),
                created_at: Utc::now(),
            },
        );
        self.cleanup_expired_states();

        let scope = SCOPES.join(" ");
        let params = [
            ("client_id", self.client_id()),
            ("redirect_uri", self.redirect_uri()),
            ("response_type", "code".to_string()),
            ("scope", scope),
            // offline + consent so Google returns a refresh token.
            ("access_type", "offline".to_string()),
            ("prompt", "consent".to_string()),
            ("state", state_token.clone()),
        ];
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();

        Ok((
            format!("{}?{}", GOOGLE_AUTH_URL, query.join("&")),
            state_token,
        ))
    }

    /// Validate a state token from the callback. Single use.
    pub fn validate_state(&self, state_token: &str) -> Option<OAuthState> {
        let (_, state) = self.pending_states.remove(state_token)?;
        if state.is_expired() {
            return None;
        }
        Some(state)
    }

    /// Exchange an authorization code for tokens and store them under
    /// `srv_{server_id}_gdrive`.
    pub async fn exchange_code(&self, code: &str, state: &OAuthState) -> Result<OAuthTokens> {
        let resp = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id()),
                ("client_secret", self.client_secret()),
                ("code", code.to_string()),
                ("grant_type", "authorization_code".to_string()),
                ("redirect_uri", state.redirect_uri.clone()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::TokenExchange(text));
        }

        let body: TokenResponse = resp.json().await?;
        let tokens = body.into_tokens(None);

        let token_id = format!("srv_{}_gdrive", state.server_id);
        self.token_store.store(&token_id, &tokens)?;
        info!(server = %state.server_id, "stored Drive OAuth tokens");
        Ok(tokens)
    }

    /// Refresh the access token using the stored refresh token.
    pub async fn refresh_tokens(&self, token_id: &str) -> Option<OAuthTokens> {
        let current = self.token_store.get(token_id)?;
        if current.refresh_token.is_empty() {
            return None;
        }

        let resp = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id()),
                ("client_secret", self.client_secret()),
                ("refresh_token", current.refresh_token.clone()),
                ("grant_type", "refresh_token".to_string()),
            ])
            .send()
            .await
            .ok()?;

        if !resp.status().is_success() {
            error!(token_id, status = %resp.status(), "token refresh failed");
            return None;
        }

        let body: TokenResponse = resp.json().await.ok()?;
        let tokens = body.into_tokens(Some(&current));

        if let Err(e) = self.token_store.store(token_id, &tokens) {
            warn!(token_id, error = %e, "failed to persist refreshed tokens");
        }
        Some(tokens)
    }

    /// Valid (non-expired) tokens, refreshing when necessary.
    pub async fn get_valid_tokens(&self, token_id: &str) -> Option<OAuthTokens> {
        let tokens = self.token_store.get(token_id)?;
        if tokens.is_expired() {
            return self.refresh_tokens(token_id).await;
        }
        Some(tokens)
    }

    /// Drop stored tokens for a server.
    pub fn disconnect(&self, server_id: &str) -> Result<bool> {
        self.token_store.delete(&format!("srv_{}_gdrive", server_id))
    }

    fn cleanup_expired_states(&self) {
        self.pending_states.retain(|_, state| !state.is_expired());
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Build stored tokens, keeping the previous refresh token and scope
    /// when Google omits them from a refresh response.
    fn into_tokens(self, previous: Option<&OAuthTokens>) -> OAuthTokens {
        OAuthTokens {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.map(|p| p.refresh_token.clone()))
                .unwrap_or_default(),
            token_type: self
                .token_type
                .or_else(|| previous.map(|p| p.token_type.clone()))
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at: self.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scope: self
                .scope
                .or_else(|| previous.map(|p| p.scope.clone()))
                .unwrap_or_default(),
        }
    }
}
