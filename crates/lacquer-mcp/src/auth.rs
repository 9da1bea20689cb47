//! Auth providers an MCP `Server` connection can be configured with:
//! `none`, `api_key` (Bearer), `basic`, and `oauth2` client-credentials
//! with cached, auto-refreshing tokens.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use lacquer_core::error::{LacquerError, Result};
use tokio::sync::RwLock;

#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the `(header name, header value)` pair to attach to
    /// outbound requests, if any.
    async fn header(&self) -> Result<Option<(String, String)>>;
}

pub struct NoAuth;

#[async_trait::async_trait]
impl AuthProvider for NoAuth {
    async fn header(&self) -> Result<Option<(String, String)>> {
        Ok(None)
    }
}

pub struct ApiKeyAuth {
    token: String,
}

impl ApiKeyAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait::async_trait]
impl AuthProvider for ApiKeyAuth {
    async fn header(&self) -> Result<Option<(String, String)>> {
        Ok(Some(("Authorization".to_string(), format!("Bearer {}", self.token))))
    }
}

pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for BasicAuth {
    async fn header(&self) -> Result<Option<(String, String)>> {
        let raw = format!("{}:{}", self.username, self.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        Ok(Some(("Authorization".to_string(), format!("Basic {encoded}"))))
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// How long before expiry a cached token is considered stale and worth
/// proactively refreshing (spec.md §4.5: "cache token until five
/// minutes before expiry").
const REFRESH_SKEW: Duration = Duration::minutes(5);

/// OAuth2 client-credentials provider. Refresh uses double-checked
/// locking: check under a read lock first (the common, no-refresh-
/// needed path), and only take the write lock — then re-check — if a
/// refresh actually looks necessary, so concurrent callers don't all
/// fire a refresh request for the same expiring token.
pub struct OAuth2Auth {
    token_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl OAuth2Auth {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        }
    }

    fn is_fresh(token: &CachedToken) -> bool {
        Utc::now() + REFRESH_SKEW < token.expires_at
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "oauth2".to_string(),
                message: format!("token request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "oauth2".to_string(),
                message: format!("invalid token response: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        })
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if Self::is_fresh(token) {
                return Ok(token.access_token.clone());
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(token) = guard.as_ref() {
            if Self::is_fresh(token) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }
}

#[async_trait::async_trait]
impl AuthProvider for OAuth2Auth {
    async fn header(&self) -> Result<Option<(String, String)>> {
        let token = self.token().await?;
        Ok(Some(("Authorization".to_string(), format!("Bearer {token}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_auth_produces_bearer_header() {
        let auth = ApiKeyAuth::new("secret-token");
        let (name, value) = auth.header().await.unwrap().unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer secret-token");
    }

    #[tokio::test]
    async fn basic_auth_encodes_user_pass() {
        let auth = BasicAuth::new("alice", "hunter2");
        let (_, value) = auth.header().await.unwrap().unwrap();
        assert!(value.starts_with("Basic "));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value.trim_start_matches("Basic "))
            .unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "alice:hunter2");
    }

    #[tokio::test]
    async fn no_auth_has_no_header() {
        let auth = NoAuth;
        assert!(auth.header().await.unwrap().is_none());
    }

    #[test]
    fn fresh_token_check_respects_skew() {
        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        assert!(OAuth2Auth::is_fresh(&fresh));

        let stale = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::minutes(2),
        };
        assert!(!OAuth2Auth::is_fresh(&stale));
    }
}
