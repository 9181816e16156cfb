//! Access tokens for the upstream stream.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use casestats_core::config::AuthConfig;

use crate::error::SourceError;

/// Tokens are refreshed this long before the identity provider says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Used when the identity provider omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// Supplies the bearer token for each connection attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token valid right now. `None` means connect without credentials.
    async fn token(&self) -> Result<Option<String>, SourceError>;

    /// Called after the upstream rejected the last token.
    async fn invalidate(&self) {}
}

/// No credentials at all; for local upstreams.
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Result<Option<String>, SourceError> {
        Ok(None)
    }
}

/// A fixed token from configuration.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, SourceError> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials grant against `token_url`, cached until shortly
/// before expiry.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope,
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, SourceError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = self.scope.as_deref() {
            form.push(("scope", scope));
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SourceError::Token(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Token(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Token(format!("invalid token response: {e}")))?;

        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        info!(expires_in_secs = lifetime.as_secs(), "access token acquired");

        Ok(CachedToken {
            value: parsed.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn token(&self) -> Result<Option<String>, SourceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(Some(token.value.clone()));
            }
            debug!("cached access token is due for refresh");
        }
        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(Some(value))
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

/// Pick the provider that matches the configured auth mode.
pub fn from_config(auth: &AuthConfig, http: reqwest::Client) -> Box<dyn TokenProvider> {
    match (&auth.token_url, &auth.client_id, &auth.client_secret, &auth.static_token) {
        (Some(url), Some(id), Some(secret), _) => Box::new(ClientCredentials::new(
            http,
            url.clone(),
            id.clone(),
            secret.clone(),
            auth.scope.clone(),
        )),
        (_, _, _, Some(token)) => Box::new(StaticToken::new(token.clone())),
        _ => Box::new(NoAuth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Form, Json, Router};

    #[derive(Clone, Default)]
    struct IdentityProvider {
        hits: Arc<AtomicUsize>,
        expires_in: Option<u64>,
    }

    async fn issue(
        State(idp): State<IdentityProvider>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        let n = idp.hits.fetch_add(1, Ordering::SeqCst);
        let field = |name: &str| form.get(name).map(String::as_str);
        let valid = field("grant_type") == Some("client_credentials")
            && field("client_id") == Some("id")
            && field("client_secret") == Some("secret")
            && field("scope") == Some("cases.read");
        if !valid {
            return (StatusCode::BAD_REQUEST, "invalid_client").into_response();
        }
        let mut body = serde_json::json!({ "access_token": format!("issued-{n}"), "token_type": "Bearer" });
        if let Some(expires_in) = idp.expires_in {
            body["expires_in"] = expires_in.into();
        }
        Json(body).into_response()
    }

    async fn serve(idp: IdentityProvider) -> String {
        let router = Router::new().route("/token", post(issue)).with_state(idp);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/token")
    }

    fn client(url: String, secret: &str) -> ClientCredentials {
        ClientCredentials::new(
            reqwest::Client::new(),
            url,
            "id",
            secret,
            Some("cases.read".to_string()),
        )
    }

    #[tokio::test]
    async fn client_credentials_exchange_is_cached_until_invalidated() {
        let idp = IdentityProvider {
            expires_in: Some(3600),
            ..IdentityProvider::default()
        };
        let cc = client(serve(idp.clone()).await, "secret");

        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-0"));
        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-0"));
        assert_eq!(idp.hits.load(Ordering::SeqCst), 1);

        cc.invalidate().await;
        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-1"));
        assert_eq!(idp.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn token_inside_expiry_margin_is_fetched_again() {
        let idp = IdentityProvider {
            expires_in: Some(10),
            ..IdentityProvider::default()
        };
        let cc = client(serve(idp.clone()).await, "secret");

        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-0"));
        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-1"));
    }

    #[tokio::test]
    async fn missing_expiry_uses_default_lifetime() {
        let cc = client(serve(IdentityProvider::default()).await, "secret");
        assert_eq!(cc.token().await.unwrap().as_deref(), Some("issued-0"));

        let refresh_at = cc.cached.lock().await.as_ref().unwrap().refresh_at;
        let left = refresh_at.saturating_duration_since(Instant::now());
        assert!(left > DEFAULT_LIFETIME - EXPIRY_MARGIN - Duration::from_secs(5));
        assert!(left <= DEFAULT_LIFETIME - EXPIRY_MARGIN);
    }

    #[tokio::test]
    async fn rejected_exchange_is_a_token_error() {
        let cc = client(serve(IdentityProvider::default()).await, "wrong");
        let err = cc.token().await.unwrap_err();
        match &err {
            SourceError::Token(msg) => {
                assert!(msg.contains("HTTP 400"), "{msg}");
                assert!(msg.contains("invalid_client"), "{msg}");
            }
            other => panic!("expected a token error, got {other}"),
        }
        assert!(err.is_auth());
        assert!(cc.cached.lock().await.is_none());
    }

    #[tokio::test]
    async fn static_and_none_providers() {
        assert_eq!(StaticToken::new("abc").token().await.unwrap().as_deref(), Some("abc"));
        assert_eq!(NoAuth.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn from_config_selects_provider_by_mode() {
        let mut auth = AuthConfig {
            static_token: Some("fixed".into()),
            ..AuthConfig::default()
        };
        let provider = from_config(&auth, reqwest::Client::new());
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("fixed"));

        auth.static_token = None;
        let provider = from_config(&auth, reqwest::Client::new());
        assert_eq!(provider.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn cached_token_is_reused_until_refresh_time() {
        let cc = ClientCredentials::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/token",
            "id",
            "secret",
            None,
        );
        *cc.cached.lock().await = Some(CachedToken {
            value: "cached".into(),
            refresh_at: Instant::now() + Duration::from_secs(60),
        });
        assert_eq!(cc.token().await.unwrap().as_deref(), Some("cached"));

        cc.invalidate().await;
        assert!(cc.cached.lock().await.is_none());
    }

    #[test]
    fn token_response_tolerates_missing_expiry() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","token_type":"Bearer"}"#).unwrap();
        assert_eq!(parsed.access_token, "t");
        assert_eq!(parsed.expires_in, None);
    }
}
