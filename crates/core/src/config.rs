use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CaseError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub backoff: BackoffConfig,
    pub loader: LoaderConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CASESTATS_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CASESTATS_PROFILE", "");
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            upstream: UpstreamConfig::from_env_profiled(p),
            auth: AuthConfig::from_env_profiled(p),
            backoff: BackoffConfig::from_env_profiled(p),
            loader: LoaderConfig::from_env_profiled(p),
        }
    }

    /// Reject values the loader cannot run with.
    pub fn validate(&self) -> Result<(), CaseError> {
        let url = self.upstream.stream_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CaseError::Config(format!(
                "UPSTREAM_BASE_URL must be an http(s) URL, got '{}'",
                self.upstream.base_url
            )));
        }
        if self.upstream.inactivity_timeout_secs == 0 {
            return Err(CaseError::Config(
                "UPSTREAM_INACTIVITY_TIMEOUT_SECS must be greater than 0".into(),
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(CaseError::Config(format!(
                "backoff requires 0 < BACKOFF_INITIAL_MS ({}) <= BACKOFF_MAX_MS ({})",
                self.backoff.initial_ms, self.backoff.max_ms
            )));
        }
        if self.backoff.multiplier < 1.0 || !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(CaseError::Config(
                "BACKOFF_MULTIPLIER must be >= 1 and BACKOFF_JITTER within 0..=1".into(),
            ));
        }
        if self.loader.progress_buffer == 0 || self.loader.max_batch == 0 {
            return Err(CaseError::Config(
                "PROGRESS_BUFFER and INGEST_MAX_BATCH must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!("  upstream:  url={}", self.upstream.stream_url());
        tracing::info!("  auth:      mode={}", self.auth.mode());
        tracing::info!(
            "  backoff:   initial={}ms, max={}ms, x{}",
            self.backoff.initial_ms, self.backoff.max_ms, self.backoff.multiplier
        );
        tracing::info!(
            "  loader:    name={}, inactivity={}s",
            self.loader.name, self.upstream.inactivity_timeout_secs
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "upstream": {
                "stream_url": self.upstream.stream_url(),
                "connect_timeout_secs": self.upstream.connect_timeout_secs,
                "inactivity_timeout_secs": self.upstream.inactivity_timeout_secs,
            },
            "auth": {
                "mode": self.auth.mode(),
                "token_url": self.auth.token_url,
                "client_id": self.auth.client_id,
                "configured": self.auth.is_configured(),
            },
            "backoff": {
                "initial_ms": self.backoff.initial_ms,
                "max_ms": self.backoff.max_ms,
                "multiplier": self.backoff.multiplier,
                "jitter": self.backoff.jitter,
            },
            "loader": {
                "name": self.loader.name,
                "progress_buffer": self.loader.progress_buffer,
                "max_batch": self.loader.max_batch,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Upstream case-management stream ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub stream_path: String,
    pub connect_timeout_secs: u64,
    /// Reconnect when neither an event nor a heartbeat arrives within this window.
    pub inactivity_timeout_secs: u64,
}

impl UpstreamConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_or(p, "UPSTREAM_BASE_URL", "http://localhost:8080"),
            stream_path: profiled_env_or(p, "UPSTREAM_STREAM_PATH", "/api/cases/stream"),
            connect_timeout_secs: profiled_env_parse(p, "UPSTREAM_CONNECT_TIMEOUT_SECS", 10),
            inactivity_timeout_secs: profiled_env_parse(p, "UPSTREAM_INACTIVITY_TIMEOUT_SECS", 45),
        }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

// ── Token exchange ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    /// Fixed bearer token, used when no token endpoint is configured.
    pub static_token: Option<String>,
}

impl AuthConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            token_url: profiled_env_opt(p, "AUTH_TOKEN_URL"),
            client_id: profiled_env_opt(p, "AUTH_CLIENT_ID"),
            client_secret: profiled_env_opt(p, "AUTH_CLIENT_SECRET"),
            scope: profiled_env_opt(p, "AUTH_SCOPE"),
            static_token: profiled_env_opt(p, "UPSTREAM_STATIC_TOKEN"),
        }
    }

    /// "client_credentials", "static" or "none".
    pub fn mode(&self) -> &'static str {
        if self.token_url.is_some() && self.client_id.is_some() && self.client_secret.is_some() {
            "client_credentials"
        } else if self.static_token.is_some() {
            "static"
        } else {
            "none"
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mode() != "none"
    }
}

// ── Reconnect backoff ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions, 0.0..=1.0.
    pub jitter: f64,
}

impl BackoffConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            initial_ms: profiled_env_parse(p, "BACKOFF_INITIAL_MS", 500),
            max_ms: profiled_env_parse(p, "BACKOFF_MAX_MS", 30_000),
            multiplier: profiled_env_parse(p, "BACKOFF_MULTIPLIER", 2.0),
            jitter: profiled_env_parse(p, "BACKOFF_JITTER", 0.2),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

// ── Loader ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Identifies the loader instance in logs.
    pub name: String,
    /// Per-subscriber progress buffer.
    pub progress_buffer: usize,
    /// Upper bound on records applied per snapshot publication.
    pub max_batch: usize,
}

impl LoaderConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            name: profiled_env_or(p, "LOADER_NAME", "cases"),
            progress_buffer: profiled_env_parse(p, "PROGRESS_BUFFER", 16),
            max_batch: profiled_env_parse(p, "INGEST_MAX_BATCH", 512),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(base: &str, path: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base.to_string(),
            stream_path: path.to_string(),
            connect_timeout_secs: 10,
            inactivity_timeout_secs: 45,
        }
    }

    #[test]
    fn stream_url_joins_without_double_slash() {
        assert_eq!(
            upstream("http://cases:8080/", "/api/stream").stream_url(),
            "http://cases:8080/api/stream"
        );
        assert_eq!(
            upstream("http://cases:8080", "api/stream").stream_url(),
            "http://cases:8080/api/stream"
        );
    }

    #[test]
    fn auth_mode_prefers_client_credentials() {
        let mut auth = AuthConfig {
            token_url: Some("http://idp/token".into()),
            client_id: Some("dash".into()),
            client_secret: Some("s3cret".into()),
            scope: None,
            static_token: Some("fixed".into()),
        };
        assert_eq!(auth.mode(), "client_credentials");

        auth.client_secret = None;
        assert_eq!(auth.mode(), "static");

        auth.static_token = None;
        assert_eq!(auth.mode(), "none");
        assert!(!auth.is_configured());
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let mut config = Config::for_profile("unit_test_nonexistent");
        config.upstream.base_url = "http://cases:8080".into();
        config.backoff = BackoffConfig::default();
        config.upstream.inactivity_timeout_secs = 45;
        config.loader.progress_buffer = 16;
        config.loader.max_batch = 512;
        assert!(config.validate().is_ok());

        config.backoff.max_ms = 10;
        assert!(matches!(config.validate(), Err(CaseError::Config(_))));
    }

    #[test]
    fn validate_rejects_non_http_upstream() {
        let mut config = Config::for_profile("unit_test_nonexistent");
        config.upstream.base_url = "ftp://cases".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn redacted_summary_has_no_secrets() {
        let mut config = Config::for_profile("unit_test_nonexistent");
        config.auth.client_secret = Some("s3cret".into());
        config.auth.static_token = Some("tok".into());
        let text = config.redacted_summary().to_string();
        assert!(!text.contains("s3cret"));
        assert!(!text.contains("\"tok\""));
        assert_eq!(config.profile, "UNIT_TEST_NONEXISTENT");
    }
}
