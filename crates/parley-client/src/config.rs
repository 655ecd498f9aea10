//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for a backend on localhost.

use std::path::PathBuf;
use std::time::Duration;

use parley_net::{ConnectionConfig, RetryPolicy};
use parley_shared::constants::{MAX_RECONNECT_ATTEMPTS, TYPING_TIMEOUT_SECS};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime endpoint.
    /// Env: `PARLEY_WS_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub ws_url: String,

    /// Base URL of the attachment host.
    /// Env: `PARLEY_HTTP_URL`
    /// Default: `http://127.0.0.1:8080`
    pub http_url: String,

    /// Session token obtained by the login flow.
    /// Env: `PARLEY_SESSION_TOKEN`
    pub session_token: Option<String>,

    /// Directory holding the local cache. `None` means the platform data dir.
    /// Env: `PARLEY_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Env: `PARLEY_MAX_RECONNECT_ATTEMPTS`
    /// Default: `10`
    pub max_reconnect_attempts: u32,

    /// Env: `PARLEY_RECONNECT_BASE_MS` (0 retries immediately)
    /// Default: `250`
    pub reconnect_base_ms: u64,

    /// Env: `PARLEY_RECONNECT_MAX_MS`
    /// Default: `5000`
    pub reconnect_max_ms: u64,

    /// How long a remote typing indicator lives without a refresh.
    /// Env: `PARLEY_TYPING_TIMEOUT_SECS`
    /// Default: `20`
    pub typing_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            http_url: "http://127.0.0.1:8080".to_string(),
            session_token: None,
            data_dir: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_ms: 250,
            reconnect_max_ms: 5_000,
            typing_timeout: Duration::from_secs(TYPING_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_WS_URL") {
            config.ws_url = url;
        }

        if let Some(url) = lookup("PARLEY_HTTP_URL") {
            config.http_url = url;
        }

        if let Some(token) = lookup("PARLEY_SESSION_TOKEN") {
            if !token.is_empty() {
                config.session_token = Some(token);
            }
        }

        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(val) = parse_var(&lookup, "PARLEY_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = val;
        }

        if let Some(val) = parse_var(&lookup, "PARLEY_RECONNECT_BASE_MS") {
            config.reconnect_base_ms = val;
        }

        if let Some(val) = parse_var(&lookup, "PARLEY_RECONNECT_MAX_MS") {
            config.reconnect_max_ms = val;
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PARLEY_TYPING_TIMEOUT_SECS") {
            if secs > 0 {
                config.typing_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("PARLEY_TYPING_TIMEOUT_SECS must be positive, using default");
            }
        }

        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.reconnect_base_ms, self.reconnect_max_ms)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            session_token: self.session_token.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            retry: self.retry_policy(),
            ..ConnectionConfig::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
