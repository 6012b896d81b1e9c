//! Client configuration.

use std::time::Duration;

use crate::error::{ClientError, Result};

/// Default interval between background state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-request timeout for REST calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default platform endpoint.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Configuration shared by every handle a [`Client`](crate::Client) creates.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Platform REST base URL, e.g. `https://vdev.example.com/api/v1`.
    pub api_url: String,

    /// Bearer token sent with every REST call.
    pub token: Option<String>,

    /// Delay between background refreshes while someone is observing.
    pub poll_interval: Duration,

    /// Timeout applied to each REST call.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given endpoint with default timings.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the background poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// - `VDEV_API_URL`
    /// - `VDEV_API_TOKEN`
    /// - `VDEV_POLL_INTERVAL_MS`
    /// - `VDEV_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("VDEV_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let token = std::env::var("VDEV_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let poll_interval = match std::env::var("VDEV_POLL_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                ClientError::Config(format!("VDEV_POLL_INTERVAL_MS must be an integer, got '{raw}'"))
            })?),
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        let request_timeout = std::env::var("VDEV_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let config = Self {
            api_url,
            token,
            poll_interval,
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the config can be used to build a client.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ClientError::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// WebSocket base derived from the API URL (`http` → `ws`, `https` → `wss`).
    pub fn ws_base(&self) -> String {
        let trimmed = self.api_url.trim_end_matches('/');
        if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            trimmed.to_string()
        }
    }
}
