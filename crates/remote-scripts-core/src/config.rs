//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::ConfigError;

/// Default HTTP request timeout for job management calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-execution feed history size (4 MB).
pub const DEFAULT_HISTORY_BYTES: usize = 4 * 1024 * 1024;

const URL_VAR: &str = "REMOTE_SCRIPTS_URL";
const TIMEOUT_VAR: &str = "REMOTE_SCRIPTS_HTTP_TIMEOUT_SECS";
const HISTORY_VAR: &str = "REMOTE_SCRIPTS_HISTORY_BYTES";

/// Where the script server lives and how the client talks to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: Url,
    request_timeout: Duration,
    history_bytes: usize,
}

impl ClientConfig {
    /// Create a configuration for a server base URL (`http://` or `https://`).
    ///
    /// # Errors
    /// Returns error if the URL does not parse or uses another scheme.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base_url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            base_url: url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_bytes: DEFAULT_HISTORY_BYTES,
        })
    }

    /// Load configuration from `REMOTE_SCRIPTS_*` environment variables.
    ///
    /// # Errors
    /// Returns error if the URL is missing or any value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var(URL_VAR).map_err(|_| ConfigError::MissingVar(URL_VAR))?;
        let mut config = Self::new(&url)?;

        if let Ok(raw) = std::env::var(TIMEOUT_VAR) {
            let secs = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: TIMEOUT_VAR,
                value: raw.clone(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var(HISTORY_VAR) {
            config.history_bytes = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: HISTORY_VAR,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }

    /// Override the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the per-execution feed history size.
    #[must_use]
    pub fn with_history_bytes(mut self, bytes: usize) -> Self {
        self.history_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub const fn history_bytes(&self) -> usize {
        self.history_bytes
    }

    /// HTTP URL for an API path relative to the base URL.
    ///
    /// # Errors
    /// Returns error if `path` cannot be joined onto the base.
    pub fn http_url(&self, path: &str) -> Result<Url, ConfigError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Streaming URL for a path, with `ws`/`wss` mirroring `http`/`https`.
    ///
    /// # Errors
    /// Returns error if `path` cannot be joined onto the base.
    pub fn websocket_url(&self, path: &str) -> Result<Url, ConfigError> {
        let mut url = self.http_url(path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;
        Ok(url)
    }
}
