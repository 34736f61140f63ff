//! Configuration for connecting to the manager.
//!
//! Configuration is an explicit value handed to [`ManagerClient::new`]
//! rather than process-wide state, so several managers can be driven from
//! one process.
//!
//! [`ManagerClient::new`]: crate::manager_client::ManagerClient::new

use std::env;
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::WardenError;

/// API version sent when `WARDEN_API_VERSION` is not set.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Request timeout used when `WARDEN_TIMEOUT_SECS` is not set.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for a manager instance.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the manager (e.g., `https://dsm.example.com:4119`).
    pub base_url: String,

    /// API version header value (e.g., `v1`).
    pub api_version: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// API secret key. Never log this value.
    api_secret: String,
}

// Hand-written so the secret cannot leak through `{:?}`.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Builds and validates a configuration from explicit values.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Config` if the URL, secret, or version is invalid.
    pub fn new(
        base_url: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Result<Self, WardenError> {
        let base_url = Self::validate_base_url(base_url.into())?;
        let api_secret = api_secret.into();
        Self::validate_api_secret(&api_secret)?;

        Ok(Config {
            base_url,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            api_secret,
        })
    }

    /// Sets the API version header value.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Config` unless the version looks like `v1`.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Result<Self, WardenError> {
        let version = version.into();
        Self::validate_api_version(&version)?;
        self.api_version = version;
        Ok(self)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// # Required Environment Variables
    ///
    /// - `WARDEN_MANAGER_URL`: base URL of the manager
    /// - `WARDEN_API_SECRET`: API secret key
    ///
    /// # Optional Environment Variables
    ///
    /// - `WARDEN_API_VERSION`: defaults to `v1`
    /// - `WARDEN_TIMEOUT_SECS`: defaults to 30
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Config` if a required variable is missing or any
    /// value fails validation.
    pub fn from_env() -> Result<Self, WardenError> {
        let base_url = Self::get_required_env("WARDEN_MANAGER_URL")?;
        let api_secret = Self::get_required_env("WARDEN_API_SECRET")?;

        let mut config = Self::new(base_url, api_secret)?;

        if let Some(version) = Self::get_optional_env("WARDEN_API_VERSION") {
            config = config.with_api_version(version)?;
        }

        if let Some(raw) = Self::get_optional_env("WARDEN_TIMEOUT_SECS") {
            config = config.with_timeout(Self::parse_timeout(&raw)?);
        }

        Ok(config)
    }

    /// The API secret key. Only for request headers and sanitization.
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    fn get_required_env(name: &str) -> Result<String, WardenError> {
        Self::get_optional_env(name).ok_or_else(|| WardenError::missing_env(name))
    }

    fn get_optional_env(name: &str) -> Option<String> {
        env::var(name).ok().filter(|value| !value.trim().is_empty())
    }

    /// Validates the base URL and makes sure it ends with `/api`.
    fn validate_base_url(url: String) -> Result<String, WardenError> {
        let url = url.trim().trim_end_matches('/').to_string();

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(WardenError::invalid_config(
                "WARDEN_MANAGER_URL must start with http:// or https://",
            ));
        }

        let parsed = Url::parse(&url).map_err(|e| {
            WardenError::invalid_config(format!("WARDEN_MANAGER_URL is not a valid URL: {}", e))
        })?;
        if parsed.host().is_none() {
            return Err(WardenError::invalid_config(
                "WARDEN_MANAGER_URL must include a host",
            ));
        }

        if url.ends_with("/api") {
            Ok(url)
        } else {
            Ok(format!("{}/api", url))
        }
    }

    /// Rejects placeholder secrets copied from documentation.
    fn validate_api_secret(secret: &str) -> Result<(), WardenError> {
        if secret.trim().is_empty() {
            return Err(WardenError::missing_env("WARDEN_API_SECRET"));
        }

        let lower = secret.to_lowercase();
        let placeholder_patterns = ["your_api_secret", "your-secret", "placeholder", "changeme"];
        if placeholder_patterns.iter().any(|p| lower.contains(p)) {
            return Err(WardenError::invalid_config(
                "WARDEN_API_SECRET appears to be a placeholder value",
            ));
        }

        Ok(())
    }

    fn validate_api_version(version: &str) -> Result<(), WardenError> {
        let valid = version
            .strip_prefix('v')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if valid {
            Ok(())
        } else {
            Err(WardenError::invalid_config(format!(
                "WARDEN_API_VERSION must look like v1, got {:?}",
                version
            )))
        }
    }

    fn parse_timeout(raw: &str) -> Result<Duration, WardenError> {
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(WardenError::invalid_config(
                "WARDEN_TIMEOUT_SECS must be a positive number of seconds",
            )),
        }
    }
}
