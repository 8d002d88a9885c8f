//! TCP router configuration.
//!
//! Configuration is loaded from environment variables. The OAuth client
//! secret is redacted in Debug output.

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Default wait between failed subscription attempts, in seconds.
pub const DEFAULT_SUBSCRIPTION_RETRY_INTERVAL_SECONDS: u64 = 5;

/// Default interval between full syncs, in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 60;

/// Default load balancer reload script.
pub const DEFAULT_RELOAD_SCRIPT: &str = "/var/vcap/jobs/haproxy/bin/haproxy_reloader";

/// Default Prometheus listener address.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9090";

/// Default time before expiry at which a cached token is refreshed, in seconds.
pub const DEFAULT_TOKEN_REFRESH_THRESHOLD_SECONDS: u64 = 30;

/// TCP router configuration.
#[derive(Clone)]
pub struct Config {
    /// Routing API base URL.
    pub routing_api_url: String,

    /// OAuth token endpoint.
    pub oauth_token_url: String,

    /// OAuth client ID.
    pub oauth_client_id: String,

    /// OAuth client secret.
    pub oauth_client_secret: SecretString,

    /// Wait between failed subscription attempts.
    pub subscription_retry_interval: Duration,

    /// Interval between full syncs.
    pub sync_interval: Duration,

    /// Load balancer reload script.
    pub reload_script: String,

    /// Prometheus listener address.
    pub metrics_bind_address: SocketAddr,

    /// Refresh a cached token this long before it expires.
    pub token_refresh_threshold: Duration,

    /// Emit JSON log lines.
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("routing_api_url", &self.routing_api_url)
            .field("oauth_token_url", &self.oauth_token_url)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"[REDACTED]")
            .field(
                "subscription_retry_interval",
                &self.subscription_retry_interval,
            )
            .field("sync_interval", &self.sync_interval)
            .field("reload_script", &self.reload_script)
            .field("metrics_bind_address", &self.metrics_bind_address)
            .field("token_refresh_threshold", &self.token_refresh_threshold)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Parse a positive number of seconds, falling back to `default` when unset.
fn positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        invalid(
            name,
            format!("must be a valid positive integer, got '{value_str}': {e}"),
        )
    })?;

    if value == 0 {
        return Err(invalid(name, "must be greater than 0"));
    }

    Ok(Duration::from_secs(value))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is
    /// invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let routing_api_url = required(vars, "ROUTING_API_URL")?;
        let oauth_token_url = required(vars, "OAUTH_TOKEN_URL")?;
        let oauth_client_id = required(vars, "OAUTH_CLIENT_ID")?;
        let oauth_client_secret = SecretString::from(required(vars, "OAUTH_CLIENT_SECRET")?);

        let subscription_retry_interval = positive_seconds(
            vars,
            "TCP_ROUTER_SUBSCRIPTION_RETRY_INTERVAL_SECONDS",
            DEFAULT_SUBSCRIPTION_RETRY_INTERVAL_SECONDS,
        )?;

        let sync_interval = positive_seconds(
            vars,
            "TCP_ROUTER_SYNC_INTERVAL_SECONDS",
            DEFAULT_SYNC_INTERVAL_SECONDS,
        )?;

        let token_refresh_threshold = positive_seconds(
            vars,
            "TCP_ROUTER_TOKEN_REFRESH_THRESHOLD_SECONDS",
            DEFAULT_TOKEN_REFRESH_THRESHOLD_SECONDS,
        )?;

        let reload_script = vars
            .get("TCP_ROUTER_RELOAD_SCRIPT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RELOAD_SCRIPT.to_string());

        let metrics_bind_address = vars
            .get("TCP_ROUTER_METRICS_BIND_ADDRESS")
            .map_or(DEFAULT_METRICS_BIND_ADDRESS, String::as_str)
            .parse::<SocketAddr>()
            .map_err(|e| invalid("TCP_ROUTER_METRICS_BIND_ADDRESS", e.to_string()))?;

        let log_json = match vars.get("TCP_ROUTER_LOG_JSON").map(|v| v.trim().to_ascii_lowercase()) {
            None => false,
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" || v.is_empty() => false,
            Some(v) => {
                return Err(invalid(
                    "TCP_ROUTER_LOG_JSON",
                    format!("must be true or false, got '{v}'"),
                ))
            }
        };

        Ok(Config {
            routing_api_url,
            oauth_token_url,
            oauth_client_id,
            oauth_client_secret,
            subscription_retry_interval,
            sync_interval,
            reload_script,
            metrics_bind_address,
            token_refresh_threshold,
            log_json,
        })
    }

    /// Whether the client secret is set. Used in startup logging in place of
    /// the secret itself.
    #[must_use]
    pub fn has_client_secret(&self) -> bool {
        !self.oauth_client_secret.expose_secret().is_empty()
    }
}
