//! OAuth 2.0 Client Credentials Token Source.
//!
//! Provides bearer tokens for authenticating the TCP router to the routing
//! API via the OAuth 2.0 client credentials flow.
//!
//! # Caching
//!
//! [`TokenSource::fetch_token`] is called by the watcher before every
//! subscription attempt, so it must be cheap when nothing changed:
//!
//! - `force_refresh = false`: return the cached token unless it is missing or
//!   expires within the refresh threshold.
//! - `force_refresh = true`: always hit the token endpoint and replace the cache.
//!
//! Each call performs at most one HTTP request. Retry policy belongs to the
//! caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::secret::SecretString;
//! use common::token_manager::{OAuthTokenFetcher, OAuthClientConfig, TokenSource};
//!
//! let config = OAuthClientConfig::new(
//!     "http://uaa.service.cf.internal:8080/oauth/token".to_string(),
//!     "tcp_router".to_string(),
//!     SecretString::from("secret"),
//! );
//! let fetcher = OAuthTokenFetcher::new(config)?;
//!
//! let token = fetcher.fetch_token(false).await?;
//! let header = format!("bearer {}", token.access_token().expose_secret());
//! ```
//!
//! # Security
//!
//! - Client secret and access token are stored as `SecretString` (never logged)
//! - Token acquisition events are logged without values
//! - Every token request is bounded by `http_timeout`

use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default refresh threshold: cached tokens expiring sooner than this are
/// refetched even when the caller does not force a refresh.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(30);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while fetching a token.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// HTTP client error (connect failure, timeout, 5xx).
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Client credentials rejected by the token endpoint (401, 400).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

// =============================================================================
// Token
// =============================================================================

/// An opaque bearer token with its expiry.
#[derive(Clone)]
pub struct Token {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Create a token that expires at the given instant.
    #[must_use]
    pub fn new(access_token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }

    /// Create a token from an OAuth `expires_in` value (seconds from now).
    #[must_use]
    pub fn expiring_in(access_token: SecretString, expires_in: Duration) -> Self {
        let expires_in = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(expires_in)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, expires_at)
    }

    /// The bearer credential.
    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// When the token stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token expires within `threshold` of `now`.
    #[must_use]
    pub fn expires_within(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(threshold) {
            Some(deadline) => self.expires_at <= deadline,
            None => true,
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Token Source
// =============================================================================

/// Supplier of bearer tokens (enables mocking).
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a bearer token.
    ///
    /// With `force_refresh = false` a cached, non-expiring token is returned
    /// without a network round trip. With `force_refresh = true` a fresh token
    /// is always obtained and replaces the cache.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] when a token had to be fetched and the fetch failed.
    async fn fetch_token(&self, force_refresh: bool) -> Result<Token, TokenError>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the OAuth token fetcher.
#[derive(Clone)]
pub struct OAuthClientConfig {
    /// Token endpoint URL (e.g., `http://uaa.service.cf.internal:8080/oauth/token`).
    pub token_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret (as `SecretString`).
    pub client_secret: SecretString,

    /// Treat cached tokens expiring within this window as stale.
    pub refresh_threshold: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_threshold", &self.refresh_threshold)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl OAuthClientConfig {
    /// Client credentials for `token_url` with the default refresh threshold
    /// and HTTP timeout.
    #[must_use]
    pub fn new(token_url: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            token_url,
            client_id,
            client_secret,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Set the refresh threshold.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// OAuth Response Types
// =============================================================================

/// OAuth 2.0 token response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// =============================================================================
// OAuth Token Fetcher
// =============================================================================

/// Caching [`TokenSource`] backed by an OAuth token endpoint.
pub struct OAuthTokenFetcher {
    config: OAuthClientConfig,
    http_client: reqwest::Client,
    cached: Mutex<Option<Token>>,
}

impl OAuthTokenFetcher {
    /// Create a fetcher with an empty cache.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: OAuthClientConfig) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            cached: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for OAuthTokenFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for OAuthTokenFetcher {
    #[instrument(skip(self), fields(client_id = %self.config.client_id))]
    async fn fetch_token(&self, force_refresh: bool) -> Result<Token, TokenError> {
        // Held across the request so concurrent callers share one fetch.
        let mut cached = self.cached.lock().await;

        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if !token.expires_within(self.config.refresh_threshold, Utc::now()) {
                    trace!(target: "common.token_manager", "Using cached token");
                    return Ok(token.clone());
                }
                debug!(
                    target: "common.token_manager",
                    expires_at = %token.expires_at(),
                    "Cached token is expiring, refreshing"
                );
            }
        }

        let token = acquire_token(&self.config, &self.http_client).await?;

        if cached.is_none() {
            info!(
                target: "common.token_manager",
                client_id = %self.config.client_id,
                "Initial token acquired successfully"
            );
        } else {
            debug!(
                target: "common.token_manager",
                client_id = %self.config.client_id,
                forced = force_refresh,
                "Token refreshed successfully"
            );
        }

        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Acquire a new token from the token endpoint.
#[instrument(skip_all)]
async fn acquire_token(
    config: &OAuthClientConfig,
    http_client: &reqwest::Client,
) -> Result<Token, TokenError> {
    debug!(
        target: "common.token_manager",
        client_id = %config.client_id,
        url = %config.token_url,
        "Requesting token"
    );

    let form_body = [
        ("grant_type", "client_credentials"),
        ("client_id", &config.client_id),
        ("client_secret", config.client_secret.expose_secret()),
    ];

    let response = http_client
        .post(&config.token_url)
        .form(&form_body)
        .send()
        .await
        .map_err(|e| {
            debug!(target: "common.token_manager", error = %e, "HTTP request failed");
            TokenError::HttpError(e.to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.token_manager", error = %e, "Failed to parse token response");
            TokenError::InvalidResponse(e.to_string())
        })?;

        debug!(
            target: "common.token_manager",
            expires_in_secs = token_response.expires_in,
            "Token acquired successfully"
        );

        Ok(Token::expiring_in(
            SecretString::from(token_response.access_token),
            Duration::from_secs(token_response.expires_in),
        ))
    } else if status.as_u16() == 401 || status.as_u16() == 400 {
        // Body may echo credentials back, trace level only
        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "common.token_manager", error = %e, "Failed to read error response body");
            "<failed to read body>".to_string()
        });
        warn!(
            target: "common.token_manager",
            status = %status,
            "Client credentials rejected by token endpoint"
        );
        trace!(
            target: "common.token_manager",
            body = %body,
            "Authentication rejection response body"
        );
        Err(TokenError::AuthenticationRejected(format!(
            "Status {status}"
        )))
    } else if status.is_server_error() {
        warn!(
            target: "common.token_manager",
            status = %status,
            "Token endpoint returned server error"
        );
        Err(TokenError::HttpError(format!("Token endpoint server error: {status}")))
    } else {
        warn!(
            target: "common.token_manager",
            status = %status,
            "Unexpected response from token endpoint"
        );
        Err(TokenError::HttpError(format!(
            "Unexpected status: {status}"
        )))
    }
}

// =============================================================================
// Mock
// =============================================================================

/// Mock token source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::PoisonError;

    /// Records every `fetch_token` call and returns a fixed token or error.
    pub struct MockTokenSource {
        token: Token,
        failing: AtomicBool,
        force_refresh_args: std::sync::Mutex<Vec<bool>>,
    }

    impl MockTokenSource {
        /// Create a mock that returns a token with the given value.
        #[must_use]
        pub fn returning(access_token: &str) -> Self {
            Self {
                token: Token::expiring_in(
                    SecretString::from(access_token.to_string()),
                    Duration::from_secs(3600),
                ),
                failing: AtomicBool::new(false),
                force_refresh_args: std::sync::Mutex::new(Vec::new()),
            }
        }

        /// Create a mock whose every fetch fails.
        #[must_use]
        pub fn failing() -> Self {
            let mock = Self::returning("unused");
            mock.set_failing(true);
            mock
        }

        /// Switch between failing and succeeding.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of `fetch_token` calls made.
        pub fn fetch_token_call_count(&self) -> usize {
            self.args().len()
        }

        /// The `force_refresh` argument of the `index`th call.
        pub fn fetch_token_args_for_call(&self, index: usize) -> Option<bool> {
            self.args().get(index).copied()
        }

        fn args(&self) -> std::sync::MutexGuard<'_, Vec<bool>> {
            self.force_refresh_args
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl TokenSource for MockTokenSource {
        async fn fetch_token(&self, force_refresh: bool) -> Result<Token, TokenError> {
            self.args().push(force_refresh);

            if self.failing.load(Ordering::SeqCst) {
                return Err(TokenError::HttpError("token fetcher error".to_string()));
            }
            Ok(self.token.clone())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
