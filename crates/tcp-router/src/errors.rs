//! TCP router error types.
//!
//! Every error below the process boundary is recoverable: the watcher and the
//! updater log it and keep going. Only [`RouterError`] reaches `main`, and only
//! during startup.

use crate::config::ConfigError;
use common::token_manager::TokenError;
use thiserror::Error;

/// Errors from the routing API (subscription, event stream, route listing).
#[derive(Debug, Error)]
pub enum RoutingApiError {
    /// The routing API rejected the bearer token (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure talking to the routing API.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status other than 401.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// An event or response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server closed the event stream.
    #[error("event stream ended")]
    StreamEnded,

    /// The event source was closed locally.
    #[error("event source closed")]
    Closed,
}

impl RoutingApiError {
    /// Whether this failure means the token must be refreshed before retrying.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RoutingApiError::Unauthorized(_))
    }

    /// Short, bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingApiError::Unauthorized(_) => "unauthorized",
            RoutingApiError::Http(_) => "http",
            RoutingApiError::Status { .. } => "status",
            RoutingApiError::Decode(_) => "decode",
            RoutingApiError::StreamEnded => "stream_ended",
            RoutingApiError::Closed => "closed",
        }
    }
}

/// Errors from running the load balancer reload script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script could not be started.
    #[error("failed to start script {path}: {message}")]
    Spawn { path: String, message: String },

    /// The script exited unsuccessfully.
    #[error("script {path} exited with {status}: {stderr}")]
    NonZeroExit {
        path: String,
        status: String,
        stderr: String,
    },
}

/// Errors from applying a routing table to the load balancer.
#[derive(Debug, Error)]
pub enum ConfigurerError {
    #[error("reload failed: {0}")]
    Reload(#[from] ScriptError),
}

/// Errors from the routing table updater (`EventApplyError` / `SyncError`).
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("routing API error: {0}")]
    RoutingApi(#[from] RoutingApiError),

    #[error("configurer error: {0}")]
    Configurer(#[from] ConfigurerError),
}

/// Startup errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("routing API error: {0}")]
    RoutingApi(#[from] RoutingApiError),

    #[error("metrics error: {0}")]
    Metrics(String),
}
