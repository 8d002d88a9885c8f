//! Routing API client surface.
//!
//! The watcher only sees the traits defined here:
//!
//! - [`SubscriptionClient`] opens a new [`EventSource`] for a token
//! - [`EventSource`] yields route events one at a time and can be closed from
//!   another task to unblock a pending [`EventSource::next`]
//! - [`RouteLister`] returns the full route list used by a sync
//!
//! [`RoutingApiClient`] implements both client traits over HTTP, with
//! [`SseEventSource`] decoding the server-sent event stream.

pub mod client;
pub mod event_source;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use crate::errors::RoutingApiError;
use crate::models::{RouteEvent, TcpRouteMapping};
use async_trait::async_trait;
use common::token_manager::Token;
use std::sync::Arc;

pub use client::RoutingApiClient;
pub use event_source::SseEventSource;

/// A sequential source of route events from one subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next event.
    ///
    /// Only one call may be in flight at a time. After [`EventSource::close`]
    /// a pending or later call returns `RoutingApiError::Closed`.
    async fn next(&self) -> Result<RouteEvent, RoutingApiError>;

    /// Close the source. Safe to call while `next` is pending.
    fn close(&self) -> Result<(), RoutingApiError>;
}

/// Opens event subscriptions against the routing API.
#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    /// Open a new event stream authenticated with `token`.
    ///
    /// A rejected token is reported as `RoutingApiError::Unauthorized`.
    async fn subscribe_to_events(
        &self,
        token: &Token,
    ) -> Result<Arc<dyn EventSource>, RoutingApiError>;
}

/// Lists the routes currently known to the routing API.
#[async_trait]
pub trait RouteLister: Send + Sync {
    async fn tcp_route_mappings(
        &self,
        token: &Token,
    ) -> Result<Vec<TcpRouteMapping>, RoutingApiError>;
}
