//! HTTP client for the routing API.
//!
//! # Endpoints
//!
//! - `GET /routing/v1/tcp_routes/events` - server-sent event stream
//! - `GET /routing/v1/tcp_routes` - full route list
//!
//! Both authenticate with `Authorization: bearer <token>`. The client is
//! built without an overall request timeout because the event stream is
//! long-lived; the list call carries its own timeout.

use crate::errors::RoutingApiError;
use crate::models::TcpRouteMapping;
use crate::routing_api::{EventSource, RouteLister, SseEventSource, SubscriptionClient};
use async_trait::async_trait;
use common::secret::ExposeSecret;
use common::token_manager::Token;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Timeout for the route list call.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const EVENTS_PATH: &str = "/routing/v1/tcp_routes/events";
const ROUTES_PATH: &str = "/routing/v1/tcp_routes";

/// Routing API client.
///
/// `reqwest::Client` is cheaply cloneable and pools connections internally,
/// so the client is shared behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct RoutingApiClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RoutingApiClient {
    /// Create a client for the routing API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingApiError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RoutingApiError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RoutingApiError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn bearer(token: &Token) -> String {
    format!("bearer {}", token.access_token().expose_secret())
}

/// Map non-success statuses to errors, 401 to `Unauthorized`.
async fn check_status(response: Response) -> Result<Response, RoutingApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(RoutingApiError::Unauthorized(message));
    }
    Err(RoutingApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SubscriptionClient for RoutingApiClient {
    #[instrument(skip_all)]
    async fn subscribe_to_events(
        &self,
        token: &Token,
    ) -> Result<Arc<dyn EventSource>, RoutingApiError> {
        let url = self.url(EVENTS_PATH);
        debug!(target: "tcp_router.routing_api", url = %url, "Subscribing to TCP route events");

        let response = self
            .http_client
            .get(&url)
            .header(AUTHORIZATION, bearer(token))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| RoutingApiError::Http(e.to_string()))?;

        let response = check_status(response).await.map_err(|e| {
            warn!(target: "tcp_router.routing_api", error = %e, "Event subscription rejected");
            e
        })?;

        Ok(Arc::new(SseEventSource::new(response)))
    }
}

#[async_trait]
impl RouteLister for RoutingApiClient {
    #[instrument(skip_all)]
    async fn tcp_route_mappings(
        &self,
        token: &Token,
    ) -> Result<Vec<TcpRouteMapping>, RoutingApiError> {
        let response = self
            .http_client
            .get(self.url(ROUTES_PATH))
            .header(AUTHORIZATION, bearer(token))
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| RoutingApiError::Http(e.to_string()))?;

        let mappings: Vec<TcpRouteMapping> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RoutingApiError::Decode(e.to_string()))?;

        debug!(
            target: "tcp_router.routing_api",
            count = mappings.len(),
            "Fetched TCP route mappings"
        );
        Ok(mappings)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::RouteEvent;
    use common::secret::SecretString;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> Token {
        Token::expiring_in(SecretString::from("access_token"), Duration::from_secs(60))
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = RoutingApiClient::new("http://routing-api:3000/").unwrap();
        assert_eq!(
            client.url(ROUTES_PATH),
            "http://routing-api:3000/routing/v1/tcp_routes"
        );
    }

    #[tokio::test]
    async fn test_list_routes_sends_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ROUTES_PATH))
            .and(header("authorization", "bearer access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"router_group_guid": "rtrGrp0001", "port": 61000, "backend_ip": "some-ip-1", "backend_port": 5222},
                {"router_group_guid": "rtrGrp0001", "port": 61001, "backend_ip": "some-ip-2", "backend_port": 5223}
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let mappings = client.tcp_route_mappings(&token()).await.unwrap();

        assert_eq!(
            mappings,
            vec![
                TcpRouteMapping::new("rtrGrp0001", 61000, "some-ip-1", 5222),
                TcpRouteMapping::new("rtrGrp0001", 61001, "some-ip-2", 5223),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_routes_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ROUTES_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let err = client.tcp_route_mappings(&token()).await.unwrap_err();

        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_list_routes_bad_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ROUTES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let err = client.tcp_route_mappings(&token()).await.unwrap_err();

        assert!(matches!(err, RoutingApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_subscribe_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let result = client.subscribe_to_events(&token()).await;

        assert!(matches!(result, Err(RoutingApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_subscribe_server_error_is_not_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let err = client.subscribe_to_events(&token()).await.err().unwrap();

        assert!(!err.is_unauthorized());
        assert!(matches!(err, RoutingApiError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_subscribe_streams_events() {
        let mock_server = MockServer::start().await;

        let body = concat!(
            "id: 0\n",
            "event: Upsert\n",
            "data: {\"router_group_guid\":\"rtrGrp0001\",\"port\":61000,\"backend_ip\":\"some-ip-1\",\"backend_port\":5222}\n",
            "\n",
            "id: 1\n",
            "event: Delete\n",
            "data: {\"router_group_guid\":\"rtrGrp0001\",\"port\":61000,\"backend_ip\":\"some-ip-1\",\"backend_port\":5222}\n",
            "\n",
        );

        Mock::given(method("GET"))
            .and(path(EVENTS_PATH))
            .and(header("authorization", "bearer access_token"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let client = RoutingApiClient::new(mock_server.uri()).unwrap();
        let source = client.subscribe_to_events(&token()).await.unwrap();

        let mapping = TcpRouteMapping::new("rtrGrp0001", 61000, "some-ip-1", 5222);
        assert_eq!(source.next().await.unwrap(), RouteEvent::Upsert(mapping.clone()));
        assert_eq!(source.next().await.unwrap(), RouteEvent::Delete(mapping));
        assert!(matches!(
            source.next().await,
            Err(RoutingApiError::StreamEnded)
        ));
    }
}
