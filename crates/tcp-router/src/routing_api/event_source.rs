//! Server-sent event source for TCP route events.
//!
//! Each SSE message names the action in its `event` field (`Upsert` or
//! `Delete`) and carries the JSON route mapping in `data`. Messages with an
//! empty `data` (keep-alives) are skipped.
//!
//! Closing is driven by a `CancellationToken`, so `close()` never waits on the
//! lock held by a pending `next()`.

use crate::errors::RoutingApiError;
use crate::models::{RouteAction, RouteEvent, TcpRouteMapping};
use crate::routing_api::EventSource;
use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

type SseStream = BoxStream<'static, Result<Event, String>>;

/// [`EventSource`] over a server-sent event byte stream.
pub struct SseEventSource {
    events: Mutex<SseStream>,
    closed: CancellationToken,
}

impl SseEventSource {
    /// Wrap an HTTP response whose body is an event stream.
    #[must_use]
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_byte_stream(response.bytes_stream())
    }

    /// Wrap any stream of body chunks.
    pub fn from_byte_stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let events = stream
            .eventsource()
            .map(|item| item.map_err(|e| e.to_string()))
            .boxed();

        Self {
            events: Mutex::new(events),
            closed: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for SseEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseEventSource")
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Decode one SSE message into a route event.
fn decode_event(event: &Event) -> Result<RouteEvent, RoutingApiError> {
    let action: RouteAction = event.event.parse().map_err(RoutingApiError::Decode)?;
    let mapping: TcpRouteMapping = serde_json::from_str(&event.data)
        .map_err(|e| RoutingApiError::Decode(format!("invalid route mapping: {e}")))?;
    Ok(RouteEvent::new(action, mapping))
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn next(&self) -> Result<RouteEvent, RoutingApiError> {
        if self.closed.is_cancelled() {
            return Err(RoutingApiError::Closed);
        }

        let mut events = self.events.lock().await;
        loop {
            let item = tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(RoutingApiError::Closed),
                item = events.next() => item,
            };

            match item {
                None => return Err(RoutingApiError::StreamEnded),
                Some(Err(e)) => return Err(RoutingApiError::Http(e)),
                Some(Ok(event)) if event.data.trim().is_empty() => {
                    trace!(target: "tcp_router.routing_api", "Skipping empty event");
                }
                Some(Ok(event)) => return decode_event(&event),
            }
        }
    }

    fn close(&self) -> Result<(), RoutingApiError> {
        self.closed.cancel();
        Ok(())
    }
}
