//! Fake routing API for testing the watcher and the updater.
//!
//! [`FakeSubscriptionClient`] hands out a fresh [`FakeEventSource`] per
//! successful subscription. All sources read from one shared feed, so a test
//! can push events and errors without knowing which subscription is live.

use super::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{MutexGuard, PoisonError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

type Feed = Arc<Mutex<mpsc::UnboundedReceiver<Result<RouteEvent, RoutingApiError>>>>;

fn locked<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event source reading from a feed shared with its client.
pub struct FakeEventSource {
    feed: Feed,
    closed: CancellationToken,
    close_calls: AtomicUsize,
    next_calls: AtomicUsize,
}

impl FakeEventSource {
    /// Number of `close` calls received.
    pub fn close_call_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of `next` calls received.
    pub fn next_call_count(&self) -> usize {
        self.next_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for FakeEventSource {
    async fn next(&self) -> Result<RouteEvent, RoutingApiError> {
        self.next_calls.fetch_add(1, Ordering::SeqCst);

        if self.closed.is_cancelled() {
            return Err(RoutingApiError::Closed);
        }

        let mut feed = self.feed.lock().await;
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(RoutingApiError::Closed),
            item = feed.recv() => item.unwrap_or(Err(RoutingApiError::StreamEnded)),
        }
    }

    fn close(&self) -> Result<(), RoutingApiError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}

/// Scripted subscription client.
///
/// Subscription attempts consume queued failures first; once the queue is
/// empty every attempt succeeds with a new [`FakeEventSource`].
pub struct FakeSubscriptionClient {
    feed_tx: mpsc::UnboundedSender<Result<RouteEvent, RoutingApiError>>,
    feed: Feed,
    failures: std::sync::Mutex<VecDeque<RoutingApiError>>,
    sources: std::sync::Mutex<Vec<Arc<FakeEventSource>>>,
    subscribe_calls: AtomicUsize,
}

impl Default for FakeSubscriptionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubscriptionClient {
    #[must_use]
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        Self {
            feed_tx,
            feed: Arc::new(Mutex::new(feed_rx)),
            failures: std::sync::Mutex::new(VecDeque::new()),
            sources: std::sync::Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next subscription attempt fail with `error`.
    pub fn fail_next_subscribe(&self, error: RoutingApiError) {
        locked(&self.failures).push_back(error);
    }

    /// Deliver an event to the live event source.
    pub fn send_event(&self, event: RouteEvent) {
        let _ = self.feed_tx.send(Ok(event));
    }

    /// Make the live event source's pending `next` fail with `error`.
    pub fn send_error(&self, error: RoutingApiError) {
        let _ = self.feed_tx.send(Err(error));
    }

    /// Number of `subscribe_to_events` calls made.
    pub fn subscribe_call_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Every event source handed out so far, oldest first.
    pub fn sources(&self) -> Vec<Arc<FakeEventSource>> {
        locked(&self.sources).clone()
    }
}

#[async_trait]
impl SubscriptionClient for FakeSubscriptionClient {
    async fn subscribe_to_events(
        &self,
        _token: &Token,
    ) -> Result<Arc<dyn EventSource>, RoutingApiError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = locked(&self.failures).pop_front() {
            return Err(error);
        }

        let source = Arc::new(FakeEventSource {
            feed: Arc::clone(&self.feed),
            closed: CancellationToken::new(),
            close_calls: AtomicUsize::new(0),
            next_calls: AtomicUsize::new(0),
        });
        locked(&self.sources).push(Arc::clone(&source));
        Ok(source)
    }
}

/// Route lister returning a configurable route list.
#[derive(Default)]
pub struct FakeRouteLister {
    mappings: std::sync::Mutex<Vec<TcpRouteMapping>>,
    failures: std::sync::Mutex<VecDeque<RoutingApiError>>,
    calls: AtomicUsize,
}

impl FakeRouteLister {
    #[must_use]
    pub fn with_mappings(mappings: Vec<TcpRouteMapping>) -> Self {
        let lister = Self::default();
        lister.set_mappings(mappings);
        lister
    }

    /// Replace the routes returned by later calls.
    pub fn set_mappings(&self, mappings: Vec<TcpRouteMapping>) {
        *locked(&self.mappings) = mappings;
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: RoutingApiError) {
        locked(&self.failures).push_back(error);
    }

    /// Number of `tcp_route_mappings` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteLister for FakeRouteLister {
    async fn tcp_route_mappings(
        &self,
        _token: &Token,
    ) -> Result<Vec<TcpRouteMapping>, RoutingApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = locked(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(locked(&self.mappings).clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::SecretString;
    use std::time::Duration;

    fn token() -> Token {
        Token::expiring_in(SecretString::from("t"), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let client = FakeSubscriptionClient::new();
        client.fail_next_subscribe(RoutingApiError::Unauthorized("expired".to_string()));

        let first = client.subscribe_to_events(&token()).await;
        assert!(matches!(first, Err(RoutingApiError::Unauthorized(_))));

        assert!(client.subscribe_to_events(&token()).await.is_ok());
        assert_eq!(client.subscribe_call_count(), 2);
        assert_eq!(client.sources().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_is_shared_across_sources() {
        let client = FakeSubscriptionClient::new();
        let first = client.subscribe_to_events(&token()).await.unwrap();
        first.close().unwrap();

        let second = client.subscribe_to_events(&token()).await.unwrap();
        let event = RouteEvent::Upsert(TcpRouteMapping::new("g", 1, "h", 2));
        client.send_event(event.clone());

        assert!(matches!(first.next().await, Err(RoutingApiError::Closed)));
        assert_eq!(second.next().await.unwrap(), event);
        assert_eq!(client.sources().first().unwrap().close_call_count(), 1);
    }
}
