//! TCP route event watcher.
//!
//! The watcher keeps a routing-API event subscription open and hands every
//! route event to the [`Updater`], in order and one at a time. It runs three
//! paths side by side until shutdown:
//!
//! - **subscribe/read**: fetch a token, subscribe, read events until the
//!   stream fails, then start over
//! - **sync**: one [`Updater::sync`] per sync signal, whatever the state of
//!   the stream
//! - **shutdown**: close the live event source so a pending read returns
//!
//! Updater calls are raced against shutdown too: a sync or event apply still
//! running when the watcher is stopped is dropped, not awaited.
//!
//! # Retry policy
//!
//! Every failed attempt (token fetch or subscribe) waits a fixed retry
//! interval before the next one; retries never stop. A subscribe rejected as
//! unauthorized makes the next token fetch a forced refresh. Any other
//! failure reuses the cached token. A forced refresh is used up by the first
//! token fetch that succeeds.
//!
//! A stream that fails after delivering events is resubscribed immediately.
//! A stream that fails before delivering anything waits the retry interval,
//! so a server that accepts and then drops every subscription cannot make
//! the watcher spin.
//!
//! # Log events
//!
//! Operator-facing log lines carry an `event` field with one of the
//! `EVENT_*` names below.

use crate::errors::RoutingApiError;
use crate::models::RouteEvent;
use crate::observability::metrics::{
    record_route_event, record_subscription_attempt, record_sync, record_token_fetch,
};
use crate::process::{ReadySignal, Runner};
use crate::routing_api::{EventSource, SubscriptionClient};
use crate::updater::Updater;
use async_trait::async_trait;
use common::token_manager::{Token, TokenSource};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Logged once when shutdown begins.
pub const EVENT_STOPPING: &str = "watcher.stopping";

/// Logged when a live event stream fails.
pub const EVENT_FAILED_GETTING_NEXT: &str = "watcher.failed-getting-next-tcp-routing-event";

/// Logged when a subscription attempt fails.
pub const EVENT_FAILED_SUBSCRIBING: &str = "watcher.failed-subscribing-to-tcp-routing-events";

/// Logged when a token cannot be obtained.
pub const EVENT_ERROR_FETCHING_TOKEN: &str = "watcher.error-fetching-token";

/// Default wait between failed subscription attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Watches routing-API route events and feeds them to an [`Updater`].
pub struct Watcher {
    client: Arc<dyn SubscriptionClient>,
    updater: Arc<dyn Updater>,
    token_source: Arc<dyn TokenSource>,
    retry_interval: Duration,
    sync_rx: mpsc::Receiver<()>,
}

impl Watcher {
    /// Create a watcher.
    ///
    /// Every unit received on `sync_rx` triggers one [`Updater::sync`].
    #[must_use]
    pub fn new(
        client: Arc<dyn SubscriptionClient>,
        updater: Arc<dyn Updater>,
        token_source: Arc<dyn TokenSource>,
        retry_interval: Duration,
        sync_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            client,
            updater,
            token_source,
            retry_interval,
            sync_rx,
        }
    }
}

#[async_trait]
impl Runner for Watcher {
    type Error = Infallible;

    #[instrument(skip_all, name = "tcp_router.watcher")]
    async fn run(self, shutdown: CancellationToken, ready: ReadySignal) -> Result<(), Infallible> {
        let Watcher {
            client,
            updater,
            token_source,
            retry_interval,
            sync_rx,
        } = self;

        let session = Session {
            client,
            updater,
            token_source,
            retry_interval,
            shutdown,
            current: Mutex::new(None),
        };

        info!(
            target: "tcp_router.watcher",
            retry_interval_ms = u64::try_from(retry_interval.as_millis()).unwrap_or(u64::MAX),
            "Watcher starting"
        );

        tokio::join!(
            session.subscribe_loop(ready),
            session.sync_loop(sync_rx),
            session.close_on_shutdown(),
        );

        info!(target: "tcp_router.watcher", "Watcher stopped");
        Ok(())
    }
}

/// Outcome of one pass through token fetch and subscribe.
enum Attempt {
    Subscribed(Arc<dyn EventSource>),
    Failed,
    Cancelled,
}

/// State shared by the three watcher paths.
struct Session {
    client: Arc<dyn SubscriptionClient>,
    updater: Arc<dyn Updater>,
    token_source: Arc<dyn TokenSource>,
    retry_interval: Duration,
    shutdown: CancellationToken,
    /// The live event source. Whoever takes it out closes it.
    current: Mutex<Option<Arc<dyn EventSource>>>,
}

impl Session {
    async fn subscribe_loop(&self, mut ready: ReadySignal) {
        let mut force_refresh = false;

        while !self.shutdown.is_cancelled() {
            ready.ready();

            let source = match self.attempt_subscribe(&mut force_refresh).await {
                Attempt::Subscribed(source) => source,
                Attempt::Failed => {
                    if self.backoff().await {
                        continue;
                    }
                    return;
                }
                Attempt::Cancelled => return,
            };

            if !self.install(&source).await {
                return;
            }

            let delivered = self.read_events(source.as_ref()).await;
            self.close_current().await;

            if self.shutdown.is_cancelled() {
                return;
            }
            if delivered == 0 && !self.backoff().await {
                return;
            }
        }
    }

    /// Fetch a token and open a subscription.
    async fn attempt_subscribe(&self, force_refresh: &mut bool) -> Attempt {
        let Some(token) = self.fetch_token(force_refresh).await else {
            return if self.shutdown.is_cancelled() {
                Attempt::Cancelled
            } else {
                Attempt::Failed
            };
        };

        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Attempt::Cancelled,
            result = self.client.subscribe_to_events(&token) => result,
        };

        match result {
            Ok(source) => {
                record_subscription_attempt("success");
                info!(target: "tcp_router.watcher", "Subscribed to TCP routing events");
                Attempt::Subscribed(source)
            }
            Err(e) => {
                let unauthorized = e.is_unauthorized();
                if unauthorized {
                    *force_refresh = true;
                }
                record_subscription_attempt(e.kind());
                warn!(
                    target: "tcp_router.watcher",
                    event = EVENT_FAILED_SUBSCRIBING,
                    error = %e,
                    unauthorized,
                    "Failed to subscribe to TCP routing events"
                );
                Attempt::Failed
            }
        }
    }

    /// Returns `None` on failure or shutdown. A successful fetch clears
    /// `force_refresh`.
    async fn fetch_token(&self, force_refresh: &mut bool) -> Option<Token> {
        let forced = *force_refresh;
        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return None,
            result = self.token_source.fetch_token(forced) => result,
        };
        record_token_fetch(result.is_ok(), forced);

        match result {
            Ok(token) => {
                *force_refresh = false;
                Some(token)
            }
            Err(e) => {
                error!(
                    target: "tcp_router.watcher",
                    event = EVENT_ERROR_FETCHING_TOKEN,
                    error = %e,
                    force_refresh = forced,
                    "Failed to fetch token"
                );
                None
            }
        }
    }

    /// Publish `source` as the live event source. Returns false, with the
    /// source closed, if shutdown has already begun.
    async fn install(&self, source: &Arc<dyn EventSource>) -> bool {
        let mut current = self.current.lock().await;
        if self.shutdown.is_cancelled() {
            drop(current);
            close_source(source.as_ref());
            return false;
        }
        *current = Some(Arc::clone(source));
        true
    }

    /// Take the live event source, if still there, and close it.
    async fn close_current(&self) {
        let taken = self.current.lock().await.take();
        if let Some(source) = taken {
            close_source(source.as_ref());
        }
    }

    /// Read and dispatch events until the stream fails. Returns the number
    /// of events delivered.
    async fn read_events(&self, source: &dyn EventSource) -> usize {
        let mut delivered = 0;
        loop {
            match source.next().await {
                Ok(event) => {
                    delivered += 1;
                    self.dispatch(event).await;
                    if self.shutdown.is_cancelled() {
                        return delivered;
                    }
                }
                Err(RoutingApiError::Closed) if self.shutdown.is_cancelled() => return delivered,
                Err(e) => {
                    error!(
                        target: "tcp_router.watcher",
                        event = EVENT_FAILED_GETTING_NEXT,
                        error = %e,
                        delivered,
                        "Failed to get next TCP routing event"
                    );
                    return delivered;
                }
            }
        }
    }

    async fn dispatch(&self, event: RouteEvent) {
        let action = event.action();
        debug!(
            target: "tcp_router.watcher",
            action = %action,
            port = event.mapping().external_port,
            "Handling route event"
        );

        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                debug!(
                    target: "tcp_router.watcher",
                    action = %action,
                    "Route event abandoned on shutdown"
                );
                return;
            }
            result = self.updater.handle_event(event) => result,
        };
        record_route_event(action, result.is_ok());
        if let Err(e) = result {
            warn!(
                target: "tcp_router.watcher",
                action = %action,
                error = %e,
                "Failed to handle route event"
            );
        }
    }

    /// Wait the retry interval. Returns false if shutdown interrupted it.
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(self.retry_interval) => true,
        }
    }

    async fn sync_loop(&self, mut sync_rx: mpsc::Receiver<()>) {
        loop {
            let signal = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                signal = sync_rx.recv() => signal,
            };

            if signal.is_none() {
                debug!(target: "tcp_router.watcher", "Sync channel closed");
                self.shutdown.cancelled().await;
                return;
            }
            self.sync().await;
        }
    }

    async fn sync(&self) {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                debug!(target: "tcp_router.watcher", "Sync abandoned on shutdown");
                return;
            }
            result = self.updater.sync() => result,
        };
        record_sync(result.is_ok(), started.elapsed());

        match result {
            Ok(()) => debug!(target: "tcp_router.watcher", "Sync complete"),
            Err(e) => warn!(target: "tcp_router.watcher", error = %e, "Sync failed"),
        }
    }

    async fn close_on_shutdown(&self) {
        self.shutdown.cancelled().await;
        info!(target: "tcp_router.watcher", event = EVENT_STOPPING, "Watcher stopping");
        self.close_current().await;
    }
}

fn close_source(source: &dyn EventSource) {
    if let Err(e) = source.close() {
        warn!(target: "tcp_router.watcher", error = %e, "Failed to close event source");
    }
}

/// Emit a sync signal every `period` until `shutdown` is cancelled.
///
/// The first signal is sent immediately. A tick is dropped if the previous
/// signal has not been taken yet.
#[must_use]
pub fn sync_ticker(period: Duration, shutdown: CancellationToken) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = interval.tick() => match tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                },
            }
        }
    });

    rx
}
