//! Routing table updater.
//!
//! The [`Updater`] is the watcher's only consumer: every route event is handed
//! to [`Updater::handle_event`] and every sync signal becomes one
//! [`Updater::sync`]. Both may run at the same time.
//!
//! [`RoutingTableUpdater`] keeps the table in memory and reconfigures the
//! load balancer whenever it changes. A sync rebuilds the table from the full
//! route listing; events that arrive while the listing is in flight are held
//! back and replayed on top of the rebuilt table, so the swap never loses
//! them.

use crate::configurer::Configurer;
use crate::errors::UpdaterError;
use crate::models::RouteEvent;
use crate::routing_api::RouteLister;
use crate::routing_table::RoutingTable;
use async_trait::async_trait;
use common::token_manager::TokenSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Applies route events and full syncs to the routing table.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Apply one route event.
    async fn handle_event(&self, event: RouteEvent) -> Result<(), UpdaterError>;

    /// Reconcile the routing table against the full route listing.
    async fn sync(&self) -> Result<(), UpdaterError>;
}

#[derive(Default)]
struct UpdaterState {
    table: RoutingTable,
    syncing: bool,
    cached_events: Vec<RouteEvent>,
}

/// [`Updater`] backed by an in-memory [`RoutingTable`].
pub struct RoutingTableUpdater {
    route_lister: Arc<dyn RouteLister>,
    token_source: Arc<dyn TokenSource>,
    configurer: Arc<dyn Configurer>,
    state: Mutex<UpdaterState>,
    force_refresh: AtomicBool,
}

impl RoutingTableUpdater {
    #[must_use]
    pub fn new(
        route_lister: Arc<dyn RouteLister>,
        token_source: Arc<dyn TokenSource>,
        configurer: Arc<dyn Configurer>,
    ) -> Self {
        Self {
            route_lister,
            token_source,
            configurer,
            state: Mutex::new(UpdaterState::default()),
            force_refresh: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current routing table.
    pub async fn routing_table(&self) -> RoutingTable {
        self.state.lock().await.table.clone()
    }

    async fn begin_sync(&self) {
        let mut state = self.state.lock().await;
        state.syncing = true;
        state.cached_events.clear();
    }

    /// End a sync, replaying held-back events onto `fresh` (or onto the
    /// current table when the listing failed).
    async fn finish_sync(&self, fresh: Option<RoutingTable>) -> Result<(), UpdaterError> {
        let mut state = self.state.lock().await;
        state.syncing = false;
        let cached = std::mem::take(&mut state.cached_events);

        let mut table = fresh.unwrap_or_else(|| state.table.clone());
        for event in &cached {
            table.apply(event);
        }
        if !cached.is_empty() {
            debug!(
                target: "tcp_router.updater",
                count = cached.len(),
                "Applied events received during sync"
            );
        }

        if table == state.table {
            return Ok(());
        }

        state.table = table;
        self.configurer.configure(&state.table).await?;
        Ok(())
    }

    async fn fetch_routing_table(&self) -> Result<RoutingTable, UpdaterError> {
        let force = self.force_refresh.swap(false, Ordering::SeqCst);
        let token = self.token_source.fetch_token(force).await.map_err(|e| {
            if force {
                self.force_refresh.store(true, Ordering::SeqCst);
            }
            e
        })?;

        match self.route_lister.tcp_route_mappings(&token).await {
            Ok(mappings) => Ok(RoutingTable::from_mappings(&mappings)),
            Err(e) => {
                if e.is_unauthorized() {
                    self.force_refresh.store(true, Ordering::SeqCst);
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Updater for RoutingTableUpdater {
    #[instrument(skip_all, fields(action = %event.action()))]
    async fn handle_event(&self, event: RouteEvent) -> Result<(), UpdaterError> {
        let mut state = self.state.lock().await;

        if state.syncing {
            debug!(target: "tcp_router.updater", "Sync in progress, caching event");
            state.cached_events.push(event);
            return Ok(());
        }

        if !state.table.apply(&event) {
            debug!(target: "tcp_router.updater", "Routing table unchanged");
            return Ok(());
        }

        self.configurer.configure(&state.table).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn sync(&self) -> Result<(), UpdaterError> {
        self.begin_sync().await;

        match self.fetch_routing_table().await {
            Ok(fresh) => {
                info!(
                    target: "tcp_router.updater",
                    ports = fresh.len(),
                    backends = fresh.backend_count(),
                    "Fetched routing table"
                );
                self.finish_sync(Some(fresh)).await
            }
            Err(e) => {
                warn!(target: "tcp_router.updater", error = %e, "Failed to fetch routing table");
                self.finish_sync(None).await?;
                Err(e)
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Recording updater for watcher tests.

    use super::*;
    use crate::errors::RoutingApiError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::PoisonError;

    /// Updater that records the events it receives and counts syncs.
    #[derive(Default)]
    pub struct MockUpdater {
        events: std::sync::Mutex<Vec<RouteEvent>>,
        syncs: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockUpdater {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every later call fail.
        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Events handled so far, in arrival order.
        pub fn handled_events(&self) -> Vec<RouteEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn handle_event_call_count(&self) -> usize {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        pub fn sync_call_count(&self) -> usize {
            self.syncs.load(Ordering::SeqCst)
        }

        fn result(&self) -> Result<(), UpdaterError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RoutingApiError::Http("mock updater failure".to_string()).into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Updater for MockUpdater {
        async fn handle_event(&self, event: RouteEvent) -> Result<(), UpdaterError> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
            self.result()
        }

        async fn sync(&self) -> Result<(), UpdaterError> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            self.result()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::configurer::mock::MockConfigurer;
    use crate::errors::RoutingApiError;
    use crate::models::TcpRouteMapping;
    use crate::routing_api::mock::FakeRouteLister;
    use crate::routing_table::{BackendServerInfo, RoutingKey};
    use common::token_manager::mock::MockTokenSource;

    struct Harness {
        lister: Arc<FakeRouteLister>,
        tokens: Arc<MockTokenSource>,
        configurer: Arc<MockConfigurer>,
        updater: RoutingTableUpdater,
    }

    fn harness(mappings: Vec<TcpRouteMapping>) -> Harness {
        let lister = Arc::new(FakeRouteLister::with_mappings(mappings));
        let tokens = Arc::new(MockTokenSource::returning("access_token"));
        let configurer = Arc::new(MockConfigurer::new());
        let updater = RoutingTableUpdater::new(lister.clone(), tokens.clone(), configurer.clone());
        Harness {
            lister,
            tokens,
            configurer,
            updater,
        }
    }

    fn mapping(port: u16, ip: &str, host_port: u16) -> TcpRouteMapping {
        TcpRouteMapping::new("rtrGrp0001", port, ip, host_port)
    }

    #[tokio::test]
    async fn test_handle_event_configures_on_change() {
        let h = harness(vec![]);
        let event = RouteEvent::Upsert(mapping(61000, "some-ip-1", 5222));

        h.updater.handle_event(event.clone()).await.unwrap();
        h.updater.handle_event(event).await.unwrap();

        // Second upsert is a no-op
        assert_eq!(h.configurer.configure_call_count(), 1);
        let table = h.configurer.last_table().unwrap();
        assert!(table
            .get(RoutingKey::new(61000))
            .unwrap()
            .backends()
            .contains(&BackendServerInfo::new("some-ip-1", 5222)));
    }

    #[tokio::test]
    async fn test_handle_event_surfaces_configure_failure() {
        let h = harness(vec![]);
        h.configurer.set_failing(true);

        let result = h
            .updater
            .handle_event(RouteEvent::Upsert(mapping(61000, "some-ip-1", 5222)))
            .await;

        assert!(matches!(result, Err(UpdaterError::Configurer(_))));
    }

    #[tokio::test]
    async fn test_sync_replaces_table() {
        let h = harness(vec![mapping(61000, "some-ip-1", 5222)]);
        h.updater
            .handle_event(RouteEvent::Upsert(mapping(62000, "stale-ip", 1)))
            .await
            .unwrap();

        h.updater.sync().await.unwrap();

        let table = h.updater.routing_table().await;
        assert_eq!(table.len(), 1);
        assert!(table.get(RoutingKey::new(62000)).is_none());
        assert_eq!(h.configurer.configure_call_count(), 2);
        assert_eq!(h.tokens.fetch_token_args_for_call(0), Some(false));
    }

    #[tokio::test]
    async fn test_sync_without_changes_does_not_reconfigure() {
        let h = harness(vec![mapping(61000, "some-ip-1", 5222)]);

        h.updater.sync().await.unwrap();
        h.updater.sync().await.unwrap();

        assert_eq!(h.configurer.configure_call_count(), 1);
        assert_eq!(h.lister.call_count(), 2);
    }

    #[tokio::test]
    async fn test_events_during_sync_are_replayed() {
        let h = harness(vec![mapping(61000, "some-ip-1", 5222)]);

        h.updater.begin_sync().await;
        h.updater
            .handle_event(RouteEvent::Upsert(mapping(61001, "some-ip-2", 5223)))
            .await
            .unwrap();
        // Held back until the sync finishes
        assert_eq!(h.configurer.configure_call_count(), 0);

        let fresh = h.updater.fetch_routing_table().await.unwrap();
        h.updater.finish_sync(Some(fresh)).await.unwrap();

        let table = h.updater.routing_table().await;
        assert_eq!(table.len(), 2);
        assert!(table.get(RoutingKey::new(61001)).is_some());
        assert_eq!(h.configurer.configure_call_count(), 1);
    }

    #[tokio::test]
    async fn test_events_survive_failed_sync() {
        let h = harness(vec![]);
        h.lister
            .fail_next(RoutingApiError::Http("connection refused".to_string()));

        h.updater.begin_sync().await;
        h.updater
            .handle_event(RouteEvent::Upsert(mapping(61000, "some-ip-1", 5222)))
            .await
            .unwrap();

        let err = h.updater.fetch_routing_table().await.unwrap_err();
        assert!(matches!(err, UpdaterError::RoutingApi(_)));
        h.updater.finish_sync(None).await.unwrap();

        assert_eq!(h.updater.routing_table().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_listing_forces_refresh_on_next_sync() {
        let h = harness(vec![mapping(61000, "some-ip-1", 5222)]);
        h.lister
            .fail_next(RoutingApiError::Unauthorized("expired".to_string()));

        let err = h.updater.sync().await.unwrap_err();
        assert!(matches!(
            err,
            UpdaterError::RoutingApi(RoutingApiError::Unauthorized(_))
        ));

        h.updater.sync().await.unwrap();
        h.updater.sync().await.unwrap();

        assert_eq!(h.tokens.fetch_token_args_for_call(0), Some(false));
        assert_eq!(h.tokens.fetch_token_args_for_call(1), Some(true));
        assert_eq!(h.tokens.fetch_token_args_for_call(2), Some(false));
    }

    #[tokio::test]
    async fn test_token_failure_fails_sync() {
        let h = harness(vec![mapping(61000, "some-ip-1", 5222)]);
        h.tokens.set_failing(true);

        let err = h.updater.sync().await.unwrap_err();

        assert!(matches!(err, UpdaterError::Token(_)));
        assert_eq!(h.lister.call_count(), 0);
        assert!(h.updater.routing_table().await.is_empty());
    }
}
