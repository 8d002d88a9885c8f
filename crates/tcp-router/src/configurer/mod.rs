//! Load balancer configuration.
//!
//! A [`Configurer`] applies a routing table to the local load balancer. The
//! [`ReloadingConfigurer`] leaves config rendering to the reload script and
//! only triggers it through a [`ScriptRunner`].

pub mod script_runner;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use crate::errors::{ConfigurerError, ScriptError};
use crate::routing_table::RoutingTable;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub use script_runner::CommandScriptRunner;

/// Triggers a reload of the load balancer.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self) -> Result<(), ScriptError>;
}

/// Applies a routing table to the load balancer.
#[async_trait]
pub trait Configurer: Send + Sync {
    async fn configure(&self, table: &RoutingTable) -> Result<(), ConfigurerError>;
}

/// Configurer that reloads the load balancer on every change.
pub struct ReloadingConfigurer {
    script_runner: Arc<dyn ScriptRunner>,
}

impl ReloadingConfigurer {
    #[must_use]
    pub fn new(script_runner: Arc<dyn ScriptRunner>) -> Self {
        Self { script_runner }
    }
}

#[async_trait]
impl Configurer for ReloadingConfigurer {
    #[instrument(skip_all, fields(ports = table.len()))]
    async fn configure(&self, table: &RoutingTable) -> Result<(), ConfigurerError> {
        info!(
            target: "tcp_router.configurer",
            ports = table.len(),
            backends = table.backend_count(),
            "Reloading load balancer"
        );

        self.script_runner.run().await.map_err(|e| {
            warn!(target: "tcp_router.configurer", error = %e, "Load balancer reload failed");
            ConfigurerError::from(e)
        })
    }
}
