//! TCP Router Control Plane Library
//!
//! Keeps the local load balancer's TCP routing table in step with the
//! routing API:
//!
//! - a [`watcher::Watcher`] holds a server-sent event subscription open and
//!   feeds route events to the [`updater::Updater`]
//! - a sync ticker triggers periodic full reconciliations
//! - the updater applies changes to a [`routing_table::RoutingTable`] and
//!   asks a [`configurer::Configurer`] to reload the load balancer
//!
//! # Architecture
//!
//! ```text
//! routing_api (SSE) -> watcher -> updater -> routing_table -> configurer -> reload script
//!                        ^
//!             sync ticker
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `configurer` - Load balancer reload
//! - `errors` - Error types
//! - `models` - Routing API data model
//! - `observability` - Metrics
//! - `process` - Supervised task lifecycle
//! - `routing_api` - Routing API client and event source
//! - `routing_table` - In-memory routing table
//! - `updater` - Applies events and syncs to the routing table
//! - `watcher` - Event subscription state machine

pub mod config;
pub mod configurer;
pub mod errors;
pub mod models;
pub mod observability;
pub mod process;
pub mod routing_api;
pub mod routing_table;
pub mod updater;
pub mod watcher;
