//! In-memory TCP routing table.
//!
//! One entry per external port, each holding the set of backends traffic on
//! that port is balanced across. The table is what the configurer renders
//! into load balancer configuration.

use crate::models::{RouteEvent, TcpRouteMapping};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Key of a routing table entry: the external port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey {
    pub port: u16,
}

impl RoutingKey {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port)
    }
}

/// A backend host:port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendServerInfo {
    pub address: String,
    pub port: u16,
}

impl BackendServerInfo {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Backends serving one external port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTableEntry {
    backends: HashSet<BackendServerInfo>,
}

impl RoutingTableEntry {
    #[must_use]
    pub fn backends(&self) -> &HashSet<BackendServerInfo> {
        &self.backends
    }
}

/// The routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: HashMap<RoutingKey, RoutingTableEntry>,
}

fn key_and_backend(mapping: &TcpRouteMapping) -> (RoutingKey, BackendServerInfo) {
    (
        RoutingKey::new(mapping.external_port),
        BackendServerInfo::new(mapping.host_ip.clone(), mapping.host_port),
    )
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a full route listing.
    #[must_use]
    pub fn from_mappings<'a>(mappings: impl IntoIterator<Item = &'a TcpRouteMapping>) -> Self {
        let mut table = Self::new();
        for mapping in mappings {
            let (key, backend) = key_and_backend(mapping);
            table.upsert_backend(key, backend);
        }
        table
    }

    /// Apply one route event. Returns whether the table changed.
    pub fn apply(&mut self, event: &RouteEvent) -> bool {
        let (key, backend) = key_and_backend(event.mapping());
        match event {
            RouteEvent::Upsert(_) => self.upsert_backend(key, backend),
            RouteEvent::Delete(_) => self.delete_backend(key, &backend),
        }
    }

    /// Add `backend` under `key`. Returns whether it was new.
    pub fn upsert_backend(&mut self, key: RoutingKey, backend: BackendServerInfo) -> bool {
        self.entries
            .entry(key)
            .or_default()
            .backends
            .insert(backend)
    }

    /// Remove `backend` from `key`, dropping the entry once it has no
    /// backends left. Returns whether anything was removed.
    pub fn delete_backend(&mut self, key: RoutingKey, backend: &BackendServerInfo) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };

        let removed = entry.backends.remove(backend);
        if entry.backends.is_empty() {
            self.entries.remove(&key);
        }
        removed
    }

    #[must_use]
    pub fn get(&self, key: RoutingKey) -> Option<&RoutingTableEntry> {
        self.entries.get(&key)
    }

    /// Number of external ports with at least one backend.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of backends across all entries.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.entries.values().map(|e| e.backends.len()).sum()
    }
}
