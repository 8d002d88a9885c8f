//! Routing API data model.
//!
//! `TcpRouteMapping` matches the routing API JSON representation of a TCP
//! route. A `RouteEvent` is one entry of the event stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A mapping from an external port on a router group to a backend host:port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpRouteMapping {
    /// Router group this route belongs to.
    pub router_group_guid: String,

    /// Port the load balancer listens on.
    #[serde(rename = "port")]
    pub external_port: u16,

    /// Backend host address.
    #[serde(rename = "backend_ip")]
    pub host_ip: String,

    /// Backend port.
    #[serde(rename = "backend_port")]
    pub host_port: u16,

    /// Route TTL in seconds, as reported by the routing API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Version of this route in the routing API's store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_tag: Option<ModificationTag>,
}

/// Routing API version stamp: `index` increases on every change to a route
/// and `guid` changes when the store is reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationTag {
    pub guid: String,
    pub index: u32,
}

impl TcpRouteMapping {
    #[must_use]
    pub fn new(
        router_group_guid: impl Into<String>,
        external_port: u16,
        host_ip: impl Into<String>,
        host_port: u16,
    ) -> Self {
        Self {
            router_group_guid: router_group_guid.into(),
            external_port,
            host_ip: host_ip.into(),
            host_port,
            ttl: None,
            modification_tag: None,
        }
    }
}

/// Action tag carried by a route event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteAction {
    Upsert,
    Delete,
}

impl RouteAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RouteAction::Upsert => "Upsert",
            RouteAction::Delete => "Delete",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Upsert" => Ok(RouteAction::Upsert),
            "Delete" => Ok(RouteAction::Delete),
            other => Err(format!("unknown route action: {other}")),
        }
    }
}

/// A route add or remove received from the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Upsert(TcpRouteMapping),
    Delete(TcpRouteMapping),
}

impl RouteEvent {
    #[must_use]
    pub fn new(action: RouteAction, mapping: TcpRouteMapping) -> Self {
        match action {
            RouteAction::Upsert => RouteEvent::Upsert(mapping),
            RouteAction::Delete => RouteEvent::Delete(mapping),
        }
    }

    #[must_use]
    pub fn action(&self) -> RouteAction {
        match self {
            RouteEvent::Upsert(_) => RouteAction::Upsert,
            RouteEvent::Delete(_) => RouteAction::Delete,
        }
    }

    #[must_use]
    pub fn mapping(&self) -> &TcpRouteMapping {
        match self {
            RouteEvent::Upsert(mapping) | RouteEvent::Delete(mapping) => mapping,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_deserializes_routing_api_json() {
        let json = r#"{
            "router_group_guid": "rtrGrp0001",
            "port": 61000,
            "backend_ip": "10.0.16.4",
            "backend_port": 5222,
            "ttl": 120,
            "modification_tag": {"guid": "abc", "index": 3}
        }"#;

        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();

        assert_eq!(mapping.router_group_guid, "rtrGrp0001");
        assert_eq!(mapping.external_port, 61000);
        assert_eq!(mapping.host_ip, "10.0.16.4");
        assert_eq!(mapping.host_port, 5222);
        assert_eq!(mapping.ttl, Some(120));
        assert_eq!(
            mapping.modification_tag,
            Some(ModificationTag {
                guid: "abc".to_string(),
                index: 3,
            })
        );
    }

    #[test]
    fn test_mapping_without_optional_fields() {
        let json = r#"{"router_group_guid":"g","port":1,"backend_ip":"h","backend_port":2}"#;
        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();

        assert_eq!(mapping, TcpRouteMapping::new("g", 1, "h", 2));
        let encoded = serde_json::to_string(&mapping).unwrap();
        assert!(!encoded.contains("ttl"));
        assert!(!encoded.contains("modification_tag"));
    }

    #[test]
    fn test_route_action_parsing() {
        assert_eq!("Upsert".parse::<RouteAction>(), Ok(RouteAction::Upsert));
        assert_eq!("Delete".parse::<RouteAction>(), Ok(RouteAction::Delete));
        assert!("upsert".parse::<RouteAction>().is_err());
        assert!("Sync".parse::<RouteAction>().is_err());
    }

    #[test]
    fn test_route_event_accessors() {
        let mapping = TcpRouteMapping::new("rtrGrp0001", 61000, "some-ip-1", 5222);

        let upsert = RouteEvent::new(RouteAction::Upsert, mapping.clone());
        assert_eq!(upsert.action(), RouteAction::Upsert);
        assert_eq!(upsert.mapping(), &mapping);

        let delete = RouteEvent::new(RouteAction::Delete, mapping.clone());
        assert_eq!(delete, RouteEvent::Delete(mapping));
        assert_eq!(delete.action().to_string(), "Delete");
    }
}
