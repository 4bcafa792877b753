//! The "Topology" Registry - simulated nodes and the links between them.
//!
//! Canonical topology definitions live here and are never mutated once
//! registered. Running tests read them through the registry and keep any
//! status changes (fault injection) in their own private overlay.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Role a node plays in the simulated network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Validator,
    Relay,
    Light,
}

/// Health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Up,
    Degraded,
    Down,
}

/// A node definition within a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    pub role: NodeRole,
    pub region: String,
    /// Maximum sustained throughput (tx/s)
    pub capacity_tps: f64,
    /// Processing latency with an empty queue (ms)
    pub base_latency_ms: f64,
    #[serde(default)]
    pub status: NodeStatus,
}

impl NodeSpec {
    pub fn new(id: &str, role: NodeRole, region: &str, capacity_tps: f64, base_latency_ms: f64) -> Self {
        Self {
            id: id.to_string(),
            role,
            region: region.to_string(),
            capacity_tps,
            base_latency_ms,
            status: NodeStatus::Up,
        }
    }
}

/// A bidirectional link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub from: String,
    pub to: String,
    /// Relay bandwidth in transactions per second
    pub bandwidth_tps: f64,
    pub latency_ms: f64,
}

impl Link {
    pub fn new(from: &str, to: &str, bandwidth_tps: f64, latency_ms: f64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            bandwidth_tps,
            latency_ms,
        }
    }

    /// Returns true if this link touches `node_id`.
    pub fn touches(&self, node_id: &str) -> bool {
        self.from == node_id || self.to == node_id
    }

    /// Returns the far end of the link as seen from `node_id`.
    pub fn peer_of(&self, node_id: &str) -> Option<&str> {
        if self.from == node_id {
            Some(&self.to)
        } else if self.to == node_id {
            Some(&self.from)
        } else {
            None
        }
    }
}

/// A named set of simulated nodes and links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub custom: bool,
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<Link>,
}

impl Topology {
    /// Looks up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Returns the distinct regions in node order.
    pub fn regions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter(|n| seen.insert(n.region.as_str()))
            .map(|n| n.region.clone())
            .collect()
    }

    /// Sum of node capacities.
    pub fn total_capacity_tps(&self) -> f64 {
        self.nodes.iter().map(|n| n.capacity_tps).sum()
    }
}

/// Caller-supplied definition for a custom topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl TopologySpec {
    /// Checks node uniqueness and link referential integrity.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |msg: String| Err(HarnessError::InvalidTopologySpec(msg));

        if self.name.trim().is_empty() {
            return invalid("name must not be empty".into());
        }
        if self.nodes.is_empty() {
            return invalid("topology needs at least one node".into());
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return invalid("node id must not be empty".into());
            }
            if !ids.insert(node.id.as_str()) {
                return invalid(format!("duplicate node id '{}'", node.id));
            }
            if !(node.capacity_tps.is_finite() && node.capacity_tps > 0.0) {
                return invalid(format!("node '{}' capacity must be positive", node.id));
            }
            if !(node.base_latency_ms.is_finite() && node.base_latency_ms >= 0.0) {
                return invalid(format!("node '{}' latency must be non-negative", node.id));
            }
        }

        let mut pairs = HashSet::new();
        for link in &self.links {
            for end in [&link.from, &link.to] {
                if !ids.contains(end.as_str()) {
                    return invalid(format!("link references unknown node '{}'", end));
                }
            }
            if link.from == link.to {
                return invalid(format!("self-link on node '{}'", link.from));
            }
            if !(link.bandwidth_tps.is_finite() && link.bandwidth_tps > 0.0) {
                return invalid(format!("link {}-{} bandwidth must be positive", link.from, link.to));
            }
            if !(link.latency_ms.is_finite() && link.latency_ms >= 0.0) {
                return invalid(format!("link {}-{} latency must be non-negative", link.from, link.to));
            }
            let key = if link.from < link.to {
                (link.from.as_str(), link.to.as_str())
            } else {
                (link.to.as_str(), link.from.as_str())
            };
            if !pairs.insert(key) {
                return invalid(format!("duplicate link {}-{}", link.from, link.to));
            }
        }

        Ok(())
    }
}

/// A node together with the topology that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub topology_id: String,
    #[serde(flatten)]
    pub node: NodeSpec,
}

/// Owned store of topologies.
///
/// Created once per process and shared behind an `Arc`; reads vastly
/// outnumber writes (custom topology creation).
pub struct TopologyRegistry {
    topologies: RwLock<Vec<Topology>>,
}

impl TopologyRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            topologies: RwLock::new(Vec::new()),
        }
    }

    /// Creates a registry seeded with the built-in topologies.
    pub fn with_builtins() -> Self {
        Self {
            topologies: RwLock::new(builtin_topologies()),
        }
    }

    /// Returns every registered topology in registration order.
    pub fn list_topologies(&self) -> Vec<Topology> {
        self.topologies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Looks up a topology by id.
    pub fn get_topology(&self, id: &str) -> Option<Topology> {
        self.topologies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Validates and registers a custom topology.
    ///
    /// Nothing is registered if validation fails.
    pub fn create_custom_topology(&self, spec: TopologySpec) -> Result<Topology, HarnessError> {
        spec.validate()?;

        let topology = Topology {
            id: format!("custom-{}", Uuid::new_v4()),
            name: spec.name,
            description: spec.description.unwrap_or_default(),
            custom: true,
            nodes: spec.nodes,
            links: spec.links,
        };

        self.topologies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topology.clone());

        Ok(topology)
    }

    /// Returns every node of every topology.
    pub fn list_nodes(&self) -> Vec<NodeEntry> {
        self.topologies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|t| {
                t.nodes.iter().map(move |n| NodeEntry {
                    topology_id: t.id.clone(),
                    node: n.clone(),
                })
            })
            .collect()
    }

    /// Looks up a node.
    ///
    /// Node ids are only unique within a topology, so `id` may be qualified
    /// as `"<topology>:<node>"`; a bare id returns the first match in
    /// registration order.
    pub fn get_node(&self, id: &str) -> Option<NodeEntry> {
        let (topology_filter, node_id) = match id.split_once(':') {
            Some((t, n)) => (Some(t), n),
            None => (None, id),
        };

        self.list_nodes().into_iter().find(|entry| {
            entry.node.id == node_id && topology_filter.map_or(true, |t| entry.topology_id == t)
        })
    }

    /// Number of registered topologies.
    pub fn len(&self) -> usize {
        self.topologies.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TopologyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn builtin_topologies() -> Vec<Topology> {
    use NodeRole::*;

    let minimal = Topology {
        id: "minimal-3".into(),
        name: "Minimal Validator Set".into(),
        description: "Three validators in one region, fully meshed".into(),
        custom: false,
        nodes: vec![
            NodeSpec::new("validator-1", Validator, "us-east", 100.0, 20.0),
            NodeSpec::new("validator-2", Validator, "us-east", 100.0, 20.0),
            NodeSpec::new("validator-3", Validator, "us-east", 100.0, 20.0),
        ],
        links: vec![
            Link::new("validator-1", "validator-2", 500.0, 5.0),
            Link::new("validator-2", "validator-3", 500.0, 5.0),
            Link::new("validator-1", "validator-3", 500.0, 5.0),
        ],
    };

    let multi_region = Topology {
        id: "multi-region-6".into(),
        name: "Multi-Region".into(),
        description: "Validator and relay pairs in three regions, relays in a ring".into(),
        custom: false,
        nodes: vec![
            NodeSpec::new("validator-us", Validator, "us-east", 200.0, 25.0),
            NodeSpec::new("validator-eu", Validator, "eu-west", 200.0, 25.0),
            NodeSpec::new("validator-ap", Validator, "ap-south", 200.0, 25.0),
            NodeSpec::new("relay-us", Relay, "us-east", 400.0, 10.0),
            NodeSpec::new("relay-eu", Relay, "eu-west", 400.0, 10.0),
            NodeSpec::new("relay-ap", Relay, "ap-south", 400.0, 10.0),
        ],
        links: vec![
            Link::new("validator-us", "relay-us", 1000.0, 2.0),
            Link::new("validator-eu", "relay-eu", 1000.0, 2.0),
            Link::new("validator-ap", "relay-ap", 1000.0, 2.0),
            Link::new("relay-us", "relay-eu", 500.0, 80.0),
            Link::new("relay-eu", "relay-ap", 500.0, 120.0),
            Link::new("relay-ap", "relay-us", 500.0, 150.0),
        ],
    };

    let hub = Topology {
        id: "hub-and-spoke".into(),
        name: "Hub and Spoke".into(),
        description: "One relay hub serving four light nodes".into(),
        custom: false,
        nodes: vec![
            NodeSpec::new("hub", Relay, "us-east", 500.0, 10.0),
            NodeSpec::new("light-1", Light, "us-east", 50.0, 40.0),
            NodeSpec::new("light-2", Light, "eu-west", 50.0, 40.0),
            NodeSpec::new("light-3", Light, "ap-south", 50.0, 40.0),
            NodeSpec::new("light-4", Light, "us-west", 50.0, 40.0),
        ],
        links: vec![
            Link::new("hub", "light-1", 200.0, 5.0),
            Link::new("hub", "light-2", 200.0, 60.0),
            Link::new("hub", "light-3", 200.0, 110.0),
            Link::new("hub", "light-4", 200.0, 30.0),
        ],
    };

    vec![minimal, multi_region, hub]
}
