//! JSON serde for the graph exchange format.
//!
//! The wire format uses camelCase field names. A node's energy is split into
//! the unattributed `pooled` amount plus a `channels` map; older documents
//! that carry a single `energy` number load it as pooled energy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::energy::EnergyChannels;
use crate::graph::{Link, MemoryGraph, Node};
use crate::time::now_iso8601;

pub const CURRENT_VERSION: &str = "0.1.0";

// --- Wire format types ---

#[derive(Serialize, Deserialize, Debug)]
pub struct WireExport {
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    pub graph: WireGraph,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct WireGraph {
    #[serde(default)]
    pub nodes: Vec<WireNode>,
    #[serde(default)]
    pub links: Vec<WireLink>,
    #[serde(rename = "totalEnergy", default)]
    pub total_energy: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireNode {
    pub id: String,
    #[serde(rename = "nodeType", alias = "type")]
    pub node_type: String,
    #[serde(alias = "energy", default)]
    pub pooled: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
    #[serde(rename = "wmPresence", default, skip_serializing_if = "Option::is_none")]
    pub wm_presence: Option<f64>,
    #[serde(rename = "unresolvedGoal", default)]
    pub unresolved_goal: bool,
    #[serde(default = "default_true")]
    pub traversable: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireLink {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relatedness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Vec<f64>>,
}

fn default_true() -> bool {
    true
}

// --- Conversion: Wire → Domain ---

impl WireExport {
    pub fn into_graph(self) -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        for node in self.graph.nodes {
            graph.add_node(wire_node_to_domain(node));
        }
        for link in self.graph.links {
            graph.add_link(Link {
                source: link.source,
                target: link.target,
                weight: link.weight,
                relatedness: link.relatedness,
                emotion: link.emotion,
            });
        }
        graph
    }

    pub fn from_graph(graph: &MemoryGraph) -> Self {
        let nodes = graph.nodes().map(domain_node_to_wire).collect();
        let links = graph
            .links()
            .map(|l| WireLink {
                source: l.source.clone(),
                target: l.target.clone(),
                weight: l.weight,
                relatedness: l.relatedness,
                emotion: l.emotion.clone(),
            })
            .collect();
        WireExport {
            version: CURRENT_VERSION.to_string(),
            timestamp: now_iso8601(),
            graph: WireGraph {
                nodes,
                links,
                total_energy: graph.total_energy(),
            },
        }
    }
}

fn wire_node_to_domain(wire: WireNode) -> Node {
    let mut energy = EnergyChannels::new(wire.pooled);
    for (key, amount) in &wire.channels {
        energy.add(Some(key.as_str()), *amount);
    }
    Node {
        id: wire.id,
        node_type: wire.node_type,
        energy,
        degree: 0,
        emotion: wire.emotion,
        embedding: wire.embedding,
        wm_presence: wire.wm_presence,
        unresolved_goal: wire.unresolved_goal,
        traversable: wire.traversable,
    }
}

fn domain_node_to_wire(node: &Node) -> WireNode {
    WireNode {
        id: node.id.clone(),
        node_type: node.node_type.clone(),
        pooled: node.energy.pooled(),
        channels: node
            .energy
            .channels()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        emotion: node.emotion.clone(),
        embedding: node.embedding.clone(),
        wm_presence: node.wm_presence,
        unresolved_goal: node.unresolved_goal,
        traversable: node.traversable,
    }
}

// --- Public API ---

pub fn import_json(json: &str) -> Result<MemoryGraph, serde_json::Error> {
    let wire: WireExport = serde_json::from_str(json)?;
    Ok(wire.into_graph())
}

pub fn export_json(graph: &MemoryGraph) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&WireExport::from_graph(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_graph() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        let mut planner = Node::new("goal", "task").with_unresolved_goal();
        planner.energy.add(Some("planner"), 0.4);
        planner.energy.add(None, 0.1);
        g.add_node(planner);
        g.add_node(
            Node::new("m1", "memory")
                .with_energy(0.7)
                .with_emotion(vec![0.5, -0.5])
                .with_embedding(vec![1.0, 0.0, 0.0])
                .with_wm_presence(0.3),
        );
        g.add_node(Node::new("draft", "scratch").incomplete());
        g.add_link(Link::new("goal", "m1", 0.8).with_relatedness(0.9));
        g.add_link(Link::new("m1", "draft", 0.2));
        g
    }

    #[test]
    fn test_roundtrip() {
        let g = make_test_graph();
        let json = export_json(&g).unwrap();
        let back = import_json(&json).unwrap();

        assert_eq!(back.node_count(), 3);
        assert_eq!(back.link_count(), 2);
        assert_eq!(back.node("m1"), g.node("m1"));
        assert_eq!(back.node("draft"), g.node("draft"));
        let goal = back.node("goal").unwrap();
        assert!(goal.unresolved_goal);
        assert!((goal.energy.channel("planner") - 0.4).abs() < 1e-12);
        assert!((goal.energy.pooled() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_version_and_camel_case() {
        let json = export_json(&make_test_graph()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], CURRENT_VERSION);
        assert!(value["graph"]["totalEnergy"].is_number());
        let m1 = value["graph"]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["id"] == "m1")
            .unwrap();
        assert_eq!(m1["nodeType"], "memory");
        assert_eq!(m1["wmPresence"], 0.3);
    }

    #[test]
    fn test_legacy_energy_field() {
        let json = r#"{
            "version": "0.0.9",
            "graph": {
                "nodes": [{"id": "a", "type": "memory", "energy": 2.5}],
                "links": []
            }
        }"#;
        let g = import_json(json).unwrap();
        let a = g.node("a").unwrap();
        assert_eq!(a.total_energy(), 2.5);
        assert!(a.traversable);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(import_json("{\"version\": \"0.1.0\"}").is_err());
        assert!(import_json("not json").is_err());
    }
}
