//! Nodes, links and an in-memory graph.
//!
//! The engine only ever changes a node's energy. Everything else on a node
//! is owned by whatever created it, and `degree` is filled in by the store
//! on read.

use std::collections::BTreeMap;
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::adapter::{GraphStore, NodeUpdate};
use crate::energy::EnergyChannels;

pub type NodeId = String;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Free-form type tag, matched against type profiles.
    pub node_type: String,
    pub energy: EnergyChannels,
    /// Incident link count, derived by the store.
    #[serde(default)]
    pub degree: usize,
    #[serde(default)]
    pub emotion: Option<Vec<f64>>,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
    /// Working-memory presence EMA in [0, 1].
    #[serde(default)]
    pub wm_presence: Option<f64>,
    #[serde(default)]
    pub unresolved_goal: bool,
    /// Incomplete nodes are kept but receive no diffused energy.
    #[serde(default = "default_traversable")]
    pub traversable: bool,
}

fn default_traversable() -> bool {
    true
}

impl Node {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            energy: EnergyChannels::default(),
            degree: 0,
            emotion: None,
            embedding: None,
            wm_presence: None,
            unresolved_goal: false,
            traversable: true,
        }
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = EnergyChannels::new(energy);
        self
    }

    pub fn with_emotion(mut self, emotion: Vec<f64>) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f64>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_wm_presence(mut self, wm: f64) -> Self {
        self.wm_presence = Some(wm);
        self
    }

    pub fn with_unresolved_goal(mut self) -> Self {
        self.unresolved_goal = true;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.traversable = false;
        self
    }

    pub fn total_energy(&self) -> f64 {
        self.energy.total()
    }
}

/// Directed transfer edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    /// Transfer affinity in (0, 1].
    pub weight: f64,
    #[serde(default)]
    pub relatedness: Option<f64>,
    #[serde(default)]
    pub emotion: Option<Vec<f64>>,
}

impl Link {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, weight: f64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight,
            relatedness: None,
            emotion: None,
        }
    }

    pub fn with_relatedness(mut self, relatedness: f64) -> Self {
        self.relatedness = Some(relatedness);
        self
    }
}

/// A graph held entirely in memory. Used by tests, benches and the
/// JSON import/export path.
#[derive(Clone, Debug, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<NodeId, Vec<Link>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_link(&mut self, link: Link) {
        self.links.entry(link.source.clone()).or_default().push(link);
    }

    /// Node with its degree filled in.
    pub fn node(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).map(|n| {
            let mut n = n.clone();
            n.degree = self.degree(id);
            n
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn total_energy(&self) -> f64 {
        self.nodes.values().map(Node::total_energy).sum()
    }

    pub fn degree(&self, id: &str) -> usize {
        let out = self.links.get(id).map_or(0, Vec::len);
        let incoming = self.links().filter(|l| l.target == id).count();
        out + incoming
    }

    pub fn set_traversable(&mut self, id: &str, traversable: bool) -> bool {
        match self.nodes.get_mut(id) {
            Some(n) => {
                n.traversable = traversable;
                true
            }
            None => false,
        }
    }
}

impl GraphStore for MemoryGraph {
    type Error = Infallible;

    fn node_ids(&self) -> Result<Vec<NodeId>, Infallible> {
        Ok(self.nodes.keys().cloned().collect())
    }

    fn read(&self, id: &str) -> Result<Option<Node>, Infallible> {
        Ok(self.node(id))
    }

    fn read_links(&self, id: &str) -> Result<Vec<Link>, Infallible> {
        Ok(self.links.get(id).cloned().unwrap_or_default())
    }

    fn write(&mut self, update: &NodeUpdate) -> Result<(), Infallible> {
        if let Some(node) = self.nodes.get_mut(&update.id) {
            node.energy = update.energy.clone();
        }
        Ok(())
    }
}
