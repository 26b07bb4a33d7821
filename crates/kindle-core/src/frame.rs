//! The working copy a tick operates on.
//!
//! A frame is built from one batch read of the store. Mechanisms mutate the
//! frame's nodes in place; nothing reaches the store until the orchestrator
//! writes the changed energies back in one batch.

use std::collections::{BTreeSet, HashMap};

use crate::activation::ActivationRule;
use crate::adapter::NodeUpdate;
use crate::energy::EnergyChannels;
use crate::factors::NodeFactors;
use crate::graph::{Link, Node, NodeId};
use crate::vector::centroid;

#[derive(Clone, Debug)]
pub struct Frame {
    pub nodes: Vec<Node>,
    /// Outgoing links, aligned with `nodes`. Links to unknown targets are dropped.
    pub outgoing: Vec<Vec<(usize, Link)>>,
    pub factors: Vec<NodeFactors>,
    index: HashMap<NodeId, usize>,
    initial: Vec<EnergyChannels>,
}

impl Frame {
    pub fn new(nodes: Vec<Node>, links: Vec<Link>) -> Self {
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let mut outgoing = vec![Vec::new(); nodes.len()];
        for link in links {
            if let (Some(&src), Some(&tgt)) = (index.get(&link.source), index.get(&link.target)) {
                outgoing[src].push((tgt, link));
            }
        }
        let initial = nodes.iter().map(|n| n.energy.clone()).collect();
        let factors = vec![NodeFactors::default(); nodes.len()];
        Self {
            nodes,
            outgoing,
            factors,
            index,
            initial,
        }
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn energies(&self) -> Vec<f64> {
        self.nodes.iter().map(Node::total_energy).collect()
    }

    pub fn total_energy(&self) -> f64 {
        self.nodes.iter().map(Node::total_energy).sum()
    }

    /// Ids of nodes currently active under `rule`.
    pub fn active_set(&self, rule: &ActivationRule) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .filter(|n| rule.is_active(n.total_energy()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Number of nodes whose active status differs from tick start.
    pub fn crossings(&self, rule: &ActivationRule) -> usize {
        self.nodes
            .iter()
            .zip(&self.initial)
            .filter(|(n, before)| rule.is_active(before.total()) != rule.is_active(n.total_energy()))
            .count()
    }

    /// Embedding centroid of the active nodes that carry one.
    pub fn active_centroid(&self, rule: &ActivationRule) -> Option<Vec<f64>> {
        centroid(
            self.nodes
                .iter()
                .filter(|n| rule.is_active(n.total_energy()))
                .filter_map(|n| n.embedding.as_deref()),
        )
    }

    /// Distinct node types among active nodes, over the active count.
    pub fn type_diversity(&self, rule: &ActivationRule) -> (f64, usize) {
        let active: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| rule.is_active(n.total_energy()))
            .collect();
        if active.is_empty() {
            return (0.0, 0);
        }
        let types: BTreeSet<&str> = active.iter().map(|n| n.node_type.as_str()).collect();
        (types.len() as f64 / active.len() as f64, active.len())
    }

    /// Energy updates for every node whose energy changed during the tick.
    pub fn changes(&self) -> Vec<NodeUpdate> {
        self.nodes
            .iter()
            .zip(&self.initial)
            .filter(|(n, before)| n.energy != **before)
            .map(|(n, _)| NodeUpdate {
                id: n.id.clone(),
                energy: n.energy.clone(),
            })
            .collect()
    }
}
