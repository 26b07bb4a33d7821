//! Synthetic graphs for seeding instances, tests and benches.
//!
//! Nodes are laid out in clusters. Each cluster has a random unit centre in
//! embedding space and its members sit near it, so links inside a cluster
//! carry high relatedness and links across clusters carry low relatedness.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::graph::{Link, MemoryGraph, Node};
use crate::vector::norm;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSpec {
    pub nodes: usize,
    pub clusters: usize,
    /// Mean outgoing links per node.
    pub out_degree: usize,
    /// Probability that a link stays inside its cluster.
    pub locality: f64,
    pub embedding_dim: usize,
    pub emotion_dim: usize,
    /// Types assigned round-robin.
    pub types: Vec<String>,
    /// Initial energy given to the first node of every cluster.
    pub seed_energy: f64,
}

impl Default for SynthSpec {
    fn default() -> Self {
        Self {
            nodes: 100,
            clusters: 5,
            out_degree: 4,
            locality: 0.8,
            embedding_dim: 8,
            emotion_dim: 2,
            types: vec!["memory".into(), "concept".into(), "event".into(), "task".into()],
            seed_energy: 1.0,
        }
    }
}

fn unit_vector(dim: usize, rng: &mut impl Rng) -> Vec<f64> {
    let v: Vec<f64> = (0..dim).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect();
    let n = norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

fn jitter(center: &[f64], spread: f64, rng: &mut impl Rng) -> Vec<f64> {
    center
        .iter()
        .map(|c| c + spread * (rng.random::<f64>() * 2.0 - 1.0))
        .collect()
}

/// Node ids are `n0`, `n1`, ... in generation order.
pub fn generate(spec: &SynthSpec, rng: &mut impl Rng) -> MemoryGraph {
    let mut graph = MemoryGraph::new();
    if spec.nodes == 0 {
        return graph;
    }
    let clusters = spec.clusters.clamp(1, spec.nodes);
    let centers: Vec<Vec<f64>> = (0..clusters)
        .map(|_| unit_vector(spec.embedding_dim, rng))
        .collect();
    let cluster_of = |i: usize| i % clusters;

    for i in 0..spec.nodes {
        let c = cluster_of(i);
        let node_type = spec
            .types
            .get(i % spec.types.len().max(1))
            .cloned()
            .unwrap_or_else(|| "memory".to_string());
        let mut node = Node::new(format!("n{i}"), node_type);
        if spec.embedding_dim > 0 {
            node = node.with_embedding(jitter(&centers[c], 0.2, rng));
        }
        if spec.emotion_dim > 0 {
            node = node.with_emotion(unit_vector(spec.emotion_dim, rng));
        }
        if i < clusters && spec.seed_energy > 0.0 {
            node = node.with_energy(spec.seed_energy);
        }
        graph.add_node(node);
    }

    if spec.nodes < 2 {
        return graph;
    }
    for i in 0..spec.nodes {
        for _ in 0..spec.out_degree {
            let local = rng.random::<f64>() < spec.locality;
            let j = if local && spec.nodes > clusters {
                // Any other member of the same cluster.
                let members = (spec.nodes - cluster_of(i)).div_ceil(clusters);
                cluster_of(i) + clusters * rng.random_range(0..members)
            } else {
                rng.random_range(0..spec.nodes)
            };
            if j == i {
                continue;
            }
            let relatedness = if cluster_of(i) == cluster_of(j) {
                0.7 + 0.3 * rng.random::<f64>()
            } else {
                0.3 * rng.random::<f64>()
            };
            let weight = 0.2 + 0.8 * rng.random::<f64>();
            graph.add_link(
                Link::new(format!("n{i}"), format!("n{j}"), weight).with_relatedness(relatedness),
            );
        }
    }
    graph
}
