//! The narrow interface the engine uses to reach the graph.
//!
//! Stores are authoritative: the engine reads everything it needs at the
//! start of a tick and writes energy back once at the end. Batch methods
//! default to looping over the single-item ones; stores that can do better
//! (one SQL transaction, one round trip) should override them, and
//! `write_many` must be all-or-nothing.

use crate::energy::EnergyChannels;
use crate::graph::{Link, Node, NodeId};

/// New energy for one node. Energy is the only property the engine writes.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeUpdate {
    pub id: NodeId,
    pub energy: EnergyChannels,
}

pub trait GraphStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn node_ids(&self) -> Result<Vec<NodeId>, Self::Error>;

    fn read(&self, id: &str) -> Result<Option<Node>, Self::Error>;

    /// Outgoing links of `id`.
    fn read_links(&self, id: &str) -> Result<Vec<Link>, Self::Error>;

    fn write(&mut self, update: &NodeUpdate) -> Result<(), Self::Error>;

    /// Nodes for the given ids, skipping ids that no longer exist.
    fn read_many(&self, ids: &[NodeId]) -> Result<Vec<Node>, Self::Error> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.read(id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn read_links_many(&self, ids: &[NodeId]) -> Result<Vec<Link>, Self::Error> {
        let mut links = Vec::new();
        for id in ids {
            links.extend(self.read_links(id)?);
        }
        Ok(links)
    }

    fn write_many(&mut self, updates: &[NodeUpdate]) -> Result<(), Self::Error> {
        for update in updates {
            self.write(update)?;
        }
        Ok(())
    }
}
