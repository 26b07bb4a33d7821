use std::collections::{HashMap, HashSet};
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use kindle_core::{
    EnergyChannels, GraphStore, Link, MemoryGraph, Node, NodeId, NodeUpdate, SynthSpec, generate,
};

use crate::error::{Result, StoreError};
use crate::schema;

/// Node columns plus degree, which is derived from `links` on every read.
const NODE_SELECT: &str = "
    SELECT n.id, n.node_type, n.pooled, n.emotion, n.embedding, n.wm_presence,
           n.unresolved_goal, n.traversable,
           (SELECT count(*) FROM links l WHERE l.source = n.id)
         + (SELECT count(*) FROM links l WHERE l.target = n.id)
    FROM nodes n";

const LINK_SELECT: &str = "SELECT source, target, weight, relatedness, emotion FROM links";

type NodeRow = (
    String,
    String,
    f64,
    Option<String>,
    Option<String>,
    Option<f64>,
    bool,
    bool,
    i64,
);

type LinkRow = (String, String, f64, Option<f64>, Option<String>);

/// A graph instance persisted in SQLite.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).ok();
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Last tick committed against this store, so a restarted engine keeps
    /// numbering where the previous run stopped. Falls back to the event
    /// log for stores written before the counter was kept.
    pub fn saved_tick(&self) -> Result<Option<u64>> {
        match self.get_metadata("tick")? {
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| StoreError::InvalidData(format!("invalid saved tick: {s}"))),
            None => self.last_tick(),
        }
    }

    pub fn save_tick(&self, tick: u64) -> Result<()> {
        self.set_metadata("tick", &tick.to_string())
    }

    /// Stable id of the instance stored here, minted on first use.
    pub fn instance_id(&self) -> Result<Uuid> {
        if let Some(s) = self.get_metadata("instance_id")? {
            return parse_uuid(&s);
        }
        let id = Uuid::new_v4();
        self.set_metadata("instance_id", &id.to_string())?;
        Ok(id)
    }

    // --- Editing ---

    /// Insert a node, or replace everything about an existing one except its links.
    pub fn upsert_node(&self, node: &Node) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        save_node_on(&tx, node)?;
        tx.commit()?;
        Ok(())
    }

    /// Both endpoints must exist.
    pub fn upsert_link(&self, link: &Link) -> Result<()> {
        save_link_on(&self.conn, link)
    }

    /// Remove a node along with its channels and links.
    pub fn remove_node(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn set_traversable(&self, id: &str, traversable: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE nodes SET traversable = ?1 WHERE id = ?2",
            params![traversable, id],
        )?;
        Ok(rows > 0)
    }

    // --- Save / load ---

    /// Replace the stored graph with `graph`.
    pub fn save_graph(&self, graph: &MemoryGraph) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch("DELETE FROM links; DELETE FROM node_channels; DELETE FROM nodes;")?;
        for node in graph.nodes() {
            save_node_on(&tx, node)?;
        }
        for link in graph.links() {
            save_link_on(&tx, link)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_graph(&self) -> Result<MemoryGraph> {
        let mut graph = MemoryGraph::new();
        for node in self.load_nodes()? {
            graph.add_node(node);
        }
        for link in self.load_links()? {
            graph.add_link(link);
        }
        Ok(graph)
    }

    /// Replace the stored graph with a synthetic one. Same seed, same graph.
    pub fn seed_synthetic(&self, spec: &SynthSpec, seed: u64) -> Result<MemoryGraph> {
        let graph = generate(spec, &mut SmallRng::seed_from_u64(seed));
        self.save_graph(&graph)?;
        tracing::info!(
            nodes = graph.node_count(),
            links = graph.link_count(),
            seed,
            "seeded synthetic graph"
        );
        Ok(graph)
    }

    // --- Stats ---

    pub fn node_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*) FROM nodes", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn link_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*) FROM links", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn total_energy(&self) -> Result<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE((SELECT sum(pooled) FROM nodes), 0)
                  + COALESCE((SELECT sum(energy) FROM node_channels), 0)",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    // --- Row decoding ---

    fn load_nodes(&self) -> Result<Vec<Node>> {
        let mut channels = self.load_channels(None)?;
        let mut stmt = self.conn.prepare(&format!("{NODE_SELECT} ORDER BY n.rowid"))?;
        let rows: Vec<NodeRow> = stmt
            .query_map([], node_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter()
            .map(|row| {
                let chans = channels.remove(&row.0).unwrap_or_default();
                node_from_row(row, chans)
            })
            .collect()
    }

    fn load_links(&self) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(&format!("{LINK_SELECT} ORDER BY rowid"))?;
        let rows: Vec<LinkRow> = stmt
            .query_map([], link_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter().map(link_from_row).collect()
    }

    fn load_channels(&self, node_id: Option<&str>) -> Result<HashMap<NodeId, Vec<(String, f64)>>> {
        let rows: Vec<(String, String, f64)> = match node_id {
            Some(id) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT node_id, channel, energy FROM node_channels WHERE node_id = ?1 ORDER BY rowid",
                )?;
                stmt.query_map([id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<std::result::Result<_, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT node_id, channel, energy FROM node_channels ORDER BY rowid",
                )?;
                stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<std::result::Result<_, _>>()?
            }
        };
        let mut out: HashMap<NodeId, Vec<(String, f64)>> = HashMap::new();
        for (node, channel, energy) in rows {
            out.entry(node).or_default().push((channel, energy));
        }
        Ok(out)
    }
}

fn save_node_on(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (id, node_type, pooled, emotion, embedding, wm_presence, unresolved_goal, traversable)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            node_type = excluded.node_type,
            pooled = excluded.pooled,
            emotion = excluded.emotion,
            embedding = excluded.embedding,
            wm_presence = excluded.wm_presence,
            unresolved_goal = excluded.unresolved_goal,
            traversable = excluded.traversable",
        params![
            node.id,
            node.node_type,
            node.energy.pooled(),
            encode_vec(node.emotion.as_deref())?,
            encode_vec(node.embedding.as_deref())?,
            node.wm_presence,
            node.unresolved_goal,
            node.traversable,
        ],
    )?;
    save_channels_on(conn, &node.id, &node.energy)
}

fn save_channels_on(conn: &Connection, node_id: &str, energy: &EnergyChannels) -> Result<()> {
    conn.execute("DELETE FROM node_channels WHERE node_id = ?1", [node_id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO node_channels (node_id, channel, energy) VALUES (?1, ?2, ?3)",
    )?;
    for (channel, amount) in energy.channels() {
        stmt.execute(params![node_id, channel, amount])?;
    }
    Ok(())
}

fn save_link_on(conn: &Connection, link: &Link) -> Result<()> {
    conn.execute(
        "INSERT INTO links (source, target, weight, relatedness, emotion)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(source, target) DO UPDATE SET
            weight = excluded.weight,
            relatedness = excluded.relatedness,
            emotion = excluded.emotion",
        params![
            link.source,
            link.target,
            link.weight,
            link.relatedness,
            encode_vec(link.emotion.as_deref())?,
        ],
    )?;
    Ok(())
}

fn node_row(row: &Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn link_row(row: &Row<'_>) -> rusqlite::Result<LinkRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn node_from_row(row: NodeRow, channels: Vec<(String, f64)>) -> Result<Node> {
    let (id, node_type, pooled, emotion, embedding, wm_presence, unresolved_goal, traversable, degree) =
        row;
    let mut energy = EnergyChannels::new(pooled);
    for (channel, amount) in &channels {
        energy.add(Some(channel.as_str()), *amount);
    }
    Ok(Node {
        emotion: decode_vec(&id, emotion)?,
        embedding: decode_vec(&id, embedding)?,
        id,
        node_type,
        energy,
        degree: degree.max(0) as usize,
        wm_presence,
        unresolved_goal,
        traversable,
    })
}

fn link_from_row(row: LinkRow) -> Result<Link> {
    let (source, target, weight, relatedness, emotion) = row;
    let emotion = decode_vec(&source, emotion)?;
    Ok(Link {
        source,
        target,
        weight,
        relatedness,
        emotion,
    })
}

fn encode_vec(v: Option<&[f64]>) -> Result<Option<String>> {
    v.map(|v| {
        serde_json::to_string(v)
            .map_err(|e| StoreError::InvalidData(format!("vector encode failed: {e}")))
    })
    .transpose()
}

fn decode_vec(owner: &str, s: Option<String>) -> Result<Option<Vec<f64>>> {
    s.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| StoreError::InvalidData(format!("invalid vector on '{owner}': {e}")))
    })
    .transpose()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("invalid UUID '{s}': {e}")))
}

impl GraphStore for Store {
    type Error = StoreError;

    fn node_ids(&self) -> Result<Vec<NodeId>> {
        let mut stmt = self.conn.prepare_cached("SELECT id FROM nodes ORDER BY rowid")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ids)
    }

    fn read(&self, id: &str) -> Result<Option<Node>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{NODE_SELECT} WHERE n.id = ?1"))?;
        let row = stmt
            .query_map([id], node_row)?
            .next()
            .transpose()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let channels = self.load_channels(Some(id))?.remove(id).unwrap_or_default();
        node_from_row(row, channels).map(Some)
    }

    fn read_links(&self, id: &str) -> Result<Vec<Link>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{LINK_SELECT} WHERE source = ?1 ORDER BY rowid"))?;
        let rows: Vec<LinkRow> = stmt
            .query_map([id], link_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter().map(link_from_row).collect()
    }

    fn write(&mut self, update: &NodeUpdate) -> Result<()> {
        self.write_many(std::slice::from_ref(update))
    }

    /// One scan of each table instead of a query per node.
    fn read_many(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        let mut by_id: HashMap<NodeId, Node> = self
            .load_nodes()?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn read_links_many(&self, ids: &[NodeId]) -> Result<Vec<Link>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .load_links()?
            .into_iter()
            .filter(|l| wanted.contains(l.source.as_str()))
            .collect())
    }

    /// All updates land in one transaction, or none do.
    fn write_many(&mut self, updates: &[NodeUpdate]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached("UPDATE nodes SET pooled = ?1 WHERE id = ?2")?;
            for update in updates {
                let rows = stmt.execute(params![update.energy.pooled(), update.id])?;
                if rows == 0 {
                    tracing::debug!(node = %update.id, "energy update for removed node skipped");
                    continue;
                }
                save_channels_on(&tx, &update.id, &update.energy)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_core::{Engine, EngineConfig, Stimulus};

    fn make_graph() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        let mut goal = Node::new("goal", "task").with_unresolved_goal();
        goal.energy.add(Some("planner"), 0.4);
        goal.energy.add(None, 0.1);
        g.add_node(goal);
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
    fn test_save_and_load_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let original = make_graph();
        store.save_graph(&original).unwrap();
        let loaded = store.load_graph().unwrap();

        assert_eq!(loaded.node_count(), 3);
        assert_eq!(loaded.link_count(), 2);
        for id in ["goal", "m1", "draft"] {
            assert_eq!(loaded.node(id), original.node(id), "node {id} drifted");
        }
        let link = loaded.links().find(|l| l.source == "goal").unwrap();
        assert_eq!(link.relatedness, Some(0.9));
    }

    #[test]
    fn test_read_fills_degree() {
        let mut store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();
        assert_eq!(store.read("m1").unwrap().unwrap().degree, 2);
        assert_eq!(store.read("goal").unwrap().unwrap().degree, 1);
        assert!(store.read("ghost").unwrap().is_none());

        let ids = store.node_ids().unwrap();
        assert_eq!(store.read_many(&ids).unwrap().len(), 3);
        assert_eq!(store.read_links_many(&ids).unwrap().len(), 2);

        let update = NodeUpdate {
            id: "draft".into(),
            energy: EnergyChannels::new(0.25),
        };
        store.write(&update).unwrap();
        assert_eq!(store.read("draft").unwrap().unwrap().total_energy(), 0.25);
    }

    #[test]
    fn test_write_many_replaces_channels() {
        let mut store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();

        let mut energy = EnergyChannels::new(0.05);
        energy.add(Some("critic"), 0.3);
        store
            .write_many(&[
                NodeUpdate {
                    id: "goal".into(),
                    energy: energy.clone(),
                },
                NodeUpdate {
                    id: "removed".into(),
                    energy: EnergyChannels::new(1.0),
                },
            ])
            .unwrap();

        let goal = store.read("goal").unwrap().unwrap();
        assert_eq!(goal.energy, energy);
        assert_eq!(goal.energy.channel("planner"), 0.0);
    }

    #[test]
    fn test_upsert_keeps_links() {
        let store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();
        store
            .upsert_node(&Node::new("m1", "concept").with_energy(2.0))
            .unwrap();
        assert_eq!(store.link_count().unwrap(), 2);
        assert_eq!(store.read("m1").unwrap().unwrap().node_type, "concept");
    }

    #[test]
    fn test_link_to_unknown_node_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();
        assert!(store.upsert_link(&Link::new("goal", "ghost", 1.0)).is_err());
    }

    #[test]
    fn test_remove_and_traversable() {
        let store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();
        assert!(store.set_traversable("draft", true).unwrap());
        assert!(store.read("draft").unwrap().unwrap().traversable);
        assert!(store.remove_node("m1").unwrap());
        assert!(!store.remove_node("m1").unwrap());
        assert_eq!(store.link_count().unwrap(), 0);
    }

    #[test]
    fn test_totals() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.total_energy().unwrap(), 0.0);
        store.save_graph(&make_graph()).unwrap();
        assert!((store.total_energy().unwrap() - 1.2).abs() < 1e-12);
        assert_eq!(store.node_count().unwrap(), 3);
    }

    #[test]
    fn test_instance_id_is_stable() {
        let store = Store::open_in_memory().unwrap();
        let a = store.instance_id().unwrap();
        assert_eq!(store.instance_id().unwrap(), a);
        store.set_metadata("instance_id", "not-a-uuid").unwrap();
        assert!(matches!(store.instance_id(), Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_engine_ticks_against_sqlite() {
        let mut store = Store::open_in_memory().unwrap();
        store.save_graph(&make_graph()).unwrap();
        let mut engine = Engine::new(EngineConfig::default()).unwrap();

        let before = store.total_energy().unwrap();
        let report = engine
            .tick(&mut store, &[Stimulus::single("m1", 0.5)], None)
            .unwrap();
        assert!(report.writes > 0);
        assert!((store.total_energy().unwrap() - report.total_energy).abs() < 1e-9);
        assert!(store.total_energy().unwrap() != before);
        // Channel attribution survives a tick.
        assert!(store.read("goal").unwrap().unwrap().energy.channel("planner") > 0.0);
    }

    #[test]
    fn test_seed_synthetic_is_deterministic() {
        let a = Store::open_in_memory().unwrap();
        let b = Store::open_in_memory().unwrap();
        a.seed_synthetic(&SynthSpec::default(), 7).unwrap();
        b.seed_synthetic(&SynthSpec::default(), 7).unwrap();
        assert_eq!(a.node_count().unwrap(), 100);
        assert_eq!(a.link_count().unwrap(), b.link_count().unwrap());
        assert_eq!(a.total_energy().unwrap(), b.total_energy().unwrap());
    }
}
