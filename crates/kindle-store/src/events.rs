//! Tick event log.
//!
//! Events are kept as JSON payloads keyed by tick, so the log survives
//! schema changes to individual event details. Tick numbers continue across
//! engine restarts (see [`Store::saved_tick`]), so tick order is log order.

use rusqlite::params;

use kindle_core::{EventSink, TickEvent};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    pub fn append_events(&self, events: &[TickEvent]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tick_events (instance_id, tick, mechanism, timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                let payload = serde_json::to_string(event)
                    .map_err(|e| StoreError::InvalidData(format!("event encode failed: {e}")))?;
                stmt.execute(params![
                    event.instance_id.to_string(),
                    event.tick as i64,
                    event.detail.mechanism(),
                    event.timestamp,
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<TickEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT payload FROM (
                 SELECT id, payload FROM tick_events ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;
        let payloads: Vec<String> = stmt
            .query_map([limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        payloads.iter().map(|p| decode_event(p)).collect()
    }

    /// Events for ticks after `tick`, oldest first.
    pub fn events_since(&self, tick: u64) -> Result<Vec<TickEvent>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT payload FROM tick_events WHERE tick > ?1 ORDER BY id ASC")?;
        let payloads: Vec<String> = stmt
            .query_map([tick as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        payloads.iter().map(|p| decode_event(p)).collect()
    }

    pub fn last_tick(&self) -> Result<Option<u64>> {
        let tick: Option<i64> =
            self.conn()
                .query_row("SELECT max(tick) FROM tick_events", [], |row| row.get(0))?;
        Ok(tick.map(|t| t.max(0) as u64))
    }

    /// Drop events older than the newest `keep_ticks` ticks.
    pub fn prune_events(&self, keep_ticks: u64) -> Result<usize> {
        let Some(last) = self.last_tick()? else {
            return Ok(0);
        };
        let cutoff = last.saturating_sub(keep_ticks);
        let removed = self
            .conn()
            .execute("DELETE FROM tick_events WHERE tick <= ?1", [cutoff as i64])?;
        if removed > 0 {
            tracing::debug!(removed, cutoff, "pruned tick events");
        }
        Ok(removed)
    }
}

fn decode_event(payload: &str) -> Result<TickEvent> {
    serde_json::from_str(payload)
        .map_err(|e| StoreError::InvalidData(format!("invalid event payload: {e}")))
}

/// Logging events never fails a tick.
impl EventSink for Store {
    fn emit(&mut self, event: &TickEvent) {
        self.emit_all(std::slice::from_ref(event));
    }

    fn emit_all(&mut self, events: &[TickEvent]) {
        if let Err(e) = self.append_events(events) {
            tracing::warn!(error = %e, count = events.len(), "failed to log tick events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_core::{Engine, EngineConfig, MemoryGraph, Node, Stimulus};

    fn tick_events(ticks: usize) -> Vec<TickEvent> {
        let mut g = MemoryGraph::new();
        g.add_node(Node::new("a", "memory").with_energy(1.0));
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let mut out = Vec::new();
        for _ in 0..ticks {
            let report = engine
                .tick(&mut g, &[Stimulus::single("a", 0.5)], None)
                .unwrap();
            out.extend(report.events);
        }
        out
    }

    #[test]
    fn test_append_and_read_back() {
        let store = Store::open_in_memory().unwrap();
        let events = tick_events(3);
        store.append_events(&events).unwrap();

        let key = |e: &TickEvent| (e.tick, e.detail.mechanism());
        let recent = store.recent_events(1000).unwrap();
        assert_eq!(
            recent.iter().map(key).collect::<Vec<_>>(),
            events.iter().map(key).collect::<Vec<_>>()
        );
        assert_eq!(store.last_tick().unwrap(), Some(3));

        let tail = store.recent_events(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(key(&tail[1]), key(events.last().unwrap()));
        assert!(store.events_since(2).unwrap().iter().all(|e| e.tick == 3));
    }

    #[test]
    fn test_prune_keeps_recent_ticks() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.prune_events(1).unwrap(), 0);

        store.emit_all(&tick_events(4));
        store.prune_events(2).unwrap();
        let ticks: Vec<u64> = store.recent_events(100).unwrap().iter().map(|e| e.tick).collect();
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|&t| t >= 3), "got {ticks:?}");
    }

    #[test]
    fn test_saved_tick_prefers_counter_over_log() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.saved_tick().unwrap(), None);

        store.emit_all(&tick_events(2));
        assert_eq!(store.saved_tick().unwrap(), Some(2));

        store.save_tick(7).unwrap();
        assert_eq!(store.saved_tick().unwrap(), Some(7));

        store.set_metadata("tick", "soon").unwrap();
        assert!(matches!(store.saved_tick(), Err(StoreError::InvalidData(_))));
    }
}
