//! One engine bound to one instance store, shared by the MCP server and the
//! dashboard feed.
//!
//! Stimuli submitted between ticks queue up and are all applied by the next
//! tick. If a tick fails, the queue is kept for the one after. The queue is
//! bounded; past [`MAX_PENDING`] the oldest stimulus is dropped.
//!
//! Tick numbering is saved with the store after every tick and resumed on
//! open, so event retention and `events_since` see one continuous sequence.

use std::sync::Arc;

use kindle_core::{Engine, EngineStatus, EventSink, Stimulus, TickEvent, TickReport, TracingSink};
use kindle_store::{Instance, Store};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};

/// Ticks of event history kept in the store.
const EVENT_RETENTION_TICKS: u64 = 1000;

/// Slow feed subscribers drop events past this backlog.
const FEED_CAPACITY: usize = 256;

/// Stimuli held for the next tick.
pub const MAX_PENDING: usize = 64;

pub type SharedRuntime = Arc<Mutex<Runtime>>;

/// Fans events out to feed subscribers. Having no subscribers is not an error.
struct BroadcastSink(broadcast::Sender<TickEvent>);

impl EventSink for BroadcastSink {
    fn emit(&mut self, event: &TickEvent) {
        let _ = self.0.send(event.clone());
    }
}

pub struct Runtime {
    engine: Engine,
    store: Store,
    instance: String,
    pending: Vec<Stimulus>,
    feed: broadcast::Sender<TickEvent>,
    retention: u64,
}

/// Compact view of one tick for tool and CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub tick: u64,
    pub stimuli: usize,
    pub injected: f64,
    pub unknown_nodes: Vec<String>,
    pub transferred: f64,
    pub dissipated: f64,
    pub total_energy: f64,
    pub active_nodes: usize,
    pub rho: f64,
    pub rho_target: f64,
    pub mode: Option<String>,
    pub events: usize,
}

impl TickOutcome {
    fn from_report(report: &TickReport, stimuli: usize) -> Self {
        let diffusion = report.diffusion.as_ref();
        Self {
            tick: report.tick,
            stimuli,
            injected: report.injection.injected,
            unknown_nodes: report.injection.unknown.clone(),
            transferred: diffusion.map_or(0.0, |d| d.transferred),
            dissipated: diffusion.map_or(0.0, |d| d.dissipated),
            total_energy: report.total_energy,
            active_nodes: report.active_nodes,
            rho: report.criticality.rho,
            rho_target: report.criticality.target,
            mode: report.mode.as_ref().map(|m| m.label()),
            events: report.events.len(),
        }
    }
}

impl Runtime {
    pub fn new(instance: Instance) -> anyhow::Result<Self> {
        let name = instance.name().to_string();
        let id = instance.id();
        let (store, config) = instance.into_parts();
        let mut engine = Engine::with_id(id, config)?;
        if let Some(tick) = store.saved_tick()? {
            tracing::info!(instance = %name, tick, "resuming tick numbering");
            engine.resume_at(tick);
        }
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Ok(Self {
            engine,
            store,
            instance: name,
            pending: Vec::new(),
            feed,
            retention: EVENT_RETENTION_TICKS,
        })
    }

    pub fn shared(self) -> SharedRuntime {
        Arc::new(Mutex::new(self))
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.feed.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Queue a stimulus for the next tick. Returns the queue length.
    pub fn inject(&mut self, stimulus: Stimulus) -> usize {
        if self.pending.len() >= MAX_PENDING {
            let dropped = self.pending.remove(0);
            tracing::warn!(
                capacity = MAX_PENDING,
                entries = dropped.entries.len(),
                "stimulus queue full, dropped oldest"
            );
        }
        self.pending.push(stimulus);
        self.pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run one tick with everything queued so far.
    pub fn tick(&mut self, dt: Option<f64>) -> anyhow::Result<TickOutcome> {
        let stimuli = std::mem::take(&mut self.pending);
        let report = match self.engine.tick(&mut self.store, &stimuli, dt) {
            Ok(report) => report,
            Err(e) => {
                // Nothing was applied; keep the stimuli for the next attempt.
                self.pending = stimuli;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.save_tick(report.tick) {
            tracing::warn!("saving tick counter failed: {e}");
        }
        self.store.emit_all(&report.events);
        TracingSink.emit_all(&report.events);
        BroadcastSink(self.feed.clone()).emit_all(&report.events);

        if report.tick % self.retention == 0
            && let Err(e) = self.store.prune_events(self.retention)
        {
            tracing::warn!("event pruning failed: {e}");
        }

        Ok(TickOutcome::from_report(&report, stimuli.len()))
    }
}
