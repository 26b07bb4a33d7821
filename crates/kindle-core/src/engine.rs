//! The tick orchestrator.
//!
//! One [`Engine`] drives one graph instance. A tick runs
//! injection → diffusion → decay → coherence → criticality → mode → context
//! (→ variant groups) over a [`Frame`] read in one batch from the store, then
//! writes changed energies back in one batch.
//!
//! All cross-tick state lives in [`EngineState`]. A tick works on a copy of
//! that state and only commits it once the store write succeeds, so a failed
//! read or write leaves both the graph and the engine exactly as they were.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::GraphStore;
use crate::coherence::{CoherenceMeter, CoherenceReading};
use crate::config::EngineConfig;
use crate::context::{ContextHints, ContextInferrer, ContextObservation, ContextReading, TaskContext};
use crate::criticality::{self, CriticalityController, CriticalityReport, OperatorRates, SafetyState};
use crate::decay::{self, DecayReport};
use crate::diffusion::{self, DiffusionReport};
use crate::error::{EngineError, Result};
use crate::events::{EventDetail, TickEvent, TickSummary};
use crate::factors::{self, TypeProfiles};
use crate::frame::Frame;
use crate::groups::{GroupReport, GroupTracker};
use crate::mode::{ModeReading, ModeTracker};
use crate::stimulus::{self, AffectTracker, InjectionReport, Stimulus};
use crate::time::now_iso8601;

/// Everything the engine carries from one tick to the next.
#[derive(Clone, Debug)]
pub struct EngineState {
    pub tick: u64,
    pub criticality: CriticalityController,
    pub coherence: CoherenceMeter,
    pub modes: ModeTracker,
    pub context: ContextInferrer,
    pub affect: AffectTracker,
    pub groups: GroupTracker,
    last_coherence: Option<f64>,
    last_mode: Option<String>,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        let mut criticality = CriticalityController::new(
            &config.criticality,
            config.diffusion.base_rate,
            config.decay.base_rate,
        );
        if config.context.enabled {
            criticality.set_target(TaskContext::Unknown.target(&config.context.targets).rho);
        }
        Self {
            tick: 0,
            criticality,
            coherence: CoherenceMeter::new(),
            modes: ModeTracker::default(),
            context: ContextInferrer::new(),
            affect: AffectTracker::new(),
            groups: GroupTracker::new(),
            last_coherence: None,
            last_mode: None,
        }
    }
}

/// Outcome of one committed tick.
#[derive(Clone, Debug)]
pub struct TickReport {
    pub tick: u64,
    pub instance_id: Uuid,
    pub dt: f64,
    pub injection: InjectionReport,
    pub diffusion: Option<DiffusionReport>,
    pub decay: Option<DecayReport>,
    pub coherence: Option<CoherenceReading>,
    pub criticality: CriticalityReport,
    /// Activation threshold scale used this tick.
    pub threshold_multiplier: f64,
    pub mode: Option<ModeReading>,
    pub context: Option<ContextReading>,
    pub groups: Option<GroupReport>,
    pub total_energy: f64,
    pub active_nodes: usize,
    /// Nodes whose energy was written back.
    pub writes: usize,
    pub events: Vec<TickEvent>,
}

/// Point-in-time view of the engine, for status displays.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineStatus {
    pub instance_id: Uuid,
    pub tick: u64,
    pub rho: f64,
    pub rho_target: f64,
    pub diffusion_rate: f64,
    pub decay_rate: f64,
    pub safety: SafetyState,
    pub coherence: Option<f64>,
    pub mode: Option<String>,
    pub context: Option<TaskContext>,
    pub groups: usize,
}

pub struct Engine {
    id: Uuid,
    config: EngineConfig,
    profiles: TypeProfiles,
    state: EngineState,
}

impl Engine {
    /// Validates the configuration; invalid configuration never reaches a tick.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), config)
    }

    pub fn with_id(id: Uuid, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let profiles = TypeProfiles::compile(&config.profiles)?;
        let state = EngineState::new(&config);
        Ok(Self {
            id,
            config,
            profiles,
            state,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Continue tick numbering after `tick`, as when reopening a store a
    /// previous engine already ticked against.
    pub fn resume_at(&mut self, tick: u64) {
        self.state.tick = tick;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn status(&self) -> EngineStatus {
        let c = &self.state.criticality;
        EngineStatus {
            instance_id: self.id,
            tick: self.state.tick,
            rho: c.rho(),
            rho_target: c.target(),
            diffusion_rate: self.diffusion_rate(),
            decay_rate: self.decay_rate(),
            safety: c.safety(),
            coherence: self.state.last_coherence,
            mode: self.state.last_mode.clone(),
            context: self.config.context.enabled.then(|| self.state.context.active()),
            groups: self.state.groups.groups().len(),
        }
    }

    fn diffusion_rate(&self) -> f64 {
        if self.config.criticality.enabled {
            self.state.criticality.diffusion_rate()
        } else {
            self.config.diffusion.base_rate
        }
    }

    fn decay_rate(&self) -> f64 {
        if self.config.criticality.enabled {
            self.state.criticality.decay_rate()
        } else {
            self.config.decay.base_rate
        }
    }

    /// Run one tick against `store`. `dt` overrides the configured tick
    /// length when it is a positive finite number.
    ///
    /// On error nothing has been written and engine state is unchanged; the
    /// caller should keep `stimuli` and retry on the next tick.
    pub fn tick<S: GraphStore>(
        &mut self,
        store: &mut S,
        stimuli: &[Stimulus],
        dt: Option<f64>,
    ) -> Result<TickReport> {
        let dt = dt.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(self.config.dt);
        let cfg = &self.config;
        let threshold_multiplier = if cfg.criticality.enabled {
            self.state.criticality.threshold_multiplier(&cfg.criticality)
        } else {
            1.0
        };
        let rule = &cfg.activation.scaled(threshold_multiplier);
        let health = stimulus::health_factor(
            self.state.criticality.rho(),
            self.state.criticality.target(),
            &cfg.stimulus,
        );

        let ids = store.node_ids().map_err(store_error)?;
        let nodes = store.read_many(&ids).map_err(store_error)?;
        let links = store.read_links_many(&ids).map_err(store_error)?;
        let mut frame = Frame::new(nodes, links);
        let mut next = self.state.clone();

        let injection = stimulus::inject(
            &mut frame,
            stimuli,
            &mut next.affect,
            &cfg.stimulus,
            &cfg.priming,
            health,
        );
        let mut hints = ContextHints::default();
        for s in stimuli {
            hints.merge(&s.hints);
        }

        let bridges = bridging_counts(&frame, &next.groups);
        for (i, node) in frame.nodes.iter().enumerate() {
            frame.factors[i] = factors::compute(
                node,
                bridges[i],
                &self.profiles,
                &cfg.consolidation,
                &cfg.resistance,
                &cfg.stickiness,
            );
        }

        let diffusion_rate = self.diffusion_rate();
        let decay_rate = self.decay_rate();
        let estimate = next
            .criticality
            .wants_sample(&cfg.criticality)
            .then(|| {
                let rates = OperatorRates {
                    diffusion: if cfg.diffusion.enabled { diffusion_rate } else { 0.0 },
                    retention: cfg.decay.enabled.then_some(1.0 - decay_rate),
                    dt,
                };
                criticality::spectral_radius(
                    &frame,
                    rates,
                    cfg.criticality.power_iterations,
                    cfg.criticality.power_tolerance,
                )
            })
            .flatten();

        let diffusion = cfg
            .diffusion
            .enabled
            .then(|| diffusion::diffuse(&mut frame, diffusion_rate, dt, rule));
        let decay = cfg
            .decay
            .enabled
            .then(|| decay::apply(&mut frame, 1.0 - decay_rate, dt, cfg.decay.cleanup_floor));

        let active = frame.active_set(rule);
        let transfers = diffusion.as_ref().map_or(&[][..], |d| d.transfers.as_slice());
        let coherence = if cfg.coherence.enabled {
            next.coherence
                .observe(frame.active_centroid(rule), transfers, &cfg.coherence)
        } else {
            None
        };

        let motion = injection.injected + diffusion.as_ref().map_or(0.0, |d| d.transferred);
        let tolerance = if cfg.context.enabled {
            next.context.active().target(&cfg.context.targets).tolerance
        } else {
            cfg.context.targets.unknown.tolerance
        };
        let criticality = next
            .criticality
            .observe(estimate, motion, tolerance, cfg.criticality.enabled, &cfg.criticality);

        let c_value = coherence.as_ref().map(|c| c.value);
        let mode = cfg
            .modes
            .enabled
            .then(|| next.modes.observe(criticality.rho, c_value));

        let context = if cfg.context.enabled {
            let (diversity, active_count) = frame.type_diversity(rule);
            let obs = ContextObservation {
                rho: criticality.rho,
                active_set: Some(&active),
                diversity,
                active_count,
                crossings: frame.crossings(rule),
                node_count: frame.len(),
                hints,
            };
            let reading = next.context.observe(&obs, &cfg.context);
            next.criticality.set_target(reading.target.rho);
            Some(reading)
        } else {
            None
        };

        let groups = if cfg.groups.enabled {
            next.groups.record(
                frame.nodes.iter().map(|n| (&n.id, n.total_energy())),
                cfg.groups.window,
            );
            Some(next.groups.refresh(&cfg.groups))
        } else {
            None
        };

        let updates = frame.changes();
        store.write_many(&updates).map_err(store_error)?;

        next.tick += 1;
        next.last_coherence = c_value;
        next.last_mode = mode.as_ref().map(ModeReading::label);
        self.state = next;

        let mut report = TickReport {
            tick: self.state.tick,
            instance_id: self.id,
            dt,
            injection,
            diffusion,
            decay,
            coherence,
            criticality,
            threshold_multiplier,
            mode,
            context,
            groups,
            total_energy: frame.total_energy(),
            active_nodes: active.len(),
            writes: updates.len(),
            events: Vec::new(),
        };
        report.events = build_events(&report, !stimuli.is_empty(), diffusion_rate, decay_rate);

        tracing::debug!(
            instance = %self.id,
            tick = report.tick,
            energy = report.total_energy,
            active = report.active_nodes,
            rho = report.criticality.rho,
            "tick complete"
        );
        Ok(report)
    }
}

fn store_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> EngineError {
    tracing::warn!(error = %e, "graph store failed, tick aborted");
    EngineError::Store(Box::new(e))
}

/// Distinct variant groups among each node and its outgoing neighbours.
fn bridging_counts(frame: &Frame, groups: &GroupTracker) -> Vec<usize> {
    if groups.groups().is_empty() {
        return vec![0; frame.len()];
    }
    frame
        .nodes
        .iter()
        .zip(&frame.outgoing)
        .map(|(node, links)| {
            let mut tags: Vec<&str> = std::iter::once(node.id.as_str())
                .chain(links.iter().map(|(t, _)| frame.nodes[*t].id.as_str()))
                .filter_map(|id| groups.group_of(id))
                .collect();
            tags.sort_unstable();
            tags.dedup();
            tags.len()
        })
        .collect()
}

fn build_events(report: &TickReport, had_stimuli: bool, diffusion_rate: f64, decay_rate: f64) -> Vec<TickEvent> {
    let summary = TickSummary {
        rho: report.criticality.rho,
        rho_sample: report.criticality.sample,
        rho_target: report.criticality.target,
        coherence: report.coherence.as_ref().map(|c| c.value),
        frontier: report.coherence.as_ref().and_then(|c| c.frontier),
        stride: report.coherence.as_ref().and_then(|c| c.stride),
        mode: report.mode.as_ref().map(ModeReading::label),
        context: report.context.as_ref().map(|c| c.active),
        transferred: report.diffusion.as_ref().map_or(0.0, |d| d.transferred),
        dissipated: report.diffusion.as_ref().map_or(0.0, |d| d.dissipated),
        total_energy: report.total_energy,
        active_nodes: report.active_nodes,
    };

    let mut details = Vec::with_capacity(8);
    if had_stimuli {
        let i = &report.injection;
        details.push(EventDetail::Injection {
            injected: i.injected,
            entries: i.injections.len(),
            unknown: i.unknown.clone(),
            primed: i.primed,
            affect_magnitude: i.affect_magnitude,
            dropped: i.dropped,
            health: i.health,
        });
    }
    if let Some(d) = &report.diffusion {
        details.push(EventDetail::Diffusion {
            transfers: d.transfers.len(),
            transferred: d.transferred,
            retained: d.retained,
            dissipated: d.dissipated,
            skipped_non_traversable: d.skipped_non_traversable,
            scaled_sources: d.scaled_sources,
            rate: diffusion_rate,
        });
    }
    if let Some(d) = &report.decay {
        details.push(EventDetail::Decay {
            nodes_decayed: d.nodes_decayed,
            energy_lost: d.energy_lost,
            cleaned: d.cleaned,
            rate: decay_rate,
        });
    }
    if let Some(c) = &report.coherence {
        details.push(EventDetail::Coherence {
            value: c.value,
            raw: c.raw,
            band: c.band,
        });
    }
    let k = &report.criticality;
    details.push(EventDetail::Criticality {
        error: k.error,
        branching: k.branching,
        controller_output: k.controller_output,
        threshold_multiplier: report.threshold_multiplier,
        diffusion_rate: k.diffusion_rate,
        decay_rate: k.decay_rate,
        safety: k.safety,
        oscillation_index: k.oscillation_index,
        rho_variance: k.rho_variance,
        within_tolerance: k.within_tolerance,
        regulated: k.regulated,
    });
    if let Some(m) = &report.mode {
        details.push(EventDetail::Mode {
            mode: m.mode,
            reduced_confidence: m.reduced_confidence,
            ticks_in_mode: m.ticks_in_mode,
        });
    }
    if let Some(c) = &report.context {
        details.push(EventDetail::Context {
            active: c.active,
            candidate: c.candidate,
            candidate_frames: c.candidate_frames,
            switched: c.switched,
        });
    }
    if let Some(g) = &report.groups {
        details.push(EventDetail::Groups {
            groups: g.groups,
            formed: g.formed.clone(),
            dissolved: g.dissolved.clone(),
        });
    }

    let timestamp = now_iso8601();
    details
        .into_iter()
        .map(|detail| TickEvent {
            instance_id: report.instance_id,
            tick: report.tick,
            timestamp: timestamp.clone(),
            summary: summary.clone(),
            detail,
        })
        .collect()
}
