//! Observability events.
//!
//! A tick emits one [`TickEvent`] per mechanism it exercised. Every event
//! carries the same [`TickSummary`] so a consumer can follow ρ, coherence,
//! mode and context from any single stream, plus a mechanism-specific
//! [`EventDetail`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coherence::CoherenceBand;
use crate::context::TaskContext;
use crate::criticality::SafetyState;
use crate::mode::CriticalityMode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Smoothed branching ratio.
    pub rho: f64,
    /// Spectral estimate taken this tick, if any.
    pub rho_sample: Option<f64>,
    pub rho_target: f64,
    pub coherence: Option<f64>,
    pub frontier: Option<f64>,
    pub stride: Option<f64>,
    /// Mode label, suffixed when classified without coherence.
    pub mode: Option<String>,
    pub context: Option<TaskContext>,
    pub transferred: f64,
    pub dissipated: f64,
    pub total_energy: f64,
    pub active_nodes: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mechanism", rename_all = "snake_case")]
pub enum EventDetail {
    Injection {
        injected: f64,
        entries: usize,
        unknown: Vec<String>,
        primed: bool,
        affect_magnitude: f64,
        dropped: usize,
        health: f64,
    },
    Diffusion {
        transfers: usize,
        transferred: f64,
        retained: f64,
        dissipated: f64,
        skipped_non_traversable: usize,
        scaled_sources: usize,
        rate: f64,
    },
    Decay {
        nodes_decayed: usize,
        energy_lost: f64,
        cleaned: usize,
        rate: f64,
    },
    Coherence {
        value: f64,
        raw: f64,
        band: CoherenceBand,
    },
    Criticality {
        error: f64,
        /// Realized motion ratio, kept as a cheap proxy for ρ.
        branching: Option<f64>,
        controller_output: f64,
        threshold_multiplier: f64,
        diffusion_rate: f64,
        decay_rate: f64,
        safety: SafetyState,
        oscillation_index: f64,
        rho_variance: f64,
        within_tolerance: bool,
        regulated: bool,
    },
    Mode {
        mode: CriticalityMode,
        reduced_confidence: bool,
        ticks_in_mode: u64,
    },
    Context {
        active: TaskContext,
        candidate: TaskContext,
        candidate_frames: u32,
        switched: bool,
    },
    Groups {
        groups: usize,
        formed: Vec<String>,
        dissolved: Vec<String>,
    },
}

impl EventDetail {
    pub fn mechanism(&self) -> &'static str {
        match self {
            EventDetail::Injection { .. } => "injection",
            EventDetail::Diffusion { .. } => "diffusion",
            EventDetail::Decay { .. } => "decay",
            EventDetail::Coherence { .. } => "coherence",
            EventDetail::Criticality { .. } => "criticality",
            EventDetail::Mode { .. } => "mode",
            EventDetail::Context { .. } => "context",
            EventDetail::Groups { .. } => "groups",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub instance_id: Uuid,
    pub tick: u64,
    pub timestamp: String,
    pub summary: TickSummary,
    pub detail: EventDetail,
}

/// Receives events as ticks complete.
pub trait EventSink {
    fn emit(&mut self, event: &TickEvent);

    fn emit_all(&mut self, events: &[TickEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

impl EventSink for Vec<TickEvent> {
    fn emit(&mut self, event: &TickEvent) {
        self.push(event.clone());
    }
}

/// Logs every event through `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &TickEvent) {
        tracing::debug!(
            instance = %event.instance_id,
            tick = event.tick,
            mechanism = event.detail.mechanism(),
            rho = event.summary.rho,
            target = event.summary.rho_target,
            "tick event"
        );
    }
}
