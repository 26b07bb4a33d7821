//! Per-tick energy decay, slowed by consolidation and resistance.
//!
//! ```text
//! E ← E · λ^(Δt · (1 − c) / r)
//! ```
//!
//! λ ∈ (0, 1) is the per-second retention (λ = 1 − decay rate). Both
//! factors only ever lengthen a node's half-life: at c = 0, r = 1 the node
//! decays at the plain rate, and at c = 0.8, r = 1.5 its effective exponent
//! shrinks to 2/15 of the plain one. The exponent is never negative, so decay
//! never adds energy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{CONSOLIDATION_MAX, RESISTANCE_MAX, RESISTANCE_MIN};
use crate::frame::Frame;
use crate::vector::clamp_finite;

/// Per-tick multiplier for one node.
pub fn decay_factor(lambda: f64, dt: f64, consolidation: f64, resistance: f64) -> f64 {
    let c = clamp_finite(consolidation, 0.0, CONSOLIDATION_MAX);
    let r = clamp_finite(resistance, RESISTANCE_MIN, RESISTANCE_MAX);
    let lambda = clamp_finite(lambda, 0.0, 1.0);
    let dt = clamp_finite(dt, 0.0, f64::MAX);
    let exponent = dt * (1.0 - c) / r;
    clamp_finite(lambda.powf(exponent), 0.0, 1.0)
}

/// Seconds until energy halves at the given per-tick factor, or `None` when
/// the factor does not decay.
pub fn half_life(factor: f64, dt: f64) -> Option<f64> {
    if !(factor > 0.0 && factor < 1.0) || dt <= 0.0 {
        return None;
    }
    Some(dt * std::f64::consts::LN_2 / -factor.ln())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Nodes that held energy before decay.
    pub nodes_decayed: usize,
    pub energy_before: f64,
    pub energy_after: f64,
    /// Energy removed, including anything snapped to zero.
    pub energy_lost: f64,
    /// Nodes snapped to zero by the cleanup floor.
    pub cleaned: usize,
    /// Mean half-life in seconds per node type.
    pub half_lives: BTreeMap<String, f64>,
}

/// Decay every node in the frame in place.
pub fn apply(frame: &mut Frame, lambda: f64, dt: f64, cleanup_floor: f64) -> DecayReport {
    let mut report = DecayReport::default();
    let mut half_life_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for (node, factors) in frame.nodes.iter_mut().zip(&frame.factors) {
        let before = node.total_energy();
        report.energy_before += before;
        if before <= 0.0 {
            continue;
        }
        report.nodes_decayed += 1;

        let factor = decay_factor(lambda, dt, factors.consolidation, factors.resistance);
        node.energy.scale(factor);
        if node.energy.cleanup(cleanup_floor) {
            report.cleaned += 1;
        }
        report.energy_after += node.total_energy();

        if let Some(h) = half_life(factor, dt) {
            let entry = half_life_sums.entry(node.node_type.clone()).or_default();
            entry.0 += h;
            entry.1 += 1;
        }
    }

    report.energy_lost = (report.energy_before - report.energy_after).max(0.0);
    report.half_lives = half_life_sums
        .into_iter()
        .map(|(t, (sum, n))| (t, sum / n as f64))
        .collect();

    tracing::trace!(
        decayed = report.nodes_decayed,
        lost = report.energy_lost,
        cleaned = report.cleaned,
        "decay applied"
    );
    report
}
