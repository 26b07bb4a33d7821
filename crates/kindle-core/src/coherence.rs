//! Coherence of the spreading activation.
//!
//! `C = α·C_frontier + (1 − α)·C_stride`, where the frontier term compares
//! the active set's embedding centroid with last tick's (cosine, mapped to
//! [0, 1]) and the stride term averages `weight × relatedness` over this
//! tick's transfers. A missing component hands its weight to the other; with
//! neither there is no reading at all. Raw values are averaged over a short
//! rolling window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::CoherenceConfig;
use crate::constants::{COHERENT_AT, FRAGMENTED_BELOW};
use crate::diffusion::Transfer;
use crate::vector::{clamp_finite, cosine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceBand {
    Coherent,
    Mixed,
    Fragmented,
}

impl CoherenceBand {
    pub fn from_value(c: f64) -> Self {
        if c >= COHERENT_AT {
            CoherenceBand::Coherent
        } else if c >= FRAGMENTED_BELOW {
            CoherenceBand::Mixed
        } else {
            CoherenceBand::Fragmented
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoherenceBand::Coherent => "coherent",
            CoherenceBand::Mixed => "mixed",
            CoherenceBand::Fragmented => "fragmented",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoherenceReading {
    /// Window-averaged coherence.
    pub value: f64,
    /// This tick's unsmoothed coherence.
    pub raw: f64,
    pub frontier: Option<f64>,
    pub stride: Option<f64>,
    pub band: CoherenceBand,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoherenceMeter {
    window: VecDeque<f64>,
    previous_centroid: Option<Vec<f64>>,
}

/// Frontier similarity in [0, 1] between two centroids.
pub fn frontier_similarity(previous: &[f64], current: &[f64]) -> Option<f64> {
    cosine(previous, current).map(|cos| (cos + 1.0) / 2.0)
}

/// Mean `weight × relatedness` over transfers, or `None` without transfers.
pub fn stride_relatedness(transfers: &[Transfer], neutral: f64) -> Option<f64> {
    if transfers.is_empty() {
        return None;
    }
    let sum: f64 = transfers
        .iter()
        .map(|t| t.weight * t.relatedness.unwrap_or(neutral))
        .sum();
    Some(clamp_finite(sum / transfers.len() as f64, 0.0, 1.0))
}

impl CoherenceMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        centroid: Option<Vec<f64>>,
        transfers: &[Transfer],
        cfg: &CoherenceConfig,
    ) -> Option<CoherenceReading> {
        let frontier = match (&self.previous_centroid, &centroid) {
            (Some(prev), Some(cur)) => frontier_similarity(prev, cur),
            _ => None,
        };
        self.previous_centroid = centroid;
        let stride = stride_relatedness(transfers, cfg.neutral_relatedness);

        let raw = match (frontier, stride) {
            (Some(f), Some(s)) => cfg.alpha * f + (1.0 - cfg.alpha) * s,
            (Some(f), None) => f,
            (None, Some(s)) => s,
            (None, None) => return None,
        };
        let raw = clamp_finite(raw, 0.0, 1.0);

        if self.window.len() == cfg.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(raw);
        let value = self.window.iter().sum::<f64>() / self.window.len() as f64;

        Some(CoherenceReading {
            value,
            raw,
            frontier,
            stride,
            band: CoherenceBand::from_value(value),
        })
    }

    /// Latest window average, if any tick produced a reading.
    pub fn current(&self) -> Option<f64> {
        (!self.window.is_empty())
            .then(|| self.window.iter().sum::<f64>() / self.window.len() as f64)
    }
}
