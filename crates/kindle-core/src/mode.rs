//! Criticality mode: a pure function of (ρ, C).
//!
//! | ρ            | C        | mode                |
//! |--------------|----------|---------------------|
//! | < 0.9        | any      | subcritical         |
//! | [0.9, 1.1]   | ≥ 0.7    | flow                |
//! | > 1.1        | ≥ 0.7    | generative_overflow |
//! | > 1.1        | < 0.4    | chaotic_racing      |
//! | otherwise    |          | mixed               |
//!
//! Without a coherence reading the classification falls back to ρ alone and
//! the flow and overflow labels carry a `_rho_only` suffix.

use serde::{Deserialize, Serialize};

use crate::constants::{COHERENT_AT, FRAGMENTED_BELOW, RHO_SUBCRITICAL, RHO_SUPERCRITICAL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalityMode {
    Subcritical,
    Flow,
    GenerativeOverflow,
    ChaoticRacing,
    Mixed,
}

impl CriticalityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subcritical => "subcritical",
            Self::Flow => "flow",
            Self::GenerativeOverflow => "generative_overflow",
            Self::ChaoticRacing => "chaotic_racing",
            Self::Mixed => "mixed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Subcritical => "activation is dying out; thoughts stall before they connect",
            Self::Flow => "self-sustaining spread along related territory",
            Self::GenerativeOverflow => "spread is growing but stays on related ground; many connected ideas at once",
            Self::ChaoticRacing => "spread is growing and jumping between unrelated territory",
            Self::Mixed => "no clear regime; spread and coherence disagree",
        }
    }

    /// What the controller should be doing about it.
    pub fn recommended_response(&self) -> &'static str {
        match self {
            Self::Subcritical => "raise diffusion, lower decay",
            Self::Flow => "hold rates",
            Self::GenerativeOverflow => "lower diffusion gently",
            Self::ChaoticRacing => "lower diffusion, raise decay",
            Self::Mixed => "hold rates and keep observing",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeReading {
    pub mode: CriticalityMode,
    /// True when no coherence reading was available.
    pub reduced_confidence: bool,
    /// Ticks spent in this mode, including this one.
    pub ticks_in_mode: u64,
}

impl ModeReading {
    /// Mode name, suffixed `_rho_only` when classified without coherence.
    pub fn label(&self) -> String {
        if self.reduced_confidence {
            format!("{}_rho_only", self.mode.as_str())
        } else {
            self.mode.as_str().to_string()
        }
    }
}

/// Returns the mode and whether it was classified at reduced confidence.
pub fn classify(rho: f64, coherence: Option<f64>) -> (CriticalityMode, bool) {
    if rho < RHO_SUBCRITICAL {
        return (CriticalityMode::Subcritical, false);
    }
    let Some(c) = coherence.filter(|c| c.is_finite()) else {
        return if rho <= RHO_SUPERCRITICAL {
            (CriticalityMode::Flow, true)
        } else if rho > RHO_SUPERCRITICAL {
            (CriticalityMode::GenerativeOverflow, true)
        } else {
            (CriticalityMode::Mixed, true)
        };
    };

    let mode = if rho <= RHO_SUPERCRITICAL && c >= COHERENT_AT {
        CriticalityMode::Flow
    } else if rho > RHO_SUPERCRITICAL && c >= COHERENT_AT {
        CriticalityMode::GenerativeOverflow
    } else if rho > RHO_SUPERCRITICAL && c < FRAGMENTED_BELOW {
        CriticalityMode::ChaoticRacing
    } else {
        CriticalityMode::Mixed
    };
    (mode, false)
}

/// Tracks how long the classifier has stayed in one mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModeTracker {
    current: Option<CriticalityMode>,
    ticks_in_mode: u64,
}

impl ModeTracker {
    pub fn observe(&mut self, rho: f64, coherence: Option<f64>) -> ModeReading {
        let (mode, reduced_confidence) = classify(rho, coherence);
        if self.current == Some(mode) {
            self.ticks_in_mode += 1;
        } else {
            if let Some(prev) = self.current {
                tracing::debug!(from = prev.as_str(), to = mode.as_str(), "mode changed");
            }
            self.current = Some(mode);
            self.ticks_in_mode = 1;
        }
        ModeReading {
            mode,
            reduced_confidence,
            ticks_in_mode: self.ticks_in_mode,
        }
    }

    pub fn current(&self) -> Option<CriticalityMode> {
        self.current
    }
}
