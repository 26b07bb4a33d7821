//! Task-context inference with hysteresis.
//!
//! Each tick the inferrer derives a handful of signals from recent dynamics
//! and picks a candidate context by strict priority:
//!
//! 1. rest: ρ below the rest threshold for a sustained streak
//! 2. consolidate: memory-formation hint, or a stable active set
//! 3. explore: exploration hint, or high type diversity among active nodes
//! 4. implement: implementation hint, or a high activation flip rate
//! 5. unknown
//!
//! A candidate only becomes the active context after winning
//! `hysteresis_frames` consecutive ticks. The active context's target ρ
//! feeds the criticality controller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::{ContextConfig, ContextTarget, ContextTargets};
use crate::graph::NodeId;
use crate::vector::jaccard;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskContext {
    Explore,
    Implement,
    Consolidate,
    Rest,
    #[default]
    Unknown,
}

impl TaskContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Implement => "implement",
            Self::Consolidate => "consolidate",
            Self::Rest => "rest",
            Self::Unknown => "unknown",
        }
    }

    pub fn target(&self, targets: &ContextTargets) -> ContextTarget {
        match self {
            Self::Explore => targets.explore,
            Self::Implement => targets.implement,
            Self::Consolidate => targets.consolidate,
            Self::Rest => targets.rest,
            Self::Unknown => targets.unknown,
        }
    }
}

/// Explicit signals supplied alongside a stimulus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextHints {
    pub memory_formation: bool,
    pub exploration_goal: bool,
    pub implementation_goal: bool,
}

impl ContextHints {
    pub fn merge(&mut self, other: &ContextHints) {
        self.memory_formation |= other.memory_formation;
        self.exploration_goal |= other.exploration_goal;
        self.implementation_goal |= other.implementation_goal;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSignals {
    /// Consecutive ticks with ρ below the rest threshold.
    pub low_rho_ticks: u32,
    /// Consecutive ticks with a stable active set.
    pub stable_ticks: u32,
    /// Distinct types over active count, 0 when too few nodes are active.
    pub diversity: f64,
    /// EMA of threshold crossings per node.
    pub flip_rate: f64,
    pub hints: ContextHints,
}

/// Pick the candidate context from this tick's signals.
pub fn candidate(signals: &ContextSignals, cfg: &ContextConfig) -> TaskContext {
    if signals.low_rho_ticks >= cfg.rest_ticks {
        TaskContext::Rest
    } else if signals.hints.memory_formation || signals.stable_ticks >= cfg.stable_ticks {
        TaskContext::Consolidate
    } else if signals.hints.exploration_goal || signals.diversity > cfg.diversity_above {
        TaskContext::Explore
    } else if signals.hints.implementation_goal || signals.flip_rate > cfg.flip_rate_above {
        TaskContext::Implement
    } else {
        TaskContext::Unknown
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextReading {
    pub active: TaskContext,
    pub candidate: TaskContext,
    /// Consecutive ticks the pending candidate has won.
    pub candidate_frames: u32,
    pub switched: bool,
    pub target: ContextTarget,
    pub signals: ContextSignals,
}

/// Per-tick observations the inferrer needs from the engine.
#[derive(Clone, Debug, Default)]
pub struct ContextObservation<'a> {
    pub rho: f64,
    pub active_set: Option<&'a BTreeSet<NodeId>>,
    pub diversity: f64,
    pub active_count: usize,
    pub crossings: usize,
    pub node_count: usize,
    pub hints: ContextHints,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextInferrer {
    active: TaskContext,
    pending: Option<TaskContext>,
    pending_frames: u32,
    low_rho_ticks: u32,
    stable_ticks: u32,
    flip_rate: f64,
    previous_active: Option<BTreeSet<NodeId>>,
}

impl ContextInferrer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> TaskContext {
        self.active
    }

    pub fn observe(&mut self, obs: &ContextObservation<'_>, cfg: &ContextConfig) -> ContextReading {
        if obs.rho < cfg.rest_rho_below {
            self.low_rho_ticks = self.low_rho_ticks.saturating_add(1);
        } else {
            self.low_rho_ticks = 0;
        }

        if let Some(current) = obs.active_set {
            let stable = !current.is_empty()
                && self
                    .previous_active
                    .as_ref()
                    .is_some_and(|prev| jaccard(prev, current) >= cfg.stable_overlap);
            self.stable_ticks = if stable {
                self.stable_ticks.saturating_add(1)
            } else {
                0
            };
            self.previous_active = Some(current.clone());
        }

        let flips = if obs.node_count > 0 {
            obs.crossings as f64 / obs.node_count as f64
        } else {
            0.0
        };
        self.flip_rate += cfg.flip_smoothing * (flips - self.flip_rate);

        let signals = ContextSignals {
            low_rho_ticks: self.low_rho_ticks,
            stable_ticks: self.stable_ticks,
            diversity: if obs.active_count >= cfg.diversity_min_active {
                obs.diversity
            } else {
                0.0
            },
            flip_rate: self.flip_rate,
            hints: obs.hints,
        };
        self.step(signals, cfg)
    }

    /// Apply hysteresis to one tick's signals.
    pub fn step(&mut self, signals: ContextSignals, cfg: &ContextConfig) -> ContextReading {
        let cand = candidate(&signals, cfg);
        let mut switched = false;

        if cand == self.active {
            self.pending = None;
            self.pending_frames = 0;
        } else {
            if self.pending == Some(cand) {
                self.pending_frames += 1;
            } else {
                self.pending = Some(cand);
                self.pending_frames = 1;
            }
            if self.pending_frames >= cfg.hysteresis_frames {
                tracing::info!(
                    from = self.active.as_str(),
                    to = cand.as_str(),
                    frames = self.pending_frames,
                    "task context switched"
                );
                self.active = cand;
                self.pending = None;
                self.pending_frames = 0;
                switched = true;
            }
        }

        ContextReading {
            active: self.active,
            candidate: cand,
            candidate_frames: self.pending_frames,
            switched,
            target: self.active.target(&cfg.targets),
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ContextConfig {
        ContextConfig {
            enabled: true,
            ..ContextConfig::default()
        }
    }

    fn explore() -> ContextSignals {
        ContextSignals {
            hints: ContextHints {
                exploration_goal: true,
                ..ContextHints::default()
            },
            ..ContextSignals::default()
        }
    }

    #[test]
    fn test_priority_order() {
        let cfg = cfg();
        let all = ContextSignals {
            low_rho_ticks: 10,
            stable_ticks: 5,
            diversity: 0.9,
            flip_rate: 0.5,
            hints: ContextHints {
                memory_formation: true,
                exploration_goal: true,
                implementation_goal: true,
            },
        };
        assert_eq!(candidate(&all, &cfg), TaskContext::Rest);

        let no_rest = ContextSignals {
            low_rho_ticks: 9,
            ..all.clone()
        };
        assert_eq!(candidate(&no_rest, &cfg), TaskContext::Consolidate);

        let implement = ContextSignals {
            flip_rate: 0.31,
            ..ContextSignals::default()
        };
        assert_eq!(candidate(&implement, &cfg), TaskContext::Implement);
        assert_eq!(candidate(&ContextSignals::default(), &cfg), TaskContext::Unknown);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let cfg = cfg();
        let at_diversity = ContextSignals {
            diversity: 0.6,
            ..ContextSignals::default()
        };
        assert_eq!(candidate(&at_diversity, &cfg), TaskContext::Unknown);
        let at_flip = ContextSignals {
            flip_rate: 0.3,
            ..ContextSignals::default()
        };
        assert_eq!(candidate(&at_flip, &cfg), TaskContext::Unknown);
    }

    #[test]
    fn test_single_tick_spike_does_not_switch() {
        let cfg = cfg();
        let mut inf = ContextInferrer::new();
        let r = inf.step(explore(), &cfg);
        assert_eq!(r.active, TaskContext::Unknown);
        assert_eq!(r.candidate, TaskContext::Explore);
        for _ in 0..10 {
            let r = inf.step(ContextSignals::default(), &cfg);
            assert_eq!(r.active, TaskContext::Unknown);
            assert_eq!(r.candidate_frames, 0);
        }
    }

    #[test]
    fn test_switches_after_hysteresis_frames() {
        let cfg = cfg();
        let mut inf = ContextInferrer::new();
        for i in 1..5 {
            let r = inf.step(explore(), &cfg);
            assert!(!r.switched, "switched early at tick {i}");
            assert_eq!(r.candidate_frames, i);
        }
        let r = inf.step(explore(), &cfg);
        assert!(r.switched);
        assert_eq!(r.active, TaskContext::Explore);
        assert_eq!(r.target, cfg.targets.explore);
    }

    #[test]
    fn test_interrupted_streak_restarts() {
        let cfg = cfg();
        let mut inf = ContextInferrer::new();
        for _ in 0..4 {
            inf.step(explore(), &cfg);
        }
        inf.step(ContextSignals::default(), &cfg);
        for _ in 0..4 {
            assert!(!inf.step(explore(), &cfg).switched);
        }
        assert!(inf.step(explore(), &cfg).switched);
    }

    #[test]
    fn test_observe_derives_rest_from_low_rho() {
        let cfg = ContextConfig {
            hysteresis_frames: 1,
            ..cfg()
        };
        let mut inf = ContextInferrer::new();
        let obs = ContextObservation {
            rho: 0.5,
            ..ContextObservation::default()
        };
        for _ in 0..9 {
            assert_ne!(inf.observe(&obs, &cfg).candidate, TaskContext::Rest);
        }
        let r = inf.observe(&obs, &cfg);
        assert_eq!(r.candidate, TaskContext::Rest);
        assert_eq!(r.active, TaskContext::Rest);
    }

    #[test]
    fn test_observe_stable_active_set() {
        let cfg = cfg();
        let mut inf = ContextInferrer::new();
        let set: BTreeSet<NodeId> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let obs = ContextObservation {
            rho: 1.0,
            active_set: Some(&set),
            ..ContextObservation::default()
        };
        let mut last = None;
        for _ in 0..6 {
            last = Some(inf.observe(&obs, &cfg));
        }
        let r = last.unwrap();
        assert_eq!(r.signals.stable_ticks, 5);
        assert_eq!(r.candidate, TaskContext::Consolidate);
    }

    #[test]
    fn test_small_active_set_is_not_diverse() {
        let cfg = cfg();
        let mut inf = ContextInferrer::new();
        let obs = ContextObservation {
            rho: 1.0,
            diversity: 1.0,
            active_count: 2,
            ..ContextObservation::default()
        };
        assert_eq!(inf.observe(&obs, &cfg).signals.diversity, 0.0);
    }
}
