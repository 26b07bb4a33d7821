//! Stimulus injection with optional affective priming.
//!
//! A stimulus names entry nodes with similarity scores. Each score becomes
//! injected energy `clamp(score′, 0, 1) × gain`, where `score′` is the score
//! optionally rescaled by `1 + p · cos(A_recent, emotion)`. `A_recent` is an
//! EMA of the affect vectors seen on recent ticks; when its norm is below the
//! configured minimum, priming is skipped for the whole stimulus.
//!
//! Two optional shapers sit on top. Entropy coverage keeps only the
//! strongest entries that together hold `1 − e^(−H)` of the score mass, so a
//! peaked stimulus lands on few nodes and a flat one spreads wide. Health
//! modulation scales every injection by `clamp(1 + g · (ρ* − ρ), 0.5, 1.5)`,
//! damping input while spread runs hot and boosting it while spread dies.

use serde::{Deserialize, Serialize};

use crate::config::{PrimingConfig, StimulusConfig};
use crate::constants::{EPSILON, HEALTH_MAX, HEALTH_MIN};
use crate::context::ContextHints;
use crate::energy::ChannelKey;
use crate::frame::Frame;
use crate::graph::NodeId;
use crate::vector::{clamp_finite, cosine, norm};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    /// Entry nodes with similarity scores, in priority order.
    pub entries: Vec<(NodeId, f64)>,
    #[serde(default)]
    pub affect: Option<Vec<f64>>,
    /// Channel the injected energy is attributed to.
    #[serde(default)]
    pub channel: Option<ChannelKey>,
    #[serde(default)]
    pub hints: ContextHints,
}

impl Stimulus {
    pub fn new(entries: Vec<(NodeId, f64)>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn single(node: impl Into<NodeId>, score: f64) -> Self {
        Self::new(vec![(node.into(), score)])
    }

    pub fn with_affect(mut self, affect: Vec<f64>) -> Self {
        self.affect = Some(affect);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<ChannelKey>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_hints(mut self, hints: ContextHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Rolling affect average used for priming.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AffectTracker {
    ema: Option<Vec<f64>>,
}

impl AffectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self) -> Option<&[f64]> {
        self.ema.as_deref()
    }

    pub fn magnitude(&self) -> f64 {
        self.ema.as_deref().map_or(0.0, norm)
    }

    /// Fold one affect vector in. A vector of a different length than the
    /// current average restarts the average.
    pub fn update(&mut self, affect: &[f64], window: u32) {
        let alpha = 2.0 / (f64::from(window) + 1.0);
        match &mut self.ema {
            Some(ema) if ema.len() == affect.len() => {
                for (e, a) in ema.iter_mut().zip(affect) {
                    *e += alpha * (finite_or_zero(*a) - *e);
                }
            }
            _ => {
                self.ema = Some(affect.iter().copied().map(finite_or_zero).collect());
            }
        }
    }

    /// A tick without affect fades the average toward zero.
    pub fn fade(&mut self, window: u32) {
        let alpha = 2.0 / (f64::from(window) + 1.0);
        if let Some(ema) = &mut self.ema {
            ema.iter_mut().for_each(|e| *e *= 1.0 - alpha);
        }
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub node: NodeId,
    pub score: f64,
    /// Priming multiplier applied to the score (1.0 when not primed).
    pub boost: f64,
    pub energy: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionReport {
    pub injections: Vec<Injection>,
    pub injected: f64,
    /// Entry ids that are not in the graph.
    pub unknown: Vec<NodeId>,
    /// Recent-affect norm seen by the last stimulus.
    pub affect_magnitude: f64,
    /// Whether any stimulus this tick was primed.
    pub primed: bool,
    /// Entries left out by coverage selection.
    pub dropped: usize,
    /// Health factor applied to every injection.
    pub health: f64,
}

/// Injection scale for the current ρ, or 1.0 when modulation is off.
pub fn health_factor(rho: f64, target: f64, cfg: &StimulusConfig) -> f64 {
    if !cfg.health_modulation {
        return 1.0;
    }
    let f = 1.0 + cfg.health_gain * (target - rho);
    if f.is_nan() {
        1.0
    } else {
        f.clamp(HEALTH_MIN, HEALTH_MAX)
    }
}

/// Indices (ascending) of the highest scores whose share of the total
/// reaches `1 − e^(−H)`. Non-positive scores carry no mass and are never
/// picked, so an all-zero stimulus selects nothing.
pub fn coverage_select(scores: &[f64]) -> Vec<usize> {
    let mass: Vec<f64> = scores.iter().map(|s| clamp_finite(*s, 0.0, f64::MAX)).collect();
    let total: f64 = mass.iter().sum();
    if total <= 0.0 {
        return Vec::new();
    }
    let entropy: f64 = -mass
        .iter()
        .map(|m| m / total)
        .map(|p| p * (p + EPSILON).ln())
        .sum::<f64>();
    let coverage = 1.0 - (-entropy).exp();

    let mut order: Vec<usize> = (0..mass.len()).collect();
    order.sort_by(|a, b| mass[*b].total_cmp(&mass[*a]));

    let mut picked = Vec::new();
    let mut covered = 0.0;
    for i in order {
        if mass[i] <= 0.0 {
            break;
        }
        picked.push(i);
        covered += mass[i] / total;
        if covered >= coverage {
            break;
        }
    }
    picked.sort_unstable();
    picked
}

/// Inject every stimulus into the frame, in order. Each stimulus is primed
/// against the affect average as it stood before that stimulus's own affect
/// is folded in. `health` scales every injection (see [`health_factor`]).
pub fn inject(
    frame: &mut Frame,
    stimuli: &[Stimulus],
    tracker: &mut AffectTracker,
    stimulus_cfg: &StimulusConfig,
    priming_cfg: &PrimingConfig,
    health: f64,
) -> InjectionReport {
    let mut report = InjectionReport {
        health,
        ..InjectionReport::default()
    };
    let mut saw_affect = false;

    for stimulus in stimuli {
        let magnitude = tracker.magnitude();
        report.affect_magnitude = magnitude;
        let recent = tracker
            .recent()
            .filter(|_| priming_cfg.enabled && magnitude >= priming_cfg.min_affect)
            .map(<[f64]>::to_vec);
        report.primed |= recent.is_some();

        let selected = stimulus_cfg.entropy_coverage.then(|| {
            let scores: Vec<f64> = stimulus.entries.iter().map(|(_, s)| *s).collect();
            coverage_select(&scores)
        });
        if let Some(picked) = &selected {
            report.dropped += stimulus.entries.len() - picked.len();
        }

        for (n, (id, score)) in stimulus.entries.iter().enumerate() {
            if selected.as_ref().is_some_and(|p| p.binary_search(&n).is_err()) {
                continue;
            }
            let Some(idx) = frame.index_of(id) else {
                tracing::debug!(node = %id, "stimulus names unknown node");
                report.unknown.push(id.clone());
                continue;
            };
            let boost = match (&recent, frame.nodes[idx].emotion.as_deref()) {
                (Some(affect), Some(emotion)) => cosine(affect, emotion)
                    .map_or(1.0, |r| 1.0 + priming_cfg.strength * r),
                _ => 1.0,
            };
            let primed = clamp_finite(score * boost, 0.0, 1.0);
            let energy = primed * stimulus_cfg.gain * health;
            frame.nodes[idx].energy.add(stimulus.channel.as_deref(), energy);

            report.injected += energy;
            report.injections.push(Injection {
                node: id.clone(),
                score: *score,
                boost,
                energy,
            });
        }

        if let Some(affect) = &stimulus.affect {
            tracker.update(affect, priming_cfg.window);
            saw_affect = true;
        }
    }

    if !saw_affect {
        tracker.fade(priming_cfg.window);
    }
    report
}
