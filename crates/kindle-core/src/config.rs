//! Engine configuration.
//!
//! Every section deserializes with defaults, so an empty document is a
//! valid configuration. Decay and diffusion run in their plain form by
//! default; every modulator, controller and classifier is off until
//! enabled. [`EngineConfig::validate`] rejects out-of-range values before an
//! engine is built, never at tick time.

use serde::{Deserialize, Serialize};

use crate::activation::ActivationRule;
use crate::constants::{
    CLEANUP_FLOOR, CONSOLIDATION_MAX, RESISTANCE_MAX, RESISTANCE_MIN, STICKINESS_MAX,
    STICKINESS_MIN,
};
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default elapsed time per tick, in seconds.
    pub dt: f64,
    pub activation: ActivationRule,
    pub decay: DecayConfig,
    pub diffusion: DiffusionConfig,
    pub consolidation: ConsolidationConfig,
    pub resistance: ResistanceConfig,
    pub stickiness: StickinessConfig,
    pub criticality: CriticalityConfig,
    pub coherence: CoherenceConfig,
    pub modes: ModeConfig,
    pub context: ContextConfig,
    pub stimulus: StimulusConfig,
    pub priming: PrimingConfig,
    pub groups: GroupConfig,
    pub profiles: ProfilesConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dt: 1.0,
            activation: ActivationRule::default(),
            decay: DecayConfig::default(),
            diffusion: DiffusionConfig::default(),
            consolidation: ConsolidationConfig::default(),
            resistance: ResistanceConfig::default(),
            stickiness: StickinessConfig::default(),
            criticality: CriticalityConfig::default(),
            coherence: CoherenceConfig::default(),
            modes: ModeConfig::default(),
            context: ContextConfig::default(),
            stimulus: StimulusConfig::default(),
            priming: PrimingConfig::default(),
            groups: GroupConfig::default(),
            profiles: ProfilesConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Fraction lost per second when unmodulated (λ = 1 - base_rate).
    pub base_rate: f64,
    /// Totals below this snap to zero after decay.
    pub cleanup_floor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_rate: 0.05,
            cleanup_floor: CLEANUP_FLOOR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    pub enabled: bool,
    /// Fraction of source energy offered per unit link weight per second.
    pub base_rate: f64,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_rate: 0.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub retrieval_weight: f64,
    pub affect_weight: f64,
    /// Emotion norm above which affect starts consolidating.
    pub affect_floor: f64,
    /// Norm span over which the affect term ramps from 0 to 1.
    pub affect_span: f64,
    pub goal_bonus: f64,
    pub max: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retrieval_weight: 0.3,
            affect_weight: 0.4,
            affect_floor: 0.7,
            affect_span: 0.3,
            goal_bonus: 0.5,
            max: CONSOLIDATION_MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResistanceConfig {
    pub enabled: bool,
    pub degree_weight: f64,
    pub bridge_weight: f64,
    /// Bridging count (beyond the first group) at which the bonus saturates.
    pub bridge_saturation: f64,
    pub max: f64,
}

impl Default for ResistanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            degree_weight: 0.1,
            bridge_weight: 0.15,
            bridge_saturation: 5.0,
            max: RESISTANCE_MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickinessConfig {
    pub enabled: bool,
    pub consolidation_bonus: f64,
    /// Consolidation at or above which a node counts as consolidated.
    pub consolidated_at: f64,
    pub degree_weight: f64,
}

impl Default for StickinessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consolidation_bonus: 0.2,
            consolidated_at: 0.3,
            degree_weight: 0.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalityConfig {
    /// When off, ρ is still estimated but rates stay at their base values.
    pub enabled: bool,
    /// Target ρ used when task-context inference is off.
    pub target: f64,
    pub initial_rho: f64,
    /// EMA weight of each new ρ estimate.
    pub smoothing: f64,
    pub diffusion_gain: f64,
    /// Proportional gain on the decay lever.
    pub decay_gain: f64,
    pub diffusion_min: f64,
    pub diffusion_max: f64,
    pub decay_min: f64,
    pub decay_max: f64,
    /// Rolling history length for variance and oscillation.
    pub window: usize,
    /// Energy in motion below this yields no branching proxy.
    pub min_motion: f64,
    /// Ticks between spectral estimates; ρ is held in between.
    pub sample_every: u32,
    pub power_iterations: usize,
    /// Power iteration stops once successive estimates differ by less.
    pub power_tolerance: f64,
    /// Drive the decay lever with PID instead of plain proportional control.
    pub pid: bool,
    pub integral_gain: f64,
    pub derivative_gain: f64,
    /// Anti-windup bound on the accumulated error.
    pub integral_max: f64,
    /// Scale the activation threshold by the safety state.
    pub threshold_modulation: bool,
}

impl Default for CriticalityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: 1.0,
            initial_rho: 1.0,
            smoothing: 0.2,
            diffusion_gain: 0.02,
            decay_gain: 0.05,
            diffusion_min: 0.05,
            diffusion_max: 0.30,
            decay_min: 0.001,
            decay_max: 0.35,
            window: 20,
            min_motion: 1e-6,
            sample_every: 1,
            power_iterations: 20,
            power_tolerance: 1e-6,
            pid: false,
            integral_gain: 0.01,
            derivative_gain: 0.02,
            integral_max: 1.0,
            threshold_modulation: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    pub enabled: bool,
    /// Weight of the frontier component.
    pub alpha: f64,
    pub window: usize,
    /// Relatedness assumed for links that carry none.
    pub neutral_relatedness: f64,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 0.6,
            window: 5,
            neutral_relatedness: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextTarget {
    pub rho: f64,
    pub tolerance: f64,
}

impl ContextTarget {
    pub const fn new(rho: f64, tolerance: f64) -> Self {
        Self { rho, tolerance }
    }

    pub fn contains(&self, rho: f64) -> bool {
        (rho - self.rho).abs() <= self.tolerance
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextTargets {
    pub explore: ContextTarget,
    pub implement: ContextTarget,
    pub consolidate: ContextTarget,
    pub rest: ContextTarget,
    pub unknown: ContextTarget,
}

impl Default for ContextTargets {
    fn default() -> Self {
        Self {
            explore: ContextTarget::new(1.05, 0.10),
            implement: ContextTarget::new(0.95, 0.05),
            consolidate: ContextTarget::new(0.85, 0.08),
            rest: ContextTarget::new(0.70, 0.15),
            unknown: ContextTarget::new(1.00, 0.10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub enabled: bool,
    /// Consecutive ticks a candidate must win before it becomes active.
    pub hysteresis_frames: u32,
    pub rest_rho_below: f64,
    pub rest_ticks: u32,
    /// Jaccard overlap with the previous active set that counts as stable.
    pub stable_overlap: f64,
    pub stable_ticks: u32,
    pub diversity_above: f64,
    /// Fewer active nodes than this never count as diverse.
    pub diversity_min_active: usize,
    pub flip_rate_above: f64,
    pub flip_smoothing: f64,
    pub targets: ContextTargets,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hysteresis_frames: 5,
            rest_rho_below: 0.9,
            rest_ticks: 10,
            stable_overlap: 0.9,
            stable_ticks: 5,
            diversity_above: 0.6,
            diversity_min_active: 3,
            flip_rate_above: 0.3,
            flip_smoothing: 0.3,
            targets: ContextTargets::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusConfig {
    /// Energy injected for a score of 1.0.
    pub gain: f64,
    /// Inject only the strongest entries that cover `1 − e^(−H)` of the
    /// score mass, where `H` is the entropy of the score distribution.
    pub entropy_coverage: bool,
    /// Scale injected energy by how far ρ sits from its target.
    pub health_modulation: bool,
    /// Slope of the health factor per unit of `ρ* − ρ`.
    pub health_gain: f64,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            entropy_coverage: false,
            health_modulation: false,
            health_gain: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimingConfig {
    pub enabled: bool,
    /// Maximum relative boost or damping of a score.
    pub strength: f64,
    /// Recent-affect norm below which priming is skipped.
    pub min_affect: f64,
    /// EMA window in ticks.
    pub window: u32,
}

impl Default for PrimingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0.15,
            min_affect: 0.3,
            window: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub enabled: bool,
    pub window: usize,
    /// Samples a node needs before it can join a group.
    pub min_samples: usize,
    /// Pearson correlation at or above which two nodes are linked.
    pub correlation: f64,
    pub min_size: usize,
    /// Overlap needed for a new cluster to inherit an old group's tag.
    pub match_overlap: f64,
    /// Only the most energetic nodes are clustered.
    pub max_tracked: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: 20,
            min_samples: 5,
            correlation: 0.8,
            min_size: 2,
            match_overlap: 0.5,
            max_tracked: 256,
        }
    }
}

/// Per-type base values. `resistance` is the type multiplier r_type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeProfile {
    pub stickiness: f64,
    pub resistance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeProfileRule {
    pub name: String,
    /// Regex matched against the node type tag.
    pub pattern: String,
    pub stickiness: f64,
    pub resistance: f64,
}

impl TypeProfileRule {
    fn new(name: &str, pattern: &str, stickiness: f64, resistance: f64) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            stickiness,
            resistance,
        }
    }
}

/// First matching rule wins; unmatched types use `default`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub default: TypeProfile,
    pub rules: Vec<TypeProfileRule>,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            default: TypeProfile {
                stickiness: 0.6,
                resistance: 1.0,
            },
            rules: vec![
                TypeProfileRule::new("principle", "(?i)^(principle|value|belief)", 0.85, 1.15),
                TypeProfileRule::new("episodic", "(?i)^episod", 0.9, 1.25),
                TypeProfileRule::new("long_lived", "(?i)^(memory|long[_-]?lived|concept)", 0.9, 1.2),
                TypeProfileRule::new("event", "(?i)^event", 0.4, 1.0),
                TypeProfileRule::new("ephemeral", "(?i)^(task|ephemeral|scratch)", 0.3, 1.0),
            ],
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("dt", self.dt)?;

        match self.activation {
            ActivationRule::Hard { threshold } => at_least("activation.threshold", threshold, 0.0)?,
            ActivationRule::Soft {
                threshold,
                steepness,
            } => {
                at_least("activation.threshold", threshold, 0.0)?;
                positive("activation.steepness", steepness)?;
            }
        }

        open_unit("decay.base_rate", self.decay.base_rate)?;
        at_least("decay.cleanup_floor", self.decay.cleanup_floor, 0.0)?;
        unit("diffusion.base_rate", self.diffusion.base_rate)?;

        let c = &self.consolidation;
        at_least("consolidation.retrieval_weight", c.retrieval_weight, 0.0)?;
        at_least("consolidation.affect_weight", c.affect_weight, 0.0)?;
        at_least("consolidation.affect_floor", c.affect_floor, 0.0)?;
        positive("consolidation.affect_span", c.affect_span)?;
        at_least("consolidation.goal_bonus", c.goal_bonus, 0.0)?;
        within("consolidation.max", c.max, 0.0, CONSOLIDATION_MAX, "[0, 0.8]")?;

        let r = &self.resistance;
        at_least("resistance.degree_weight", r.degree_weight, 0.0)?;
        at_least("resistance.bridge_weight", r.bridge_weight, 0.0)?;
        positive("resistance.bridge_saturation", r.bridge_saturation)?;
        within("resistance.max", r.max, RESISTANCE_MIN, RESISTANCE_MAX, "[1, 1.5]")?;

        let s = &self.stickiness;
        at_least("stickiness.consolidation_bonus", s.consolidation_bonus, 0.0)?;
        unit("stickiness.consolidated_at", s.consolidated_at)?;
        at_least("stickiness.degree_weight", s.degree_weight, 0.0)?;

        let k = &self.criticality;
        positive("criticality.target", k.target)?;
        positive("criticality.initial_rho", k.initial_rho)?;
        within("criticality.smoothing", k.smoothing, f64::MIN_POSITIVE, 1.0, "(0, 1]")?;
        at_least("criticality.diffusion_gain", k.diffusion_gain, 0.0)?;
        at_least("criticality.decay_gain", k.decay_gain, 0.0)?;
        unit("criticality.diffusion_min", k.diffusion_min)?;
        within("criticality.diffusion_max", k.diffusion_max, k.diffusion_min, 1.0, "[diffusion_min, 1]")?;
        open_unit("criticality.decay_min", k.decay_min)?;
        within("criticality.decay_max", k.decay_max, k.decay_min, 1.0 - f64::EPSILON, "[decay_min, 1)")?;
        at_least("criticality.window", k.window as f64, 2.0)?;
        at_least("criticality.min_motion", k.min_motion, 0.0)?;
        at_least("criticality.sample_every", f64::from(k.sample_every), 1.0)?;
        at_least("criticality.power_iterations", k.power_iterations as f64, 1.0)?;
        positive("criticality.power_tolerance", k.power_tolerance)?;
        at_least("criticality.integral_gain", k.integral_gain, 0.0)?;
        at_least("criticality.derivative_gain", k.derivative_gain, 0.0)?;
        positive("criticality.integral_max", k.integral_max)?;

        let h = &self.coherence;
        unit("coherence.alpha", h.alpha)?;
        at_least("coherence.window", h.window as f64, 1.0)?;
        unit("coherence.neutral_relatedness", h.neutral_relatedness)?;

        let x = &self.context;
        at_least("context.hysteresis_frames", f64::from(x.hysteresis_frames), 1.0)?;
        positive("context.rest_rho_below", x.rest_rho_below)?;
        at_least("context.rest_ticks", f64::from(x.rest_ticks), 1.0)?;
        unit("context.stable_overlap", x.stable_overlap)?;
        at_least("context.stable_ticks", f64::from(x.stable_ticks), 1.0)?;
        unit("context.diversity_above", x.diversity_above)?;
        at_least("context.flip_rate_above", x.flip_rate_above, 0.0)?;
        within("context.flip_smoothing", x.flip_smoothing, f64::MIN_POSITIVE, 1.0, "(0, 1]")?;
        for (field, t) in [
            ("context.targets.explore", x.targets.explore),
            ("context.targets.implement", x.targets.implement),
            ("context.targets.consolidate", x.targets.consolidate),
            ("context.targets.rest", x.targets.rest),
            ("context.targets.unknown", x.targets.unknown),
        ] {
            positive(field, t.rho)?;
            at_least(field, t.tolerance, 0.0)?;
        }

        at_least("stimulus.gain", self.stimulus.gain, 0.0)?;
        at_least("stimulus.health_gain", self.stimulus.health_gain, 0.0)?;

        let p = &self.priming;
        within("priming.strength", p.strength, 0.0, 0.5, "[0, 0.5]")?;
        at_least("priming.min_affect", p.min_affect, 0.0)?;
        at_least("priming.window", f64::from(p.window), 1.0)?;

        let g = &self.groups;
        at_least("groups.min_samples", g.min_samples as f64, 3.0)?;
        at_least("groups.window", g.window as f64, g.min_samples as f64)?;
        within("groups.correlation", g.correlation, f64::MIN_POSITIVE, 1.0, "(0, 1]")?;
        at_least("groups.min_size", g.min_size as f64, 2.0)?;
        within("groups.match_overlap", g.match_overlap, f64::MIN_POSITIVE, 1.0, "(0, 1]")?;
        at_least("groups.max_tracked", g.max_tracked as f64, 2.0)?;

        profile("profiles.default", &self.profiles.default)?;
        for rule in &self.profiles.rules {
            profile(
                "profiles.rules",
                &TypeProfile {
                    stickiness: rule.stickiness,
                    resistance: rule.resistance,
                },
            )?;
            regex::Regex::new(&rule.pattern).map_err(|e| ConfigError::InvalidPattern {
                profile: rule.name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn profile(field: &'static str, p: &TypeProfile) -> Result<(), ConfigError> {
    within(field, p.stickiness, STICKINESS_MIN, STICKINESS_MAX, "stickiness in [0.1, 1]")?;
    within(field, p.resistance, RESISTANCE_MIN, RESISTANCE_MAX, "resistance in [1, 1.5]")
}

fn within(
    field: &'static str,
    value: f64,
    lo: f64,
    hi: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}

fn at_least(field: &'static str, value: f64, lo: f64) -> Result<(), ConfigError> {
    within(field, value, lo, f64::MAX, "a finite value at or above the minimum")
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    within(field, value, f64::MIN_POSITIVE, f64::MAX, "> 0")
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    within(field, value, 0.0, 1.0, "[0, 1]")
}

fn open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "(0, 1)",
        })
    }
}
