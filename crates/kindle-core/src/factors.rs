//! Per-node modulation factors, recomputed every tick.
//!
//! - consolidation c ∈ [0, 0.8]: slows decay for nodes that are attended,
//!   emotionally salient or tied to an unresolved goal.
//! - resistance r ∈ [1.0, 1.5]: slows decay for well-connected, bridging or
//!   persistent-type nodes.
//! - stickiness s ∈ [0.1, 1.0]: fraction of incoming diffused energy a node
//!   keeps; the rest leaks out of the system.
//!
//! None of these are stored on the node. They are pure functions of the
//! node's current fields plus the current variant-group membership.

use regex::Regex;

use crate::config::{
    ConsolidationConfig, ProfilesConfig, ResistanceConfig, StickinessConfig, TypeProfile,
};
use crate::constants::{
    CONSOLIDATION_MAX, DEGREE_SCALE, RESISTANCE_MAX, RESISTANCE_MIN, STICKINESS_MAX,
    STICKINESS_MIN,
};
use crate::error::ConfigError;
use crate::graph::Node;
use crate::vector::{clamp_finite, norm};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeFactors {
    pub consolidation: f64,
    pub resistance: f64,
    pub stickiness: f64,
}

impl Default for NodeFactors {
    /// Neutral factors: no slowing of decay and no leak.
    fn default() -> Self {
        Self {
            consolidation: 0.0,
            resistance: RESISTANCE_MIN,
            stickiness: STICKINESS_MAX,
        }
    }
}

/// Compiled type-profile table.
#[derive(Clone, Debug)]
pub struct TypeProfiles {
    default: TypeProfile,
    rules: Vec<(String, Regex, TypeProfile)>,
}

impl TypeProfiles {
    pub fn compile(cfg: &ProfilesConfig) -> Result<Self, ConfigError> {
        let rules = cfg
            .rules
            .iter()
            .map(|r| {
                let re = Regex::new(&r.pattern).map_err(|e| ConfigError::InvalidPattern {
                    profile: r.name.clone(),
                    message: e.to_string(),
                })?;
                let profile = TypeProfile {
                    stickiness: r.stickiness,
                    resistance: r.resistance,
                };
                Ok((r.name.clone(), re, profile))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            default: cfg.default,
            rules,
        })
    }

    /// Profile name and values for a node type. Unmatched types resolve to
    /// `("default", default)`.
    pub fn resolve(&self, node_type: &str) -> (&str, TypeProfile) {
        self.rules
            .iter()
            .find(|(_, re, _)| re.is_match(node_type))
            .map_or(("default", self.default), |(name, _, p)| (name.as_str(), *p))
    }
}

/// Diminishing-returns centrality term in [0, 1).
fn centrality(degree: usize) -> f64 {
    (degree as f64 / DEGREE_SCALE).tanh()
}

pub fn consolidation(node: &Node, cfg: &ConsolidationConfig) -> f64 {
    if !cfg.enabled {
        return 0.0;
    }
    let retrieval = cfg.retrieval_weight * clamp_finite(node.wm_presence.unwrap_or(0.0), 0.0, 1.0);

    let affect = node.emotion.as_deref().map_or(0.0, |emo| {
        let magnitude = norm(emo);
        if magnitude > cfg.affect_floor {
            cfg.affect_weight * clamp_finite((magnitude - cfg.affect_floor) / cfg.affect_span, 0.0, 1.0)
        } else {
            0.0
        }
    });

    let goal = if node.unresolved_goal { cfg.goal_bonus } else { 0.0 };

    clamp_finite(retrieval + affect + goal, 0.0, cfg.max.min(CONSOLIDATION_MAX))
}

/// `bridges` is the number of distinct variant groups touching the node.
pub fn resistance(node: &Node, bridges: usize, profile: &TypeProfile, cfg: &ResistanceConfig) -> f64 {
    if !cfg.enabled {
        return RESISTANCE_MIN;
    }
    let r_deg = 1.0 + cfg.degree_weight * centrality(node.degree);
    let r_bridge = if bridges > 1 {
        1.0 + cfg.bridge_weight * ((bridges - 1) as f64 / cfg.bridge_saturation).min(1.0)
    } else {
        1.0
    };
    let r_type = profile.resistance;
    clamp_finite(
        r_deg * r_bridge * r_type,
        RESISTANCE_MIN,
        cfg.max.min(RESISTANCE_MAX),
    )
}

pub fn stickiness(node: &Node, consolidation: f64, profile: &TypeProfile, cfg: &StickinessConfig) -> f64 {
    if !cfg.enabled {
        return STICKINESS_MAX;
    }
    let mut s = profile.stickiness;
    if consolidation >= cfg.consolidated_at {
        s += cfg.consolidation_bonus;
    }
    s += cfg.degree_weight * centrality(node.degree);
    clamp_finite(s, STICKINESS_MIN, STICKINESS_MAX)
}

/// All three factors for one node.
pub fn compute(
    node: &Node,
    bridges: usize,
    profiles: &TypeProfiles,
    consolidation_cfg: &ConsolidationConfig,
    resistance_cfg: &ResistanceConfig,
    stickiness_cfg: &StickinessConfig,
) -> NodeFactors {
    let (_, profile) = profiles.resolve(&node.node_type);
    let c = consolidation(node, consolidation_cfg);
    NodeFactors {
        consolidation: c,
        resistance: resistance(node, bridges, &profile, resistance_cfg),
        stickiness: stickiness(node, c, &profile, stickiness_cfg),
    }
}
