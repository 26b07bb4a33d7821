/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Upper bound of the consolidation factor
pub const CONSOLIDATION_MAX: f64 = 0.8;

/// Resistance factor bounds
pub const RESISTANCE_MIN: f64 = 1.0;
pub const RESISTANCE_MAX: f64 = 1.5;

/// Stickiness factor bounds
pub const STICKINESS_MIN: f64 = 0.1;
pub const STICKINESS_MAX: f64 = 1.0;

/// Degree at which the centrality bonus is ~76% saturated (tanh(1)).
pub const DEGREE_SCALE: f64 = 20.0;

/// Branching ratio below which spread is dying out.
pub const RHO_SUBCRITICAL: f64 = 0.9;

/// Branching ratio above which spread is growing.
pub const RHO_SUPERCRITICAL: f64 = 1.1;

/// Coherence at or above this is "coherent".
pub const COHERENT_AT: f64 = 0.7;

/// Coherence below this is "fragmented".
pub const FRAGMENTED_BELOW: f64 = 0.4;

/// Maximum number of attributed energy channels per node.
/// Energy for any further channel is pooled as unattributed.
pub const CHANNEL_CAPACITY: usize = 4;

/// Default floor below which decayed energy snaps to zero.
pub const CLEANUP_FLOOR: f64 = 0.001;

/// Bounds of the ρ-health factor on injected energy.
pub const HEALTH_MIN: f64 = 0.5;
pub const HEALTH_MAX: f64 = 1.5;
