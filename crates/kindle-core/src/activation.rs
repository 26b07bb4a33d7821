//! Which nodes count as active, and how strongly.
//!
//! Every consumer that needs an "is this node active" answer goes through
//! [`ActivationRule`], so switching between a hard threshold and a smooth
//! gate is a configuration change rather than a code change.
//!
//! - `Hard`: weight is 1 at or above the threshold, 0 below it.
//! - `Soft`: logistic weight `1 / (1 + exp(-k (E - θ)))`, which is 0.5 at the
//!   threshold and approaches 1 well above it.
//!
//! Membership in the active set is `E >= threshold` under both rules, so
//! coherence, context inference and groups see the same boundary either way.
//! Only diffusion uses the graded weight.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationRule {
    Hard { threshold: f64 },
    Soft { threshold: f64, steepness: f64 },
}

impl Default for ActivationRule {
    fn default() -> Self {
        ActivationRule::Hard { threshold: 0.01 }
    }
}

impl ActivationRule {
    pub fn threshold(&self) -> f64 {
        match *self {
            ActivationRule::Hard { threshold } | ActivationRule::Soft { threshold, .. } => threshold,
        }
    }

    /// Diffusion eligibility weight in [0, 1]. Zero energy always weighs 0.
    pub fn weight(&self, energy: f64) -> f64 {
        if energy.is_nan() || energy <= 0.0 {
            return 0.0;
        }
        match *self {
            ActivationRule::Hard { threshold } => {
                if energy >= threshold {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationRule::Soft {
                threshold,
                steepness,
            } => {
                let w = 1.0 / (1.0 + (-steepness * (energy - threshold)).exp());
                if w.is_finite() { w.clamp(0.0, 1.0) } else { 0.0 }
            }
        }
    }

    /// The same rule with its threshold multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        match *self {
            ActivationRule::Hard { threshold } => ActivationRule::Hard {
                threshold: threshold * factor,
            },
            ActivationRule::Soft {
                threshold,
                steepness,
            } => ActivationRule::Soft {
                threshold: threshold * factor,
                steepness,
            },
        }
    }

    pub fn is_active(&self, energy: f64) -> bool {
        energy > 0.0 && energy >= self.threshold()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationRule::Hard { .. } => "hard",
            ActivationRule::Soft { .. } => "soft",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_threshold_boundary() {
        let rule = ActivationRule::Hard { threshold: 0.5 };
        assert_eq!(rule.weight(0.4999), 0.0);
        assert_eq!(rule.weight(0.5), 1.0);
        assert_eq!(rule.weight(10.0), 1.0);
        assert!(rule.is_active(0.5));
        assert!(!rule.is_active(0.49));
    }

    #[test]
    fn test_soft_is_half_at_threshold_and_monotone() {
        let rule = ActivationRule::Soft {
            threshold: 1.0,
            steepness: 8.0,
        };
        assert!((rule.weight(1.0) - 0.5).abs() < 1e-12);
        let mut prev = 0.0;
        for i in 1..40 {
            let w = rule.weight(i as f64 * 0.1);
            assert!(w >= prev, "soft weight must be non-decreasing");
            assert!((0.0..=1.0).contains(&w));
            prev = w;
        }
        assert!(rule.weight(5.0) > 0.99);
    }

    #[test]
    fn test_zero_and_nan_energy_inactive() {
        for rule in [
            ActivationRule::Hard { threshold: 0.0 },
            ActivationRule::Soft {
                threshold: 0.0,
                steepness: 1.0,
            },
        ] {
            assert_eq!(rule.weight(0.0), 0.0);
            assert_eq!(rule.weight(f64::NAN), 0.0);
            assert!(!rule.is_active(0.0));
        }
    }

    #[test]
    fn test_rule_deserializes_from_tagged_table() {
        let rule: ActivationRule =
            serde_json::from_str(r#"{"kind":"soft","threshold":0.2,"steepness":12.0}"#).unwrap();
        assert_eq!(
            rule,
            ActivationRule::Soft {
                threshold: 0.2,
                steepness: 12.0
            }
        );
        assert_eq!(rule.as_str(), "soft");
    }

    #[test]
    fn test_scaled_moves_threshold_only() {
        let rule = ActivationRule::Soft {
            threshold: 0.2,
            steepness: 10.0,
        };
        assert_eq!(
            rule.scaled(1.1),
            ActivationRule::Soft {
                threshold: 0.2 * 1.1,
                steepness: 10.0
            }
        );
        let hard = ActivationRule::Hard { threshold: 0.5 }.scaled(0.85);
        assert!(hard.is_active(0.43));
        assert!(!hard.is_active(0.42));
    }
}
