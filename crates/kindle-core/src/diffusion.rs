//! Energy transfer along links, with leak.
//!
//! Transfers are computed from the energies at the start of the phase and
//! applied in two passes (all withdrawals, then all deposits), so the order
//! nodes are visited in never changes the result.
//!
//! For a link `src → tgt` with weight `w`, the raw amount is
//! `E_src · rate · w · Δt · a(E_src)` where `a` is the activation weight. If a
//! source's raw amounts sum past what it holds they are all scaled down by the
//! same factor. The source loses the full raw amount; the target keeps
//! `s · raw` where `s` is its stickiness, and `(1 − s) · raw` is dissipated.
//! Targets marked non-traversable receive nothing.

use serde::{Deserialize, Serialize};

use crate::activation::ActivationRule;
use crate::energy::EnergyChannels;
use crate::frame::Frame;
use crate::graph::NodeId;
use crate::vector::clamp_finite;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: NodeId,
    pub target: NodeId,
    /// Energy that left the source.
    pub raw: f64,
    /// Energy the target kept.
    pub retained: f64,
    /// Energy lost to leak.
    pub dissipated: f64,
    pub weight: f64,
    pub relatedness: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffusionReport {
    pub transfers: Vec<Transfer>,
    pub transferred: f64,
    pub retained: f64,
    pub dissipated: f64,
    /// Links skipped because their target is non-traversable.
    pub skipped_non_traversable: usize,
    /// Sources whose outgoing transfers were scaled to fit their energy.
    pub scaled_sources: usize,
    /// Total over-draw floored to zero. Non-zero only through rounding.
    pub overdraw: f64,
}

struct Staged {
    source: usize,
    target: usize,
    raw: f64,
    weight: f64,
    relatedness: Option<f64>,
}

pub fn diffuse(frame: &mut Frame, rate: f64, dt: f64, rule: &ActivationRule) -> DiffusionReport {
    let mut report = DiffusionReport::default();
    let start = frame.energies();
    let rate = clamp_finite(rate, 0.0, 1.0);
    let dt = clamp_finite(dt, 0.0, f64::MAX);

    let mut staged: Vec<Staged> = Vec::new();
    let mut outflow = vec![0.0; frame.len()];

    for (src, links) in frame.outgoing.iter().enumerate() {
        let e_src = start[src];
        let activation = rule.weight(e_src);
        if e_src <= 0.0 || activation <= 0.0 {
            continue;
        }

        let first = staged.len();
        let mut sum = 0.0;
        for (tgt, link) in links {
            if *tgt == src {
                continue;
            }
            if !frame.nodes[*tgt].traversable {
                report.skipped_non_traversable += 1;
                continue;
            }
            let weight = clamp_finite(link.weight, 0.0, 1.0);
            let raw = clamp_finite(e_src * rate * weight * dt * activation, 0.0, f64::MAX);
            if raw <= 0.0 {
                continue;
            }
            sum += raw;
            staged.push(Staged {
                source: src,
                target: *tgt,
                raw,
                weight,
                relatedness: link.relatedness.map(|r| clamp_finite(r, 0.0, 1.0)),
            });
        }

        if sum > e_src {
            let scale = e_src / sum;
            for t in &mut staged[first..] {
                t.raw *= scale;
            }
            report.scaled_sources += 1;
            sum = e_src;
        }
        outflow[src] = sum;
    }

    // Composition of each source is taken before any energy moves.
    let portions: Vec<Option<EnergyChannels>> = outflow
        .iter()
        .enumerate()
        .map(|(i, &out)| (out > 0.0).then(|| frame.nodes[i].energy.clone()))
        .collect();

    for (i, &out) in outflow.iter().enumerate() {
        if out <= 0.0 {
            continue;
        }
        let over = frame.nodes[i].energy.withdraw(out);
        if over > 0.0 {
            tracing::warn!(
                node = %frame.nodes[i].id,
                overdraw = over,
                "diffusion over-draw floored at zero"
            );
            report.overdraw += over;
        }
    }

    for t in &staged {
        let stickiness = frame.factors[t.target].stickiness;
        let retained = stickiness * t.raw;
        let dissipated = t.raw - retained;
        if let Some(source_energy) = &portions[t.source] {
            let share = source_energy.portion(t.raw);
            frame.nodes[t.target].energy.merge_scaled(&share, stickiness);
        }

        report.transferred += t.raw;
        report.retained += retained;
        report.dissipated += dissipated;
        report.transfers.push(Transfer {
            source: frame.nodes[t.source].id.clone(),
            target: frame.nodes[t.target].id.clone(),
            raw: t.raw,
            retained,
            dissipated,
            weight: t.weight,
            relatedness: t.relatedness,
        });
    }

    tracing::trace!(
        transfers = report.transfers.len(),
        transferred = report.transferred,
        dissipated = report.dissipated,
        "diffusion applied"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::NodeFactors;
    use crate::graph::{Link, Node};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const HARD: ActivationRule = ActivationRule::Hard { threshold: 0.01 };

    fn with_stickiness(frame: &mut Frame, idx: usize, s: f64) {
        frame.factors[idx] = NodeFactors {
            stickiness: s,
            ..NodeFactors::default()
        };
    }

    #[test]
    fn test_single_transfer_with_leak() {
        let nodes = vec![
            Node::new("src", "memory").with_energy(10.0),
            Node::new("tgt", "task"),
        ];
        let mut frame = Frame::new(nodes, vec![Link::new("src", "tgt", 1.0)]);
        with_stickiness(&mut frame, 1, 0.3);

        let report = diffuse(&mut frame, 0.5, 1.0, &HARD);
        assert_eq!(report.transfers.len(), 1);
        assert_relative_eq!(report.transferred, 5.0, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[0].total_energy(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[1].total_energy(), 1.5, epsilon = 1e-12);
        assert_relative_eq!(report.dissipated, 3.5, epsilon = 1e-12);
    }

    #[test]
    fn test_overcommitted_source_is_scaled() {
        let nodes = vec![
            Node::new("src", "memory").with_energy(1.0),
            Node::new("a", "memory"),
            Node::new("b", "memory"),
        ];
        let links = vec![Link::new("src", "a", 1.0), Link::new("src", "b", 0.5)];
        let mut frame = Frame::new(nodes, links);

        // rate·dt = 2 → raw 2.0 and 1.0, scaled to 2/3 and 1/3
        let report = diffuse(&mut frame, 1.0, 2.0, &HARD);
        assert_eq!(report.scaled_sources, 1);
        assert_eq!(frame.nodes[0].total_energy(), 0.0);
        assert_relative_eq!(frame.nodes[1].total_energy(), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[2].total_energy(), 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(report.overdraw, 0.0);
    }

    #[test]
    fn test_non_traversable_target_skipped() {
        let nodes = vec![
            Node::new("src", "memory").with_energy(1.0),
            Node::new("draft", "memory").incomplete(),
            Node::new("ok", "memory"),
        ];
        let links = vec![Link::new("src", "draft", 1.0), Link::new("src", "ok", 1.0)];
        let mut frame = Frame::new(nodes, links);

        let report = diffuse(&mut frame, 0.1, 1.0, &HARD);
        assert_eq!(report.skipped_non_traversable, 1);
        assert_eq!(frame.nodes[1].total_energy(), 0.0);
        assert_relative_eq!(frame.nodes[2].total_energy(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[0].total_energy(), 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_inactive_source_does_not_spread() {
        let nodes = vec![
            Node::new("src", "memory").with_energy(0.005),
            Node::new("tgt", "memory"),
        ];
        let mut frame = Frame::new(nodes, vec![Link::new("src", "tgt", 1.0)]);
        let report = diffuse(&mut frame, 0.5, 1.0, &HARD);
        assert!(report.transfers.is_empty());
        assert_eq!(frame.nodes[0].total_energy(), 0.005);
    }

    #[test]
    fn test_order_independent_from_snapshot() {
        // a → b → c: b's outflow uses its start energy, not what a sends it.
        let nodes = vec![
            Node::new("a", "memory").with_energy(1.0),
            Node::new("b", "memory").with_energy(1.0),
            Node::new("c", "memory"),
        ];
        let links = vec![Link::new("a", "b", 1.0), Link::new("b", "c", 1.0)];
        let mut frame = Frame::new(nodes, links);
        diffuse(&mut frame, 0.5, 1.0, &HARD);
        assert_relative_eq!(frame.nodes[0].total_energy(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[1].total_energy(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[2].total_energy(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_channels_travel_with_energy() {
        let mut src = Node::new("src", "memory");
        src.energy.add(Some("alpha"), 3.0);
        src.energy.add(None, 1.0);
        let nodes = vec![src, Node::new("tgt", "memory")];
        let mut frame = Frame::new(nodes, vec![Link::new("src", "tgt", 1.0)]);
        diffuse(&mut frame, 0.5, 1.0, &HARD);
        assert_relative_eq!(frame.nodes[1].energy.channel("alpha"), 1.5, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[1].energy.pooled(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(frame.nodes[0].energy.channel("alpha"), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_soft_rule_weights_transfer() {
        let rule = ActivationRule::Soft {
            threshold: 1.0,
            steepness: 4.0,
        };
        let nodes = vec![
            Node::new("src", "memory").with_energy(1.0),
            Node::new("tgt", "memory"),
        ];
        let mut frame = Frame::new(nodes, vec![Link::new("src", "tgt", 1.0)]);
        let report = diffuse(&mut frame, 0.5, 1.0, &rule);
        assert_relative_eq!(report.transferred, 0.25, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn prop_conservation_with_leak(
            energy in 0.1f64..100.0,
            stickiness in 0.1f64..=1.0,
            weight in 0.01f64..=1.0,
            rate in 0.0f64..=1.0,
        ) {
            let nodes = vec![
                Node::new("src", "memory").with_energy(energy),
                Node::new("tgt", "memory"),
            ];
            let mut frame = Frame::new(nodes, vec![Link::new("src", "tgt", weight)]);
            with_stickiness(&mut frame, 1, stickiness);
            let report = diffuse(&mut frame, rate, 1.0, &HARD);
            let raw = report.transferred;
            prop_assert!((frame.nodes[0].total_energy() - (energy - raw)).abs() < 1e-9);
            prop_assert!((frame.nodes[1].total_energy() - stickiness * raw).abs() < 1e-9);
            prop_assert!((report.dissipated - (1.0 - stickiness) * raw).abs() < 1e-9);
            prop_assert!(frame.nodes.iter().all(|n| n.total_energy() >= 0.0));
        }
    }
}
