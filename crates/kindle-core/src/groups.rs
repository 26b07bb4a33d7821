//! Variant groups: clusters of nodes that activate together.
//!
//! Groups are discovered from behavior, not names. Each tick the tracker
//! records node energies into a short ring per node; on refresh it links
//! every pair whose energy histories correlate (Pearson) at or above the
//! threshold and takes connected components as groups. New groups inherit
//! the tag of the previous group they overlap most, so tags are stable
//! while membership drifts.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::GroupConfig;
use crate::constants::EPSILON;
use crate::graph::NodeId;
use crate::vector::jaccard;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantGroup {
    pub tag: String,
    pub members: BTreeSet<NodeId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub groups: usize,
    /// Tags that appeared this refresh.
    pub formed: Vec<String>,
    /// Tags that disappeared this refresh.
    pub dissolved: Vec<String>,
    pub grouped_nodes: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupTracker {
    history: BTreeMap<NodeId, VecDeque<f64>>,
    groups: Vec<VariantGroup>,
    membership: HashMap<NodeId, usize>,
    next_tag: u64,
}

/// Pearson correlation of two equal-length series, `None` if either is flat.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a < EPSILON || var_b < EPSILON {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    r.is_finite().then_some(r)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

impl GroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[VariantGroup] {
        &self.groups
    }

    pub fn group_of(&self, id: &str) -> Option<&str> {
        self.membership
            .get(id)
            .map(|&i| self.groups[i].tag.as_str())
    }

    /// Append one sample per node. Nodes absent from `energies` are dropped
    /// from the history.
    pub fn record<'a>(&mut self, energies: impl IntoIterator<Item = (&'a NodeId, f64)>, window: usize) {
        let mut seen = BTreeSet::new();
        for (id, e) in energies {
            let ring = self.history.entry(id.clone()).or_default();
            if ring.len() == window.max(1) {
                ring.pop_front();
            }
            ring.push_back(if e.is_finite() { e } else { 0.0 });
            seen.insert(id.clone());
        }
        self.history.retain(|id, _| seen.contains(id));
    }

    pub fn refresh(&mut self, cfg: &GroupConfig) -> GroupReport {
        let mut candidates: Vec<(&NodeId, Vec<f64>, f64)> = self
            .history
            .iter()
            .filter(|(_, ring)| ring.len() >= cfg.min_samples)
            .map(|(id, ring)| {
                let series: Vec<f64> = ring.iter().copied().collect();
                let mean = series.iter().sum::<f64>() / series.len() as f64;
                (id, series, mean)
            })
            .filter(|(_, _, mean)| *mean > 0.0)
            .collect();
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(b.0)));
        candidates.truncate(cfg.max_tracked);

        let n = candidates.len();
        let mut parent: Vec<usize> = (0..n).collect();
        for i in 0..n {
            for j in (i + 1)..n {
                if pearson(&candidates[i].1, &candidates[j].1).is_some_and(|r| r >= cfg.correlation) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[rj] = ri;
                    }
                }
            }
        }

        let mut clusters: BTreeMap<usize, BTreeSet<NodeId>> = BTreeMap::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            clusters.entry(root).or_default().insert(candidates[i].0.clone());
        }
        let mut clusters: Vec<BTreeSet<NodeId>> = clusters
            .into_values()
            .filter(|c| c.len() >= cfg.min_size)
            .collect();
        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let previous = std::mem::take(&mut self.groups);
        let mut claimed = vec![false; previous.len()];
        let mut report = GroupReport::default();

        for members in clusters {
            let best = previous
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, g)| (i, jaccard(&g.members, &members)))
                .filter(|(_, overlap)| *overlap >= cfg.match_overlap)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let tag = match best {
                Some((i, _)) => {
                    claimed[i] = true;
                    previous[i].tag.clone()
                }
                None => {
                    self.next_tag += 1;
                    let tag = format!("group-{}", self.next_tag);
                    report.formed.push(tag.clone());
                    tag
                }
            };
            self.groups.push(VariantGroup { tag, members });
        }

        report.dissolved = previous
            .iter()
            .zip(&claimed)
            .filter(|(_, c)| !**c)
            .map(|(g, _)| g.tag.clone())
            .collect();

        self.membership = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(i, g)| g.members.iter().map(move |m| (m.clone(), i)))
            .collect();
        report.groups = self.groups.len();
        report.grouped_nodes = self.membership.len();

        if !report.formed.is_empty() || !report.dissolved.is_empty() {
            tracing::debug!(
                groups = report.groups,
                formed = report.formed.len(),
                dissolved = report.dissolved.len(),
                "variant groups changed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GroupConfig {
        GroupConfig {
            enabled: true,
            ..GroupConfig::default()
        }
    }

    fn feed(tracker: &mut GroupTracker, ticks: usize) {
        let ids: Vec<NodeId> = ["a1", "a2", "b1", "b2", "flat"].iter().map(|s| s.to_string()).collect();
        for t in 0..ticks {
            let phase = (t % 4) as f64;
            let anti = 3.0 - phase;
            let samples = [phase + 1.0, 2.0 * phase + 1.0, anti + 1.0, 0.5 * anti + 1.0, 1.0];
            tracker.record(ids.iter().zip(samples), 20);
        }
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0], &[1.0]).is_none());
    }

    #[test]
    fn test_discovers_correlated_groups() {
        let mut tracker = GroupTracker::new();
        feed(&mut tracker, 8);
        let report = tracker.refresh(&cfg());
        assert_eq!(report.groups, 2);
        assert_eq!(report.formed.len(), 2);
        assert_eq!(tracker.group_of("a1"), tracker.group_of("a2"));
        assert_eq!(tracker.group_of("b1"), tracker.group_of("b2"));
        assert_ne!(tracker.group_of("a1"), tracker.group_of("b1"));
        assert_eq!(tracker.group_of("flat"), None);
    }

    #[test]
    fn test_tags_are_stable_across_refreshes() {
        let mut tracker = GroupTracker::new();
        feed(&mut tracker, 8);
        tracker.refresh(&cfg());
        let tag = tracker.group_of("a1").map(str::to_string);
        feed(&mut tracker, 4);
        let report = tracker.refresh(&cfg());
        assert!(report.formed.is_empty());
        assert!(report.dissolved.is_empty());
        assert_eq!(tracker.group_of("a1").map(str::to_string), tag);
    }

    #[test]
    fn test_needs_min_samples() {
        let mut tracker = GroupTracker::new();
        feed(&mut tracker, 3);
        assert_eq!(tracker.refresh(&cfg()).groups, 0);
    }

    #[test]
    fn test_removed_nodes_leave_history() {
        let mut tracker = GroupTracker::new();
        feed(&mut tracker, 8);
        let only: Vec<NodeId> = vec!["a1".into()];
        tracker.record(only.iter().map(|id| (id, 1.0)), 20);
        let report = tracker.refresh(&cfg());
        assert_eq!(report.groups, 0);
        assert_eq!(report.dissolved.len(), 2);
    }
}
