//! Per-node energy split across sub-entity channels.
//!
//! A node holds a small fixed number of attributed channels plus one
//! unattributed pool. Energy arriving for a channel that does not fit is
//! pooled rather than growing the node, so memory per node stays bounded.
//! Every operation keeps each partition non-negative.

use serde::{Deserialize, Serialize};

use crate::constants::{CHANNEL_CAPACITY, EPSILON};

/// Identifier of a sub-entity channel.
pub type ChannelKey = String;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSlot {
    pub key: ChannelKey,
    pub energy: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyChannels {
    pooled: f64,
    slots: [Option<ChannelSlot>; CHANNEL_CAPACITY],
}

impl EnergyChannels {
    /// All energy unattributed.
    pub fn new(total: f64) -> Self {
        Self {
            pooled: sanitize(total),
            slots: Default::default(),
        }
    }

    pub fn total(&self) -> f64 {
        self.pooled + self.slots.iter().flatten().map(|s| s.energy).sum::<f64>()
    }

    pub fn pooled(&self) -> f64 {
        self.pooled
    }

    pub fn is_zero(&self) -> bool {
        self.total() <= 0.0
    }

    /// Energy held by one channel (0 if the channel has no slot).
    pub fn channel(&self, key: &str) -> f64 {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.key == key)
            .map_or(0.0, |s| s.energy)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, f64)> {
        self.slots
            .iter()
            .flatten()
            .map(|s| (s.key.as_str(), s.energy))
    }

    /// Add energy to a channel, or to the pool when `channel` is `None`
    /// or every slot is taken by other channels.
    pub fn add(&mut self, channel: Option<&str>, amount: f64) {
        let amount = sanitize(amount);
        if amount <= 0.0 {
            return;
        }
        let Some(key) = channel else {
            self.pooled += amount;
            return;
        };
        if let Some(slot) = self.slots.iter_mut().flatten().find(|s| s.key == key) {
            slot.energy += amount;
            return;
        }
        if let Some(empty) = self.slots.iter_mut().find(|s| s.is_none()) {
            *empty = Some(ChannelSlot {
                key: key.to_string(),
                energy: amount,
            });
            return;
        }
        self.pooled += amount;
    }

    /// Multiply every partition by `factor` (clamped to be non-negative).
    pub fn scale(&mut self, factor: f64) {
        let factor = sanitize(factor);
        self.pooled *= factor;
        for slot in self.slots.iter_mut().flatten() {
            slot.energy *= factor;
        }
    }

    /// A copy with the same channel proportions whose total is `amount`.
    pub fn portion(&self, amount: f64) -> EnergyChannels {
        let total = self.total();
        if total <= EPSILON {
            return EnergyChannels::new(amount);
        }
        let mut out = self.clone();
        out.scale(sanitize(amount) / total);
        out
    }

    /// Remove `amount` proportionally from every partition. Returns the
    /// over-draw, i.e. how much was requested beyond what was held.
    pub fn withdraw(&mut self, amount: f64) -> f64 {
        let amount = sanitize(amount);
        let total = self.total();
        if amount >= total {
            self.clear();
            return amount - total;
        }
        self.scale(1.0 - amount / total);
        0.0
    }

    /// Add `other` scaled by `factor`, channel by channel.
    pub fn merge_scaled(&mut self, other: &EnergyChannels, factor: f64) {
        let factor = sanitize(factor);
        self.add(None, other.pooled * factor);
        for slot in other.slots.iter().flatten() {
            self.add(Some(&slot.key), slot.energy * factor);
        }
    }

    /// Zero everything if the total is below `floor`, and free slots whose
    /// channel has run dry. Returns true when the node was snapped to zero.
    pub fn cleanup(&mut self, floor: f64) -> bool {
        let total = self.total();
        if total > 0.0 && total < floor {
            self.clear();
            return true;
        }
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.energy <= EPSILON)
                && let Some(s) = slot.take()
            {
                self.pooled += s.energy.max(0.0);
            }
        }
        false
    }

    pub fn clear(&mut self) {
        self.pooled = 0.0;
        self.slots = Default::default();
    }
}

fn sanitize(x: f64) -> f64 {
    if x.is_finite() { x.max(0.0) } else { 0.0 }
}
