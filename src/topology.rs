//! ═══════════════════════════════════════════════════════════════════════════════
//! TOPOLOGY — Rack/Slot Adjacency
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Units are laid out as `racks × slots_per_rack`:
//!
//! ```text
//!   rack 0   rack 1   rack 2   rack 3
//!   [ 5 ]    [11 ]    [17 ]    [23 ]
//!   [ 4 ] ── [10 ] ── [16 ] ── [22 ]
//!   [ 3 ]    [ 9 ]    [15 ]    [21 ]
//!   [ 2 ]    [ 8 ]    [14 ]    [20 ]
//!   [ 1 ]    [ 7 ]    [13 ]    [19 ]
//!   [ 0 ]    [ 6 ]    [12 ]    [18 ]
//! ```
//!
//! Neighbors: the slot above and below in the same rack, and the same slot in
//! the racks to the left and right. Adjacency is symmetric by construction.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};

use crate::config::TopologyConfig;

/// Static grid adjacency. Two numbers determine everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridTopology {
    racks: usize,
    slots_per_rack: usize,
}

impl GridTopology {
    pub fn new(racks: usize, slots_per_rack: usize) -> Self {
        Self {
            racks,
            slots_per_rack,
        }
    }

    pub fn from_config(config: &TopologyConfig) -> Self {
        Self::new(config.racks, config.slots_per_rack)
    }

    pub fn racks(&self) -> usize {
        self.racks
    }

    pub fn slots_per_rack(&self) -> usize {
        self.slots_per_rack
    }

    /// Total units (racks × slots)
    pub fn unit_count(&self) -> usize {
        self.racks * self.slots_per_rack
    }

    pub fn contains(&self, id: usize) -> bool {
        id < self.unit_count()
    }

    pub fn rack_of(&self, id: usize) -> usize {
        id / self.slots_per_rack
    }

    pub fn slot_of(&self, id: usize) -> usize {
        id % self.slots_per_rack
    }

    /// Neighbor ids in ascending order. Empty for ids outside the grid.
    pub fn neighbors(&self, id: usize) -> Vec<usize> {
        if !self.contains(id) {
            return Vec::new();
        }
        let rack = self.rack_of(id);
        let slot = self.slot_of(id);
        let s = self.slots_per_rack;

        let mut out = Vec::with_capacity(4);
        if rack > 0 {
            out.push(id - s);
        }
        if slot > 0 {
            out.push(id - 1);
        }
        if slot + 1 < s {
            out.push(id + 1);
        }
        if rack + 1 < self.racks {
            out.push(id + s);
        }
        out
    }

    /// Layout signature recorded alongside histories
    pub fn signature(&self) -> String {
        format!("{}x{}", self.racks, self.slots_per_rack)
    }
}

impl Default for GridTopology {
    fn default() -> Self {
        Self::from_config(&TopologyConfig::default())
    }
}
