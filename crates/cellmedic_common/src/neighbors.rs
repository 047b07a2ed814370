//! Neighbor mutual exclusion.
//!
//! Neighboring cells share radio environment, so an action on one can mask or
//! disturb the other. Two neighbors never have actions in flight at once.

use std::collections::{BTreeMap, BTreeSet};

/// Symmetric adjacency between resources
#[derive(Debug, Clone, Default)]
pub struct NeighborMap {
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl NeighborMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a (possibly one-sided) neighbor listing
    pub fn from_config(listing: &BTreeMap<String, Vec<String>>) -> Self {
        let mut map = Self::new();
        for (id, neighbors) in listing {
            for n in neighbors {
                map.link(id, n);
            }
        }
        map
    }

    pub fn link(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn neighbors_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(|s| s.as_str()))
    }

    /// First neighbor of `id` that is currently busy, if any
    pub fn blocking_neighbor<'a, F>(&'a self, id: &str, is_busy: F) -> Option<&'a str>
    where
        F: Fn(&str) -> bool,
    {
        self.neighbors_of(id).find(|n| is_busy(n))
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}
