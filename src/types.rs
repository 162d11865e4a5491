//! Core types shared across the scheduler
//!
//! ## Table of Contents
//! - **TraitSet**: capability tags offered by nodes and required by
//!   instances/allocations
//! - **NodeState**: lifecycle state of a topology node
//! - **Affinity**: co-location limits for related instances

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default scheduling rank for allocations (lower is served first)
pub const DEFAULT_RANK: i32 = 100;

/// Topology level name used for leaf servers
pub const SERVER_LEVEL: &str = "server";

/// Set of capability tags a node offers or an instance requires
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitSet(BTreeSet<String>);

impl TraitSet {
    /// Create an empty trait set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a trait
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into());
        self
    }

    /// True iff this set offers every trait in `required`
    pub fn has(&self, required: &TraitSet) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: &TraitSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Iterate trait names in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TraitSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}

/// Lifecycle state of a topology node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Node is healthy and accepts placements
    Up,
    /// Node is unavailable; resident instances are evicted on the next pass
    Down,
    /// Node keeps resident instances but accepts no new placements
    Frozen,
}

impl NodeState {
    /// True iff new placements are allowed
    pub fn schedulable(&self) -> bool {
        matches!(self, NodeState::Up)
    }

    /// True iff resident instances stay placed; only down servers displace
    pub fn retains_placements(&self) -> bool {
        !matches!(self, NodeState::Down)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Up => write!(f, "up"),
            NodeState::Down => write!(f, "down"),
            NodeState::Frozen => write!(f, "frozen"),
        }
    }
}

/// Co-location limits for a group of related instances.
///
/// The limit map is keyed by topology level (`"server"`, `"rack"`, ...):
/// at most `limit` instances of the same group may be resident in the
/// subtree of any node at that level. Levels without an entry are
/// unconstrained. The default limits a group to one instance per server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affinity {
    /// Affinity group name
    pub name: String,
    /// Per-level co-location ceilings
    pub limits: BTreeMap<String, u32>,
}

impl Affinity {
    /// Create an affinity group with the default one-per-server limit
    pub fn new(name: impl Into<String>) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(SERVER_LEVEL.to_string(), 1);
        Self {
            name: name.into(),
            limits,
        }
    }

    /// Set the ceiling for a topology level
    pub fn with_limit(mut self, level: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(level.into(), limit);
        self
    }

    /// Ceiling at the given level, if constrained
    pub fn limit_at(&self, level: &str) -> Option<u32> {
        self.limits.get(level).copied()
    }
}
