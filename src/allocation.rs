//! Allocation trees
//!
//! An allocation is a hierarchical resource entitlement: a reserved
//! capacity vector, a scheduling rank, required traits and a utilization
//! ceiling, with nested sub-allocations. Any allocation can hold instances
//! directly; the reservation is an entitlement driving queue order, not
//! a hard cap on physical placement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capacity::CapacityVector;
use crate::error::{Error, Result};
use crate::types::{TraitSet, DEFAULT_RANK};

/// A node in the allocation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Reserved capacity (entitlement)
    pub reserved: CapacityVector,
    /// Scheduling rank; lower is served first
    pub rank: i32,
    /// Offset applied to the rank during queue ordering
    pub rank_adjustment: i32,
    /// Traits required from any server hosting this allocation's instances
    pub traits: TraitSet,
    /// Demand-to-reservation ratio beyond which instances are over quota
    /// (`None` = unlimited)
    pub max_utilization: Option<f64>,
    /// Child allocations, iterated in lexicographic name order
    pub sub_allocations: BTreeMap<String, Allocation>,
    /// Names of instances assigned directly to this allocation
    pub instances: Vec<String>,
}

impl Default for Allocation {
    fn default() -> Self {
        Self {
            reserved: CapacityVector::zero(),
            rank: DEFAULT_RANK,
            rank_adjustment: 0,
            traits: TraitSet::new(),
            max_utilization: None,
            sub_allocations: BTreeMap::new(),
            instances: Vec::new(),
        }
    }
}

impl Allocation {
    /// Create an empty allocation with default rank and no reservation
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective rank used for queue ordering
    pub fn effective_rank(&self) -> i32 {
        self.rank + self.rank_adjustment
    }

    /// Update entitlement attributes in place
    pub fn update(
        &mut self,
        reserved: CapacityVector,
        rank: i32,
        rank_adjustment: Option<i32>,
        max_utilization: Option<f64>,
    ) {
        self.reserved = reserved;
        self.rank = rank;
        if let Some(adjustment) = rank_adjustment {
            self.rank_adjustment = adjustment;
        }
        self.max_utilization = max_utilization;
    }

    /// Get or create the named child allocation
    pub fn get_sub_alloc(&mut self, name: &str) -> &mut Allocation {
        self.sub_allocations.entry(name.to_string()).or_default()
    }

    /// Resolve a path to an existing allocation
    pub fn find(&self, path: &[String]) -> Option<&Allocation> {
        let mut alloc = self;
        for segment in path {
            alloc = alloc.sub_allocations.get(segment)?;
        }
        Some(alloc)
    }

    /// Resolve a path, creating intermediate allocations as needed.
    /// An empty path segment is a configuration error.
    pub fn find_or_create(&mut self, path: &[String]) -> Result<&mut Allocation> {
        let mut alloc = self;
        for segment in path {
            if segment.is_empty() {
                return Err(Error::config(format!(
                    "empty segment in allocation path {path:?}"
                )));
            }
            alloc = alloc.get_sub_alloc(segment);
        }
        Ok(alloc)
    }

    /// Assign an instance name to this allocation
    pub fn assign(&mut self, instance: impl Into<String>) {
        let instance = instance.into();
        if !self.instances.contains(&instance) {
            self.instances.push(instance);
        }
    }

    /// Remove an instance name; true iff it was assigned here
    pub fn unassign(&mut self, instance: &str) -> bool {
        if let Some(idx) = self.instances.iter().position(|name| name == instance) {
            self.instances.remove(idx);
            true
        } else {
            false
        }
    }

    /// Remove an instance name anywhere in the subtree
    pub fn unassign_recursive(&mut self, instance: &str) -> bool {
        if self.unassign(instance) {
            return true;
        }
        self.sub_allocations
            .values_mut()
            .any(|sub| sub.unassign_recursive(instance))
    }

    /// Preorder traversal yielding every allocation as `(path, allocation)`,
    /// starting with this one at path `""`, segments joined with `/`.
    /// Children are visited in lexicographic name order, so the result is
    /// deterministic. Every allocation can hold instances directly, so
    /// interior nodes are yielded too.
    pub fn iterate(&self) -> Vec<(String, &Allocation)> {
        let mut out = Vec::new();
        self.collect(&mut Vec::new(), &mut out);
        out
    }

    fn collect<'a>(&'a self, path: &mut Vec<&'a str>, out: &mut Vec<(String, &'a Allocation)>) {
        out.push((path.join("/"), self));
        for (name, sub) in &self.sub_allocations {
            path.push(name);
            sub.collect(path, out);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Allocation {
        let mut root = Allocation::new();
        root.get_sub_alloc("tenants").get_sub_alloc("web");
        root.get_sub_alloc("tenants").get_sub_alloc("batch");
        root.get_sub_alloc("adhoc");
        root
    }

    #[test]
    fn test_iterate_order() {
        let root = sample_tree();
        let paths: Vec<_> = root.iterate().into_iter().map(|(path, _)| path).collect();
        // Preorder, lexicographic by child name at every level.
        assert_eq!(
            paths,
            vec!["", "adhoc", "tenants", "tenants/batch", "tenants/web"]
        );
    }

    #[test]
    fn test_iterate_bare_root() {
        let root = Allocation::new();
        let all = root.iterate();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "");
    }

    #[test]
    fn test_find_or_create_rejects_empty_segment() {
        let mut root = Allocation::new();
        let path = vec!["tenants".to_string(), String::new()];
        assert!(root.find_or_create(&path).is_err());
        // Prior state retained: the valid prefix may exist, but no
        // half-created leaf.
        assert!(root.find(&path).is_none());
    }

    #[test]
    fn test_assign_unassign() {
        let mut root = sample_tree();
        root.find_or_create(&["tenants".into(), "web".into()])
            .unwrap()
            .assign("proid.web#1");

        assert!(root.unassign_recursive("proid.web#1"));
        assert!(!root.unassign_recursive("proid.web#1"));
    }

    #[test]
    fn test_effective_rank() {
        let mut alloc = Allocation::new();
        alloc.update(CapacityVector::zero(), 50, Some(-10), None);
        assert_eq!(alloc.effective_rank(), 40);
    }
}
