//! Schedulable instances and identity groups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capacity::CapacityVector;
use crate::types::Affinity;

/// A schedulable application instance.
///
/// Instances are created pending, hold exactly one server once placed, and
/// return to pending when evicted. The submission `order` is assigned once
/// by the cell and never reset, so fairness ordering survives eviction and
/// re-placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name, e.g. `proid.app#0000000001`
    pub name: String,
    /// Resource demand vector
    pub demand: CapacityVector,
    /// Required traits
    pub traits: crate::types::TraitSet,
    /// Co-location group and limits
    pub affinity: Affinity,
    /// Identity group, if the instance claims an identity slot
    pub identity_group: Option<String>,
    /// Claimed identity slot, set while placed
    pub identity: Option<u32>,
    /// Path of the allocation this instance is assigned to
    pub allocation: AllocationAssignment,
    /// Lease duration in seconds (0 = unlimited)
    pub lease: u64,
    /// Monotonic submission sequence number, assigned by the cell
    pub order: u64,
    /// Current server, unset while pending
    pub server: Option<String>,
    /// Placement expiry, set at placement from the lease
    pub placement_expiry: Option<DateTime<Utc>>,
    /// Seconds the node retains instance data after the instance stops
    pub data_retention_timeout: Option<u64>,
    /// Do not re-place after eviction; the pass withdraws the instance
    pub schedule_once: bool,
    /// Set when the instance lost its server; cleared on re-placement
    pub evicted: bool,
}

/// Identifies the allocation an instance belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationAssignment {
    /// Partition label
    pub partition: String,
    /// Allocation path from the partition root, e.g. `["tenants", "web"]`
    pub path: Vec<String>,
}

impl AllocationAssignment {
    /// Create an assignment from a partition and path segments
    pub fn new<S: Into<String>>(
        partition: impl Into<String>,
        path: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            partition: partition.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Render the path as `a/b/c` (`root` for the partition root)
    pub fn path_str(&self) -> String {
        if self.path.is_empty() {
            "root".to_string()
        } else {
            self.path.join("/")
        }
    }
}

impl Instance {
    /// Create a new pending instance.
    ///
    /// The affinity group defaults to the name up to the `#` instance-id
    /// separator, limiting replicas of the same app to one per server.
    pub fn new(name: impl Into<String>, demand: CapacityVector) -> Self {
        let name = name.into();
        let group = name.split('#').next().unwrap_or(&name).to_string();
        Self {
            name,
            demand,
            traits: crate::types::TraitSet::new(),
            affinity: Affinity::new(group),
            identity_group: None,
            identity: None,
            allocation: AllocationAssignment::default(),
            lease: 0,
            order: 0,
            server: None,
            placement_expiry: None,
            data_retention_timeout: None,
            schedule_once: false,
            evicted: false,
        }
    }

    /// Assign to an allocation in a partition
    pub fn with_allocation(mut self, assignment: AllocationAssignment) -> Self {
        self.allocation = assignment;
        self
    }

    /// Set required traits
    pub fn with_traits(mut self, traits: crate::types::TraitSet) -> Self {
        self.traits = traits;
        self
    }

    /// Override the affinity group
    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Set the lease duration in seconds
    pub fn with_lease(mut self, seconds: u64) -> Self {
        self.lease = seconds;
        self
    }

    /// Join an identity group
    pub fn with_identity_group(mut self, group: impl Into<String>) -> Self {
        self.identity_group = Some(group.into());
        self
    }

    /// Set the data retention timeout in seconds
    pub fn with_data_retention(mut self, seconds: u64) -> Self {
        self.data_retention_timeout = Some(seconds);
        self
    }

    /// Mark as schedule-once
    pub fn with_schedule_once(mut self, once: bool) -> Self {
        self.schedule_once = once;
        self
    }

    /// True iff the instance currently holds a server
    pub fn is_placed(&self) -> bool {
        self.server.is_some()
    }

    /// True iff the placement lease has expired at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.placement_expiry {
            Some(expiry) => self.lease > 0 && now > expiry,
            None => false,
        }
    }
}

/// A named pool of mutually exclusive identity slots `0..count`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityGroup {
    /// Group name
    pub name: String,
    /// Number of slots
    pub count: u32,
    used: std::collections::BTreeSet<u32>,
}

impl IdentityGroup {
    /// Create a group with `count` slots
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
            used: std::collections::BTreeSet::new(),
        }
    }

    /// Claim the lowest free slot, if any
    pub fn claim(&mut self) -> Option<u32> {
        let slot = (0..self.count).find(|slot| !self.used.contains(slot))?;
        self.used.insert(slot);
        Some(slot)
    }

    /// Release a slot. Releasing a free slot is a no-op.
    pub fn release(&mut self, slot: u32) {
        self.used.remove(&slot);
    }

    /// Shrink or grow the slot count. Slots at or above the new count stay
    /// claimed until released but can not be claimed again.
    pub fn resize(&mut self, count: u32) {
        self.count = count;
    }

    /// Number of free slots
    pub fn available(&self) -> u32 {
        (0..self.count).filter(|slot| !self.used.contains(slot)).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_affinity_from_name() {
        let instance = Instance::new("proid.web#0000000001", CapacityVector::new(10, 10, 10));
        assert_eq!(instance.affinity.name, "proid.web");
    }

    #[test]
    fn test_identity_group_lowest_slot() {
        let mut group = IdentityGroup::new("proid.db", 3);
        assert_eq!(group.claim(), Some(0));
        assert_eq!(group.claim(), Some(1));

        group.release(0);
        assert_eq!(group.claim(), Some(0));
        assert_eq!(group.claim(), Some(2));
        assert_eq!(group.claim(), None);
    }

    #[test]
    fn test_identity_group_resize() {
        let mut group = IdentityGroup::new("proid.db", 2);
        assert_eq!(group.claim(), Some(0));
        assert_eq!(group.claim(), Some(1));

        group.resize(1);
        assert_eq!(group.claim(), None);
        group.release(1);
        assert_eq!(group.available(), 0);
        group.release(0);
        assert_eq!(group.claim(), Some(0));
    }

    #[test]
    fn test_lease_expiry() {
        let mut instance = Instance::new("a.b#1", CapacityVector::new(1, 1, 1)).with_lease(60);
        let now = Utc::now();
        instance.placement_expiry = Some(now - chrono::Duration::seconds(1));
        assert!(instance.lease_expired(now));

        instance.lease = 0;
        assert!(!instance.lease_expired(now));
    }
}
