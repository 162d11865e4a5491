//! Cell state and the scheduling pass
//!
//! A [`Cell`] owns the topology tree, the per-partition allocation trees,
//! the instance table and the identity groups, and drives the scheduling
//! pass: maintenance (lease and server health evictions), queue build,
//! then greedy first-fit placement in queue order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocation::Allocation;
use crate::capacity::CapacityVector;
use crate::error::{Error, Result};
use crate::instance::{IdentityGroup, Instance};
use crate::placement::{find_placement, TraversalStrategy};
use crate::queue::{QueueEntry, UtilizationQueue};
use crate::topology::Topology;
use crate::types::{NodeState, TraitSet};

/// Default partition label for servers and instances that name none
pub const DEFAULT_PARTITION: &str = "_default";

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassResult {
    /// Instances placed or confirmed on a server by this pass
    pub placed: Vec<String>,
    /// Instances left waiting, including those beyond their allocation's
    /// utilization ceiling
    pub pending: Vec<String>,
    /// Instances evicted by this pass
    pub evicted: Vec<String>,
}

impl PassResult {
    fn merge(&mut self, other: PassResult) {
        self.placed.extend(other.placed);
        self.pending.extend(other.pending);
        self.evicted.extend(other.evicted);
    }
}

/// The complete scheduling state of one cell
#[derive(Debug, Clone)]
pub struct Cell {
    name: String,
    topology: Topology,
    partitions: BTreeMap<String, Allocation>,
    instances: BTreeMap<String, Instance>,
    identity_groups: BTreeMap<String, IdentityGroup>,
    placement_strategy: TraversalStrategy,
    next_order: u64,
}

impl Cell {
    /// Create an empty cell
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            topology: Topology::new(name.clone()),
            name,
            partitions: BTreeMap::new(),
            instances: BTreeMap::new(),
            identity_groups: BTreeMap::new(),
            placement_strategy: TraversalStrategy::default(),
            next_order: 0,
        }
    }

    /// Traversal strategy used by the scheduling pass
    pub fn placement_strategy(&self) -> TraversalStrategy {
        self.placement_strategy
    }

    /// Select the traversal strategy for subsequent passes
    pub fn set_placement_strategy(&mut self, strategy: TraversalStrategy) {
        self.placement_strategy = strategy;
    }

    /// Cell name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read access to the topology tree
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The instance table
    pub fn instances(&self) -> &BTreeMap<String, Instance> {
        &self.instances
    }

    /// Look up one instance
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// Partition labels with a configured allocation tree
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    /// Root allocation of a partition, if configured
    pub fn partition(&self, label: &str) -> Option<&Allocation> {
        self.partitions.get(label)
    }

    // ---- topology ingest ----------------------------------------------

    /// Add an aggregation bucket (root parent when `None`)
    pub fn add_bucket(
        &mut self,
        name: impl Into<String>,
        parent: Option<&str>,
        level: impl Into<String>,
    ) -> Result<()> {
        self.topology
            .add_bucket(name, parent, level, TraitSet::new())?;
        Ok(())
    }

    /// Add a server under an existing bucket
    pub fn add_server(
        &mut self,
        name: impl Into<String>,
        parent: &str,
        capacity: CapacityVector,
        label: impl Into<String>,
        traits: TraitSet,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.topology
            .add_server(name, parent, capacity, label, traits, valid_until)?;
        Ok(())
    }

    /// Change a server's lifecycle state. Down servers keep their
    /// placements until the next pass evicts them.
    pub fn set_server_state(&mut self, name: &str, state: NodeState) {
        self.topology.set_server_state(name, state);
    }

    /// Remove a server. Resident instances go back to pending and their
    /// identities are released immediately.
    pub fn remove_server(&mut self, name: &str) {
        let residents = self.topology.remove_server(name);
        for resident in residents {
            if let Some(app) = self.instances.get_mut(&resident) {
                app.server = None;
                app.placement_expiry = None;
                app.evicted = true;
                release_identity(&mut self.identity_groups, app);
                info!(instance = %resident, server = %name, "displaced by server removal");
            }
        }
    }

    // ---- allocation and identity ingest --------------------------------

    /// Create or update the allocation at `path` in the partition's tree.
    /// Intermediate allocations are created with defaults; an empty path
    /// addresses the partition root.
    #[allow(clippy::too_many_arguments)]
    pub fn configure_allocation(
        &mut self,
        label: impl Into<String>,
        path: &[String],
        reserved: CapacityVector,
        rank: i32,
        rank_adjustment: Option<i32>,
        traits: TraitSet,
        max_utilization: Option<f64>,
    ) -> Result<()> {
        let label = label.into();
        let root = self.partitions.entry(label).or_default();
        let alloc = root.find_or_create(path)?;
        alloc.update(reserved, rank, rank_adjustment, max_utilization);
        alloc.traits = traits;
        Ok(())
    }

    /// Create or resize an identity group
    pub fn configure_identity_group(&mut self, name: impl Into<String>, count: u32) {
        let name = name.into();
        self.identity_groups
            .entry(name.clone())
            .and_modify(|group| group.resize(count))
            .or_insert_with(|| IdentityGroup::new(name, count));
    }

    /// Drop an identity group. Instances holding one of its identities
    /// keep running; the slots simply stop being tracked.
    pub fn remove_identity_group(&mut self, name: &str) {
        self.identity_groups.remove(name);
    }

    /// Identity group by name
    pub fn identity_group(&self, name: &str) -> Option<&IdentityGroup> {
        self.identity_groups.get(name)
    }

    // ---- instance lifecycle --------------------------------------------

    /// Accept an instance into the cell: assign its submission order,
    /// fold its allocation's required traits into its own, and register
    /// it with the allocation tree.
    pub fn submit_instance(&mut self, mut app: Instance) -> Result<()> {
        if self.instances.contains_key(&app.name) {
            return Err(Error::invalid_state(format!(
                "instance already exists: {}",
                app.name
            )));
        }

        let root = self
            .partitions
            .entry(app.allocation.partition.clone())
            .or_default();
        let alloc = root.find_or_create(&app.allocation.path)?;
        alloc.assign(app.name.clone());
        app.traits.extend(&alloc.traits);

        app.order = self.next_order;
        self.next_order += 1;
        debug!(instance = %app.name, order = app.order, "submitted");
        self.instances.insert(app.name.clone(), app);
        Ok(())
    }

    /// Remove an instance entirely, releasing its placement and identity.
    /// Withdrawing an unknown instance is a logged no-op.
    pub fn withdraw_instance(&mut self, name: &str) -> Result<()> {
        let Some(mut app) = self.instances.remove(name) else {
            warn!(instance = %name, "withdrawal of unknown instance");
            return Ok(());
        };
        if app.is_placed() {
            self.topology.evict(&mut app)?;
        }
        release_identity(&mut self.identity_groups, &mut app);
        if let Some(root) = self.partitions.get_mut(&app.allocation.partition) {
            root.unassign_recursive(name);
        }
        debug!(instance = %name, "withdrawn");
        Ok(())
    }

    // ---- scheduling ----------------------------------------------------

    /// Run one scheduling pass over every partition
    pub fn schedule(&mut self) -> Result<PassResult> {
        self.schedule_at(Utc::now())
    }

    /// Run one scheduling pass with an explicit clock
    pub fn schedule_at(&mut self, now: DateTime<Utc>) -> Result<PassResult> {
        let labels: Vec<String> = self.partitions.keys().cloned().collect();
        let mut result = PassResult::default();
        for label in labels {
            result.merge(self.schedule_partition_at(&label, now)?);
        }
        info!(
            cell = %self.name,
            placed = result.placed.len(),
            pending = result.pending.len(),
            evicted = result.evicted.len(),
            "scheduling pass complete"
        );
        Ok(result)
    }

    /// Run one scheduling pass over a single partition
    pub fn schedule_partition_at(
        &mut self,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<PassResult> {
        let mut result = PassResult::default();
        let entries = self.partition_queue(label, now, &mut result)?;

        for entry in entries {
            let Some(app) = self.instances.get(&entry.instance) else {
                warn!(instance = %entry.instance, "queue entry for unknown instance");
                continue;
            };
            let name = app.name.clone();

            // Beyond the allocation's utilization ceiling: never placed,
            // and displaced if currently running.
            if entry.pending {
                if app.is_placed() {
                    self.evict_instance(&name)?;
                    result.evicted.push(name.clone());
                }
                result.pending.push(name);
                continue;
            }

            if self.instances[&name].is_placed() {
                result.placed.push(name);
                continue;
            }

            // A run-once instance that lost its placement is finished:
            // withdraw it instead of re-queueing.
            if self.instances[&name].schedule_once && self.instances[&name].evicted {
                info!(instance = %name, "schedule-once instance done, withdrawing");
                self.withdraw_instance(&name)?;
                continue;
            }

            if !self.claim_identity(&name) {
                debug!(instance = %name, "no identity available");
                result.pending.push(name);
                continue;
            }

            let found = find_placement(
                &self.topology,
                self.placement_strategy,
                &self.instances[&name],
                now,
            );
            let app = self
                .instances
                .get_mut(&name)
                .ok_or_else(|| Error::internal(format!("instance vanished mid-pass: {name}")))?;
            match found {
                Some(server) => {
                    self.topology.place(app, &server, now)?;
                    result.placed.push(name);
                }
                None => {
                    release_identity(&mut self.identity_groups, app);
                    result.pending.push(name);
                }
            }
        }

        Ok(result)
    }

    /// Maintenance plus queue build: evict placements on down servers and
    /// expired leases, then materialize the partition's utilization queue.
    fn partition_queue(
        &mut self,
        label: &str,
        now: DateTime<Utc>,
        result: &mut PassResult,
    ) -> Result<Vec<QueueEntry>> {
        let members: Vec<String> = self
            .instances
            .values()
            .filter(|app| app.allocation.partition == label && app.is_placed())
            .map(|app| app.name.clone())
            .collect();

        for name in members {
            let app = &self.instances[&name];
            let healthy = app
                .server
                .as_deref()
                .and_then(|server| self.topology.node_id(server))
                .and_then(|id| self.topology.node(id).state())
                .map(|state| state.retains_placements())
                .unwrap_or(false);
            if !healthy {
                info!(instance = %name, "evicting: server down or gone");
                self.evict_instance(&name)?;
                result.evicted.push(name);
            } else if app.lease_expired(now) {
                info!(instance = %name, "evicting: lease expired");
                self.evict_instance(&name)?;
                result.evicted.push(name);
            }
        }

        let root = self
            .partitions
            .get(label)
            .ok_or_else(|| Error::config(format!("unknown partition: {label}")))?;
        let size = self.topology.size(label);
        Ok(UtilizationQueue::new(root, size, &self.instances).collect())
    }

    /// Evict one instance, releasing capacity and identity
    pub fn evict_instance(&mut self, name: &str) -> Result<()> {
        let app = self
            .instances
            .get_mut(name)
            .ok_or_else(|| Error::invalid_state(format!("unknown instance: {name}")))?;
        self.topology.evict(app)?;
        release_identity(&mut self.identity_groups, app);
        Ok(())
    }

    /// Ensure the instance holds an identity if it requires one. True when
    /// no identity is needed or a slot was secured.
    fn claim_identity(&mut self, name: &str) -> bool {
        let Some(app) = self.instances.get_mut(name) else {
            return false;
        };
        let Some(group_name) = app.identity_group.clone() else {
            return true;
        };
        if app.identity.is_some() {
            return true;
        }
        match self.identity_groups.get_mut(&group_name) {
            Some(group) => match group.claim() {
                Some(slot) => {
                    app.identity = Some(slot);
                    true
                }
                None => false,
            },
            // Unconfigured group: nothing to claim against yet.
            None => false,
        }
    }
}

fn release_identity(groups: &mut BTreeMap<String, IdentityGroup>, app: &mut Instance) {
    if let (Some(group_name), Some(slot)) = (app.identity_group.clone(), app.identity.take()) {
        if let Some(group) = groups.get_mut(&group_name) {
            group.release(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::AllocationAssignment;
    use chrono::Duration;

    fn default_assignment() -> AllocationAssignment {
        AllocationAssignment::new(DEFAULT_PARTITION, Vec::<String>::new())
    }

    fn one_server_cell(capacity: CapacityVector) -> Cell {
        let mut cell = Cell::new("test");
        cell.add_server("srv1", "test", capacity, DEFAULT_PARTITION, TraitSet::new(), None)
            .unwrap();
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &[],
            CapacityVector::new(100, 100, 100),
            0,
            None,
            TraitSet::new(),
            None,
        )
        .unwrap();
        cell
    }

    #[test]
    fn test_pass_places_in_submission_order() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();
        cell.submit_instance(
            Instance::new("b#1", CapacityVector::new(20, 20, 20))
                .with_allocation(default_assignment()),
        )
        .unwrap();

        let result = cell.schedule_at(Utc::now()).unwrap();
        assert_eq!(result.placed, vec!["a#1".to_string(), "b#1".to_string()]);
        assert!(result.pending.is_empty());

        let srv1 = cell.topology().node_id("srv1").unwrap();
        assert_eq!(
            cell.topology().node(srv1).free_capacity,
            CapacityVector::new(20, 20, 20)
        );
    }

    #[test]
    fn test_oversized_demand_stays_pending() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("big#1", CapacityVector::new(60, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();

        let result = cell.schedule_at(Utc::now()).unwrap();
        assert!(result.placed.is_empty());
        assert_eq!(result.pending, vec!["big#1".to_string()]);
        assert!(!cell.instance("big#1").unwrap().is_placed());
    }

    #[test]
    fn test_pass_is_idempotent() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();

        let now = Utc::now();
        cell.schedule_at(now).unwrap();
        let server = cell.instance("a#1").unwrap().server.clone();
        let again = cell.schedule_at(now).unwrap();
        assert_eq!(again.placed, vec!["a#1".to_string()]);
        assert!(again.evicted.is_empty());
        assert_eq!(cell.instance("a#1").unwrap().server, server);
    }

    #[test]
    fn test_down_server_evicts_and_replaces() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.add_server(
            "srv2",
            "test",
            CapacityVector::new(50, 50, 50),
            DEFAULT_PARTITION,
            TraitSet::new(),
            None,
        )
        .unwrap();
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();

        let now = Utc::now();
        cell.schedule_at(now).unwrap();
        assert_eq!(cell.instance("a#1").unwrap().server.as_deref(), Some("srv1"));

        cell.set_server_state("srv1", NodeState::Down);
        let result = cell.schedule_at(now).unwrap();
        assert_eq!(result.evicted, vec!["a#1".to_string()]);
        assert_eq!(result.placed, vec!["a#1".to_string()]);
        assert_eq!(cell.instance("a#1").unwrap().server.as_deref(), Some("srv2"));
    }

    #[test]
    fn test_frozen_server_keeps_residents() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();
        let now = Utc::now();
        cell.schedule_at(now).unwrap();

        cell.set_server_state("srv1", NodeState::Frozen);
        cell.submit_instance(
            Instance::new("b#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();

        // Frozen retains residents but takes nothing new.
        let result = cell.schedule_at(now).unwrap();
        assert!(result.evicted.is_empty());
        assert_eq!(result.placed, vec!["a#1".to_string()]);
        assert_eq!(result.pending, vec!["b#1".to_string()]);
        assert_eq!(cell.instance("a#1").unwrap().server.as_deref(), Some("srv1"));
    }

    #[test]
    fn test_schedule_once_never_returns() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("once#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment())
                .with_schedule_once(true),
        )
        .unwrap();

        let now = Utc::now();
        cell.schedule_at(now).unwrap();
        assert!(cell.instance("once#1").unwrap().is_placed());

        cell.set_server_state("srv1", NodeState::Down);
        let result = cell.schedule_at(now).unwrap();
        // Evicted and withdrawn in the same pass, never re-queued.
        assert_eq!(result.evicted, vec!["once#1".to_string()]);
        assert!(result.placed.is_empty());
        assert!(cell.instance("once#1").is_none());

        cell.set_server_state("srv1", NodeState::Up);
        let result = cell.schedule_at(now).unwrap();
        assert!(result.placed.is_empty());
    }

    #[test]
    fn test_lease_expiry_evicts() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("leased#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment())
                .with_lease(60),
        )
        .unwrap();

        let now = Utc::now();
        cell.schedule_at(now).unwrap();
        assert!(cell.instance("leased#1").unwrap().is_placed());

        let later = now + Duration::seconds(120);
        let result = cell.schedule_at(later).unwrap();
        assert_eq!(result.evicted, vec!["leased#1".to_string()]);
        // Same pass re-places it with a fresh lease.
        assert_eq!(result.placed, vec!["leased#1".to_string()]);
    }

    #[test]
    fn test_identity_group_bounds_concurrency() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.configure_identity_group("workers", 2);
        for i in 1..=3 {
            cell.submit_instance(
                Instance::new(format!("w#{i}"), CapacityVector::new(5, 5, 5))
                    .with_allocation(default_assignment())
                    .with_identity_group("workers"),
            )
            .unwrap();
        }

        let now = Utc::now();
        let result = cell.schedule_at(now).unwrap();
        assert_eq!(result.placed.len(), 2);
        assert_eq!(result.pending, vec!["w#3".to_string()]);
        assert_eq!(cell.instance("w#1").unwrap().identity, Some(0));
        assert_eq!(cell.instance("w#2").unwrap().identity, Some(1));

        // Withdrawing a holder frees its slot for the waiter.
        cell.withdraw_instance("w#1").unwrap();
        let result = cell.schedule_at(now).unwrap();
        assert!(result.placed.contains(&"w#3".to_string()));
        assert_eq!(cell.instance("w#3").unwrap().identity, Some(0));
    }

    #[test]
    fn test_utilization_ceiling_caps_allocation() {
        let mut cell = one_server_cell(CapacityVector::new(100, 100, 100));
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &["capped".to_string()],
            CapacityVector::new(20, 20, 20),
            10,
            None,
            TraitSet::new(),
            Some(1.0),
        )
        .unwrap();
        let capped = AllocationAssignment::new(DEFAULT_PARTITION, vec!["capped".to_string()]);
        cell.submit_instance(
            Instance::new("in#1", CapacityVector::new(15, 15, 15))
                .with_allocation(capped.clone()),
        )
        .unwrap();
        cell.submit_instance(
            Instance::new("over#1", CapacityVector::new(15, 15, 15)).with_allocation(capped),
        )
        .unwrap();

        let result = cell.schedule_at(Utc::now()).unwrap();
        assert_eq!(result.placed, vec!["in#1".to_string()]);
        assert_eq!(result.pending, vec!["over#1".to_string()]);
    }

    #[test]
    fn test_remove_server_displaces_residents() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();
        cell.schedule_at(Utc::now()).unwrap();

        cell.remove_server("srv1");
        let app = cell.instance("a#1").unwrap();
        assert!(!app.is_placed());
        assert!(app.evicted);
    }

    #[test]
    fn test_withdraw_restores_capacity() {
        let mut cell = one_server_cell(CapacityVector::new(50, 50, 50));
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();
        cell.schedule_at(Utc::now()).unwrap();
        cell.withdraw_instance("a#1").unwrap();

        let srv1 = cell.topology().node_id("srv1").unwrap();
        let node = cell.topology().node(srv1);
        assert_eq!(node.free_capacity, node.capacity);
        assert!(cell.instance("a#1").is_none());
        assert!(cell
            .partition(DEFAULT_PARTITION)
            .unwrap()
            .instances
            .is_empty());
    }

    #[test]
    fn test_rank_orders_across_allocations() {
        let mut cell = one_server_cell(CapacityVector::new(25, 25, 25));
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &["gold".to_string()],
            CapacityVector::new(50, 50, 50),
            1,
            None,
            TraitSet::new(),
            None,
        )
        .unwrap();
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &["bronze".to_string()],
            CapacityVector::zero(),
            100,
            None,
            TraitSet::new(),
            None,
        )
        .unwrap();

        // Bronze submitted first but gold outranks it for the last slot.
        cell.submit_instance(
            Instance::new("bronze#1", CapacityVector::new(20, 20, 20)).with_allocation(
                AllocationAssignment::new(DEFAULT_PARTITION, vec!["bronze".to_string()]),
            ),
        )
        .unwrap();
        cell.submit_instance(
            Instance::new("gold#1", CapacityVector::new(20, 20, 20)).with_allocation(
                AllocationAssignment::new(DEFAULT_PARTITION, vec!["gold".to_string()]),
            ),
        )
        .unwrap();

        let result = cell.schedule_at(Utc::now()).unwrap();
        assert_eq!(result.placed, vec!["gold#1".to_string()]);
        assert_eq!(result.pending, vec!["bronze#1".to_string()]);
    }

    #[test]
    fn test_pass_honors_placement_strategy() {
        let mut cell = Cell::new("test");
        cell.add_bucket("rack-a", None, "rack").unwrap();
        cell.add_bucket("rack-b", None, "rack").unwrap();
        for (server, rack) in [("srv-b", "rack-a"), ("srv-a", "rack-b")] {
            cell.add_server(
                server,
                rack,
                CapacityVector::new(50, 50, 50),
                DEFAULT_PARTITION,
                TraitSet::new(),
                None,
            )
            .unwrap();
        }
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &[],
            CapacityVector::new(100, 100, 100),
            0,
            None,
            TraitSet::new(),
            None,
        )
        .unwrap();

        // Flat name order picks srv-a; tree order would pick srv-b.
        cell.set_placement_strategy(TraversalStrategy::ServersOnly);
        cell.submit_instance(
            Instance::new("a#1", CapacityVector::new(10, 10, 10))
                .with_allocation(default_assignment()),
        )
        .unwrap();
        cell.schedule_at(Utc::now()).unwrap();
        assert_eq!(cell.instance("a#1").unwrap().server.as_deref(), Some("srv-a"));
    }

    #[test]
    fn test_allocation_traits_fold_into_instance() {
        let mut cell = Cell::new("test");
        cell.add_server(
            "gpu1",
            "test",
            CapacityVector::new(50, 50, 50),
            DEFAULT_PARTITION,
            TraitSet::new().with("gpu"),
            None,
        )
        .unwrap();
        cell.add_server(
            "aplain1",
            "test",
            CapacityVector::new(50, 50, 50),
            DEFAULT_PARTITION,
            TraitSet::new(),
            None,
        )
        .unwrap();
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &["ml".to_string()],
            CapacityVector::new(50, 50, 50),
            10,
            None,
            TraitSet::new().with("gpu"),
            None,
        )
        .unwrap();

        cell.submit_instance(
            Instance::new("train#1", CapacityVector::new(10, 10, 10)).with_allocation(
                AllocationAssignment::new(DEFAULT_PARTITION, vec!["ml".to_string()]),
            ),
        )
        .unwrap();

        cell.schedule_at(Utc::now()).unwrap();
        assert_eq!(cell.instance("train#1").unwrap().server.as_deref(), Some("gpu1"));
    }
}
