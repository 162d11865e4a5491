//! Topology tree
//!
//! The physical model of the cell: an arena of nodes addressed by stable
//! indices, each node either an aggregation bucket or a leaf server.
//! Parent links are plain indices, children live in a name-keyed BTreeMap
//! so traversal order is deterministic.
//!
//! Free capacity is maintained incrementally: placements subtract demand
//! from the hosting server and every ancestor, evictions add it back, so
//! `capacity - free_capacity` of any node always equals the demand of the
//! instances resident in its subtree. Trait sets and partition labels
//! aggregate upward as unions, which is the monotonicity the constrained
//! placement walk relies on.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capacity::CapacityVector;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::types::{NodeState, TraitSet, SERVER_LEVEL};

/// Stable arena index of a topology node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

/// Aggregation bucket or leaf server payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    /// Aggregation point (cell, building, rack, ...)
    Bucket {
        /// Children keyed by name, iterated lexicographically
        children: BTreeMap<String, NodeId>,
    },
    /// Leaf server hosting instances
    Server {
        /// Lifecycle state
        state: NodeState,
        /// Names of instances currently placed here
        apps: BTreeSet<String>,
    },
}

/// A node in the topology tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name, unique across the tree
    pub name: String,
    /// Parent index; `None` only for the root
    pub parent: Option<NodeId>,
    /// Topology level (`"cell"`, `"rack"`, `"server"`, ...), used by
    /// affinity limits
    pub level: String,
    /// Offered traits; for buckets, the union over the subtree
    pub traits: TraitSet,
    /// Traits declared at creation, kept apart from the subtree union so
    /// removals can rebuild `traits` without losing them
    pub own_traits: TraitSet,
    /// Partition labels; for buckets, the union over the subtree
    pub labels: BTreeSet<String>,
    /// Initial capacity; for buckets, the sum over subtree servers
    pub capacity: CapacityVector,
    /// Free capacity, maintained incrementally
    pub free_capacity: CapacityVector,
    /// Lease/reboot expiry; placements must not outlive it
    pub valid_until: Option<DateTime<Utc>>,
    /// Resident instance count per affinity group, over the subtree
    pub affinity_counters: BTreeMap<String, u32>,
    /// Bucket or server payload
    pub kind: NodeKind,
}

impl Node {
    /// True iff this node is a leaf server
    pub fn is_server(&self) -> bool {
        matches!(self.kind, NodeKind::Server { .. })
    }

    /// Server lifecycle state; buckets have none
    pub fn state(&self) -> Option<NodeState> {
        match &self.kind {
            NodeKind::Server { state, .. } => Some(*state),
            NodeKind::Bucket { .. } => None,
        }
    }

    /// Resident instances of the given affinity group in this subtree
    pub fn affinity_count(&self, group: &str) -> u32 {
        self.affinity_counters.get(group).copied().unwrap_or(0)
    }
}

/// Arena-backed topology tree with a single root bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    nodes: Vec<Option<Node>>,
    free_list: Vec<usize>,
    index: BTreeMap<String, NodeId>,
    root: NodeId,
}

impl Topology {
    /// Create a topology with a root bucket of the given name
    pub fn new(cell_name: impl Into<String>) -> Self {
        let name = cell_name.into();
        let root = Node {
            name: name.clone(),
            parent: None,
            level: "cell".to_string(),
            traits: TraitSet::new(),
            own_traits: TraitSet::new(),
            labels: BTreeSet::new(),
            capacity: CapacityVector::zero(),
            free_capacity: CapacityVector::zero(),
            valid_until: None,
            affinity_counters: BTreeMap::new(),
            kind: NodeKind::Bucket {
                children: BTreeMap::new(),
            },
        };
        let mut index = BTreeMap::new();
        index.insert(name, NodeId(0));
        Self {
            nodes: vec![Some(root)],
            free_list: Vec::new(),
            index,
            root: NodeId(0),
        }
    }

    /// Root bucket index
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Look up a node index by name
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Borrow a node. Panics on a vacated index, which indicates a bug in
    /// the arena bookkeeping, not caller error.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("vacated node index")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("vacated node index")
    }

    /// Child indices in lexicographic name order (empty for servers)
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).kind {
            NodeKind::Bucket { children } => children.values().copied().collect(),
            NodeKind::Server { .. } => Vec::new(),
        }
    }

    /// All servers as `(name, id)`, in name order
    pub fn servers(&self) -> Vec<(String, NodeId)> {
        self.index
            .iter()
            .filter(|(_, &id)| self.node(id).is_server())
            .map(|(name, &id)| (name.clone(), id))
            .collect()
    }

    /// Total capacity of servers carrying the given partition label
    pub fn size(&self, label: &str) -> CapacityVector {
        let mut total = CapacityVector::zero();
        for (_, id) in self.servers() {
            let server = self.node(id);
            if server.labels.contains(label) {
                total = total.add(&server.capacity);
            }
        }
        total
    }

    fn alloc_slot(&mut self, node: Node) -> NodeId {
        match self.free_list.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).parent;
        }
        chain
    }

    fn attach(&mut self, parent: NodeId, name: &str, child: NodeId) -> Result<()> {
        if self.node(parent).is_server() {
            return Err(Error::config(format!(
                "parent {} is a server, cannot hold children",
                self.node(parent).name
            )));
        }
        if let NodeKind::Bucket { children } = &mut self.node_mut(parent).kind {
            children.insert(name.to_string(), child);
        }
        Ok(())
    }

    /// Add an aggregation bucket under `parent` (root when `None`)
    pub fn add_bucket(
        &mut self,
        name: impl Into<String>,
        parent: Option<&str>,
        level: impl Into<String>,
        traits: TraitSet,
    ) -> Result<NodeId> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::config(format!("node already exists: {name}")));
        }
        let parent_id = match parent {
            Some(parent_name) => self
                .node_id(parent_name)
                .ok_or_else(|| Error::config(format!("unknown parent: {parent_name}")))?,
            None => self.root,
        };

        let node = Node {
            name: name.clone(),
            parent: Some(parent_id),
            level: level.into(),
            traits: traits.clone(),
            own_traits: traits,
            labels: BTreeSet::new(),
            capacity: CapacityVector::zero(),
            free_capacity: CapacityVector::zero(),
            valid_until: None,
            affinity_counters: BTreeMap::new(),
            kind: NodeKind::Bucket {
                children: BTreeMap::new(),
            },
        };
        let id = self.alloc_slot(node);
        if let Err(err) = self.attach(parent_id, &name, id) {
            self.nodes[id.0] = None;
            self.free_list.push(id.0);
            return Err(err);
        }
        self.index.insert(name, id);
        Ok(id)
    }

    /// Add a leaf server under `parent`, initially up.
    ///
    /// The server's capacity, traits and partition label propagate to
    /// every ancestor.
    #[allow(clippy::too_many_arguments)]
    pub fn add_server(
        &mut self,
        name: impl Into<String>,
        parent: &str,
        capacity: CapacityVector,
        label: impl Into<String>,
        traits: TraitSet,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<NodeId> {
        let name = name.into();
        let label = label.into();
        if self.index.contains_key(&name) {
            return Err(Error::config(format!("node already exists: {name}")));
        }
        let parent_id = self
            .node_id(parent)
            .ok_or_else(|| Error::config(format!("unknown parent: {parent}")))?;

        let mut labels = BTreeSet::new();
        labels.insert(label);
        let node = Node {
            name: name.clone(),
            parent: Some(parent_id),
            level: SERVER_LEVEL.to_string(),
            traits: traits.clone(),
            own_traits: traits,
            labels,
            capacity,
            free_capacity: capacity,
            valid_until,
            affinity_counters: BTreeMap::new(),
            kind: NodeKind::Server {
                state: NodeState::Up,
                apps: BTreeSet::new(),
            },
        };
        let id = self.alloc_slot(node);
        if let Err(err) = self.attach(parent_id, &name, id) {
            self.nodes[id.0] = None;
            self.free_list.push(id.0);
            return Err(err);
        }
        self.index.insert(name.clone(), id);

        let traits = self.node(id).traits.clone();
        let labels = self.node(id).labels.clone();
        for ancestor in self.ancestors(id) {
            let node = self.node_mut(ancestor);
            node.capacity = node.capacity.add(&capacity);
            node.free_capacity = node.free_capacity.add(&capacity);
            node.traits.extend(&traits);
            node.labels.extend(labels.iter().cloned());
        }

        debug!(server = %name, %capacity, traits = %traits, "server added");
        Ok(id)
    }

    /// Set a server's lifecycle state. Unknown names are logged no-ops.
    pub fn set_server_state(&mut self, name: &str, state: NodeState) {
        let Some(id) = self.node_id(name) else {
            warn!(server = %name, "state change for unknown server");
            return;
        };
        match &mut self.node_mut(id).kind {
            NodeKind::Server { state: current, .. } => {
                debug!(server = %name, from = %*current, to = %state, "server state change");
                *current = state;
            }
            NodeKind::Bucket { .. } => {
                warn!(node = %name, "state change for non-server node");
            }
        }
    }

    /// Remove a server, returning the names of instances that were placed
    /// there. The caller is responsible for marking those instances
    /// pending again. Unknown names are logged no-ops.
    pub fn remove_server(&mut self, name: &str) -> Vec<String> {
        let Some(id) = self.node_id(name) else {
            warn!(server = %name, "removal of unknown server");
            return Vec::new();
        };
        if !self.node(id).is_server() {
            warn!(node = %name, "removal of non-server node");
            return Vec::new();
        }

        // Capture the server's contribution: init capacity fully, free
        // capacity only for what the server still had free, affinity
        // counters for resident groups.
        let capacity = self.node(id).capacity;
        let free = self.node(id).free_capacity;
        let counters = self.node(id).affinity_counters.clone();
        let residents: Vec<String> = match &self.node(id).kind {
            NodeKind::Server { apps, .. } => apps.iter().cloned().collect(),
            NodeKind::Bucket { .. } => unreachable!(),
        };
        let chain = self.ancestors(id);

        if let Some(parent) = self.node(id).parent {
            if let NodeKind::Bucket { children } = &mut self.node_mut(parent).kind {
                children.remove(name);
            }
        }
        self.index.remove(name);
        self.nodes[id.0] = None;
        self.free_list.push(id.0);

        // Fix the chain bottom-up: subtract capacity, then rebuild the
        // trait and label unions from the remaining children so the
        // constrained walk stops descending into subtrees that can no
        // longer satisfy a constraint.
        for ancestor in chain {
            let mut traits = self.node(ancestor).own_traits.clone();
            let mut labels = BTreeSet::new();
            for child in self.children(ancestor) {
                traits.extend(&self.node(child).traits);
                labels.extend(self.node(child).labels.iter().cloned());
            }

            let node = self.node_mut(ancestor);
            node.capacity = node.capacity.subtract(&capacity);
            node.free_capacity = node.free_capacity.subtract(&free);
            node.traits = traits;
            node.labels = labels;
            for (group, count) in &counters {
                if let Some(current) = node.affinity_counters.get_mut(group) {
                    *current = current.saturating_sub(*count);
                    if *current == 0 {
                        node.affinity_counters.remove(group);
                    }
                }
            }
        }

        debug!(server = %name, evicted = residents.len(), "server removed");
        residents
    }

    /// The single feasibility predicate: traits, partition label, capacity
    /// and affinity limit must all hold at this node.
    pub fn check_app_constraints(&self, id: NodeId, app: &Instance) -> bool {
        let node = self.node(id);
        node.traits.has(&app.traits)
            && node.labels.contains(&app.allocation.partition)
            && app.demand.fits(&node.free_capacity)
            && self.check_app_affinity_limit(id, app)
    }

    /// Affinity test in isolation, for introspection: at most `limit`
    /// instances of the app's group resident in this node's subtree, where
    /// the limit is looked up by the node's level. Unconstrained levels
    /// always pass.
    pub fn check_app_affinity_limit(&self, id: NodeId, app: &Instance) -> bool {
        let node = self.node(id);
        match app.affinity.limit_at(&node.level) {
            Some(limit) => node.affinity_count(&app.affinity.name) < limit,
            None => true,
        }
    }

    /// True iff the server is up and a placement starting now would not
    /// outlive the server's `valid_until`
    pub fn server_accepts(&self, id: NodeId, app: &Instance, now: DateTime<Utc>) -> bool {
        let node = self.node(id);
        match node.state() {
            Some(state) if state.schedulable() => {}
            _ => return false,
        }
        match node.valid_until {
            Some(valid_until) if app.lease > 0 => {
                now + Duration::seconds(app.lease as i64) <= valid_until
            }
            _ => true,
        }
    }

    /// Place an instance on a server.
    ///
    /// The caller must have verified feasibility; a placement that does
    /// not fit is refused with a capacity violation and no state change.
    pub fn place(&mut self, app: &mut Instance, server: &str, now: DateTime<Utc>) -> Result<()> {
        let id = self
            .node_id(server)
            .ok_or_else(|| Error::config(format!("unknown server: {server}")))?;
        if !self.node(id).is_server() {
            return Err(Error::config(format!("not a server: {server}")));
        }
        if app.is_placed() {
            return Err(Error::invalid_state(format!(
                "instance {} already placed on {:?}",
                app.name, app.server
            )));
        }

        let free = self.node(id).free_capacity;
        if !app.demand.fits(&free) {
            return Err(Error::CapacityViolation {
                server: server.to_string(),
                demand: app.demand,
                free,
            });
        }
        if !self.server_accepts(id, app, now) {
            return Err(Error::invalid_state(format!(
                "server {server} does not accept placements"
            )));
        }

        let demand = app.demand;
        let group = app.affinity.name.clone();
        {
            let node = self.node_mut(id);
            node.free_capacity = node.free_capacity.subtract(&demand);
            *node.affinity_counters.entry(group.clone()).or_insert(0) += 1;
            if let NodeKind::Server { apps, .. } = &mut node.kind {
                apps.insert(app.name.clone());
            }
        }
        for ancestor in self.ancestors(id) {
            let node = self.node_mut(ancestor);
            node.free_capacity = node.free_capacity.subtract(&demand);
            *node.affinity_counters.entry(group.clone()).or_insert(0) += 1;
        }

        app.server = Some(server.to_string());
        app.placement_expiry = if app.lease > 0 {
            Some(now + Duration::seconds(app.lease as i64))
        } else {
            None
        };
        app.evicted = false;
        debug!(instance = %app.name, server = %server, "placed");
        Ok(())
    }

    /// Evict a placed instance, restoring capacity to its server's chain
    pub fn evict(&mut self, app: &mut Instance) -> Result<()> {
        let server = app
            .server
            .clone()
            .ok_or_else(|| Error::invalid_state(format!("instance {} is not placed", app.name)))?;
        let id = self
            .node_id(&server)
            .ok_or_else(|| Error::config(format!("unknown server: {server}")))?;

        let demand = app.demand;
        let group = app.affinity.name.clone();
        {
            let node = self.node_mut(id);
            node.free_capacity = node.free_capacity.add(&demand);
            decrement_affinity(node, &group);
            if let NodeKind::Server { apps, .. } = &mut node.kind {
                apps.remove(&app.name);
            }
        }
        for ancestor in self.ancestors(id) {
            let node = self.node_mut(ancestor);
            node.free_capacity = node.free_capacity.add(&demand);
            decrement_affinity(node, &group);
        }

        app.server = None;
        app.placement_expiry = None;
        app.evicted = true;
        debug!(instance = %app.name, server = %server, "evicted");
        Ok(())
    }
}

fn decrement_affinity(node: &mut Node, group: &str) {
    if let Some(count) = node.affinity_counters.get_mut(group) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            node.affinity_counters.remove(group);
        }
    }
}
