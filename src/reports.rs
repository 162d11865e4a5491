//! Introspection reports
//!
//! Read-only views over a cell for operators: tabular dumps of servers,
//! allocations and instances, a queue explanation with per-allocation
//! positions, and a placement explanation that replays the feasibility
//! checks against every node a walk visits. Nothing here mutates the
//! cell.

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::placement::{walk, TraversalStrategy};
use crate::queue::UtilizationQueue;
use crate::types::DEFAULT_RANK;

/// One server in the topology dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRow {
    /// Server name
    pub name: String,
    /// Parent bucket name
    pub parent: String,
    /// Lifecycle state
    pub state: String,
    /// Partition labels
    pub labels: Vec<String>,
    /// Offered traits
    pub traits: Vec<String>,
    /// Free memory
    pub mem_free: u64,
    /// Free cpu
    pub cpu_free: u64,
    /// Free disk
    pub disk_free: u64,
    /// Total memory
    pub mem: u64,
    /// Total cpu
    pub cpu: u64,
    /// Total disk
    pub disk: u64,
    /// Names of instances placed here
    pub apps: Vec<String>,
}

/// One allocation in the entitlement dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRow {
    /// Partition label
    pub partition: String,
    /// Allocation path, `"root"` for the partition root
    pub name: String,
    /// Base rank
    pub rank: i32,
    /// Rank adjustment
    pub rank_adjustment: i32,
    /// Utilization ceiling, unlimited when `None`
    pub max_utilization: Option<f64>,
    /// Reserved memory
    pub mem: u64,
    /// Reserved cpu
    pub cpu: u64,
    /// Reserved disk
    pub disk: u64,
}

/// One instance in the workload dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRow {
    /// Instance name
    pub instance: String,
    /// Partition label
    pub partition: String,
    /// Allocation path
    pub allocation: String,
    /// Effective rank of the owning allocation
    pub rank: i32,
    /// Submission order
    pub order: u64,
    /// Hosting server, if placed
    pub server: Option<String>,
    /// Identity slot, if held
    pub identity: Option<u32>,
    /// Lease duration in seconds (0 = unlimited)
    pub lease: u64,
    /// Data retention timeout in seconds, if set
    pub data_retention: Option<u64>,
    /// Demanded memory
    pub mem: u64,
    /// Demanded cpu
    pub cpu: u64,
    /// Demanded disk
    pub disk: u64,
}

/// One entry of the queue explanation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    /// Position within the owning allocation, 1-based
    pub position: usize,
    /// Owning allocation path
    pub allocation: String,
    /// Effective rank
    pub rank: i32,
    /// Utilization after this entry
    pub util: f64,
    /// Beyond the allocation's utilization ceiling
    pub pending: bool,
    /// Submission order
    pub order: u64,
    /// Instance name
    pub instance: String,
}

/// One node of the placement explanation. Each flag reports whether the
/// corresponding check passed at that node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRow {
    /// Node name
    pub name: String,
    /// Topology level
    pub level: String,
    /// Node carries the instance's partition label
    pub partition: bool,
    /// Node offers the instance's required traits
    pub traits: bool,
    /// Affinity limit at this level leaves room
    pub affinity: bool,
    /// Free memory covers the demand
    pub memory: bool,
    /// Free cpu covers the demand
    pub cpu: bool,
    /// Free disk covers the demand
    pub disk: bool,
    /// All checks passed
    pub feasible: bool,
}

/// Render any report's rows as a JSON array, for API responses and
/// operator tooling
pub fn render_json<T: Serialize>(rows: &[T]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

// Allocation paths are "" at the partition root internally; reports
// print "root" instead, matching instance rows.
fn display_path(path: String) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        path
    }
}

fn name_filter(pattern: Option<&str>) -> Result<Option<globset::GlobMatcher>> {
    match pattern {
        Some(pattern) => {
            let matcher = Glob::new(pattern)
                .map_err(|err| Error::config(format!("bad pattern {pattern:?}: {err}")))?
                .compile_matcher();
            Ok(Some(matcher))
        }
        None => Ok(None),
    }
}

/// Dump every server with its free and total capacity
pub fn servers(cell: &Cell) -> Vec<ServerRow> {
    let topo = cell.topology();
    topo.servers()
        .into_iter()
        .map(|(name, id)| {
            let node = topo.node(id);
            let parent = node
                .parent
                .map(|pid| topo.node(pid).name.clone())
                .unwrap_or_default();
            let apps = match &node.kind {
                crate::topology::NodeKind::Server { apps, .. } => {
                    apps.iter().cloned().collect()
                }
                crate::topology::NodeKind::Bucket { .. } => Vec::new(),
            };
            ServerRow {
                name,
                parent,
                state: node
                    .state()
                    .map(|state| state.to_string())
                    .unwrap_or_default(),
                labels: node.labels.iter().cloned().collect(),
                traits: node.traits.iter().map(str::to_string).collect(),
                mem_free: node.free_capacity.memory(),
                cpu_free: node.free_capacity.cpu(),
                disk_free: node.free_capacity.disk(),
                mem: node.capacity.memory(),
                cpu: node.capacity.cpu(),
                disk: node.capacity.disk(),
                apps,
            }
        })
        .collect()
}

/// Dump every allocation of every partition
pub fn allocations(cell: &Cell) -> Vec<AllocationRow> {
    let mut rows = Vec::new();
    for label in cell.partitions() {
        let Some(root) = cell.partition(label) else {
            continue;
        };
        for (path, alloc) in root.iterate() {
            rows.push(AllocationRow {
                partition: label.to_string(),
                name: display_path(path),
                rank: alloc.rank,
                rank_adjustment: alloc.rank_adjustment,
                max_utilization: alloc.max_utilization,
                mem: alloc.reserved.memory(),
                cpu: alloc.reserved.cpu(),
                disk: alloc.reserved.disk(),
            });
        }
    }
    rows
}

/// Dump instances, optionally filtered by a glob over instance names
pub fn apps(cell: &Cell, pattern: Option<&str>) -> Result<Vec<AppRow>> {
    let filter = name_filter(pattern)?;
    Ok(cell
        .instances()
        .values()
        .filter(|app| {
            filter
                .as_ref()
                .map(|matcher| matcher.is_match(&app.name))
                .unwrap_or(true)
        })
        .map(|app| AppRow {
            instance: app.name.clone(),
            partition: app.allocation.partition.clone(),
            allocation: app.allocation.path_str(),
            rank: cell
                .partition(&app.allocation.partition)
                .and_then(|root| root.find(&app.allocation.path))
                .map(|alloc| alloc.effective_rank())
                .unwrap_or(DEFAULT_RANK),
            order: app.order,
            server: app.server.clone(),
            identity: app.identity,
            lease: app.lease,
            data_retention: app.data_retention_timeout,
            mem: app.demand.memory(),
            cpu: app.demand.cpu(),
            disk: app.demand.disk(),
        })
        .collect())
}

/// Explain a partition's queue: every entry in priority order with its
/// 1-based position within its allocation. Rows are sorted by
/// `(allocation, util)` so each allocation's entries read top to bottom;
/// the optional glob filters instance names after positions are assigned,
/// so a filtered view keeps true positions.
pub fn explain_queue(
    cell: &Cell,
    partition: &str,
    pattern: Option<&str>,
) -> Result<Vec<QueueRow>> {
    let filter = name_filter(pattern)?;
    let root = cell
        .partition(partition)
        .ok_or_else(|| Error::config(format!("unknown partition: {partition}")))?;
    let size = cell.topology().size(partition);

    let mut rows: Vec<QueueRow> = UtilizationQueue::new(root, size, cell.instances())
        .map(|entry| QueueRow {
            position: 0,
            allocation: display_path(entry.allocation),
            rank: entry.rank,
            util: entry.util,
            pending: entry.pending,
            order: entry.order,
            instance: entry.instance,
        })
        .collect();

    rows.sort_by(|a, b| {
        a.allocation
            .cmp(&b.allocation)
            .then_with(|| a.util.total_cmp(&b.util))
            .then_with(|| a.order.cmp(&b.order))
    });
    let mut position = 0;
    let mut current = String::new();
    let mut first = true;
    for row in &mut rows {
        if first || row.allocation != current {
            position = 0;
            current = row.allocation.clone();
            first = false;
        }
        position += 1;
        row.position = position;
    }

    if let Some(matcher) = filter {
        rows.retain(|row| matcher.is_match(&row.instance));
    }
    Ok(rows)
}

/// Explain where an instance could go: replay the feasibility checks at
/// every node the chosen walk visits
pub fn explain_placement(
    cell: &Cell,
    instance: &str,
    strategy: TraversalStrategy,
) -> Result<Vec<PlacementRow>> {
    let app = cell
        .instance(instance)
        .ok_or_else(|| Error::invalid_state(format!("unknown instance: {instance}")))?;
    let topo = cell.topology();

    let rows = walk(topo, strategy, Some(app))
        .into_iter()
        .map(|id| {
            let node = topo.node(id);
            let partition = node.labels.contains(&app.allocation.partition);
            let traits = node.traits.has(&app.traits);
            let affinity = topo.check_app_affinity_limit(id, app);
            let fits = app.demand.fits_by_dimension(&node.free_capacity);
            PlacementRow {
                name: node.name.clone(),
                level: node.level.clone(),
                partition,
                traits,
                affinity,
                memory: fits[crate::capacity::MEMORY],
                cpu: fits[crate::capacity::CPU],
                disk: fits[crate::capacity::DISK],
                feasible: partition && traits && affinity && fits.iter().all(|&ok| ok),
            }
        })
        .collect();
    Ok(rows)
}
