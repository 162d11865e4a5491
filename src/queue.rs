//! Utilization-ranked instance queue
//!
//! Produces the globally ordered sequence of pending-instance entries for
//! an allocation subtree. Every allocation yields a stream of its
//! instances in submission order, charging every instance against the
//! allocation's reservation as it goes; the streams are then merged
//! lazily, k-way, keyed by `(rank, util, order)` ascending. The merge
//! interleaves sibling allocations instead of draining one before the
//! next, which is what makes the ordering weighted fair sharing rather
//! than simple priority FIFO.
//!
//! The utilization metric is the bottleneck-dimension reduction
//! `max_i (accumulated_demand[i] - reserved[i]) / size[i]`: negative while
//! the allocation is under its reservation, zero at the boundary, and
//! monotonically increasing as instances are charged. Infeasibility is
//! never decided here; the queue only orders.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::allocation::Allocation;
use crate::capacity::CapacityVector;
use crate::instance::Instance;

/// One row of the utilization queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Effective rank of the owning allocation (rank + rank_adjustment)
    pub rank: i32,
    /// Allocation utilization at the moment this instance is considered
    pub util: f64,
    /// True once the allocation's accumulated demand exceeds its
    /// `max_utilization` ceiling; the instance stays visible but is
    /// ineligible for placement this cycle
    pub pending: bool,
    /// Submission sequence number, the deterministic tie-break
    pub order: u64,
    /// Instance name
    pub instance: String,
    /// Path of the owning allocation
    pub allocation: String,
}

impl QueueEntry {
    fn key(&self) -> (i32, f64, u64) {
        (self.rank, self.util, self.order)
    }
}

fn key_cmp(a: (i32, f64, u64), b: (i32, f64, u64)) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.total_cmp(&b.1))
        .then(a.2.cmp(&b.2))
}

/// Per-allocation stream with its head exposed for the merge heap.
///
/// Ordered as a min-heap over the head entry's `(rank, util, order)` key
/// (comparison inverted, `BinaryHeap` is a max-heap).
struct MergeStream {
    head: QueueEntry,
    rest: std::vec::IntoIter<QueueEntry>,
}

impl PartialEq for MergeStream {
    fn eq(&self, other: &Self) -> bool {
        key_cmp(self.head.key(), other.head.key()) == Ordering::Equal
    }
}

impl Eq for MergeStream {}

impl PartialOrd for MergeStream {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeStream {
    fn cmp(&self, other: &Self) -> Ordering {
        key_cmp(other.head.key(), self.head.key())
    }
}

/// Lazy, restartable iterator over the merged utilization queue.
///
/// One pass per scheduling cycle; build a new queue to restart.
pub struct UtilizationQueue {
    heap: BinaryHeap<MergeStream>,
}

impl UtilizationQueue {
    /// Build the queue for an allocation subtree.
    ///
    /// `size` is the total capacity of the partition's servers, the
    /// denominator against which utilization is judged. `instances` is the
    /// cell's instance table; allocation entries naming unknown instances
    /// are skipped.
    pub fn new(
        root: &Allocation,
        size: CapacityVector,
        instances: &BTreeMap<String, Instance>,
    ) -> Self {
        let mut heap = BinaryHeap::new();
        for (path, alloc) in root.iterate() {
            let entries = alloc_stream(&path, alloc, size, instances);
            let mut rest = entries.into_iter();
            if let Some(head) = rest.next() {
                heap.push(MergeStream { head, rest });
            }
        }
        Self { heap }
    }
}

impl Iterator for UtilizationQueue {
    type Item = QueueEntry;

    fn next(&mut self) -> Option<QueueEntry> {
        let mut stream = self.heap.pop()?;
        let entry = stream.head;
        if let Some(head) = stream.rest.next() {
            stream.head = head;
            self.heap.push(stream);
        }
        Some(entry)
    }
}

/// Compute one allocation's entry stream: its direct instances in
/// submission order, each charged against the running demand accumulator.
fn alloc_stream(
    path: &str,
    alloc: &Allocation,
    size: CapacityVector,
    instances: &BTreeMap<String, Instance>,
) -> Vec<QueueEntry> {
    let rank = alloc.effective_rank();

    let mut members: Vec<&Instance> = alloc
        .instances
        .iter()
        .filter_map(|name| {
            let found = instances.get(name);
            if found.is_none() {
                tracing::warn!(instance = %name, allocation = %path, "stale instance in allocation");
            }
            found
        })
        .collect();
    members.sort_by_key(|instance| instance.order);

    let mut acc = CapacityVector::zero();
    members
        .into_iter()
        .map(|instance| {
            acc = acc.add(&instance.demand);
            let util = acc.bottleneck_utilization(&alloc.reserved, &size);
            let pending = match alloc.max_utilization {
                Some(ceiling) => acc.bottleneck_ratio(&alloc.reserved) > ceiling,
                None => false,
            };
            QueueEntry {
                rank,
                util,
                pending,
                order: instance.order,
                instance: instance.name.clone(),
                allocation: path.to_string(),
            }
        })
        .collect()
}
