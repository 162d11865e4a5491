//! # cellsched
//!
//! Capacity scheduler for a cell of servers. A cell is a tree of
//! aggregation buckets with servers at the leaves; tenants hold
//! hierarchical allocations of reserved capacity, and instances compete
//! for placement through a utilization-ranked queue so that allocations
//! drain fairly against their reservations.
//!
//! ## Model
//!
//! - [`topology::Topology`] is the physical tree. Capacity, traits and
//!   partition labels aggregate upward so the placement walk can prune
//!   whole subtrees.
//! - [`allocation::Allocation`] is the entitlement tree of one partition:
//!   reserved capacity, rank and an optional utilization ceiling per
//!   node.
//! - [`queue::UtilizationQueue`] merges each allocation's instances into
//!   one global order keyed by `(rank, utilization, submission order)`.
//! - [`cell::Cell`] binds the two trees together and runs the scheduling
//!   pass; [`scheduler::Scheduler`] is the lock-guarded facade with
//!   metrics.
//! - [`reports`] renders operator views: server, allocation and instance
//!   tables, queue and placement explanations.
//!
//! ## Example
//!
//! ```
//! use cellsched::prelude::*;
//!
//! let mut cell = Cell::new("demo");
//! cell.add_server(
//!     "srv1",
//!     "demo",
//!     CapacityVector::new(64, 16, 500),
//!     "_default",
//!     TraitSet::new(),
//!     None,
//! )?;
//! cell.configure_allocation(
//!     "_default",
//!     &[],
//!     CapacityVector::new(64, 16, 500),
//!     0,
//!     None,
//!     TraitSet::new(),
//!     None,
//! )?;
//! cell.submit_instance(
//!     Instance::new("web#1", CapacityVector::new(4, 1, 10))
//!         .with_allocation(AllocationAssignment::new("_default", Vec::<String>::new())),
//! )?;
//!
//! let result = cell.schedule()?;
//! assert_eq!(result.placed, vec!["web#1".to_string()]);
//! # Ok::<(), cellsched::Error>(())
//! ```

#![warn(missing_docs)]

pub mod allocation;
pub mod capacity;
pub mod cell;
pub mod error;
pub mod instance;
pub mod metrics;
pub mod placement;
pub mod queue;
pub mod reports;
pub mod scheduler;
pub mod topology;
pub mod types;

pub use allocation::Allocation;
pub use capacity::CapacityVector;
pub use cell::{Cell, PassResult, DEFAULT_PARTITION};
pub use error::{Error, Result};
pub use instance::{AllocationAssignment, IdentityGroup, Instance};
pub use placement::TraversalStrategy;
pub use queue::{QueueEntry, UtilizationQueue};
pub use scheduler::Scheduler;
pub use topology::{Node, NodeId, Topology};
pub use types::{Affinity, NodeState, TraitSet};

/// Common imports for working with the scheduler
pub mod prelude {
    pub use crate::allocation::Allocation;
    pub use crate::capacity::CapacityVector;
    pub use crate::cell::{Cell, PassResult, DEFAULT_PARTITION};
    pub use crate::error::{Error, Result};
    pub use crate::instance::{AllocationAssignment, IdentityGroup, Instance};
    pub use crate::placement::TraversalStrategy;
    pub use crate::queue::{QueueEntry, UtilizationQueue};
    pub use crate::scheduler::Scheduler;
    pub use crate::topology::Topology;
    pub use crate::types::{Affinity, NodeState, TraitSet};
}
