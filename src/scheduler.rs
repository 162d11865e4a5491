//! Thread-safe scheduler facade
//!
//! Wraps a [`Cell`] behind a `parking_lot::RwLock` so ingest, scheduling
//! and reporting can be driven from multiple threads, and feeds pass
//! outcomes into the metrics set. Reads (reports, lookups) take the
//! shared lock; ingest and passes take the exclusive lock.

use std::time::Instant;

use parking_lot::RwLock;
use tracing::info;

use crate::cell::{Cell, PassResult};
use crate::error::Result;
use crate::instance::Instance;
use crate::metrics::SchedulerMetrics;
use crate::types::NodeState;

/// Shared handle over one cell's scheduling state
pub struct Scheduler {
    cell: RwLock<Cell>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    /// Create a scheduler over an empty cell
    pub fn new(cell_name: impl Into<String>) -> Result<Self> {
        Self::with_cell(Cell::new(cell_name))
    }

    /// Create a scheduler over pre-built cell state
    pub fn with_cell(cell: Cell) -> Result<Self> {
        info!(cell = %cell.name(), "scheduler created");
        Ok(Self {
            cell: RwLock::new(cell),
            metrics: SchedulerMetrics::new()?,
        })
    }

    /// Run one scheduling pass and record its metrics
    pub fn schedule(&self) -> Result<PassResult> {
        let started = Instant::now();
        let result = self.cell.write().schedule()?;
        self.metrics
            .record_pass(&result, started.elapsed().as_secs_f64());
        Ok(result)
    }

    /// Submit an instance for scheduling
    pub fn submit_instance(&self, app: Instance) -> Result<()> {
        self.cell.write().submit_instance(app)
    }

    /// Remove an instance entirely
    pub fn withdraw_instance(&self, name: &str) -> Result<()> {
        self.cell.write().withdraw_instance(name)
    }

    /// Change a server's lifecycle state
    pub fn set_server_state(&self, name: &str, state: NodeState) {
        self.cell.write().set_server_state(name, state);
    }

    /// Run a closure under the shared lock, for reports and lookups
    pub fn read<R>(&self, f: impl FnOnce(&Cell) -> R) -> R {
        f(&self.cell.read())
    }

    /// Run a closure under the exclusive lock, for batched ingest
    pub fn update<R>(&self, f: impl FnOnce(&mut Cell) -> Result<R>) -> Result<R> {
        f(&mut self.cell.write())
    }

    /// Scheduler metrics
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }
}
