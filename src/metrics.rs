//! Prometheus metrics for the scheduler

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::cell::PassResult;
use crate::error::Result;

/// Counters and gauges describing scheduler activity, backed by a
/// dedicated registry
#[derive(Debug)]
pub struct SchedulerMetrics {
    registry: Registry,
    passes_total: IntCounter,
    placements_total: IntCounter,
    evictions_total: IntCounter,
    placed_instances: IntGauge,
    pending_instances: IntGauge,
    pass_duration_seconds: Histogram,
}

impl SchedulerMetrics {
    /// Create the metric set and register it
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes_total = IntCounter::with_opts(Opts::new(
            "cellsched_passes_total",
            "Scheduling passes run",
        ))?;
        let placements_total = IntCounter::with_opts(Opts::new(
            "cellsched_placements_total",
            "Instances placed on a server by a pass",
        ))?;
        let evictions_total = IntCounter::with_opts(Opts::new(
            "cellsched_evictions_total",
            "Instances evicted by a pass",
        ))?;
        let placed_instances = IntGauge::with_opts(Opts::new(
            "cellsched_placed_instances",
            "Instances holding a placement after the last pass",
        ))?;
        let pending_instances = IntGauge::with_opts(Opts::new(
            "cellsched_pending_instances",
            "Instances waiting after the last pass",
        ))?;
        let pass_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cellsched_pass_duration_seconds",
                "Wall time of a scheduling pass",
            )
            .buckets(vec![0.001, 0.005, 0.025, 0.1, 0.5, 2.5, 10.0]),
        )?;

        registry.register(Box::new(passes_total.clone()))?;
        registry.register(Box::new(placements_total.clone()))?;
        registry.register(Box::new(evictions_total.clone()))?;
        registry.register(Box::new(placed_instances.clone()))?;
        registry.register(Box::new(pending_instances.clone()))?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            passes_total,
            placements_total,
            evictions_total,
            placed_instances,
            pending_instances,
            pass_duration_seconds,
        })
    }

    /// Record the outcome of one pass
    pub fn record_pass(&self, result: &PassResult, duration_seconds: f64) {
        self.passes_total.inc();
        self.placements_total.inc_by(result.placed.len() as u64);
        self.evictions_total.inc_by(result.evicted.len() as u64);
        self.placed_instances.set(result.placed.len() as i64);
        self.pending_instances.set(result.pending.len() as i64);
        self.pass_duration_seconds.observe(duration_seconds);
    }

    /// The backing registry, for embedding into a larger exporter
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the current values in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pass_updates_counters() {
        let metrics = SchedulerMetrics::new().unwrap();
        let result = PassResult {
            placed: vec!["a#1".into(), "b#1".into()],
            pending: vec!["c#1".into()],
            evicted: vec![],
        };
        metrics.record_pass(&result, 0.002);
        metrics.record_pass(&result, 0.003);

        let text = metrics.export().unwrap();
        assert!(text.contains("cellsched_passes_total 2"));
        assert!(text.contains("cellsched_placements_total 4"));
        assert!(text.contains("cellsched_pending_instances 1"));
    }

    #[test]
    fn test_gauges_reflect_latest_pass() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.record_pass(
            &PassResult {
                placed: vec!["a#1".into()],
                pending: vec![],
                evicted: vec![],
            },
            0.001,
        );
        metrics.record_pass(&PassResult::default(), 0.001);

        let text = metrics.export().unwrap();
        assert!(text.contains("cellsched_placed_instances 0"));
    }
}
