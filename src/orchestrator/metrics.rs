//! Run Metrics
//!
//! Prometheus counters for runs and operations, kept in a registry owned by
//! the orchestrator and exported in text format.

use crate::error::{Error, Result};
use crate::reconcile::ApplyResult;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Metrics of one orchestrator
pub struct RunMetrics {
    registry: Registry,
    runs: IntCounterVec,
    operations: IntCounterVec,
    duration: Histogram,
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs = IntCounterVec::new(
            Opts::new("lpar_dr_sync_runs_total", "Runs by managed system and final state"),
            &["managed_system", "state"],
        )
        .map_err(metrics_error)?;

        let operations = IntCounterVec::new(
            Opts::new(
                "lpar_dr_sync_operations_total",
                "Plan operations by site, operation and outcome",
            ),
            &["site", "operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "lpar_dr_sync_run_duration_seconds",
                "Duration of a run for one managed system",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(runs.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            runs,
            operations,
            duration,
        })
    }

    pub fn record_run(&self, managed_system: &str, state: &str, seconds: f64) {
        self.runs.with_label_values(&[managed_system, state]).inc();
        self.duration.observe(seconds);
    }

    pub fn record_apply(&self, result: &ApplyResult) {
        for outcome in &result.outcomes {
            self.operations
                .with_label_values(&[
                    result.site.as_str(),
                    outcome.operation.name(),
                    outcome.status.name(),
                ])
                .inc();
        }
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn runs_total(&self, managed_system: &str, state: &str) -> u64 {
        self.runs.with_label_values(&[managed_system, state]).get()
    }
}
