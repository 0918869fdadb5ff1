//! Provisioning Metrics
//!
//! Prometheus counters and histograms for the claim controller.

use crate::error::Result;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label values
pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_FAILED: &str = "failed";
pub const RESULT_RESCHEDULED: &str = "rescheduled";
pub const RESULT_IN_BACKGROUND: &str = "in_background";

/// Provision attempts by result and how long they took
#[derive(Clone)]
pub struct ProvisionMetrics {
    provisions: IntCounterVec,
    duration: Histogram,
}

impl ProvisionMetrics {
    /// Create and register the metrics with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let provisions = IntCounterVec::new(
            Opts::new(
                "hybrid_provisioner_provisions_total",
                "Provision attempts by result",
            ),
            &["result"],
        )?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "hybrid_provisioner_provision_duration_seconds",
                "Duration of provision attempts",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        registry.register(Box::new(provisions.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            provisions,
            duration,
        })
    }

    /// Record one provision attempt
    pub fn observe(&self, result: &str, elapsed: Duration) {
        self.provisions.with_label_values(&[result]).inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    /// Attempts recorded with `result`
    pub fn count(&self, result: &str) -> u64 {
        self.provisions.with_label_values(&[result]).get()
    }
}

/// Render `registry` in the text exposition format
pub fn encode(registry: &Registry) -> Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
