//! Prometheus metrics registry, exposed at `/metrics` (SPEC_FULL.md §1.1).
//!
//! Grounded in `DaemonMetrics`'s shape: one `Registry` owning a fixed set
//! of named counters/gauges, constructed once at startup and cloned into
//! every handler via [`crate::state::AppState`].

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry};

/// Control-plane-wide metrics.
#[derive(Clone)]
pub struct ControlPlaneMetrics {
    registry: Registry,
    /// Uploads accepted, labeled by resolved verification status.
    pub uploads_total: IntCounterVec,
    /// Settlement decisions recorded, labeled by verb.
    pub decisions_total: IntCounterVec,
    /// Outbox deliveries that succeeded.
    pub outbox_delivered_total: IntCounter,
    /// Outbox entries that exhausted retries and were dead-lettered.
    pub outbox_dead_letter_total: IntCounter,
    /// Requests rejected for exceeding a rate limit.
    pub rate_limited_total: IntCounter,
}

impl ControlPlaneMetrics {
    /// Construct and register every metric against a fresh registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let uploads_total =
            IntCounterVec::new(Opts::new("settld_uploads_total", "Total bundle uploads accepted"), &["status"]).unwrap();
        let decisions_total =
            IntCounterVec::new(Opts::new("settld_decisions_total", "Total settlement decisions recorded"), &["verb"]).unwrap();
        let outbox_delivered_total =
            IntCounter::new("settld_outbox_delivered_total", "Total webhook deliveries that succeeded").unwrap();
        let outbox_dead_letter_total =
            IntCounter::new("settld_outbox_dead_letter_total", "Total webhook entries dead-lettered").unwrap();
        let rate_limited_total =
            IntCounter::new("settld_rate_limited_total", "Total requests rejected for exceeding a rate limit").unwrap();

        registry.register(Box::new(uploads_total.clone())).expect("register uploads_total");
        registry.register(Box::new(decisions_total.clone())).expect("register decisions_total");
        registry.register(Box::new(outbox_delivered_total.clone())).expect("register outbox_delivered_total");
        registry.register(Box::new(outbox_dead_letter_total.clone())).expect("register outbox_dead_letter_total");
        registry.register(Box::new(rate_limited_total.clone())).expect("register rate_limited_total");

        Self { registry, uploads_total, decisions_total, outbox_delivered_total, outbox_dead_letter_total, rate_limited_total }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for ControlPlaneMetrics {
    fn default() -> Self {
        Self::new()
    }
}
