//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Warpgate:
//! - Request counts by dialect and outcome
//! - End-to-end latency histograms
//! - Trivial (short-circuited) request counts
//! - Egress rotations and identity lifecycle counts
//! - Upstream response status counts

use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Final outcome of a client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Trivial,
    BadRequest,
    ServiceUnavailable,
    RateLimited,
    UpstreamError,
    InternalError,
    /// Client went away before a streamed reply finished
    ClientDisconnected,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::Trivial => "trivial",
            RequestOutcome::BadRequest => "bad_request",
            RequestOutcome::ServiceUnavailable => "service_unavailable",
            RequestOutcome::RateLimited => "rate_limited",
            RequestOutcome::UpstreamError => "upstream_error",
            RequestOutcome::InternalError => "internal_error",
            RequestOutcome::ClientDisconnected => "client_disconnected",
        }
    }
}

/// Metrics collector for Warpgate
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Requests by dialect and outcome
    pub requests_total: CounterVec,
    /// End-to-end request duration
    pub request_duration_seconds: HistogramVec,
    /// Requests answered with the canned reply
    pub trivial_requests_total: CounterVec,
    /// Upstream responses by HTTP status
    pub upstream_responses_total: CounterVec,

    /// Egress route rotations
    pub egress_rotations_total: Counter,
    /// Identities created, by kind
    pub identities_created_total: CounterVec,
    /// Identities evicted after an upstream failure
    pub identity_evictions_total: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("warpgate_requests_total", "Total number of client requests"),
            &["dialect", "outcome"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "warpgate_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ]),
            &["dialect"],
        )?;

        let trivial_requests_total = CounterVec::new(
            Opts::new(
                "warpgate_trivial_requests_total",
                "Requests answered without contacting the upstream",
            ),
            &["dialect"],
        )?;

        let upstream_responses_total = CounterVec::new(
            Opts::new(
                "warpgate_upstream_responses_total",
                "Upstream chat responses by HTTP status",
            ),
            &["status"],
        )?;

        let egress_rotations_total = Counter::with_opts(Opts::new(
            "warpgate_egress_rotations_total",
            "Number of times the active egress route was rotated",
        ))?;

        let identities_created_total = CounterVec::new(
            Opts::new(
                "warpgate_identities_created_total",
                "Identities created, by kind",
            ),
            &["kind"],
        )?;

        let identity_evictions_total = Counter::with_opts(Opts::new(
            "warpgate_identity_evictions_total",
            "Identities evicted after an upstream failure",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(trivial_requests_total.clone()))?;
        registry.register(Box::new(upstream_responses_total.clone()))?;
        registry.register(Box::new(egress_rotations_total.clone()))?;
        registry.register(Box::new(identities_created_total.clone()))?;
        registry.register(Box::new(identity_evictions_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_duration_seconds,
            trivial_requests_total,
            upstream_responses_total,
            egress_rotations_total,
            identities_created_total,
            identity_evictions_total,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished request
    pub fn record_request(&self, dialect: &str, outcome: RequestOutcome, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[dialect, outcome.as_str()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[dialect])
            .observe(duration_secs);
        if outcome == RequestOutcome::Trivial {
            self.trivial_requests_total
                .with_label_values(&[dialect])
                .inc();
        }
    }

    pub fn record_upstream_status(&self, status: u16) {
        self.upstream_responses_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    pub fn record_rotation(&self) {
        self.egress_rotations_total.inc();
    }

    pub fn record_identity_created(&self, kind: &str) {
        self.identities_created_total.with_label_values(&[kind]).inc();
    }

    pub fn record_eviction(&self) {
        self.identity_evictions_total.inc();
    }
}
