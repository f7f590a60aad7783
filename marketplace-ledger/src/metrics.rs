//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `marketplace_calls_total{entry_point}` - Committed calls
//! - `marketplace_rejections_total{entry_point, reason}` - Refused calls
//! - `marketplace_courses` - Courses in the registry
//! - `marketplace_balance` - Held balance (base units, as float)
//! - `marketplace_commit_duration_seconds` - Validate + persist latency

use prometheus::{Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed calls by entry point
    pub calls_total: IntCounterVec,

    /// Rejected calls by entry point and reason
    pub rejections_total: IntCounterVec,

    /// Number of courses
    pub courses: IntGauge,

    /// Held balance
    pub balance: Gauge,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let calls_total = IntCounterVec::new(
            Opts::new("marketplace_calls_total", "Committed calls"),
            &["entry_point"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("marketplace_rejections_total", "Rejected calls"),
            &["entry_point", "reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let courses = IntGauge::new("marketplace_courses", "Courses in the registry")?;
        registry.register(Box::new(courses.clone()))?;

        let balance = Gauge::new("marketplace_balance", "Held balance in base units")?;
        registry.register(Box::new(balance.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "marketplace_commit_duration_seconds",
                "Histogram of commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            calls_total,
            rejections_total,
            courses,
            balance,
            commit_duration,
            registry,
        })
    }

    /// Record a committed call
    pub fn record_commit(&self, entry_point: &str, duration_seconds: f64) {
        self.calls_total.with_label_values(&[entry_point]).inc();
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a rejected call
    pub fn record_rejection(&self, entry_point: &str, reason: &str) {
        self.rejections_total
            .with_label_values(&[entry_point, reason])
            .inc();
    }

    /// Update ledger gauges
    pub fn update_ledger(&self, courses: u64, balance: u128) {
        self.courses.set(i64::try_from(courses).unwrap_or(i64::MAX));
        self.balance.set(balance as f64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
