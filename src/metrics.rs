//! Running engine metrics: cumulative counters plus rolling latency and
//! the window-derived throughput / cash-flow variance. Query is pure.

use serde::Serialize;

use crate::stats::RollingWindow;

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMetrics {
    pub events_processed: u64,
    pub events_rejected: u64,
    pub scorer_fallbacks: u64,
    pub publish_failures: u64,
    pub average_latency_ms: f64,
    /// Events/sec over the most recent window tick.
    pub throughput: f64,
    /// Variance of amounts over the most recent window tick.
    pub cash_flow_variance: f64,
}

#[derive(Debug)]
pub struct MetricsCollector {
    events_processed: u64,
    events_rejected: u64,
    scorer_fallbacks: u64,
    publish_failures: u64,
    latency: RollingWindow,
    throughput: f64,
    cash_flow_variance: f64,
}

impl MetricsCollector {
    pub fn new(latency_window: usize) -> Self {
        Self {
            events_processed: 0,
            events_rejected: 0,
            scorer_fallbacks: 0,
            publish_failures: 0,
            latency: RollingWindow::new(latency_window),
            throughput: 0.0,
            cash_flow_variance: 0.0,
        }
    }

    /// One event fully scored and applied; `latency_ms` is ingestion to
    /// applied.
    pub fn record_processed(&mut self, latency_ms: f64) {
        self.events_processed += 1;
        self.latency.push(latency_ms);
    }

    pub fn record_rejected(&mut self) {
        self.events_rejected += 1;
    }

    pub fn record_scorer_fallback(&mut self) {
        self.scorer_fallbacks += 1;
    }

    pub fn record_publish_failure(&mut self) {
        self.publish_failures += 1;
    }

    /// Fed by the window processor each tick; per-tick values replace,
    /// never accumulate.
    pub fn record_window(&mut self, throughput: f64, cash_flow_variance: f64) {
        self.throughput = throughput;
        self.cash_flow_variance = cash_flow_variance;
    }

    pub fn query(&self) -> RealtimeMetrics {
        RealtimeMetrics {
            events_processed: self.events_processed,
            events_rejected: self.events_rejected,
            scorer_fallbacks: self.scorer_fallbacks,
            publish_failures: self.publish_failures,
            average_latency_ms: if self.latency.is_empty() { 0.0 } else { self.latency.mean() },
            throughput: self.throughput,
            cash_flow_variance: self.cash_flow_variance,
        }
    }
}
