//! Window processor: periodic read-and-report over buffer snapshots.
//!
//! Cycle: Idle → Snapshotting → Computing → Publishing → Idle. The tick
//! is time-based (fixed interval); a tick arriving while a cycle is
//! still in flight is dropped, not queued. The processor never mutates
//! the buffer or the ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::buffer::EventBuffer;
use crate::config::RuleConfig;
use crate::event::FinancialEvent;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::metrics::MetricsCollector;
use crate::publish::{Outbound, Publisher};
use crate::rules::{self, RuleMatch};

/// Aggregate statistics over one snapshot. Recomputed wholly each tick
/// from the snapshot; never incrementally patched.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WindowStatistics {
    pub ts_ms: u64,
    pub count: usize,
    pub total_amount: f64,
    pub avg_amount: f64,
    pub variance: f64,
    pub throughput: f64,
}

impl WindowStatistics {
    pub fn compute(snapshot: &[FinancialEvent], interval_secs: u64) -> Self {
        let amounts: Vec<f64> = snapshot.iter().map(|e| e.amount).collect();
        let (avg_amount, variance) = crate::stats::sample_stats(&amounts);
        let total_amount: f64 = amounts.iter().sum();
        let throughput = if interval_secs > 0 {
            snapshot.len() as f64 / interval_secs as f64
        } else {
            0.0
        };
        Self {
            ts_ms: crate::event::now_ms(),
            count: snapshot.len(),
            total_amount,
            avg_amount,
            variance,
            throughput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Idle,
    Snapshotting,
    Computing,
    Publishing,
}

pub struct WindowProcessor {
    buffer: Arc<Mutex<EventBuffer>>,
    metrics: Arc<Mutex<MetricsCollector>>,
    publisher: Publisher,
    rule_cfg: RuleConfig,
    tick_secs: u64,
    in_flight: AtomicBool,
    phase: Mutex<WindowPhase>,
}

impl WindowProcessor {
    pub fn new(
        buffer: Arc<Mutex<EventBuffer>>,
        metrics: Arc<Mutex<MetricsCollector>>,
        publisher: Publisher,
        rule_cfg: RuleConfig,
        tick_secs: u64,
    ) -> Self {
        Self {
            buffer,
            metrics,
            publisher,
            rule_cfg,
            tick_secs,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(WindowPhase::Idle),
        }
    }

    pub fn phase(&self) -> WindowPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: WindowPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// One full cycle. Returns `None` when the trigger was dropped
    /// (cycle already in flight) or the cycle was cancelled before
    /// publishing. Results of a cancelled cycle are discarded.
    pub async fn run_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<(WindowStatistics, Vec<RuleMatch>)> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log(Level::Debug, Domain::Window, "tick_dropped", obj(&[]));
            return None;
        }

        self.set_phase(WindowPhase::Snapshotting);
        let snapshot = {
            let buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buf.snapshot()
        };

        self.set_phase(WindowPhase::Computing);
        let stats = WindowStatistics::compute(&snapshot, self.tick_secs);
        let matches = rules::evaluate(&snapshot, &self.rule_cfg);

        // Shutdown between compute and publish discards the cycle.
        if *shutdown.borrow() {
            self.set_phase(WindowPhase::Idle);
            self.in_flight.store(false, Ordering::SeqCst);
            return None;
        }

        {
            let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            m.record_window(stats.throughput, stats.variance);
        }

        self.set_phase(WindowPhase::Publishing);
        if !self.publisher.publish(Outbound::WindowProcessed(stats)).await {
            let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            m.record_publish_failure();
        }
        for m in &matches {
            log(
                Level::Info,
                Domain::Pattern,
                "matched",
                obj(&[
                    ("rule", v_str(m.rule.as_str())),
                    ("severity", v_str(m.severity.as_str())),
                    ("matched", v_num(m.events.len() as f64)),
                ]),
            );
            if !self.publisher.publish(Outbound::PatternMatch(m.clone())).await {
                let mut mm = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
                mm.record_publish_failure();
            }
        }

        log(
            Level::Info,
            Domain::Window,
            "processed",
            obj(&[
                ("count", v_num(stats.count as f64)),
                ("total_amount", v_num(stats.total_amount)),
                ("avg_amount", v_num(stats.avg_amount)),
                ("variance", v_num(stats.variance)),
                ("throughput", v_num(stats.throughput)),
                ("rules_fired", v_num(matches.len() as f64)),
            ]),
        );

        self.set_phase(WindowPhase::Idle);
        self.in_flight.store(false, Ordering::SeqCst);
        Some((stats, matches))
    }

    /// Periodic driver. Runs until the shutdown flag flips; the pending
    /// timer is cancelled cleanly by dropping out of the select.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.tick_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.run_cycle(&shutdown).await;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        log(Level::Info, Domain::Window, "shutdown", obj(&[]));
                        return;
                    }
                }
            }
        }
    }
}
